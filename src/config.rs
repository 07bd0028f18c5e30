use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::debounce::DEFAULT_SETTLE;
use crate::tmdb::TMDB_BASE;

pub const REQUIRED_VARS: [&str; 1] = ["TMDB_API_KEY"];

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub listen: SocketAddr,
    pub favorites_dir: PathBuf,
    pub search_settle: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any variable source; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tmdb_api_key = get("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        let tmdb_base_url = get("TMDB_BASE_URL").unwrap_or_else(|| TMDB_BASE.to_string());
        let listen = match get("MARQUEE_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("MARQUEE_ADDR is not a socket address: {}", addr))?,
            None => SocketAddr::from(([0, 0, 0, 0], 3146)),
        };
        let favorites_dir = get("FAVORITES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let search_settle = match get("SEARCH_SETTLE_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("SEARCH_SETTLE_MS is not a number: {}", ms))?,
            ),
            None => DEFAULT_SETTLE,
        };

        Ok(Self {
            tmdb_api_key,
            tmdb_base_url,
            listen,
            favorites_dir,
            search_settle,
        })
    }
}
