use crate::filters::DiscoverQuery;
use crate::models::{Genre, MovieDetails, MoviePage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn search_movies(&self, query: &str, page: u32) -> Result<MoviePage>;
    async fn discover_movies(&self, filters: &DiscoverQuery, page: u32) -> Result<MoviePage>;
    /// `Ok(None)` when TMDB does not know the id.
    async fn fetch_movie(&self, id: i32) -> Result<Option<MovieDetails>>;
    async fn fetch_genres(&self) -> Result<Vec<Genre>>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let user_agent = format!("marquee/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").context("TMDB_API_KEY not set")?;
        let base_url = env::var("TMDB_BASE_URL").unwrap_or_else(|_| TMDB_BASE.to_string());
        Self::new(api_key, base_url)
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!(
            "{}{}?api_key={}&language=en-US",
            self.base_url, path, self.api_key
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        self.get_json_opt(url)
            .await?
            .ok_or_else(|| anyhow!("TMDB resource not found"))
    }

    /// Like `get_json`, but a 404 comes back as `Ok(None)` instead of an error.
    async fn get_json_opt<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<Option<T>> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("TMDB request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading TMDB body failed")?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("TMDB HTTP error (status {}): {}", status, text));
        }
        let parsed: T = serde_json::from_str(&text).context("TMDB JSON parse failed")?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn search_movies(&self, query: &str, page: u32) -> Result<MoviePage> {
        let url = self.url("/search/movie", &search_params(query, page));
        debug!("TMDB search '{}' page {}", query, page);
        self.get_json(&url).await
    }

    async fn discover_movies(&self, filters: &DiscoverQuery, page: u32) -> Result<MoviePage> {
        let url = self.url("/discover/movie", &discover_params(filters, page));
        debug!("TMDB discover {:?} page {}", filters, page);
        self.get_json(&url).await
    }

    async fn fetch_movie(&self, id: i32) -> Result<Option<MovieDetails>> {
        let url = self.url(&format!("/movie/{id}"), &[]);
        self.get_json_opt(&url).await
    }

    async fn fetch_genres(&self) -> Result<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreList {
            genres: Vec<Genre>,
        }

        let url = self.url("/genre/movie/list", &[]);
        let data: GenreList = self.get_json(&url).await?;
        Ok(data.genres)
    }
}

fn search_params(query: &str, page: u32) -> Vec<(&'static str, String)> {
    vec![
        ("query", query.to_string()),
        ("page", page.to_string()),
        ("include_adult", "false".to_string()),
    ]
}

pub fn discover_params(filters: &DiscoverQuery, page: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", page.to_string()),
        ("include_adult", "false".to_string()),
        ("sort_by", filters.sort.tmdb_key().to_string()),
    ];
    if !filters.genres.is_empty() {
        let joined = filters
            .genres
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(",");
        params.push(("with_genres", joined));
    }
    if let Some(year) = filters.from_year {
        params.push(("primary_release_date.gte", format!("{year}-01-01")));
    }
    if let Some(year) = filters.to_year {
        params.push(("primary_release_date.lte", format!("{year}-12-31")));
    }
    if let Some(rating) = filters.min_rating {
        params.push(("vote_average.gte", rating.to_string()));
    }
    if let Some(rating) = filters.max_rating {
        params.push(("vote_average.lte", rating.to_string()));
    }
    params
}

/// Genre list shared by every request. Only a successful fetch is kept, so a
/// failed first attempt is retried on the next call.
#[derive(Default)]
pub struct CachedGenres {
    cell: OnceCell<Vec<Genre>>,
}

impl CachedGenres {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, tmdb: &dyn TmdbApi) -> Result<&[Genre]> {
        let genres = self
            .cell
            .get_or_try_init(|| async move {
                let genres = tmdb.fetch_genres().await?;
                info!("Cached {} TMDB genres", genres.len());
                Ok::<_, anyhow::Error>(genres)
            })
            .await?;
        Ok(genres.as_slice())
    }
}

pub fn parse_tmdb_id(input: &str) -> Option<i32> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok();
    }
    None
}
