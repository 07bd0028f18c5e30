//! Walk the discover feed for a filter query string and print each page.
//! Usage:
//!   cargo run --bin tmdb_pages -- "q=batman" [max_pages]
//!   cargo run --bin tmdb_pages -- "genres=28&fromYear=2020&toYear=2020" 3
//!   cargo run --bin tmdb_pages -- movie <tmdb_id>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use marquee::filters::QueryCodec;
use marquee::loader::{LoadOutcome, MovieLoader};
use marquee::tmdb::{TmdbApi, TmdbClient};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin tmdb_pages -- <filter query> [max_pages]");
        eprintln!("       cargo run --bin tmdb_pages -- movie <tmdb_id>");
        std::process::exit(1);
    }

    let tmdb = Arc::new(TmdbClient::from_env()?);

    if args[1] == "movie" {
        let id: i32 = args
            .get(2)
            .ok_or_else(|| anyhow::anyhow!("missing tmdb_id"))?
            .parse()
            .context("tmdb_id must be an integer")?;
        match tmdb.fetch_movie(id).await? {
            Some(movie) => println!("{}", serde_json::to_string_pretty(&movie)?),
            None => println!("movie {} not found", id),
        }
        return Ok(());
    }

    let max_pages: u32 = match args.get(2) {
        Some(n) => n.parse().context("max_pages must be an integer")?,
        None => 2,
    };

    let codec = QueryCodec::current();
    let state = codec.decode(&args[1]);
    println!("canonical: {}", codec.href("/discover", &state));

    let loader = MovieLoader::new(tmdb, codec);
    loader.navigate(state).await;
    for _ in 0..max_pages {
        match loader.load_next().await {
            LoadOutcome::Appended { page, added } => {
                let snap = loader.snapshot().await;
                println!(
                    "page {}/{}: +{} ({} total, {} results upstream)",
                    page,
                    snap.total_pages,
                    added,
                    snap.movies.len(),
                    snap.total_results
                );
            }
            LoadOutcome::Exhausted => {
                println!("no more pages");
                break;
            }
            LoadOutcome::Failed => {
                let snap = loader.snapshot().await;
                anyhow::bail!("load failed: {}", snap.error.unwrap_or_default());
            }
            other => println!("{:?}", other),
        }
    }

    for movie in loader.snapshot().await.movies {
        println!(
            "{:>8}  {:<4}  {:>4.1}  {}",
            movie.id,
            movie
                .release_year()
                .map(|y| y.to_string())
                .unwrap_or_default(),
            movie.vote_average,
            movie.title
        );
    }
    Ok(())
}
