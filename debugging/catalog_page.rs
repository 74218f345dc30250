//! Fetch pages of a category or search and print the composed list.
//! Usage:
//!   cargo run --bin catalog_page -- popular [pages] [sort] [genre_id,...]
//!   cargo run --bin catalog_page -- search "<text>" [pages] [sort]
//! Requires TMDB_API_TOKEN in the environment (.env supported).

use anyhow::{Context, Result};
use cinescroll::compose::{compose, FilterState, SortKey};
use cinescroll::config::TmdbConfig;
use cinescroll::paging::{Feed, FetchOutcome};
use cinescroll::query::{Category, QueryKey};
use cinescroll::tmdb::{CatalogApi, TmdbClient};
use dotenvy::dotenv;
use serde_json::json;
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin catalog_page -- <popular|now-playing|top-rated> [pages] [sort] [genres]");
        eprintln!("       cargo run --bin catalog_page -- search <text> [pages] [sort]");
        std::process::exit(1);
    }

    let (key, rest) = if args[1] == "search" {
        let text = args
            .get(2)
            .ok_or_else(|| anyhow::anyhow!("missing search text"))?;
        (QueryKey::resolve(Category::Popular, text), &args[3..])
    } else {
        (QueryKey::Browse(args[1].parse()?), &args[2..])
    };
    let pages: u32 = match rest.first() {
        Some(v) => v.parse().context("pages must be an integer")?,
        None => 1,
    };
    let sort: SortKey = match rest.get(1) {
        Some(v) => v.parse()?,
        None => SortKey::default(),
    };
    let genres = match rest.get(2) {
        Some(list) => list
            .split(',')
            .map(|g| g.trim().parse::<i64>().context("genre ids must be integers"))
            .collect::<Result<_>>()?,
        None => Default::default(),
    };

    let client: Arc<dyn CatalogApi> = Arc::new(TmdbClient::new(&TmdbConfig::from_env()?)?);
    let feed = Feed::new(client, key.clone());
    for _ in 0..pages {
        match feed.fetch_next().await {
            FetchOutcome::Appended { .. } => {}
            FetchOutcome::Failed(message) => anyhow::bail!("{}", message),
            _ => break,
        }
    }

    let snapshot = feed.snapshot();
    let filter = FilterState { genres, sort };
    let composed = compose(&snapshot.items, &filter);
    let rows: Vec<_> = composed
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "title": m.title,
                "release_date": m.release_date,
                "popularity": m.popularity,
                "vote_average": m.vote_average,
                "genre_ids": m.genre_ids,
            })
        })
        .collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "key": key.to_string(),
            "loaded": snapshot.items.len(),
            "shown": rows.len(),
            "has_more": snapshot.has_more,
            "sort": filter.sort.as_str(),
            "movies": rows,
        }))?
    );
    Ok(())
}
