use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

const DEFAULT_API_URL: &str = "https://api.themoviedb.org/3";
const DEFAULT_LANGUAGE: &str = "zh-TW";
const DEFAULT_ADDR: &str = "0.0.0.0:3147";
const DEFAULT_DATA_PATH: &str = "data/cinescroll.json";
const DEFAULT_SCROLL_MARGIN: f64 = 200.0;

#[derive(Debug, Clone)]
pub struct TmdbConfig {
    pub base_url: String,
    pub token: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb: TmdbConfig,
    pub addr: SocketAddr,
    pub data_path: PathBuf,
    /// Pixels below the viewport at which the scroll sentinel counts as visible.
    pub scroll_margin: f64,
}

impl TmdbConfig {
    pub fn from_env() -> Result<Self> {
        let token = env::var("TMDB_API_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .context("Missing required environment variable: TMDB_API_TOKEN")?;
        Ok(Self {
            base_url: env_or("TMDB_API_URL", DEFAULT_API_URL),
            token,
            language: env_or("TMDB_LANGUAGE", DEFAULT_LANGUAGE),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tmdb = TmdbConfig::from_env()?;
        let addr = env_or("CINESCROLL_ADDR", DEFAULT_ADDR)
            .parse()
            .context("CINESCROLL_ADDR is not a socket address")?;
        let data_path = PathBuf::from(env_or("CINESCROLL_DATA", DEFAULT_DATA_PATH));
        let scroll_margin = match env::var("CINESCROLL_SCROLL_MARGIN") {
            Ok(v) => v
                .parse()
                .context("CINESCROLL_SCROLL_MARGIN must be a number of pixels")?,
            Err(_) => DEFAULT_SCROLL_MARGIN,
        };
        info!(
            "Config: api={} language={} data={}",
            tmdb.base_url,
            tmdb.language,
            data_path.display()
        );
        Ok(Self {
            tmdb,
            addr,
            data_path,
            scroll_margin,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}
