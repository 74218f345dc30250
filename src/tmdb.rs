use crate::config::TmdbConfig;
use crate::models::{Credits, Genre, GenreList, MovieDetail, Page, Reviews, Videos};
use crate::query::{Category, QueryKey};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_category(&self, category: Category, page: u32) -> Result<Page>;
    async fn search(&self, query: &str, page: u32) -> Result<Page>;
    async fn genres(&self) -> Result<Vec<Genre>>;
    async fn movie_detail(&self, id: i64) -> Result<MovieDetail>;
    async fn credits(&self, id: i64) -> Result<Credits>;
    async fn videos(&self, id: i64) -> Result<Videos>;
    async fn reviews(&self, id: i64, page: u32) -> Result<Reviews>;
}

/// Fetches one page of whatever stream `key` names.
pub async fn fetch_page(api: &dyn CatalogApi, key: &QueryKey, page: u32) -> Result<Page> {
    match key {
        QueryKey::Browse(category) => api.list_category(*category, page).await,
        QueryKey::Search(text) => api.search(text, page).await,
    }
}

#[derive(Debug, Clone)]
pub struct MovieBundle {
    pub detail: MovieDetail,
    pub credits: Credits,
    pub videos: Videos,
    pub reviews: Reviews,
}

pub async fn fetch_movie_bundle(api: &dyn CatalogApi, id: i64) -> Result<MovieBundle> {
    let (detail, credits, videos, reviews) = tokio::try_join!(
        api.movie_detail(id),
        api.credits(id),
        api.videos(id),
        api.reviews(id, 1),
    )?;
    Ok(MovieBundle {
        detail,
        credits,
        videos,
        reviews,
    })
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    base_url: String,
    token: String,
    language: String,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig) -> Result<Self> {
        let user_agent = format!("cinescroll/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            language: config.language.clone(),
        })
    }

    fn list_url(&self, path: &str, page: u32, extra: &str) -> String {
        format!(
            "{}{path}?page={page}{extra}&language={}&include_adult=false",
            self.base_url, self.language
        )
    }

    fn detail_url(&self, path: &str) -> String {
        format!("{}{path}?language={}", self.base_url, self.language)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let res = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("TMDB API error: {} {} -> {}", status, url, text));
        }
        let parsed: T = serde_json::from_str(&text).context("JSON parse failed")?;
        Ok(parsed)
    }
}

fn category_path(category: Category) -> &'static str {
    match category {
        Category::Popular => "/movie/popular",
        Category::NowPlaying => "/movie/now_playing",
        Category::TopRated => "/movie/top_rated",
    }
}

#[async_trait]
impl CatalogApi for TmdbClient {
    async fn list_category(&self, category: Category, page: u32) -> Result<Page> {
        let url = self.list_url(category_path(category), page, "");
        self.get_json(&url).await
    }

    async fn search(&self, query: &str, page: u32) -> Result<Page> {
        let extra = format!("&query={}", urlencoding::encode(query));
        let url = self.list_url("/search/movie", page, &extra);
        self.get_json(&url).await
    }

    async fn genres(&self) -> Result<Vec<Genre>> {
        let url = self.detail_url("/genre/movie/list");
        let data: GenreList = self.get_json(&url).await?;
        Ok(data.genres)
    }

    async fn movie_detail(&self, id: i64) -> Result<MovieDetail> {
        let url = self.detail_url(&format!("/movie/{id}"));
        self.get_json(&url).await
    }

    async fn credits(&self, id: i64) -> Result<Credits> {
        let url = self.detail_url(&format!("/movie/{id}/credits"));
        self.get_json(&url).await
    }

    async fn videos(&self, id: i64) -> Result<Videos> {
        let url = self.detail_url(&format!("/movie/{id}/videos"));
        self.get_json(&url).await
    }

    async fn reviews(&self, id: i64, page: u32) -> Result<Reviews> {
        let url = format!(
            "{}/movie/{id}/reviews?page={page}&language={}",
            self.base_url, self.language
        );
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TmdbClient {
        TmdbClient::new(&TmdbConfig {
            base_url: "https://api.themoviedb.org/3/".to_string(),
            token: "token".to_string(),
            language: "zh-TW".to_string(),
        })
        .expect("client builds")
    }

    #[test]
    fn builds_list_urls_per_category() {
        let c = client();
        assert_eq!(
            c.list_url(category_path(Category::NowPlaying), 2, ""),
            "https://api.themoviedb.org/3/movie/now_playing?page=2&language=zh-TW&include_adult=false"
        );
        assert_eq!(category_path(Category::TopRated), "/movie/top_rated");
    }

    #[test]
    fn search_text_is_url_encoded() {
        let c = client();
        let extra = format!("&query={}", urlencoding::encode("dune part two"));
        assert_eq!(
            c.list_url("/search/movie", 1, &extra),
            "https://api.themoviedb.org/3/search/movie?page=1&query=dune%20part%20two&language=zh-TW&include_adult=false"
        );
    }
}
