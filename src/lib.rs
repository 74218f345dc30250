pub mod app;
pub mod compose;
pub mod config;
pub mod history;
pub mod models;
pub mod paging;
pub mod query;
pub mod scroll;
pub mod session;
pub mod storage;
pub mod tmdb;
pub mod watchlist;
