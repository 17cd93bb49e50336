pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fasta;
pub mod fs_util;
pub mod http;
pub mod keycache;
pub mod oauth;
pub mod output;
pub mod providers;
pub mod retry;
pub mod scrape;
pub mod store;
