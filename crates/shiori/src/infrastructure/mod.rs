pub mod archive;
pub mod chapter_cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod download_cache;
pub mod download_provider;
pub mod download_store;
pub mod images;
pub mod local;
pub mod sources;
