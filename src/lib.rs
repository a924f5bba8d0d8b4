//! Hyperlocal - feed ingestion and personalized local news
//!
//! This crate polls RSS sources owned by local organisations, merges their
//! items into a deduplicated article store, and serves each user a ranked
//! feed built from the tags and organisations they follow and where they live.

pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod feed;
pub mod ingest;
pub mod models;
pub mod policy;
pub mod poller;
pub mod predicate;
pub mod relations;
pub mod routes;
