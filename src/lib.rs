//! # Promo Sync Library
//!
//! Mirrors Shopify price rules and discount codes into a local store: a
//! rate-limited fetcher, a pull-based page walker, an idempotent writer, a
//! persisted single-flight job ledger and the scheduler that triggers runs.
//! The storefront collection list is mirrored the same way on its own schedule.

pub mod collection_sync;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod page_walker;
pub mod repositories;
pub mod scheduler;
pub mod shopify;
pub mod sync_executor;
pub mod telemetry;
pub use migration;
