//! Shopify Admin API access: the rate-limited fetcher and the wire types it
//! decodes.

pub mod client;
pub mod types;

pub use client::{ShopifyClient, next_page_link};
pub use types::{CollectionImage, Page, RemoteCode, RemoteCollection, RemoteRule};
