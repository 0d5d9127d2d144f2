//! # Repository Layer
//!
//! SeaORM access to the sync ledger and the local promo-code and collection
//! mirrors.

pub mod collection;
pub mod promo_code;
pub mod sync_job;

pub use collection::CollectionRepository;
pub use promo_code::PromoCodeRepository;
pub use sync_job::{JobProgress, SyncJobRepository};
