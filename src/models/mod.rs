//! # Data Models
//!
//! SeaORM entities persisted by the sync engine.

pub mod collection;
pub mod promo_code;
pub mod sync_job;

pub use collection::Entity as Collection;
pub use promo_code::Entity as PromoCode;
pub use sync_job::Entity as SyncJob;
pub use sync_job::{SyncJobStatus, SyncTrigger};
