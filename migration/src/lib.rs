//! Database migrations for the promo-code sync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_sync_jobs;
mod m2026_10_01_000002_create_promo_codes;
mod m2026_10_01_000003_create_collections;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_sync_jobs::Migration),
            Box::new(m2026_10_01_000002_create_promo_codes::Migration),
            Box::new(m2026_10_01_000003_create_collections::Migration),
        ]
    }
}
