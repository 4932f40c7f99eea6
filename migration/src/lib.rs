pub use sea_orm_migration::prelude::*;

pub mod entities;
mod m20250301_000001_referrals;
mod m20250301_000002_tracking_events;
mod m20250302_000001_attribution_rollups;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_referrals::Migration),
            Box::new(m20250301_000002_tracking_events::Migration),
            Box::new(m20250302_000001_attribution_rollups::Migration),
        ]
    }
}
