pub use sea_orm_migration::prelude::*;

mod m20250212_000001_create_users_and_folders;
mod m20250218_000002_create_email_queue;
mod m20250224_000003_create_workflow_tables;
mod m20250302_000004_create_indexing_and_audit;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250212_000001_create_users_and_folders::Migration),
            Box::new(m20250218_000002_create_email_queue::Migration),
            Box::new(m20250224_000003_create_workflow_tables::Migration),
            Box::new(m20250302_000004_create_indexing_and_audit::Migration),
        ]
    }
}
