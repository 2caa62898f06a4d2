use std::env;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

/// Connection for `#[ignore]`d integration tests. Prefers TEST_DATABASE_URL
/// so a scratch database can sit next to the dev one.
pub async fn setup_conn() -> DatabaseConnection {
    dotenvy::dotenv().ok();
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .expect("TEST_DATABASE_URL or DATABASE_URL is not set in .env file");
    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    Database::connect(db_options)
        .await
        .expect("Database connection failed")
}
