// Shared SQLite connection pool for every economy table.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Open (and create if needed) the database behind `database_url`.
///
/// Accepts either a full `sqlite://` URL or a plain file path.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let conn_str = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite://{}", database_url)
    };

    // Keep runtime databases in their own folder so the working directory stays tidy.
    let path_str = conn_str.trim_start_matches("sqlite://");
    if !conn_str.contains(":memory:") {
        if let Some(parent) = Path::new(path_str).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&conn_str)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    tracing::info!(database = %conn_str, max_connections, "Connected to economy database");
    Ok(pool)
}
