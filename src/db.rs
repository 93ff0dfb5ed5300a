//! Connection pool construction.

use std::time::Duration;

use anyhow::{Context, Result};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use r2d2::Pool;

use crate::config::DatabaseConfig;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Build the Diesel/r2d2 pool from validated configuration.
///
/// `connect_timeout` is passed to libpq through the URL because r2d2 only
/// bounds checkout waits, not the TCP handshake.
pub fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = url_with_connect_timeout(&config.url, config.connect_timeout_seconds);
    let manager = ConnectionManager::<PgConnection>::new(url);

    Pool::builder()
        .max_size(config.max_connections())
        .connection_timeout(Duration::from_secs(config.pool_timeout_seconds))
        .max_lifetime(Some(Duration::from_secs(config.pool_recycle_seconds)))
        .build(manager)
        .context("failed to build database connection pool")
}

fn url_with_connect_timeout(url: &str, connect_timeout_seconds: u64) -> String {
    if url.contains("connect_timeout=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}connect_timeout={}", url, separator, connect_timeout_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_appended() {
        assert_eq!(
            url_with_connect_timeout("postgres://u:p@host/db", 30),
            "postgres://u:p@host/db?connect_timeout=30"
        );
        assert_eq!(
            url_with_connect_timeout("postgres://u:p@host/db?sslmode=require", 10),
            "postgres://u:p@host/db?sslmode=require&connect_timeout=10"
        );
        assert_eq!(
            url_with_connect_timeout("postgres://u:p@host/db?connect_timeout=5", 10),
            "postgres://u:p@host/db?connect_timeout=5"
        );
    }
}
