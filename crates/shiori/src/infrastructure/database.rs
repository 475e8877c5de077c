use std::{
    ops::{Deref, DerefMut},
    path::Path,
    time::Duration,
};

use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};

#[derive(Clone)]
pub struct Pool(SqlitePool);

impl From<SqlitePool> for Pool {
    fn from(pool: SqlitePool) -> Self {
        Self(pool)
    }
}

impl Deref for Pool {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Pool {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub async fn establish_connection<P: AsRef<Path>>(
    database_path: P,
    create: bool,
) -> Result<Pool, anyhow::Error> {
    let opts = SqliteConnectOptions::new()
        .create_if_missing(create)
        .filename(database_path)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(3 * 60))
        .connect_with(opts)
        .await?;

    migrate(&pool).await?;

    Ok(Pool(pool))
}

/// Single connection pool on a private in-memory database
pub async fn establish_memory_connection() -> Result<Pool, anyhow::Error> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    // every connection of an in-memory database sees a different database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await?;

    migrate(&pool).await?;

    Ok(Pool(pool))
}

async fn migrate(pool: &SqlitePool) -> Result<(), anyhow::Error> {
    match sqlx::migrate!("./migrations").run(pool).await {
        Err(MigrateError::VersionMismatch(version)) => {
            warn!("migration {version} was previously applied but has been modified")
        }
        Err(e) => {
            return Err(e.into());
        }
        _ => {}
    }

    Ok(())
}
