//! Split reader/writer SQLite pools in WAL mode.
//!
//! SQLite serializes writers, so funnelling all mutations through a
//! single-connection writer pool avoids `SQLITE_BUSY` churn while a wider
//! reader pool serves concurrent queries. Migrations run once against the
//! writer before the reader opens.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Connections in the read pool.
const READER_CONNECTIONS: u32 = 8;

/// How long a connection waits on a locked database before erroring.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Paired SQLite pools: many readers, one writer.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools against `database_url` and apply pending migrations.
    ///
    /// The database file is created if missing. Both pools run in WAL mode
    /// with foreign keys on.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = connect_options(database_url)?;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true))
}

/// Database URL under `STAGECRAFT_DATA_DIR`, defaulting to `~/.stagecraft`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("STAGECRAFT_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.stagecraft")
    });
    format!("sqlite://{data_dir}/stagecraft.db")
}
