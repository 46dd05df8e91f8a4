//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;
use std::time::Duration;

use super::migrations;

/// Configuration for connecting to the hosted backend as an embedded replica
#[derive(Debug, Clone, Default)]
pub struct ReplicaConfig {
    /// Remote database URL (e.g., `libsql://your-db.turso.io`)
    pub url: Option<String>,
    /// Authentication token for remote database
    pub auth_token: Option<String>,
    /// Automatic sync interval (default: 60 seconds)
    pub sync_interval: Option<Duration>,
}

impl ReplicaConfig {
    /// Create a new replica configuration
    pub fn new(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            auth_token: Some(auth_token.into()),
            sync_interval: Some(Duration::from_secs(60)),
        }
    }

    /// Set the automatic sync interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Check if the replica is configured
    pub const fn is_configured(&self) -> bool {
        self.url.is_some() && self.auth_token.is_some()
    }
}

/// Database wrapper for libSQL connections
pub struct Database {
    db: LibSqlDatabase,
    conn: Connection,
    replica_config: Option<ReplicaConfig>,
}

impl Database {
    /// Open a local-only database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            replica_config: None,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            replica_config: None,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open a database that replicates the hosted backend locally
    ///
    /// Reads are served from the local file; writes go to the remote and
    /// sync back.
    pub async fn open_replica(
        local_path: impl AsRef<Path>,
        replica_config: ReplicaConfig,
    ) -> Result<Self> {
        let path_str = local_path.as_ref().to_string_lossy().to_string();

        let url = replica_config
            .url
            .as_ref()
            .ok_or_else(|| crate::error::Error::InvalidInput("Replica URL is required".into()))?;
        let token = replica_config
            .auth_token
            .as_ref()
            .ok_or_else(|| crate::error::Error::InvalidInput("Auth token is required".into()))?;

        let mut builder = Builder::new_remote_replica(&path_str, url.clone(), token.clone());
        if let Some(interval) = replica_config.sync_interval {
            builder = builder.sync_interval(interval);
            tracing::debug!("Automatic sync interval set to {:?}", interval);
        }

        let db = builder.build().await?;
        let conn = db.connect()?;

        let database = Self {
            db,
            conn,
            replica_config: Some(replica_config),
        };

        // Pull remote schema first so migrations see current state
        database.refresh().await?;
        database.configure().await?;
        database.migrate().await?;

        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // Some pragmas may not work with remote replicas
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Pull changes from the hosted backend (if configured)
    pub async fn refresh(&self) -> Result<()> {
        if self.replica_config.is_some() {
            self.db.sync().await?;
            tracing::debug!("Replica refreshed from remote");
        }
        Ok(())
    }

    /// Check if the database replicates a remote
    pub const fn is_replica(&self) -> bool {
        self.replica_config.is_some()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}
