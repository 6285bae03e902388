use deadpool::managed::{self, Pool, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};

/// deadpool manager over a local libsql database file.
pub struct StoreManager {
    database: Database,
}

impl StoreManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for StoreManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // Cascading deletes (target removal) rely on this per-connection pragma.
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        conn.query("SELECT 1", ())
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        Ok(())
    }
}

pub type StorePool = Pool<StoreManager>;
