use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations.
///
/// This is the single source of truth for the schema. The UI layer reads and
/// writes through the same tables but never alters them.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Targets, status and check history").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Vulnerabilities and ignore list").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();

    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: targets, per-target status, append-only check history.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            group_id TEXT NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            interval_seconds INTEGER NOT NULL DEFAULT 60,
            failure_threshold INTEGER NOT NULL DEFAULT 3,
            alert_channel TEXT NOT NULL DEFAULT '',
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // 1:1 with targets; the status tracker is the only writer
    conn.execute(
        "CREATE TABLE IF NOT EXISTS target_status (
            target_uuid TEXT PRIMARY KEY,
            is_up INTEGER NOT NULL DEFAULT 1,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            last_status_code INTEGER,
            last_checked_at INTEGER NOT NULL,
            last_alert_sent_at INTEGER,
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS check_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_uuid TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            status_code INTEGER,
            is_up INTEGER NOT NULL,
            response_time_ms INTEGER NOT NULL,
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_uuid ON targets(uuid)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_enabled ON targets(enabled)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_targets_group ON targets(group_id)", ()).await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_history_target_timestamp ON check_history(target_uuid, timestamp DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_check_history_timestamp ON check_history(timestamp)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: vulnerability records (tombstoned, never deleted) and the
/// per-target ignore list.
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    // No UNIQUE(target_uuid, cve_id): a CVE that was resolved and later
    // reappears is a brand-new active record. Activity is resolved = 0.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS vulnerabilities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_uuid TEXT NOT NULL,
            cve_id TEXT NOT NULL,
            technology TEXT NOT NULL DEFAULT '',
            version TEXT NOT NULL DEFAULT '',
            severity TEXT NOT NULL,
            score REAL NOT NULL DEFAULT 0,
            source TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            reference_url TEXT NOT NULL DEFAULT '',
            first_seen_at INTEGER NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            resolved_at INTEGER,
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vulnerability_ignores (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_uuid TEXT NOT NULL,
            cve_id TEXT NOT NULL,
            ignored_by TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE (target_uuid, cve_id),
            FOREIGN KEY (target_uuid) REFERENCES targets(uuid) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_vulnerabilities_target_resolved ON vulnerabilities(target_uuid, resolved)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_vulnerabilities_cve ON vulnerabilities(cve_id)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_vulnerability_ignores_target ON vulnerability_ignores(target_uuid)",
        (),
    )
    .await?;

    Ok(())
}
