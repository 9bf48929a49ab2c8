//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the
//! schema from version N to N+1 inside one transaction.

use rusqlite::Connection;

use keyward_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: users, resources and memberships.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Per-user key material. Escrow ciphertext, salt and PIN hash are
        -- written together or not at all.
        CREATE TABLE users (
            user_id BLOB PRIMARY KEY,          -- 16 bytes
            public_key BLOB NOT NULL,          -- 32 bytes, X25519
            escrow_ciphertext BLOB,            -- nonce || ciphertext || tag
            escrow_salt BLOB,                  -- 16 bytes
            pin_hash TEXT,                     -- Argon2id PHC string
            updated_at INTEGER NOT NULL,

            CHECK ((escrow_ciphertext IS NULL) = (pin_hash IS NULL)),
            CHECK ((escrow_ciphertext IS NULL) = (escrow_salt IS NULL))
        );

        -- Shared resources (sheets and rooms)
        CREATE TABLE resources (
            resource_id BLOB PRIMARY KEY,      -- 16 bytes
            kind TEXT NOT NULL CHECK (kind IN ('sheet', 'group_room', 'direct_room')),
            creator_id BLOB NOT NULL,          -- immutable provenance
            created_at INTEGER NOT NULL        -- Unix ms
        );

        -- One row per (user, resource), each with its own wrapped key
        CREATE TABLE memberships (
            user_id BLOB NOT NULL,
            resource_id BLOB NOT NULL REFERENCES resources(resource_id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('owner', 'editor', 'viewer')),
            wrapped_key BLOB NOT NULL CHECK (length(wrapped_key) > 0),
            is_favorite INTEGER NOT NULL DEFAULT 0,
            last_accessed_at INTEGER,

            PRIMARY KEY (user_id, resource_id)
        );

        CREATE INDEX idx_memberships_resource ON memberships(resource_id);
        CREATE INDEX idx_resources_created ON resources(created_at);
        "#,
    )?;

    Ok(())
}

/// Migration v2: external locator on resources.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE resources ADD COLUMN link TEXT;

        CREATE INDEX idx_resources_link ON resources(link) WHERE link IS NOT NULL;
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"resources".to_string()));
        assert!(tables.contains(&"memberships".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_v1_database_upgrades() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
            [],
        )
        .unwrap();
        apply_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (1, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO resources (resource_id, kind, creator_id, created_at)
             VALUES (x'01', 'sheet', x'02', 0)",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();

        let link: Option<String> = conn
            .query_row("SELECT link FROM resources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(link, None);
    }

    #[test]
    fn test_escrow_check_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        // Ciphertext without a PIN hash violates the both-or-neither rule.
        let result = conn.execute(
            "INSERT INTO users (user_id, public_key, escrow_ciphertext, escrow_salt, updated_at)
             VALUES (x'00', x'01', x'02', x'03', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
