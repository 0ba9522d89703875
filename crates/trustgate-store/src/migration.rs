//! Database schema migrations for SQLite.
//!
//! Each migration is a SQL batch that moves the schema from version N to N+1.
//! The tables of v1 are the on-disk contract with existing deployments; later
//! versions may only add to them.

use rusqlite::Connection;
use trustgate_core::Timestamp;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
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

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, Timestamp::now().as_secs()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
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

/// Migration v1: the persisted identity, trust and vault layout.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Rotation chains; change_history is the CBOR event sequence
        CREATE TABLE identity (
            identifier TEXT NOT NULL UNIQUE,
            change_history BLOB NOT NULL
        );

        CREATE TABLE identity_enrollment (
            identifier TEXT NOT NULL UNIQUE,
            enrolled_at INTEGER NOT NULL
        );

        -- Newest attestation per identity
        CREATE TABLE identity_attributes (
            identifier TEXT PRIMARY KEY,
            attributes BLOB NOT NULL,
            added INTEGER NOT NULL,
            expires INTEGER,
            attested_by TEXT
        );

        CREATE TABLE purpose_key (
            identifier TEXT NOT NULL,
            purpose TEXT NOT NULL,
            purpose_key_attestation BLOB NOT NULL
        );

        CREATE INDEX purpose_key_index ON purpose_key (identifier, purpose);

        CREATE TABLE policy (
            resource TEXT NOT NULL,
            action TEXT NOT NULL,
            expression BLOB NOT NULL
        );

        CREATE TABLE authority (
            identifier TEXT NOT NULL UNIQUE PRIMARY KEY,
            address TEXT NOT NULL,
            identity BLOB NOT NULL
        );

        CREATE TABLE vault (
            name TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            is_aws_kms INTEGER NOT NULL,
            is_default INTEGER NOT NULL
        );

        CREATE TABLE signing_secret (
            handle BLOB NOT NULL UNIQUE PRIMARY KEY,
            secret_type TEXT NOT NULL,
            secret BLOB NOT NULL
        );

        CREATE TABLE x25519_secret (
            handle BLOB NOT NULL UNIQUE PRIMARY KEY,
            secret BLOB NOT NULL
        );
        "#,
    )?;

    Ok(())
}

/// Migration v2: attestation history and one policy per (resource, action).
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Every attestation ever recorded, in write order
        CREATE TABLE attribute_attestation (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL,
            attributes BLOB NOT NULL,
            added INTEGER NOT NULL,
            expires INTEGER,
            attested_by TEXT
        );

        CREATE INDEX attribute_attestation_identifier ON attribute_attestation (identifier);

        CREATE UNIQUE INDEX policy_resource_action ON policy (resource, action);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables = tables(&conn);
        for name in [
            "identity",
            "identity_enrollment",
            "identity_attributes",
            "attribute_attestation",
            "purpose_key",
            "policy",
            "authority",
            "vault",
            "signing_secret",
            "x25519_secret",
            "schema_migrations",
        ] {
            assert!(tables.contains(&name.to_string()), "missing table {}", name);
        }
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
    fn test_policy_pair_is_unique() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO policy (resource, action, expression) VALUES ('vault', 'read', x'00')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO policy (resource, action, expression) VALUES ('vault', 'read', x'01')",
            [],
        );
        assert!(dup.is_err());
    }
}
