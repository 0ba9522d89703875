//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for Trustgate. It uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use trustgate_core::{
    AttributesEntry, ChangeHistory, Identifier, Purpose, PurposeKeyAttestation, Timestamp,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    AuthorityRecord, CasResult, EnrollResult, NamedVault, PolicyRecord, SecretStore, Store,
    StoredSecret,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("sqlite connection: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

// Row shapes, decoded outside the rusqlite closures so core errors propagate.
type AttestationRow = (Vec<u8>, i64, Option<i64>, Option<String>);
type AuthorityRow = (String, String, Vec<u8>);
type VaultRow = (String, String, bool, bool);

fn parse_identifier(s: &str) -> Result<Identifier> {
    Ok(s.parse::<Identifier>()?)
}

fn decode_attestation(row: AttestationRow) -> Result<AttributesEntry> {
    let (attributes, added, expires, attested_by) = row;
    let attested_by = attested_by.as_deref().map(parse_identifier).transpose()?;
    Ok(AttributesEntry::new(
        AttributesEntry::attributes_from_bytes(&attributes)?,
        Timestamp(added),
        expires.map(Timestamp),
        attested_by,
    ))
}

fn decode_authority(row: AuthorityRow) -> Result<AuthorityRecord> {
    let (identifier, address, identity) = row;
    Ok(AuthorityRecord {
        identifier: parse_identifier(&identifier)?,
        address,
        change_history: ChangeHistory::from_bytes(&identity)?,
    })
}

fn decode_vault(row: VaultRow) -> NamedVault {
    let (name, path, is_aws_kms, is_default) = row;
    NamedVault {
        name,
        path: PathBuf::from(path),
        is_aws_kms,
        is_default,
    }
}

fn decode_handle(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| StoreError::InvalidData(format!("secret handle: {}", e)))
}

fn path_text(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| StoreError::InvalidData(format!("non-UTF-8 vault path: {}", path.display())))
}

#[async_trait]
impl Store for SqliteStore {
    async fn enroll_identity(
        &self,
        identifier: &Identifier,
        history: &ChangeHistory,
        enrolled_at: Timestamp,
    ) -> Result<EnrollResult> {
        let identifier = identifier.to_string();
        let blob = history.to_bytes()?;

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT change_history FROM identity WHERE identifier = ?1",
                    params![identifier],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing) = existing {
                return Ok(EnrollResult::AlreadyExists(ChangeHistory::from_bytes(
                    &existing,
                )?));
            }

            tx.execute(
                "INSERT INTO identity (identifier, change_history) VALUES (?1, ?2)",
                params![identifier, blob],
            )?;
            tx.execute(
                "INSERT INTO identity_enrollment (identifier, enrolled_at) VALUES (?1, ?2)",
                params![identifier, enrolled_at.as_secs()],
            )?;
            tx.commit()?;

            Ok(EnrollResult::Inserted)
        })
        .await
    }

    async fn get_change_history(&self, identifier: &Identifier) -> Result<Option<ChangeHistory>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT change_history FROM identity WHERE identifier = ?1",
                    params![identifier],
                    |row| row.get(0),
                )
                .optional()?;
            blob.map(|b| ChangeHistory::from_bytes(&b).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn compare_and_swap_history(
        &self,
        identifier: &Identifier,
        expected_len: usize,
        history: &ChangeHistory,
    ) -> Result<CasResult> {
        let identifier = identifier.to_string();
        let blob = history.to_bytes()?;

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let stored: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT change_history FROM identity WHERE identifier = ?1",
                    params![identifier],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(stored) = stored else {
                return Ok(CasResult::Missing);
            };

            let actual_len = ChangeHistory::from_bytes(&stored)?.len();
            if actual_len != expected_len {
                return Ok(CasResult::Conflict { actual_len });
            }

            tx.execute(
                "UPDATE identity SET change_history = ?2 WHERE identifier = ?1",
                params![identifier, blob],
            )?;
            tx.commit()?;

            Ok(CasResult::Swapped)
        })
        .await
    }

    async fn get_enrollment(&self, identifier: &Identifier) -> Result<Option<Timestamp>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let enrolled_at: Option<i64> = conn
                .query_row(
                    "SELECT enrolled_at FROM identity_enrollment WHERE identifier = ?1",
                    params![identifier],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(enrolled_at.map(Timestamp))
        })
        .await
    }

    async fn list_identifiers(&self) -> Result<Vec<Identifier>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT identifier FROM identity")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut identifiers = rows
                .iter()
                .map(|s| parse_identifier(s))
                .collect::<Result<Vec<_>>>()?;
            identifiers.sort();
            Ok(identifiers)
        })
        .await
    }

    async fn insert_attestation(
        &self,
        identifier: &Identifier,
        entry: &AttributesEntry,
    ) -> Result<()> {
        let identifier = identifier.to_string();
        let attributes = entry.attributes_to_bytes()?;
        let added = entry.added.as_secs();
        let expires = entry.expires.map(|t| t.as_secs());
        let attested_by = entry.attested_by.map(|id| id.to_string());

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO attribute_attestation (identifier, attributes, added, expires, attested_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![identifier, attributes, added, expires, attested_by],
            )?;
            tx.execute(
                "INSERT INTO identity_attributes
                 (identifier, attributes, added, expires, attested_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (identifier) DO UPDATE SET
                     attributes = excluded.attributes,
                     added = excluded.added,
                     expires = excluded.expires,
                     attested_by = excluded.attested_by
                 WHERE excluded.added >= identity_attributes.added",
                params![identifier, attributes, added, expires, attested_by],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_latest_attestation(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<AttributesEntry>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let row: Option<AttestationRow> = conn
                .query_row(
                    "SELECT attributes, added, expires, attested_by
                     FROM identity_attributes WHERE identifier = ?1",
                    params![identifier],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(decode_attestation).transpose()
        })
        .await
    }

    async fn list_attestations(&self, identifier: &Identifier) -> Result<Vec<AttributesEntry>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT attributes, added, expires, attested_by
                 FROM attribute_attestation WHERE identifier = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![identifier], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<AttestationRow>>>()?;
            rows.into_iter().map(decode_attestation).collect()
        })
        .await
    }

    async fn insert_purpose_key(&self, attestation: &PurposeKeyAttestation) -> Result<()> {
        let identifier = attestation.subject.to_string();
        let purpose = attestation.purpose().as_str();
        let blob = attestation.to_bytes()?;

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO purpose_key (identifier, purpose, purpose_key_attestation)
                 VALUES (?1, ?2, ?3)",
                params![identifier, purpose, blob],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_purpose_keys(
        &self,
        identifier: &Identifier,
        purpose: Purpose,
    ) -> Result<Vec<PurposeKeyAttestation>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT purpose_key_attestation FROM purpose_key
                 WHERE identifier = ?1 AND purpose = ?2 ORDER BY rowid",
            )?;
            let blobs = stmt
                .query_map(params![identifier, purpose.as_str()], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            blobs
                .iter()
                .map(|b| PurposeKeyAttestation::from_bytes(b).map_err(StoreError::from))
                .collect()
        })
        .await
    }

    async fn put_policy(&self, resource: &str, action: &str, expression: &[u8]) -> Result<()> {
        let resource = resource.to_owned();
        let action = action.to_owned();
        let expression = expression.to_vec();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO policy (resource, action, expression) VALUES (?1, ?2, ?3)
                 ON CONFLICT (resource, action) DO UPDATE SET expression = excluded.expression",
                params![resource, action, expression],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_policy(&self, resource: &str, action: &str) -> Result<Option<Vec<u8>>> {
        let resource = resource.to_owned();
        let action = action.to_owned();

        self.run(move |conn| {
            conn.query_row(
                "SELECT expression FROM policy WHERE resource = ?1 AND action = ?2",
                params![resource, action],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn delete_policy(&self, resource: &str, action: &str) -> Result<bool> {
        let resource = resource.to_owned();
        let action = action.to_owned();

        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM policy WHERE resource = ?1 AND action = ?2",
                params![resource, action],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_policies(&self) -> Result<Vec<PolicyRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT resource, action, expression FROM policy ORDER BY resource, action",
            )?;
            let policies = stmt
                .query_map([], |row| {
                    Ok(PolicyRecord {
                        resource: row.get(0)?,
                        action: row.get(1)?,
                        expression: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(policies)
        })
        .await
    }

    async fn put_authority(&self, authority: &AuthorityRecord) -> Result<()> {
        let identifier = authority.identifier.to_string();
        let address = authority.address.clone();
        let identity = authority.change_history.to_bytes()?;

        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO authority (identifier, address, identity)
                 VALUES (?1, ?2, ?3)",
                params![identifier, address, identity],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_authority(&self, identifier: &Identifier) -> Result<Option<AuthorityRecord>> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let row: Option<AuthorityRow> = conn
                .query_row(
                    "SELECT identifier, address, identity FROM authority WHERE identifier = ?1",
                    params![identifier],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            row.map(decode_authority).transpose()
        })
        .await
    }

    async fn delete_authority(&self, identifier: &Identifier) -> Result<bool> {
        let identifier = identifier.to_string();

        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM authority WHERE identifier = ?1",
                params![identifier],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_authorities(&self) -> Result<Vec<AuthorityRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, address, identity FROM authority ORDER BY identifier",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<rusqlite::Result<Vec<AuthorityRow>>>()?;
            rows.into_iter().map(decode_authority).collect()
        })
        .await
    }

    async fn put_vault(&self, vault: &NamedVault) -> Result<()> {
        let name = vault.name.clone();
        let path = path_text(&vault.path)?;
        let is_aws_kms = vault.is_aws_kms;
        let is_default = vault.is_default;

        self.run(move |conn| {
            let tx = conn.transaction()?;
            if is_default {
                tx.execute("UPDATE vault SET is_default = 0", [])?;
            }
            tx.execute(
                "INSERT OR REPLACE INTO vault (name, path, is_aws_kms, is_default)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, path, is_aws_kms, is_default],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_vault(&self, name: &str) -> Result<Option<NamedVault>> {
        let name = name.to_owned();

        self.run(move |conn| {
            let row: Option<VaultRow> = conn
                .query_row(
                    "SELECT name, path, is_aws_kms, is_default FROM vault WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            Ok(row.map(decode_vault))
        })
        .await
    }

    async fn get_default_vault(&self) -> Result<Option<NamedVault>> {
        self.run(|conn| {
            let row: Option<VaultRow> = conn
                .query_row(
                    "SELECT name, path, is_aws_kms, is_default FROM vault
                     WHERE is_default = 1 ORDER BY name LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            Ok(row.map(decode_vault))
        })
        .await
    }

    async fn set_default_vault(&self, name: &str) -> Result<bool> {
        let name = name.to_owned();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let exists: Option<String> = tx
                .query_row(
                    "SELECT name FROM vault WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(false);
            }
            tx.execute(
                "UPDATE vault SET is_default = (name = ?1)",
                params![name],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn delete_vault(&self, name: &str) -> Result<bool> {
        let name = name.to_owned();

        self.run(move |conn| {
            let n = conn.execute("DELETE FROM vault WHERE name = ?1", params![name])?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_vaults(&self) -> Result<Vec<NamedVault>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT name, path, is_aws_kms, is_default FROM vault ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<rusqlite::Result<Vec<VaultRow>>>()?;
            Ok(rows.into_iter().map(decode_vault).collect())
        })
        .await
    }
}

#[async_trait]
impl SecretStore for SqliteStore {
    async fn put_signing_secret(&self, handle: &str, secret: &StoredSecret) -> Result<bool> {
        let handle = handle.as_bytes().to_vec();
        let secret = secret.clone();

        self.run(move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO signing_secret (handle, secret_type, secret)
                 VALUES (?1, ?2, ?3)",
                params![handle, secret.secret_type, secret.secret],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn get_signing_secret(&self, handle: &str) -> Result<Option<StoredSecret>> {
        let handle = handle.as_bytes().to_vec();

        self.run(move |conn| {
            conn.query_row(
                "SELECT secret_type, secret FROM signing_secret WHERE handle = ?1",
                params![handle],
                |row| {
                    Ok(StoredSecret {
                        secret_type: row.get(0)?,
                        secret: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn delete_signing_secret(&self, handle: &str) -> Result<bool> {
        let handle = handle.as_bytes().to_vec();

        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM signing_secret WHERE handle = ?1",
                params![handle],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn put_x25519_secret(&self, handle: &str, secret: &[u8]) -> Result<bool> {
        let handle = handle.as_bytes().to_vec();
        let secret = secret.to_vec();

        self.run(move |conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO x25519_secret (handle, secret) VALUES (?1, ?2)",
                params![handle, secret],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn get_x25519_secret(&self, handle: &str) -> Result<Option<Vec<u8>>> {
        let handle = handle.as_bytes().to_vec();

        self.run(move |conn| {
            conn.query_row(
                "SELECT secret FROM x25519_secret WHERE handle = ?1",
                params![handle],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn delete_x25519_secret(&self, handle: &str) -> Result<bool> {
        let handle = handle.as_bytes().to_vec();

        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM x25519_secret WHERE handle = ?1",
                params![handle],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_secret_handles(&self) -> Result<Vec<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(
                "SELECT handle FROM signing_secret
                 UNION SELECT handle FROM x25519_secret
                 ORDER BY 1",
            )?;
            let rows = stmt
                .query_map([], |row| row.get::<_, Vec<u8>>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_handle).collect()
        })
        .await
    }
}
