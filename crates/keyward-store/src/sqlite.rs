//! SQLite implementation of the Store trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite, wrapped
//! in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use keyward_core::{
    now_millis, Membership, Resource, ResourceFilter, ResourceId, ResourceKind, Role, UserId,
    WrappedKey,
};
use keyward_perms::{EscrowedKey, PinHash, PublicKey, SALT_LEN};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{check_wrapped_keys, InsertResult, Store, UserKeyRecord};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {e}")))?
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Row mapping
// ────────────────────────────────────────────────────────────────────────────

const RESOURCE_COLUMNS: &str = "r.resource_id, r.kind, r.creator_id, r.created_at, r.link";

/// Columns `row_to_resource` consumes.
const RESOURCE_WIDTH: usize = 5;

const MEMBERSHIP_COLUMNS: &str =
    "m.user_id, m.resource_id, m.role, m.wrapped_key, m.is_favorite, m.last_accessed_at";

fn conversion_error<E>(idx: usize, ty: Type, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

fn get_user_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let bytes: Vec<u8> = row.get(idx)?;
    UserId::try_from(bytes.as_slice()).map_err(|e| conversion_error(idx, Type::Blob, e))
}

fn get_resource_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<ResourceId> {
    let bytes: Vec<u8> = row.get(idx)?;
    ResourceId::try_from(bytes.as_slice()).map_err(|e| conversion_error(idx, Type::Blob, e))
}

/// Map resource columns starting at `offset`.
fn row_to_resource(row: &Row<'_>, offset: usize) -> rusqlite::Result<Resource> {
    let kind: String = row.get(offset + 1)?;
    Ok(Resource {
        id: get_resource_id(row, offset)?,
        kind: kind
            .parse::<ResourceKind>()
            .map_err(|e| conversion_error(offset + 1, Type::Text, e))?,
        creator_id: get_user_id(row, offset + 2)?,
        created_at: row.get(offset + 3)?,
        link: row.get(offset + 4)?,
    })
}

fn to_sql_int(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| StoreError::InvalidData(format!("{} out of range", n)))
}

/// Map membership columns starting at `offset`.
fn row_to_membership(row: &Row<'_>, offset: usize) -> rusqlite::Result<Membership> {
    let role: String = row.get(offset + 2)?;
    let wrapped_key: Vec<u8> = row.get(offset + 3)?;
    Ok(Membership {
        user_id: get_user_id(row, offset)?,
        resource_id: get_resource_id(row, offset + 1)?,
        role: role
            .parse::<Role>()
            .map_err(|e| conversion_error(offset + 2, Type::Text, e))?,
        wrapped_key: WrappedKey::from_bytes(wrapped_key),
        is_favorite: row.get(offset + 4)?,
        last_accessed_at: row.get(offset + 5)?,
    })
}

fn ensure_resource(tx: &Transaction<'_>, id: &ResourceId) -> Result<()> {
    let exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM resources WHERE resource_id = ?1",
            params![id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("resource {}", id))),
    }
}

fn upsert_membership(tx: &Transaction<'_>, m: &Membership) -> Result<()> {
    tx.execute(
        "INSERT INTO memberships (user_id, resource_id, role, wrapped_key, is_favorite, last_accessed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id, resource_id) DO UPDATE SET
             role = excluded.role,
             wrapped_key = excluded.wrapped_key,
             is_favorite = excluded.is_favorite,
             last_accessed_at = excluded.last_accessed_at",
        params![
            m.user_id.as_bytes().as_slice(),
            m.resource_id.as_bytes().as_slice(),
            m.role.as_str(),
            m.wrapped_key.as_bytes(),
            m.is_favorite,
            m.last_accessed_at,
        ],
    )?;
    Ok(())
}

fn load_user_row(
    conn: &Connection,
    user: &UserId,
) -> Result<Option<(Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>, Option<String>)>> {
    conn.query_row(
        "SELECT public_key, escrow_ciphertext, escrow_salt, pin_hash FROM users WHERE user_id = ?1",
        params![user.as_bytes().as_slice()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .optional()
    .map_err(StoreError::from)
}

fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_slice(bytes).map_err(|e| StoreError::InvalidData(e.to_string()))
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_resource(&self, resource: &Resource, members: &[Membership]) -> Result<()> {
        check_wrapped_keys(members.iter().map(|m| &m.wrapped_key))?;
        if members.iter().any(|m| m.resource_id != resource.id) {
            return Err(StoreError::InvalidData(
                "initial member belongs to another resource".into(),
            ));
        }
        let resource = resource.clone();
        let members = members.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM resources WHERE resource_id = ?1",
                    params![resource.id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::InvalidData(format!(
                    "resource {} already exists",
                    resource.id
                )));
            }

            tx.execute(
                "INSERT INTO resources (resource_id, kind, creator_id, created_at, link)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    resource.id.as_bytes().as_slice(),
                    resource.kind.as_str(),
                    resource.creator_id.as_bytes().as_slice(),
                    resource.created_at,
                    resource.link,
                ],
            )?;

            for m in &members {
                let inserted = tx.execute(
                    "INSERT INTO memberships (user_id, resource_id, role, wrapped_key, is_favorite, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id, resource_id) DO NOTHING",
                    params![
                        m.user_id.as_bytes().as_slice(),
                        m.resource_id.as_bytes().as_slice(),
                        m.role.as_str(),
                        m.wrapped_key.as_bytes(),
                        m.is_favorite,
                        m.last_accessed_at,
                    ],
                )?;
                if inserted == 0 {
                    return Err(StoreError::InvalidData("duplicate initial member".into()));
                }
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        let id = *id;
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {RESOURCE_COLUMNS} FROM resources r WHERE r.resource_id = ?1"),
                params![id.as_bytes().as_slice()],
                |row| row_to_resource(row, 0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn delete_resource(&self, id: &ResourceId) -> Result<bool> {
        let id = *id;
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            // Explicit delete keeps the cascade independent of the pragma.
            tx.execute(
                "DELETE FROM memberships WHERE resource_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            let deleted = tx.execute(
                "DELETE FROM resources WHERE resource_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            tx.commit()?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_resources_for_user(
        &self,
        user: &UserId,
        filter: &ResourceFilter,
    ) -> Result<Vec<(Resource, Membership)>> {
        let user = *user;
        let filter = filter.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RESOURCE_COLUMNS}, {MEMBERSHIP_COLUMNS}
                 FROM memberships m
                 JOIN resources r ON r.resource_id = m.resource_id
                 WHERE m.user_id = ?1
                   AND (?2 IS NULL OR r.kind = ?2)
                   AND (?3 IS NULL OR m.role = ?3)
                   AND (?4 IS NULL OR m.is_favorite = ?4)
                 ORDER BY m.last_accessed_at IS NULL,
                          m.last_accessed_at DESC,
                          r.created_at DESC,
                          r.resource_id ASC
                 LIMIT ?5 OFFSET ?6"
            ))?;

            // A negative LIMIT means no limit in SQLite.
            let (limit, offset) = match filter.page {
                Some(page) => (to_sql_int(page.page_size)?, to_sql_int(page.offset())?),
                None => (-1, 0),
            };
            let rows = stmt
                .query_map(
                    params![
                        user.as_bytes().as_slice(),
                        filter.kind.map(ResourceKind::as_str),
                        filter.role.map(Role::as_str),
                        filter.favorite,
                        limit,
                        offset,
                    ],
                    |row| {
                        Ok((
                            row_to_resource(row, 0)?,
                            row_to_membership(row, RESOURCE_WIDTH)?,
                        ))
                    },
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn find_direct_room(&self, a: &UserId, b: &UserId) -> Result<Option<Resource>> {
        let (a, b) = (*a, *b);
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RESOURCE_COLUMNS}
                     FROM resources r
                     JOIN memberships ma ON ma.resource_id = r.resource_id AND ma.user_id = ?2
                     JOIN memberships mb ON mb.resource_id = r.resource_id AND mb.user_id = ?3
                     WHERE r.kind = ?1
                     ORDER BY r.created_at ASC, r.resource_id ASC
                     LIMIT 1"
                ),
                params![
                    ResourceKind::DirectRoom.as_str(),
                    a.as_bytes().as_slice(),
                    b.as_bytes().as_slice(),
                ],
                |row| row_to_resource(row, 0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn find_resource_by_link(
        &self,
        user: &UserId,
        link: &str,
    ) -> Result<Option<(Resource, Membership)>> {
        let user = *user;
        let link = link.to_owned();
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {RESOURCE_COLUMNS}, {MEMBERSHIP_COLUMNS}
                     FROM resources r
                     JOIN memberships m ON m.resource_id = r.resource_id AND m.user_id = ?1
                     WHERE r.link = ?2
                     ORDER BY r.created_at DESC, r.resource_id ASC
                     LIMIT 1"
                ),
                params![user.as_bytes().as_slice(), link],
                |row| {
                    Ok((
                        row_to_resource(row, 0)?,
                        row_to_membership(row, RESOURCE_WIDTH)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn load_membership(
        &self,
        user: &UserId,
        resource: &ResourceId,
    ) -> Result<Option<Membership>> {
        let (user, resource) = (*user, *resource);
        self.blocking(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM memberships m
                     WHERE m.user_id = ?1 AND m.resource_id = ?2"
                ),
                params![user.as_bytes().as_slice(), resource.as_bytes().as_slice()],
                |row| row_to_membership(row, 0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn save_membership(&self, membership: &Membership) -> Result<()> {
        self.save_memberships(std::slice::from_ref(membership)).await
    }

    async fn save_memberships(&self, memberships: &[Membership]) -> Result<()> {
        check_wrapped_keys(memberships.iter().map(|m| &m.wrapped_key))?;
        let memberships = memberships.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for m in &memberships {
                ensure_resource(&tx, &m.resource_id)?;
                upsert_membership(&tx, m)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_membership(&self, user: &UserId, resource: &ResourceId) -> Result<bool> {
        let (user, resource) = (*user, *resource);
        self.blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM memberships WHERE user_id = ?1 AND resource_id = ?2",
                params![user.as_bytes().as_slice(), resource.as_bytes().as_slice()],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_members(&self, resource: &ResourceId) -> Result<Vec<Membership>> {
        let resource = *resource;
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBERSHIP_COLUMNS} FROM memberships m
                 WHERE m.resource_id = ?1
                 ORDER BY m.user_id"
            ))?;
            let members = stmt
                .query_map(params![resource.as_bytes().as_slice()], |row| {
                    row_to_membership(row, 0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(members)
        })
        .await
    }

    async fn count_members(&self, resource: &ResourceId) -> Result<usize> {
        let resource = *resource;
        self.blocking(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memberships WHERE resource_id = ?1",
                params![resource.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            usize::try_from(count).map_err(|e| StoreError::InvalidData(e.to_string()))
        })
        .await
    }

    async fn insert_memberships(&self, memberships: &[Membership]) -> Result<Vec<InsertResult>> {
        check_wrapped_keys(memberships.iter().map(|m| &m.wrapped_key))?;
        let memberships = memberships.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut results = Vec::with_capacity(memberships.len());
            for m in &memberships {
                ensure_resource(&tx, &m.resource_id)?;
                let inserted = tx.execute(
                    "INSERT INTO memberships (user_id, resource_id, role, wrapped_key, is_favorite, last_accessed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(user_id, resource_id) DO NOTHING",
                    params![
                        m.user_id.as_bytes().as_slice(),
                        m.resource_id.as_bytes().as_slice(),
                        m.role.as_str(),
                        m.wrapped_key.as_bytes(),
                        m.is_favorite,
                        m.last_accessed_at,
                    ],
                )?;
                results.push(if inserted > 0 {
                    InsertResult::Inserted
                } else {
                    InsertResult::AlreadyExists
                });
            }
            tx.commit()?;
            Ok(results)
        })
        .await
    }

    async fn delete_memberships(&self, resource: &ResourceId, users: &[UserId]) -> Result<usize> {
        let resource = *resource;
        let users = users.to_vec();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for user in &users {
                deleted += tx.execute(
                    "DELETE FROM memberships WHERE user_id = ?1 AND resource_id = ?2",
                    params![user.as_bytes().as_slice(), resource.as_bytes().as_slice()],
                )?;
            }
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }

    async fn replace_wrapped_keys(
        &self,
        resource: &ResourceId,
        keys: &[(UserId, WrappedKey)],
    ) -> Result<()> {
        check_wrapped_keys(keys.iter().map(|(_, k)| k))?;
        let resource = *resource;
        let keys = keys.to_vec();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            for (user, key) in &keys {
                let updated = tx.execute(
                    "UPDATE memberships SET wrapped_key = ?3
                     WHERE user_id = ?1 AND resource_id = ?2",
                    params![
                        user.as_bytes().as_slice(),
                        resource.as_bytes().as_slice(),
                        key.as_bytes(),
                    ],
                )?;
                if updated == 0 {
                    // Dropping the transaction rolls back earlier updates.
                    return Err(StoreError::NotFound(format!(
                        "user {} is not a member of {}",
                        user, resource
                    )));
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_user_public_key(&self, user: &UserId) -> Result<Option<PublicKey>> {
        let user = *user;
        self.blocking(move |conn| {
            load_user_row(conn, &user)?
                .map(|(public_key, ..)| decode_public_key(&public_key))
                .transpose()
        })
        .await
    }

    async fn save_user_public_key(&self, user: &UserId, public_key: &PublicKey) -> Result<()> {
        let (user, public_key) = (*user, *public_key);
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            if let Some((existing, ..)) = load_user_row(&tx, &user)? {
                if existing.as_slice() != public_key.as_bytes() {
                    return Err(StoreError::KeyConflict(format!(
                        "user {} already has a different public key",
                        user
                    )));
                }
            }
            tx.execute(
                "INSERT INTO users (user_id, public_key, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     public_key = excluded.public_key,
                     updated_at = excluded.updated_at",
                params![
                    user.as_bytes().as_slice(),
                    public_key.as_bytes().as_slice(),
                    now_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_escrowed_private_key(&self, user: &UserId) -> Result<Option<EscrowedKey>> {
        let user = *user;
        self.blocking(move |conn| {
            let Some((_, Some(ciphertext), Some(salt), _)) = load_user_row(conn, &user)? else {
                return Ok(None);
            };
            let salt: [u8; SALT_LEN] = salt.as_slice().try_into().map_err(|_| {
                StoreError::InvalidData(format!("escrow salt must be {} bytes", SALT_LEN))
            })?;
            Ok(Some(EscrowedKey { ciphertext, salt }))
        })
        .await
    }

    async fn load_pin_hash(&self, user: &UserId) -> Result<Option<PinHash>> {
        let user = *user;
        self.blocking(move |conn| {
            Ok(load_user_row(conn, &user)?
                .and_then(|(.., pin_hash)| pin_hash)
                .map(PinHash::from_phc))
        })
        .await
    }

    async fn save_escrowed_private_key(
        &self,
        user: &UserId,
        record: &UserKeyRecord,
    ) -> Result<()> {
        if record.escrow.ciphertext.is_empty() {
            return Err(StoreError::InvalidData("escrow ciphertext must not be empty".into()));
        }
        let user = *user;
        let record = record.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            if let Some((existing, ..)) = load_user_row(&tx, &user)? {
                if existing.as_slice() != record.public_key.as_bytes() {
                    return Err(StoreError::KeyConflict(format!(
                        "user {} already has a different public key",
                        user
                    )));
                }
            }
            tx.execute(
                "INSERT INTO users (user_id, public_key, escrow_ciphertext, escrow_salt, pin_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id) DO UPDATE SET
                     public_key = excluded.public_key,
                     escrow_ciphertext = excluded.escrow_ciphertext,
                     escrow_salt = excluded.escrow_salt,
                     pin_hash = excluded.pin_hash,
                     updated_at = excluded.updated_at",
                params![
                    user.as_bytes().as_slice(),
                    record.public_key.as_bytes().as_slice(),
                    record.escrow.ciphertext,
                    record.escrow.salt.as_slice(),
                    record.pin_hash.as_str(),
                    now_millis(),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_core::Page;
    use keyward_perms::generate_keypair;

    fn wrapped(byte: u8) -> WrappedKey {
        WrappedKey::from_bytes(vec![byte; 8])
    }

    async fn seeded(store: &SqliteStore, kind: ResourceKind) -> (Resource, UserId) {
        let owner = UserId::generate();
        let resource = Resource::new(kind, owner, now_millis());
        let member = Membership::new(owner, resource.id, Role::Owner, wrapped(1));
        store.insert_resource(&resource, &[member]).await.unwrap();
        (resource, owner)
    }

    #[tokio::test]
    async fn test_sqlite_resource_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let (resource, owner) = seeded(&store, ResourceKind::DirectRoom).await;

        let loaded = store.get_resource(&resource.id).await.unwrap().unwrap();
        assert_eq!(loaded, resource);

        let row = store.load_membership(&owner, &resource.id).await.unwrap().unwrap();
        assert_eq!(row.role, Role::Owner);
        assert_eq!(row.wrapped_key, wrapped(1));
        assert!(!row.is_favorite);
        assert_eq!(row.last_accessed_at, None);
    }

    #[tokio::test]
    async fn test_sqlite_insert_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        let (resource, _) = seeded(&store, ResourceKind::Sheet).await;

        let viewer = Membership::new(UserId::generate(), resource.id, Role::Viewer, wrapped(2));
        let first = store
            .insert_memberships(&[viewer.clone(), viewer.clone()])
            .await
            .unwrap();
        assert_eq!(first, vec![InsertResult::Inserted, InsertResult::AlreadyExists]);

        let second = store.insert_memberships(&[viewer]).await.unwrap();
        assert_eq!(second, vec![InsertResult::AlreadyExists]);
        assert_eq!(store.count_members(&resource.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_insert_into_missing_resource() {
        let store = SqliteStore::open_memory().unwrap();
        let row = Membership::new(UserId::generate(), ResourceId::generate(), Role::Viewer, wrapped(3));
        let result = store.insert_memberships(&[row]).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sqlite_delete_resource_cascades() {
        let store = SqliteStore::open_memory().unwrap();
        let (resource, owner) = seeded(&store, ResourceKind::GroupRoom).await;

        assert!(store.delete_resource(&resource.id).await.unwrap());
        assert!(store.get_resource(&resource.id).await.unwrap().is_none());
        assert!(store.load_membership(&owner, &resource.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_delete_memberships_counts() {
        let store = SqliteStore::open_memory().unwrap();
        let (resource, _) = seeded(&store, ResourceKind::Sheet).await;
        let a = Membership::new(UserId::generate(), resource.id, Role::Viewer, wrapped(2));
        let b = Membership::new(UserId::generate(), resource.id, Role::Editor, wrapped(3));
        store.insert_memberships(&[a.clone(), b.clone()]).await.unwrap();

        let deleted = store
            .delete_memberships(&resource.id, &[a.user_id, b.user_id, UserId::generate()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count_members(&resource.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_replace_keys_rolls_back() {
        let store = SqliteStore::open_memory().unwrap();
        let (resource, owner) = seeded(&store, ResourceKind::Sheet).await;

        let result = store
            .replace_wrapped_keys(&resource.id, &[(owner, wrapped(9)), (UserId::generate(), wrapped(9))])
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let row = store.load_membership(&owner, &resource.id).await.unwrap().unwrap();
        assert_eq!(row.wrapped_key, wrapped(1));

        store
            .replace_wrapped_keys(&resource.id, &[(owner, wrapped(9))])
            .await
            .unwrap();
        let row = store.load_membership(&owner, &resource.id).await.unwrap().unwrap();
        assert_eq!(row.wrapped_key, wrapped(9));
    }

    #[tokio::test]
    async fn test_sqlite_list_resources_filter_and_order() {
        let store = SqliteStore::open_memory().unwrap();
        let user = UserId::generate();

        let sheet = Resource {
            id: ResourceId::generate(),
            kind: ResourceKind::Sheet,
            creator_id: user,
            created_at: 100,
            link: None,
        };
        let room = Resource {
            id: ResourceId::generate(),
            kind: ResourceKind::GroupRoom,
            creator_id: user,
            created_at: 200,
            link: None,
        };
        let mut sheet_row = Membership::new(user, sheet.id, Role::Owner, wrapped(1));
        sheet_row.is_favorite = true;
        sheet_row.last_accessed_at = Some(500);
        let room_row = Membership::new(user, room.id, Role::Owner, wrapped(2));

        store.insert_resource(&sheet, &[sheet_row]).await.unwrap();
        store.insert_resource(&room, &[room_row]).await.unwrap();

        let all = store
            .list_resources_for_user(&user, &ResourceFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|(r, _)| r.id).collect();
        assert_eq!(ids, vec![sheet.id, room.id]);

        let rooms = store
            .list_resources_for_user(
                &user,
                &ResourceFilter {
                    kind: Some(ResourceKind::GroupRoom),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].0.id, room.id);

        let favorites = store
            .list_resources_for_user(
                &user,
                &ResourceFilter {
                    favorite: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(favorites.len(), 1);
        assert!(favorites[0].1.is_favorite);
    }

    #[tokio::test]
    async fn test_sqlite_list_resources_paged() {
        let store = SqliteStore::open_memory().unwrap();
        let user = UserId::generate();
        let mut ids = Vec::new();
        for created_at in [300, 200, 100] {
            let resource = Resource::new(ResourceKind::Sheet, user, created_at);
            let row = Membership::new(user, resource.id, Role::Owner, wrapped(1));
            store.insert_resource(&resource, &[row]).await.unwrap();
            ids.push(resource.id);
        }

        let page = |n| ResourceFilter {
            page: Some(Page::new(n, 2)),
            ..Default::default()
        };
        let first: Vec<ResourceId> = store
            .list_resources_for_user(&user, &page(1))
            .await
            .unwrap()
            .into_iter()
            .map(|(r, _)| r.id)
            .collect();
        assert_eq!(first, ids[..2]);
        let second = store.list_resources_for_user(&user, &page(2)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0.id, ids[2]);
        assert_eq!(second[0].1.user_id, user);
    }

    #[tokio::test]
    async fn test_sqlite_find_direct_room() {
        let store = SqliteStore::open_memory().unwrap();
        let (alice, bob) = (UserId::generate(), UserId::generate());

        let (sheet, owner) = seeded(&store, ResourceKind::Sheet).await;
        store
            .insert_memberships(&[Membership::new(alice, sheet.id, Role::Viewer, wrapped(2))])
            .await
            .unwrap();
        assert!(store.find_direct_room(&owner, &alice).await.unwrap().is_none());

        let direct = Resource::new(ResourceKind::DirectRoom, alice, now_millis());
        store
            .insert_resource(
                &direct,
                &[
                    Membership::new(alice, direct.id, Role::Owner, wrapped(1)),
                    Membership::new(bob, direct.id, Role::Viewer, wrapped(2)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.find_direct_room(&bob, &alice).await.unwrap(), Some(direct));
        assert!(store.find_direct_room(&alice, &owner).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_link_roundtrip_and_lookup() {
        let store = SqliteStore::open_memory().unwrap();
        let owner = UserId::generate();
        let link = "https://sheets.example/d/abc";
        let sheet = Resource::new(ResourceKind::Sheet, owner, now_millis()).with_link(link);
        store
            .insert_resource(&sheet, &[Membership::new(owner, sheet.id, Role::Owner, wrapped(1))])
            .await
            .unwrap();

        assert_eq!(store.get_resource(&sheet.id).await.unwrap(), Some(sheet.clone()));
        let (found, row) = store.find_resource_by_link(&owner, link).await.unwrap().unwrap();
        assert_eq!(found, sheet);
        assert_eq!(row.wrapped_key, wrapped(1));
        assert!(store
            .find_resource_by_link(&UserId::generate(), link)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sqlite_user_keys() {
        let store = SqliteStore::open_memory().unwrap();
        let user = UserId::generate();
        let (_, public_key) = generate_keypair();

        assert!(store.load_user_public_key(&user).await.unwrap().is_none());
        assert!(store.load_pin_hash(&user).await.unwrap().is_none());

        store.save_user_public_key(&user, &public_key).await.unwrap();
        assert_eq!(store.load_user_public_key(&user).await.unwrap(), Some(public_key));
        assert!(store.load_escrowed_private_key(&user).await.unwrap().is_none());

        let record = UserKeyRecord {
            public_key,
            escrow: EscrowedKey {
                ciphertext: vec![4u8; 60],
                salt: [5u8; SALT_LEN],
            },
            pin_hash: PinHash::from_phc("$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA"),
        };
        store.save_escrowed_private_key(&user, &record).await.unwrap();

        assert_eq!(
            store.load_escrowed_private_key(&user).await.unwrap(),
            Some(record.escrow.clone())
        );
        assert_eq!(store.load_pin_hash(&user).await.unwrap(), Some(record.pin_hash.clone()));

        let (_, other_key) = generate_keypair();
        let result = store.save_user_public_key(&user, &other_key).await;
        assert!(matches!(result, Err(StoreError::KeyConflict(_))));

        // Re-escrow under the same key is a PIN change; a new key is refused.
        let new_pin = UserKeyRecord {
            pin_hash: PinHash::from_phc("$argon2id$v=19$m=1024,t=1,p=1$c2FsdDI$aGFzaDI"),
            ..record.clone()
        };
        store.save_escrowed_private_key(&user, &new_pin).await.unwrap();

        let replaced = UserKeyRecord {
            public_key: other_key,
            ..record.clone()
        };
        let result = store.save_escrowed_private_key(&user, &replaced).await;
        assert!(matches!(result, Err(StoreError::KeyConflict(_))));
        assert_eq!(store.load_user_public_key(&user).await.unwrap(), Some(public_key));
        assert_eq!(store.load_pin_hash(&user).await.unwrap(), Some(new_pin.pin_hash));
    }

    #[tokio::test]
    async fn test_sqlite_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward.db");

        let resource_id = {
            let store = SqliteStore::open(&path).unwrap();
            let (resource, _) = seeded(&store, ResourceKind::Sheet).await;
            resource.id
        };

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_resource(&resource_id).await.unwrap().is_some());
        assert_eq!(store.count_members(&resource_id).await.unwrap(), 1);
    }
}
