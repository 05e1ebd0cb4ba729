//! SQLite backend.
//!
//! One table per record kind plus one grant table per kind. Grants are unique
//! per `(record_id, grantee_id)` and cascade with their record. Dates,
//! decimals, and enums are stored as TEXT; ids as their UUID string.
//!
//! The grant insert doubles as the row policy: it only succeeds when the
//! stated owner really owns the record.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tokio::sync::broadcast;

use kyoyu_types::{
    FinanceEntry, Payload, Principal, PrincipalId, Profile, ProfileUpdate, Record, RecordId,
    RecordKind, ShareGrant, SharedIn, Task,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{AuthEvent, GrantStore, ProfileStore, RecordStore, SessionProvider};

const SCHEMA: &str = r#"
-- Accounts (what the session provider knows)
CREATE TABLE IF NOT EXISTS principals (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    email_confirmed INTEGER NOT NULL DEFAULT 0,
    signup_name TEXT NOT NULL DEFAULT '',
    provisioned INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

-- Display rows, created by the provisioning step
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY REFERENCES principals(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    text TEXT NOT NULL,
    category TEXT,
    priority TEXT NOT NULL,
    due_date TEXT,
    completed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id, created_at);

CREATE TABLE IF NOT EXISTS finances (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    category TEXT,
    date TEXT NOT NULL,
    flow TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_finances_owner ON finances(owner_id, created_at);

CREATE TABLE IF NOT EXISTS shared_tasks (
    record_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    owner_id TEXT NOT NULL,
    grantee_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    UNIQUE (record_id, grantee_id),
    CHECK (owner_id <> grantee_id)
);
CREATE INDEX IF NOT EXISTS idx_shared_tasks_grantee ON shared_tasks(grantee_id);

CREATE TABLE IF NOT EXISTS shared_finances (
    record_id TEXT NOT NULL REFERENCES finances(id) ON DELETE CASCADE,
    owner_id TEXT NOT NULL,
    grantee_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    UNIQUE (record_id, grantee_id),
    CHECK (owner_id <> grantee_id)
);
CREATE INDEX IF NOT EXISTS idx_shared_finances_grantee ON shared_finances(grantee_id);
"#;

/// A payload with a SQLite table mapping.
///
/// Rows are laid out as `id, owner_id, created_at` followed by
/// [`COLUMNS`](Self::COLUMNS) in order.
pub trait SqlPayload: Payload {
    const TABLE: &'static str;
    const GRANTS: &'static str;
    const COLUMNS: &'static [&'static str];

    /// Column values, in [`COLUMNS`](Self::COLUMNS) order.
    fn to_values(&self) -> Vec<Value>;

    /// Read the payload columns starting at `offset`.
    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self>;
}

impl SqlPayload for Task {
    const TABLE: &'static str = "tasks";
    const GRANTS: &'static str = "shared_tasks";
    const COLUMNS: &'static [&'static str] = &["text", "category", "priority", "due_date", "completed"];

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.text.clone().into(),
            self.category.clone().into(),
            self.priority.to_string().into(),
            self.due_date.map(format_date).into(),
            self.completed.into(),
        ]
    }

    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Task {
            text: row.get(offset)?,
            category: row.get(offset + 1)?,
            priority: parse_col(row, offset + 2)?,
            due_date: parse_opt_col(row, offset + 3)?,
            completed: row.get(offset + 4)?,
        })
    }
}

impl SqlPayload for FinanceEntry {
    const TABLE: &'static str = "finances";
    const GRANTS: &'static str = "shared_finances";
    const COLUMNS: &'static [&'static str] = &["description", "amount", "category", "date", "flow"];

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.description.clone().into(),
            self.amount.to_string().into(),
            self.category.clone().into(),
            format_date(self.date).into(),
            self.flow.to_string().into(),
        ]
    }

    fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(FinanceEntry {
            description: row.get(offset)?,
            amount: parse_col(row, offset + 1)?,
            category: row.get(offset + 2)?,
            date: parse_col(row, offset + 3)?,
            flow: parse_col(row, offset + 4)?,
        })
    }
}

fn grant_table(kind: RecordKind) -> (&'static str, &'static str) {
    match kind {
        RecordKind::Task => (Task::TABLE, Task::GRANTS),
        RecordKind::Finance => (FinanceEntry::TABLE, FinanceEntry::GRANTS),
    }
}

// ============================================================================
// Column helpers
// ============================================================================

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn profile_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Option<Profile>> {
    let Some(id) = parse_opt_col::<PrincipalId>(row, offset)? else {
        return Ok(None);
    };
    Ok(Some(Profile {
        id,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        updated_at: row.get::<_, i64>(offset + 3)? as u64,
    }))
}

fn principal_from_row(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: parse_col(row, 0)?,
        email: row.get(1)?,
        email_confirmed: row.get(2)?,
    })
}

/// Map a SQLite failure onto the store taxonomy.
fn store_err(err: rusqlite::Error) -> StoreError {
    use rusqlite::ffi;
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => StoreError::Conflict,
            _ if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                StoreError::rejected(err.to_string())
            }
            _ => StoreError::backend(err.to_string()),
        },
        _ => StoreError::backend(err.to_string()),
    }
}

fn record_columns<P: SqlPayload>(alias: &str) -> String {
    ["id", "owner_id", "created_at"]
        .iter()
        .chain(P::COLUMNS)
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Backend
// ============================================================================

/// SQLite implementation of every store trait.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    current: RwLock<Option<Principal>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SqliteBackend {
    /// Open or create a database at the given path.
    pub fn open<Q: AsRef<Path>>(path: Q) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            conn: Mutex::new(conn),
            current: RwLock::new(None),
            events,
        })
    }

    // ========================================================================
    // Accounts and session
    // ========================================================================

    /// Create an account with an unconfirmed email. A duplicate email is a
    /// conflict.
    pub fn register(&self, email: &str, name: &str) -> StoreResult<Principal> {
        let principal = Principal::new(email.trim());
        self.conn
            .lock()
            .execute(
                "INSERT INTO principals (id, email, signup_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    principal.id.to_string(),
                    principal.email,
                    name.trim(),
                    kyoyu_types::now_millis() as i64,
                ],
            )
            .map_err(store_err)?;
        tracing::debug!(principal = %principal.id, "registered");
        Ok(principal)
    }

    pub fn confirm_email(&self, id: PrincipalId) -> StoreResult<Principal> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE principals SET email_confirmed = 1 WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("principal {id}")));
        }
        Self::principal_where(&conn, "id = ?1", &id.to_string())?
            .ok_or_else(|| StoreError::not_found(format!("principal {id}")))
    }

    /// Run the deferred profile trigger. Returns how many rows were created.
    pub fn provision_profiles(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        let created = tx
            .execute(
                "INSERT INTO profiles (id, name, email, updated_at)
                 SELECT id, signup_name, email, ?1 FROM principals WHERE provisioned = 0",
                params![kyoyu_types::now_millis() as i64],
            )
            .map_err(store_err)?;
        tx.execute("UPDATE principals SET provisioned = 1 WHERE provisioned = 0", [])
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(created)
    }

    pub fn principal_by_email(&self, email: &str) -> StoreResult<Option<Principal>> {
        Self::principal_where(&self.conn.lock(), "email = ?1", email.trim())
    }

    /// Every account with whether its profile has been provisioned.
    pub fn principals(&self) -> StoreResult<Vec<(Principal, bool)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, email, email_confirmed, provisioned FROM principals ORDER BY created_at",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map([], |row| Ok((principal_from_row(row)?, row.get::<_, bool>(3)?)))
            .map_err(store_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(store_err)
    }

    fn principal_where(conn: &Connection, clause: &str, value: &str) -> StoreResult<Option<Principal>> {
        conn.query_row(
            &format!("SELECT id, email, email_confirmed FROM principals WHERE {clause}"),
            params![value],
            principal_from_row,
        )
        .optional()
        .map_err(store_err)
    }

    /// Adopt `principal` as the current session and broadcast it.
    pub fn sign_in(&self, principal: Principal) {
        *self.current.write() = Some(principal.clone());
        let _ = self.events.send(AuthEvent::SignedIn(principal));
    }

    pub fn sign_out(&self) {
        *self.current.write() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    // ========================================================================
    // Record queries
    // ========================================================================

    fn grantees(conn: &Connection, grants: &str, id: RecordId) -> rusqlite::Result<BTreeSet<PrincipalId>> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT grantee_id FROM {grants} WHERE record_id = ?1"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], |row| parse_col(row, 0))?;
        rows.collect()
    }

    fn record_from_row<P: SqlPayload>(row: &Row<'_>) -> rusqlite::Result<Record<P>> {
        Ok(Record {
            id: parse_col(row, 0)?,
            owner_id: parse_col(row, 1)?,
            created_at: row.get::<_, i64>(2)? as u64,
            payload: P::from_row(row, 3)?,
            shared_with: BTreeSet::new(),
        })
    }

    fn select_owned<P: SqlPayload>(&self, owner: PrincipalId) -> rusqlite::Result<Vec<Record<P>>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} r WHERE r.owner_id = ?1 ORDER BY r.created_at, r.rowid",
            record_columns::<P>("r"),
            P::TABLE,
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut records = stmt
            .query_map(params![owner.to_string()], Self::record_from_row::<P>)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for record in &mut records {
            record.shared_with = Self::grantees(&conn, P::GRANTS, record.id)?;
        }
        Ok(records)
    }

    fn select_shared<P: SqlPayload>(&self, grantee: PrincipalId) -> rusqlite::Result<Vec<SharedIn<P>>> {
        let conn = self.conn.lock();
        let profile_offset = 3 + P::COLUMNS.len();
        let sql = format!(
            "SELECT {}, p.id, p.name, p.email, p.updated_at
             FROM {} g
             JOIN {} r ON r.id = g.record_id
             LEFT JOIN profiles p ON p.id = r.owner_id
             WHERE g.grantee_id = ?1
             ORDER BY g.created_at, g.rowid",
            record_columns::<P>("r"),
            P::GRANTS,
            P::TABLE,
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut shared = stmt
            .query_map(params![grantee.to_string()], |row| {
                Ok(SharedIn {
                    record: Self::record_from_row::<P>(row)?,
                    owner: profile_at(row, profile_offset)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for item in &mut shared {
            item.record.shared_with = Self::grantees(&conn, P::GRANTS, item.record.id)?;
        }
        Ok(shared)
    }

    fn select_one<P: SqlPayload>(conn: &Connection, id: RecordId) -> rusqlite::Result<Option<Record<P>>> {
        let sql = format!(
            "SELECT {} FROM {} r WHERE r.id = ?1",
            record_columns::<P>("r"),
            P::TABLE,
        );
        let record = conn
            .query_row(&sql, params![id.to_string()], Self::record_from_row::<P>)
            .optional()?;
        record
            .map(|mut r| {
                r.shared_with = Self::grantees(conn, P::GRANTS, r.id)?;
                Ok(r)
            })
            .transpose()
    }

    fn insert_record<P: SqlPayload>(&self, owner: PrincipalId, payload: P) -> StoreResult<Record<P>> {
        let record = Record::new(owner, payload);
        let columns = ["id", "owner_id", "created_at"]
            .iter()
            .chain(P::COLUMNS)
            .copied()
            .collect::<Vec<_>>();
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            P::TABLE,
            columns.join(", "),
        );

        let mut values: Vec<Value> = vec![
            record.id.to_string().into(),
            owner.to_string().into(),
            (record.created_at as i64).into(),
        ];
        values.extend(record.payload.to_values());

        self.conn
            .lock()
            .execute(&sql, params_from_iter(values))
            .map_err(store_err)?;
        Ok(record)
    }

    fn update_record<P: SqlPayload>(&self, id: RecordId, payload: P) -> StoreResult<Record<P>> {
        let assignments = P::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c} = ?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE {} SET {assignments} WHERE id = ?1", P::TABLE);

        let mut values: Vec<Value> = vec![id.to_string().into()];
        values.extend(payload.to_values());

        let conn = self.conn.lock();
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("{} {id}", P::KIND)));
        }
        Self::select_one::<P>(&conn, id)
            .map_err(store_err)?
            .ok_or_else(|| StoreError::not_found(format!("{} {id}", P::KIND)))
    }

    fn delete_record<P: SqlPayload>(&self, id: RecordId) -> StoreResult<()> {
        let changed = self
            .conn
            .lock()
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", P::TABLE),
                params![id.to_string()],
            )
            .map_err(store_err)?;
        if changed == 0 {
            return Err(StoreError::not_found(format!("{} {id}", P::KIND)));
        }
        Ok(())
    }

    fn insert_grant_row(&self, grant: &ShareGrant) -> StoreResult<()> {
        let (table, grants) = grant_table(grant.kind);
        let inserted = self
            .conn
            .lock()
            .execute(
                &format!(
                    "INSERT INTO {grants} (record_id, owner_id, grantee_id, created_at)
                     SELECT id, owner_id, ?3, ?4 FROM {table} WHERE id = ?1 AND owner_id = ?2"
                ),
                params![
                    grant.record_id.to_string(),
                    grant.owner_id.to_string(),
                    grant.grantee_id.to_string(),
                    grant.created_at as i64,
                ],
            )
            .map_err(store_err)?;
        if inserted == 0 {
            return Err(StoreError::rejected(format!(
                "{} {} is not owned by {}",
                grant.kind, grant.record_id, grant.owner_id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    fn select_profiles(&self, clause: &str, id: PrincipalId) -> StoreResult<Vec<Profile>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT id, name, email, updated_at FROM profiles WHERE {clause} ORDER BY name COLLATE NOCASE"
            ))
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| profile_at(row, 0))
            .map_err(store_err)?;
        let profiles = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(profiles.into_iter().flatten().collect())
    }

    fn write_profile(&self, id: PrincipalId, update: &ProfileUpdate) -> StoreResult<(Profile, Option<Principal>)> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(store_err)?;
        let key = id.to_string();
        let now = kyoyu_types::now_millis() as i64;

        let exists = tx
            .query_row("SELECT 1 FROM profiles WHERE id = ?1", params![key], |_| Ok(()))
            .optional()
            .map_err(store_err)?;
        if exists.is_none() {
            return Err(StoreError::not_found(format!("profile {id}")));
        }

        if let Some(name) = &update.name {
            tx.execute(
                "UPDATE profiles SET name = ?2, updated_at = ?3 WHERE id = ?1",
                params![key, name, now],
            )
            .map_err(store_err)?;
        }
        if let Some(email) = &update.email {
            tx.execute(
                "UPDATE principals SET email = ?2 WHERE id = ?1",
                params![key, email],
            )
            .map_err(store_err)?;
            tx.execute(
                "UPDATE profiles SET email = ?2, updated_at = ?3 WHERE id = ?1",
                params![key, email, now],
            )
            .map_err(store_err)?;
        }

        let profile = tx
            .query_row(
                "SELECT id, name, email, updated_at FROM profiles WHERE id = ?1",
                params![key],
                |row| profile_at(row, 0),
            )
            .map_err(store_err)?
            .ok_or_else(|| StoreError::not_found(format!("profile {id}")))?;
        let principal = match update.email {
            Some(_) => Self::principal_where(&tx, "id = ?1", &key)?,
            None => None,
        };
        tx.commit().map_err(store_err)?;
        Ok((profile, principal))
    }
}

#[async_trait]
impl<P: SqlPayload> RecordStore<P> for SqliteBackend {
    async fn owned_by(&self, owner: PrincipalId) -> StoreResult<Vec<Record<P>>> {
        self.select_owned(owner).map_err(store_err)
    }

    async fn shared_with(&self, grantee: PrincipalId) -> StoreResult<Vec<SharedIn<P>>> {
        self.select_shared(grantee).map_err(store_err)
    }

    async fn insert(&self, owner: PrincipalId, payload: P) -> StoreResult<Record<P>> {
        self.insert_record(owner, payload)
    }

    async fn update(&self, id: RecordId, payload: P) -> StoreResult<Record<P>> {
        self.update_record(id, payload)
    }

    async fn delete(&self, id: RecordId) -> StoreResult<()> {
        self.delete_record::<P>(id)
    }
}

#[async_trait]
impl GrantStore for SqliteBackend {
    async fn insert_grant(&self, grant: &ShareGrant) -> StoreResult<()> {
        self.insert_grant_row(grant)
    }
}

#[async_trait]
impl ProfileStore for SqliteBackend {
    async fn profile(&self, id: PrincipalId) -> StoreResult<Option<Profile>> {
        Ok(self.select_profiles("id = ?1", id)?.into_iter().next())
    }

    async fn profiles_except(&self, id: PrincipalId) -> StoreResult<Vec<Profile>> {
        self.select_profiles("id <> ?1", id)
    }

    async fn update_profile(&self, id: PrincipalId, update: ProfileUpdate) -> StoreResult<Profile> {
        let (profile, principal) = self.write_profile(id, &update)?;
        if let Some(principal) = principal {
            let mut current = self.current.write();
            if current.as_ref().is_some_and(|c| c.id == principal.id) {
                *current = Some(principal.clone());
            }
            drop(current);
            let _ = self.events.send(AuthEvent::UserUpdated(principal));
        }
        Ok(profile)
    }
}

impl SessionProvider for SqliteBackend {
    fn current(&self) -> Option<Principal> {
        self.current.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
