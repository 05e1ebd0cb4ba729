//! In-memory backend.
//!
//! Used by tests and demos. All data is ephemeral. Carries a local session
//! provider and one-shot fault injection for the fetch paths.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use kyoyu_types::{
    FinanceEntry, Payload, Principal, PrincipalId, Profile, ProfileUpdate, Record, RecordId,
    ShareGrant, SharedIn, Task,
};

use crate::error::{StoreError, StoreResult};
use crate::store::{AuthEvent, GrantStore, ProfileStore, RecordStore, SessionProvider};

/// Which read a fault applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FetchSide {
    Owned,
    SharedIn,
    Profile,
}

#[derive(Debug, Clone)]
struct Row<P> {
    owner_id: PrincipalId,
    payload: P,
    created_at: u64,
}

type Table<P> = IndexMap<RecordId, Row<P>>;

#[derive(Debug, Default)]
struct State {
    principals: IndexMap<PrincipalId, Principal>,
    profiles: IndexMap<PrincipalId, Profile>,
    /// Registered accounts still waiting for the profile trigger, with the
    /// name given at sign-up.
    unprovisioned: IndexMap<PrincipalId, String>,
    tasks: Table<Task>,
    finances: Table<FinanceEntry>,
    grants: IndexMap<(RecordId, PrincipalId), ShareGrant>,
    current: Option<PrincipalId>,
}

impl State {
    fn shared_with_of(&self, id: RecordId) -> BTreeSet<PrincipalId> {
        self.grants
            .values()
            .filter(|g| g.record_id == id)
            .map(|g| g.grantee_id)
            .collect()
    }

    fn record<P: Payload>(&self, id: RecordId, row: &Row<P>) -> Record<P> {
        Record {
            id,
            owner_id: row.owner_id,
            payload: row.payload.clone(),
            shared_with: self.shared_with_of(id),
            created_at: row.created_at,
        }
    }
}

/// In-memory implementation of every store trait.
///
/// Thread-safe via internal locks. All data is lost when dropped.
pub struct MemoryBackend {
    state: RwLock<State>,
    faults: Mutex<HashSet<FetchSide>>,
    reject_writes: AtomicBool,
    writes: AtomicUsize,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(State::default()),
            faults: Mutex::new(HashSet::new()),
            reject_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            events,
        }
    }

    // ========================================================================
    // Accounts and session
    // ========================================================================

    /// Create an account with an unconfirmed email. Its profile row appears
    /// only after [`provision_profiles`](Self::provision_profiles).
    pub fn register(&self, email: &str, name: &str) -> Principal {
        let principal = Principal::new(email.trim());
        let mut state = self.state.write();
        state.principals.insert(principal.id, principal.clone());
        state.unprovisioned.insert(principal.id, name.trim().to_string());
        tracing::debug!(principal = %principal.id, "registered");
        principal
    }

    /// Mark an account's email as confirmed.
    pub fn confirm_email(&self, id: PrincipalId) -> Option<Principal> {
        let mut state = self.state.write();
        let principal = state.principals.get_mut(&id)?;
        principal.email_confirmed = true;
        Some(principal.clone())
    }

    /// Run the deferred profile trigger. Returns how many rows were created.
    pub fn provision_profiles(&self) -> usize {
        let mut state = self.state.write();
        let pending = std::mem::take(&mut state.unprovisioned);
        let mut created = 0;
        for (id, name) in pending {
            let Some(email) = state.principals.get(&id).map(|p| p.email.clone()) else {
                continue;
            };
            state.profiles.insert(id, Profile::new(id, name, email));
            created += 1;
        }
        created
    }

    pub fn principal_by_email(&self, email: &str) -> Option<Principal> {
        self.state
            .read()
            .principals
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email.trim()))
            .cloned()
    }

    /// Sign in as `id` and broadcast the transition.
    pub fn sign_in(&self, id: PrincipalId) -> StoreResult<Principal> {
        let principal = {
            let mut state = self.state.write();
            let principal = state
                .principals
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("principal {id}")))?;
            state.current = Some(id);
            principal
        };
        let _ = self.events.send(AuthEvent::SignedIn(principal.clone()));
        Ok(principal)
    }

    pub fn sign_out(&self) {
        self.state.write().current = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }

    // ========================================================================
    // Test helpers
    // ========================================================================

    /// Store a grant directly, bypassing the write counter and any policy.
    pub fn grant<P: Payload>(&self, record: &Record<P>, grantee: PrincipalId) {
        let grant = ShareGrant::new(record.id, P::KIND, record.owner_id, grantee);
        self.state.write().grants.insert(grant.key(), grant);
    }

    /// Make the next read of `side` fail once.
    pub fn fail_next(&self, side: FetchSide) {
        self.faults.lock().insert(side);
    }

    /// Refuse every subsequent write until switched off.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Tasks plus finances.
    pub fn record_count(&self) -> usize {
        let state = self.state.read();
        state.tasks.len() + state.finances.len()
    }

    pub fn grant_count(&self) -> usize {
        self.state.read().grants.len()
    }

    /// Writes that reached this backend, accepted or not.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_fault(&self, side: FetchSide) -> StoreResult<()> {
        if self.faults.lock().remove(&side) {
            return Err(StoreError::backend(format!("injected fault on {side:?} read")));
        }
        Ok(())
    }

    fn begin_write(&self) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::rejected("writes are disabled"));
        }
        Ok(())
    }

    // ========================================================================
    // Generic record operations
    // ========================================================================

    fn owned_in<P: Payload>(
        &self,
        owner: PrincipalId,
        table: fn(&State) -> &Table<P>,
    ) -> StoreResult<Vec<Record<P>>> {
        self.check_fault(FetchSide::Owned)?;
        let state = self.state.read();
        Ok(table(&state)
            .iter()
            .filter(|(_, row)| row.owner_id == owner)
            .map(|(id, row)| state.record(*id, row))
            .collect())
    }

    fn shared_in<P: Payload>(
        &self,
        grantee: PrincipalId,
        table: fn(&State) -> &Table<P>,
    ) -> StoreResult<Vec<SharedIn<P>>> {
        self.check_fault(FetchSide::SharedIn)?;
        let state = self.state.read();
        let rows = table(&state);
        Ok(state
            .grants
            .values()
            .filter(|g| g.grantee_id == grantee && g.kind == P::KIND)
            .filter_map(|g| {
                let row = rows.get(&g.record_id)?;
                Some(SharedIn {
                    record: state.record(g.record_id, row),
                    owner: state.profiles.get(&row.owner_id).cloned(),
                })
            })
            .collect())
    }

    fn insert_in<P: Payload>(
        &self,
        owner: PrincipalId,
        payload: P,
        table: fn(&mut State) -> &mut Table<P>,
    ) -> StoreResult<Record<P>> {
        self.begin_write()?;
        let record = Record::new(owner, payload);
        let mut state = self.state.write();
        table(&mut state).insert(
            record.id,
            Row {
                owner_id: owner,
                payload: record.payload.clone(),
                created_at: record.created_at,
            },
        );
        Ok(record)
    }

    fn update_in<P: Payload>(
        &self,
        id: RecordId,
        payload: P,
        table: fn(&mut State) -> &mut Table<P>,
    ) -> StoreResult<Record<P>> {
        self.begin_write()?;
        let mut state = self.state.write();
        let row = table(&mut state)
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(format!("{} {id}", P::KIND)))?;
        row.payload = payload;
        let row = row.clone();
        Ok(state.record(id, &row))
    }

    fn delete_in<P: Payload>(
        &self,
        id: RecordId,
        table: fn(&mut State) -> &mut Table<P>,
    ) -> StoreResult<()> {
        self.begin_write()?;
        let mut state = self.state.write();
        table(&mut state)
            .shift_remove(&id)
            .ok_or_else(|| StoreError::not_found(format!("{} {id}", P::KIND)))?;
        state.grants.retain(|(record_id, _), _| *record_id != id);
        Ok(())
    }
}

macro_rules! impl_memory_record_store {
    ($payload:ty, $field:ident) => {
        #[async_trait]
        impl RecordStore<$payload> for MemoryBackend {
            async fn owned_by(&self, owner: PrincipalId) -> StoreResult<Vec<Record<$payload>>> {
                self.owned_in(owner, |s| &s.$field)
            }

            async fn shared_with(
                &self,
                grantee: PrincipalId,
            ) -> StoreResult<Vec<SharedIn<$payload>>> {
                self.shared_in(grantee, |s| &s.$field)
            }

            async fn insert(
                &self,
                owner: PrincipalId,
                payload: $payload,
            ) -> StoreResult<Record<$payload>> {
                self.insert_in(owner, payload, |s| &mut s.$field)
            }

            async fn update(
                &self,
                id: RecordId,
                payload: $payload,
            ) -> StoreResult<Record<$payload>> {
                self.update_in(id, payload, |s| &mut s.$field)
            }

            async fn delete(&self, id: RecordId) -> StoreResult<()> {
                self.delete_in::<$payload>(id, |s| &mut s.$field)
            }
        }
    };
}

impl_memory_record_store!(Task, tasks);
impl_memory_record_store!(FinanceEntry, finances);

#[async_trait]
impl GrantStore for MemoryBackend {
    async fn insert_grant(&self, grant: &ShareGrant) -> StoreResult<()> {
        self.begin_write()?;
        let mut state = self.state.write();
        if state.grants.contains_key(&grant.key()) {
            return Err(StoreError::Conflict);
        }
        state.grants.insert(grant.key(), grant.clone());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryBackend {
    async fn profile(&self, id: PrincipalId) -> StoreResult<Option<Profile>> {
        self.check_fault(FetchSide::Profile)?;
        Ok(self.state.read().profiles.get(&id).cloned())
    }

    async fn profiles_except(&self, id: PrincipalId) -> StoreResult<Vec<Profile>> {
        self.check_fault(FetchSide::Profile)?;
        Ok(self
            .state
            .read()
            .profiles
            .values()
            .filter(|p| p.id != id)
            .cloned()
            .collect())
    }

    async fn update_profile(&self, id: PrincipalId, update: ProfileUpdate) -> StoreResult<Profile> {
        self.begin_write()?;
        let (profile, principal) = {
            let mut state = self.state.write();
            let email_changed = update.email.is_some();
            if let Some(email) = &update.email {
                let taken = state
                    .principals
                    .values()
                    .any(|p| p.id != id && p.email.eq_ignore_ascii_case(email));
                if taken {
                    return Err(StoreError::Conflict);
                }
            }

            let profile = state
                .profiles
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found(format!("profile {id}")))?;
            if let Some(name) = update.name {
                profile.name = name;
            }
            if let Some(email) = update.email.clone() {
                profile.email = email;
            }
            profile.updated_at = kyoyu_types::now_millis();
            let profile = profile.clone();

            let principal = match (email_changed, state.principals.get_mut(&id)) {
                (true, Some(principal)) => {
                    principal.email = profile.email.clone();
                    Some(principal.clone())
                }
                _ => None,
            };
            (profile, principal)
        };

        if let Some(principal) = principal {
            let _ = self.events.send(AuthEvent::UserUpdated(principal));
        }
        Ok(profile)
    }
}

impl SessionProvider for MemoryBackend {
    fn current(&self) -> Option<Principal> {
        let state = self.state.read();
        state.current.and_then(|id| state.principals.get(&id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
