//! View controller.
//!
//! Owns the reconciled entries behind one view (tasks or finances) and is the
//! only thing that mutates them. Two writers exist:
//!
//! - a completed, non-stale refresh (resolve + merge), and
//! - local updates after the store acknowledged a mutation.
//!
//! Refreshes are numbered from a monotonic counter. A refresh applies its
//! result only if no newer refresh (or acknowledged mutation) started after
//! it; otherwise the result is dropped as stale. A failed refresh keeps the
//! last-known-good entries and records the error as the current notice.
//!
//! Every acknowledged mutation is followed by a refresh of its own, so a
//! refresh it superseded is always replaced by a complete one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use kyoyu_types::{Payload, PrincipalId, RecordId, Task};

use crate::error::{CoreError, CoreResult};
use crate::merge::{Directory, ViewEntry};
use crate::mutation::{Mutations, ShareOutcome};
use crate::resolver::Resolver;
use crate::session::{SessionChange, SessionHandle};
use crate::store::{GrantStore, ProfileStore, RecordStore};

/// What happened to a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The view now shows this refresh's result.
    Applied { generation: u64, entries: usize },
    /// A newer refresh or mutation started first; this result was dropped.
    Stale { generation: u64 },
}

impl RefreshOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RefreshOutcome::Applied { .. })
    }
}

struct ViewState<P> {
    principal: Option<PrincipalId>,
    entries: Vec<ViewEntry<P>>,
    /// Generation of the last applied refresh.
    applied: u64,
    notice: Option<CoreError>,
}

impl<P> Default for ViewState<P> {
    fn default() -> Self {
        Self {
            principal: None,
            entries: Vec::new(),
            applied: 0,
            notice: None,
        }
    }
}

/// Reconciled view for one payload kind.
pub struct ViewController<P: Payload> {
    resolver: Resolver<P>,
    mutations: Mutations<P>,
    profiles: Arc<dyn ProfileStore>,
    started: AtomicU64,
    state: RwLock<ViewState<P>>,
}

impl<P: Payload> ViewController<P> {
    pub fn new(
        records: Arc<dyn RecordStore<P>>,
        grants: Arc<dyn GrantStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            resolver: Resolver::new(Arc::clone(&records)),
            mutations: Mutations::new(records, grants),
            profiles,
            started: AtomicU64::new(0),
            state: RwLock::new(ViewState::default()),
        }
    }

    /// Build from one backend that implements every store.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: RecordStore<P> + GrantStore + ProfileStore + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Re-run the resolver and merge, applying the result unless superseded.
    pub async fn refresh(&self, session: &SessionHandle) -> CoreResult<RefreshOutcome> {
        let generation = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let me = session.principal_id();

        {
            let mut state = self.state.write();
            if state.principal != Some(me) {
                // Never show one principal's last-known-good to another.
                *state = ViewState {
                    principal: Some(me),
                    ..ViewState::default()
                };
            }
        }

        let result = self.resolver.resolve(session).await;

        if self.started.load(Ordering::SeqCst) != generation {
            tracing::warn!(kind = %P::KIND, generation, "dropping stale resolution");
            return Ok(RefreshOutcome::Stale { generation });
        }

        let mut state = self.state.write();
        if state.principal != Some(me) {
            return Ok(RefreshOutcome::Stale { generation });
        }
        match result {
            Ok(resolution) => {
                state.entries = resolution.merge();
                state.applied = generation;
                state.notice = None;
                let entries = state.entries.len();
                tracing::info!(kind = %P::KIND, generation, entries, "view refreshed");
                Ok(RefreshOutcome::Applied { generation, entries })
            }
            Err(e) => {
                state.notice = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Forget everything (e.g. after sign-out).
    pub fn clear(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ViewState::default();
    }

    /// Follow an auth transition handled by the session manager.
    ///
    /// Sign-out clears the view. A new or switched principal is resolved from
    /// scratch with `session`, the manager's current handle. Detail updates
    /// leave the view alone and return `Ok(None)`.
    pub async fn on_session_change(
        &self,
        change: SessionChange,
        session: Option<&SessionHandle>,
    ) -> CoreResult<Option<RefreshOutcome>> {
        match change {
            SessionChange::SignedOut => {
                self.clear();
                Ok(None)
            }
            SessionChange::SignedIn(_) | SessionChange::Switched { .. } => {
                let session = session.ok_or(CoreError::NotAuthenticated)?;
                self.refresh(session).await.map(Some)
            }
            SessionChange::Updated | SessionChange::Unchanged => Ok(None),
        }
    }

    /// Invalidate in-flight refreshes: their data predates an acknowledged
    /// mutation.
    fn supersede(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    /// Re-resolve after an acknowledged mutation. A failure stays as the
    /// notice; the mutation itself already succeeded.
    async fn reconcile(&self, session: &SessionHandle, action: &'static str) {
        if let Err(e) = self.refresh(session).await {
            tracing::warn!(kind = %P::KIND, action, error = %e, "refresh after mutation failed");
        }
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub fn entries(&self) -> Vec<ViewEntry<P>> {
        self.state.read().entries.clone()
    }

    pub fn entry(&self, id: RecordId) -> Option<ViewEntry<P>> {
        self.state.read().entries.iter().find(|e| e.id() == id).cloned()
    }

    /// Run `f` over the entries without cloning them.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[ViewEntry<P>]) -> R) -> R {
        f(&self.state.read().entries)
    }

    /// Error from the last failed refresh, cleared by the next applied one.
    pub fn notice(&self) -> Option<CoreError> {
        self.state.read().notice.clone()
    }

    /// Generation of the last applied refresh (0 if none).
    pub fn generation(&self) -> u64 {
        self.state.read().applied
    }

    /// Every profile except the viewer's, for picking a share target.
    pub async fn share_targets(&self, session: &SessionHandle) -> CoreResult<Directory> {
        let profiles = self
            .profiles
            .profiles_except(session.principal_id())
            .await
            .map_err(|e| CoreError::fetch_failed("profiles", e))?;
        Ok(profiles.into_iter().collect())
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn require(&self, id: RecordId) -> CoreResult<ViewEntry<P>> {
        self.entry(id).ok_or(CoreError::UnknownRecord(id))
    }

    /// Create a record and append it as an owned entry.
    pub async fn create(&self, session: &SessionHandle, payload: P) -> CoreResult<ViewEntry<P>> {
        let record = self.mutations.create(session, payload).await?;
        let entry = ViewEntry::owned(record);
        self.supersede();
        let me = session.principal_id();
        {
            let mut state = self.state.write();
            match state.principal {
                Some(other) if other != me => {}
                _ => {
                    state.principal = Some(me);
                    state.entries.push(entry.clone());
                }
            }
        }
        self.reconcile(session, "create").await;
        Ok(entry)
    }

    /// Replace an owned entry's payload.
    pub async fn edit(
        &self,
        session: &SessionHandle,
        id: RecordId,
        payload: P,
    ) -> CoreResult<ViewEntry<P>> {
        let entry = self.require(id)?;
        let record = self.mutations.edit(session, &entry, payload).await?;
        self.supersede();
        let updated = {
            let mut state = self.state.write();
            match state.entries.iter_mut().find(|e| e.id() == id) {
                Some(existing) => {
                    existing.record.payload = record.payload;
                    existing.clone()
                }
                None => ViewEntry::owned(record),
            }
        };
        self.reconcile(session, "edit").await;
        Ok(updated)
    }

    /// Delete an owned entry.
    pub async fn delete(&self, session: &SessionHandle, id: RecordId) -> CoreResult<()> {
        let entry = self.require(id)?;
        self.mutations.delete(session, &entry).await?;
        self.supersede();
        self.state.write().entries.retain(|e| e.id() != id);
        self.reconcile(session, "delete").await;
        Ok(())
    }

    /// Share an owned entry, then refresh so its grantees are current.
    ///
    /// A refresh failure after a successful share is recorded as the notice
    /// but does not turn the share into an error.
    pub async fn share(
        &self,
        session: &SessionHandle,
        id: RecordId,
        grantee: PrincipalId,
    ) -> CoreResult<ShareOutcome> {
        let entry = self.require(id)?;
        let outcome = self.mutations.share(session, &entry, grantee).await?;
        if outcome == ShareOutcome::Shared {
            self.reconcile(session, "share").await;
        }
        Ok(outcome)
    }
}

impl ViewController<Task> {
    /// Flip a task's completion flag. Gated as an edit.
    pub async fn toggle_complete(
        &self,
        session: &SessionHandle,
        id: RecordId,
    ) -> CoreResult<ViewEntry<Task>> {
        let entry = self.require(id)?;
        let mut task = entry.record.payload.clone();
        task.completed = !task.completed;
        self.edit(session, id, task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FetchSide, MemoryBackend};
    use crate::gate::Denied;
    use crate::merge::Relation;

    fn setup() -> (Arc<MemoryBackend>, ViewController<Task>, SessionHandle, SessionHandle) {
        let backend = Arc::new(MemoryBackend::new());
        let ana = backend.register("ana@example.com", "Ana");
        let bo = backend.register("bo@example.com", "Bo");
        backend.provision_profiles();
        let view = ViewController::from_backend(backend.clone());
        (backend, view, SessionHandle::new(ana), SessionHandle::new(bo))
    }

    #[tokio::test]
    async fn test_refresh_applies_and_numbers() {
        let (_backend, view, ana, _bo) = setup();
        view.create(&ana, Task::new("one")).await.unwrap();

        let first = view.refresh(&ana).await.unwrap();
        let second = view.refresh(&ana).await.unwrap();
        assert!(first.is_applied());
        match second {
            RefreshOutcome::Applied { generation, entries } => {
                assert_eq!(entries, 1);
                assert_eq!(view.generation(), generation);
            }
            other => panic!("expected applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_known_good() {
        let (backend, view, ana, _bo) = setup();
        view.create(&ana, Task::new("keep me")).await.unwrap();
        view.refresh(&ana).await.unwrap();

        backend.fail_next(FetchSide::Owned);
        let err = view.refresh(&ana).await.unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(_)));
        assert_eq!(view.entries().len(), 1);
        assert_eq!(view.notice(), Some(err));

        view.refresh(&ana).await.unwrap();
        assert_eq!(view.notice(), None);
    }

    #[tokio::test]
    async fn test_principal_change_resets_view() {
        let (backend, view, ana, bo) = setup();
        view.create(&ana, Task::new("ana only")).await.unwrap();
        view.refresh(&ana).await.unwrap();

        backend.fail_next(FetchSide::SharedIn);
        assert!(view.refresh(&bo).await.is_err());
        assert!(view.entries().is_empty(), "bo must not see ana's last-known-good");
    }

    #[tokio::test]
    async fn test_local_updates_after_ack() {
        let (_backend, view, ana, _bo) = setup();
        view.refresh(&ana).await.unwrap();

        let created = view.create(&ana, Task::new("draft")).await.unwrap();
        assert_eq!(view.entries().len(), 1);

        let toggled = view.toggle_complete(&ana, created.id()).await.unwrap();
        assert!(toggled.record.payload.completed);
        assert!(view.entry(created.id()).unwrap().record.payload.completed);

        view.delete(&ana, created.id()).await.unwrap();
        assert!(view.entries().is_empty());
        assert_eq!(
            view.delete(&ana, created.id()).await,
            Err(CoreError::UnknownRecord(created.id()))
        );
    }

    #[tokio::test]
    async fn test_share_refreshes_grantees() {
        let (_backend, view, ana, bo) = setup();
        let created = view.create(&ana, Task::new("groceries")).await.unwrap();

        let outcome = view.share(&ana, created.id(), bo.principal_id()).await.unwrap();
        assert_eq!(outcome, ShareOutcome::Shared);
        let entry = view.entry(created.id()).unwrap();
        assert!(entry.record.shared_with.contains(&bo.principal_id()));

        let again = view.share(&ana, created.id(), bo.principal_id()).await.unwrap();
        assert_eq!(again, ShareOutcome::AlreadyShared);
    }

    #[tokio::test]
    async fn test_shared_in_entries_refuse_mutation() {
        let (backend, ana_view, ana, bo) = setup();
        let created = ana_view.create(&ana, Task::new("groceries")).await.unwrap();
        ana_view.share(&ana, created.id(), bo.principal_id()).await.unwrap();

        let bo_view = ViewController::<Task>::from_backend(backend.clone());
        bo_view.refresh(&bo).await.unwrap();
        let entry = bo_view.entry(created.id()).unwrap();
        assert_eq!(entry.relation, Relation::SharedIn);

        let writes = backend.write_count();
        let err = bo_view.toggle_complete(&bo, created.id()).await.unwrap_err();
        assert_eq!(err, CoreError::MutationDenied(Denied::NotOwner));
        assert_eq!(backend.write_count(), writes);
    }

    #[tokio::test]
    async fn test_share_targets_exclude_viewer() {
        let (_backend, view, ana, bo) = setup();
        let targets = view.share_targets(&ana).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets.get(bo.principal_id()).is_some());
        assert!(targets.get(ana.principal_id()).is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_backend, view, ana, _bo) = setup();
        view.create(&ana, Task::new("x")).await.unwrap();
        view.refresh(&ana).await.unwrap();
        view.clear();
        assert!(view.entries().is_empty());
        assert_eq!(view.generation(), 0);
    }
}
