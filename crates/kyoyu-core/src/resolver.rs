//! Identity resolver.
//!
//! Given a signed-in principal, fetches "records I own" and "records shared
//! with me" as two independent reads issued concurrently. Both must succeed:
//! a half-resolved view would silently hide one side, so any failure fails
//! the whole resolution.

use std::sync::Arc;

use kyoyu_types::{Payload, Principal, PrincipalId, Record, SharedIn};
use tracing::Instrument;

use crate::error::{CoreError, CoreResult};
use crate::merge::{ViewEntry, merge};
use crate::session::SessionHandle;
use crate::store::RecordStore;

/// The two raw sets for one principal, before merging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution<P> {
    pub principal: PrincipalId,
    pub owned: Vec<Record<P>>,
    pub shared_in: Vec<SharedIn<P>>,
}

impl<P: Payload> Resolution<P> {
    /// Reconcile into the view model.
    pub fn merge(self) -> Vec<ViewEntry<P>> {
        merge(self.owned, self.shared_in)
    }
}

/// Resolves owned and shared-in records for one payload kind.
pub struct Resolver<P: Payload> {
    records: Arc<dyn RecordStore<P>>,
}

impl<P: Payload> Clone for Resolver<P> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<P: Payload> Resolver<P> {
    pub fn new(records: Arc<dyn RecordStore<P>>) -> Self {
        Self { records }
    }

    /// Resolve for the session's principal.
    pub async fn resolve(&self, session: &SessionHandle) -> CoreResult<Resolution<P>> {
        self.resolve_principal(Some(session.principal())).await
    }

    /// Resolve for an optional principal; `None` (or a nil id) is
    /// [`CoreError::NotAuthenticated`].
    pub async fn resolve_principal(&self, principal: Option<&Principal>) -> CoreResult<Resolution<P>> {
        let me = principal
            .map(|p| p.id)
            .filter(|id| !id.is_nil())
            .ok_or(CoreError::NotAuthenticated)?;

        let fetches = async {
            futures::try_join!(
                async {
                    self.records
                        .owned_by(me)
                        .await
                        .map_err(|e| CoreError::fetch_failed("owned records", e))
                },
                async {
                    self.records
                        .shared_with(me)
                        .await
                        .map_err(|e| CoreError::fetch_failed("shared-in records", e))
                },
            )
        };
        let (owned, shared_in) = fetches
            .instrument(tracing::debug_span!("resolve", kind = %P::KIND, principal = %me))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "resolution failed"))?;

        Ok(Self::enforce_invariants(me, owned, shared_in))
    }

    /// Drop rows that contradict the query they came from.
    fn enforce_invariants(
        me: PrincipalId,
        owned: Vec<Record<P>>,
        shared_in: Vec<SharedIn<P>>,
    ) -> Resolution<P> {
        let owned_total = owned.len();
        let owned: Vec<_> = owned.into_iter().filter(|r| r.owner_id == me).collect();
        if owned.len() != owned_total {
            tracing::warn!(
                dropped = owned_total - owned.len(),
                "owned fetch returned records of another owner"
            );
        }

        let shared_total = shared_in.len();
        let shared_in: Vec<_> = shared_in
            .into_iter()
            .filter(|s| s.record.owner_id != me)
            .collect();
        if shared_in.len() != shared_total {
            tracing::warn!(
                dropped = shared_total - shared_in.len(),
                "shared-in fetch returned self-owned records"
            );
        }

        tracing::debug!(owned = owned.len(), shared_in = shared_in.len(), "resolved");
        Resolution {
            principal: me,
            owned,
            shared_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FetchSide, MemoryBackend};
    use kyoyu_types::Task;

    async fn setup() -> (Arc<MemoryBackend>, Principal, Principal) {
        let backend = Arc::new(MemoryBackend::new());
        let ana = backend.register("ana@example.com", "Ana").confirmed();
        let bo = backend.register("bo@example.com", "Bo").confirmed();
        backend.provision_profiles();
        (backend, ana, bo)
    }

    #[tokio::test]
    async fn test_none_is_not_authenticated() {
        let backend = Arc::new(MemoryBackend::new());
        let resolver: Resolver<Task> = Resolver::new(backend);
        assert_eq!(resolver.resolve_principal(None).await, Err(CoreError::NotAuthenticated));

        let mut ghost = Principal::new("ghost@example.com");
        ghost.id = PrincipalId::nil();
        assert_eq!(
            resolver.resolve_principal(Some(&ghost)).await,
            Err(CoreError::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn test_resolves_both_sides() {
        let (backend, ana, bo) = setup().await;
        let mine = RecordStore::<Task>::insert(&*backend, ana.id, Task::new("ana's")).await.unwrap();
        let theirs = RecordStore::<Task>::insert(&*backend, bo.id, Task::new("bo's")).await.unwrap();
        backend.grant(&theirs, ana.id);

        let resolver: Resolver<Task> = Resolver::new(backend.clone());
        let res = resolver.resolve(&SessionHandle::new(ana.clone())).await.unwrap();
        assert_eq!(res.principal, ana.id);
        assert_eq!(res.owned.iter().map(|r| r.id).collect::<Vec<_>>(), vec![mine.id]);
        assert_eq!(res.shared_in.len(), 1);
        assert_eq!(res.shared_in[0].owner_name(), "Bo");
    }

    #[tokio::test]
    async fn test_either_side_failing_fails_the_whole() {
        let (backend, ana, bo) = setup().await;
        let theirs = RecordStore::<Task>::insert(&*backend, bo.id, Task::new("bo's")).await.unwrap();
        backend.grant(&theirs, ana.id);
        let resolver: Resolver<Task> = Resolver::new(backend.clone());
        let session = SessionHandle::new(ana);

        backend.fail_next(FetchSide::Owned);
        let err = resolver.resolve(&session).await.unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(ref m) if m.contains("owned")));

        backend.fail_next(FetchSide::SharedIn);
        let err = resolver.resolve(&session).await.unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(ref m) if m.contains("shared-in")));

        // Faults are one-shot.
        assert!(resolver.resolve(&session).await.is_ok());
    }

    #[test]
    fn test_invariants_drop_contradicting_rows() {
        let me = PrincipalId::new();
        let other = PrincipalId::new();
        let owned = vec![Record::new(me, Task::new("ok")), Record::new(other, Task::new("stray"))];
        let shared_in = vec![
            SharedIn { record: Record::new(other, Task::new("ok")), owner: None },
            SharedIn { record: Record::new(me, Task::new("self")), owner: None },
        ];
        let res = Resolver::<Task>::enforce_invariants(me, owned, shared_in);
        assert_eq!(res.owned.len(), 1);
        assert_eq!(res.shared_in.len(), 1);
        assert_eq!(res.shared_in[0].record.owner_id, other);
    }
}
