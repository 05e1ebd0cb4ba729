//! Gated mutations.
//!
//! Every edit, delete, and share passes [`authorize`] first; a denial never
//! reaches the store. Store failures come back as
//! [`CoreError::MutationRejected`], except a duplicate share grant, which is
//! the desired end state and reported as [`ShareOutcome::AlreadyShared`].

use std::sync::Arc;

use kyoyu_types::{Payload, PrincipalId, Record, ShareGrant};

use crate::error::{CoreError, CoreResult};
use crate::gate::{Action, authorize};
use crate::merge::ViewEntry;
use crate::session::SessionHandle;
use crate::store::{GrantStore, RecordStore};

/// Result of a share request that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ShareOutcome {
    /// A new grant was stored.
    Shared,
    /// The grant already existed; nothing changed.
    AlreadyShared,
}

/// Mutations for one payload kind.
pub struct Mutations<P: Payload> {
    records: Arc<dyn RecordStore<P>>,
    grants: Arc<dyn GrantStore>,
}

impl<P: Payload> Mutations<P> {
    pub fn new(records: Arc<dyn RecordStore<P>>, grants: Arc<dyn GrantStore>) -> Self {
        Self { records, grants }
    }

    /// Create a record owned by the session's principal.
    pub async fn create(&self, session: &SessionHandle, payload: P) -> CoreResult<Record<P>> {
        validate(&payload)?;
        let record = self
            .records
            .insert(session.principal_id(), payload)
            .await
            .map_err(CoreError::rejected)?;
        tracing::info!(kind = %P::KIND, record = %record.id, "created");
        Ok(record)
    }

    /// Replace the payload of an owned record.
    pub async fn edit(
        &self,
        session: &SessionHandle,
        entry: &ViewEntry<P>,
        payload: P,
    ) -> CoreResult<Record<P>> {
        authorize(session, entry, &Action::Edit)?;
        validate(&payload)?;
        let record = self
            .records
            .update(entry.id(), payload)
            .await
            .map_err(CoreError::rejected)?;
        tracing::info!(kind = %P::KIND, record = %record.id, "updated");
        Ok(record)
    }

    /// Delete an owned record.
    pub async fn delete(&self, session: &SessionHandle, entry: &ViewEntry<P>) -> CoreResult<()> {
        authorize(session, entry, &Action::Delete)?;
        self.records
            .delete(entry.id())
            .await
            .map_err(CoreError::rejected)?;
        tracing::info!(kind = %P::KIND, record = %entry.id(), "deleted");
        Ok(())
    }

    /// Share an owned record with `grantee`.
    pub async fn share(
        &self,
        session: &SessionHandle,
        entry: &ViewEntry<P>,
        grantee: PrincipalId,
    ) -> CoreResult<ShareOutcome> {
        authorize(session, entry, &Action::Share { grantee })?;
        let grant = ShareGrant::new(entry.id(), P::KIND, session.principal_id(), grantee);
        match self.grants.insert_grant(&grant).await {
            Ok(()) => {
                tracing::info!(kind = %P::KIND, record = %grant.record_id, %grantee, "shared");
                Ok(ShareOutcome::Shared)
            }
            Err(e) if e.is_conflict() => {
                tracing::info!(kind = %P::KIND, record = %grant.record_id, %grantee, "already shared");
                Ok(ShareOutcome::AlreadyShared)
            }
            Err(e) => Err(CoreError::rejected(e)),
        }
    }
}

fn validate<P: Payload>(payload: &P) -> CoreResult<()> {
    payload.validate().map_err(|source| CoreError::Invalid {
        kind: P::KIND,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::gate::Denied;
    use kyoyu_types::{Principal, Task};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        mutations: Mutations<Task>,
        ana: SessionHandle,
        bo: Principal,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let ana = backend.register("ana@example.com", "Ana");
        let bo = backend.register("bo@example.com", "Bo");
        backend.provision_profiles();
        Fixture {
            mutations: Mutations::new(backend.clone(), backend.clone()),
            backend,
            ana: SessionHandle::new(ana),
            bo,
        }
    }

    #[tokio::test]
    async fn test_create_validates() {
        let f = fixture();
        let err = f.mutations.create(&f.ana, Task::new("  ")).await.unwrap_err();
        assert!(matches!(err, CoreError::Invalid { .. }));
        assert_eq!(f.backend.record_count(), 0);

        let record = f.mutations.create(&f.ana, Task::new("Buy milk")).await.unwrap();
        assert_eq!(record.owner_id, f.ana.principal_id());
        assert_eq!(f.backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_share_twice_is_idempotent() {
        let f = fixture();
        let record = f.mutations.create(&f.ana, Task::new("Buy milk")).await.unwrap();
        let entry = ViewEntry::owned(record);

        let first = f.mutations.share(&f.ana, &entry, f.bo.id).await.unwrap();
        let second = f.mutations.share(&f.ana, &entry, f.bo.id).await.unwrap();
        assert_eq!(first, ShareOutcome::Shared);
        assert_eq!(second, ShareOutcome::AlreadyShared);
        assert_eq!(f.backend.grant_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_never_reaches_store() {
        let f = fixture();
        let record = f.mutations.create(&f.ana, Task::new("mine")).await.unwrap();
        let entry = ViewEntry::owned(record);
        let bo = SessionHandle::new(f.bo.clone());
        let before = f.backend.write_count();

        let err = f.mutations.delete(&bo, &entry).await.unwrap_err();
        assert_eq!(err, CoreError::MutationDenied(Denied::NotOwner));
        let err = f
            .mutations
            .share(&f.ana, &entry, f.ana.principal_id())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::MutationDenied(Denied::CannotShareWithSelf));
        let err = f
            .mutations
            .share(&f.ana, &entry, PrincipalId::nil())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::MutationDenied(Denied::InvalidGrantee));

        assert_eq!(f.backend.write_count(), before);
        assert_eq!(f.backend.grant_count(), 0);
        assert_eq!(f.backend.record_count(), 1);
    }

    #[tokio::test]
    async fn test_store_rejection_surfaces() {
        let f = fixture();
        let record = f.mutations.create(&f.ana, Task::new("mine")).await.unwrap();
        let entry = ViewEntry::owned(record);
        f.backend.reject_writes(true);

        let err = f.mutations.edit(&f.ana, &entry, Task::new("changed")).await.unwrap_err();
        assert!(matches!(err, CoreError::MutationRejected(_)));
        let err = f.mutations.share(&f.ana, &entry, f.bo.id).await.unwrap_err();
        assert!(matches!(err, CoreError::MutationRejected(_)));
    }
}
