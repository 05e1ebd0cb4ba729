//! The "shared with me" page.
//!
//! Reads shared-in tasks and finances concurrently. As with the resolver, a
//! failure on either side fails the whole load.

use std::sync::Arc;

use kyoyu_types::{FinanceEntry, SharedIn, Task};

use crate::error::{CoreError, CoreResult};
use crate::session::SessionHandle;
use crate::store::RecordStore;

/// Everything shared with one principal, across kinds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedInbox {
    pub tasks: Vec<SharedIn<Task>>,
    pub finances: Vec<SharedIn<FinanceEntry>>,
}

impl SharedInbox {
    pub async fn load(
        session: &SessionHandle,
        tasks: &dyn RecordStore<Task>,
        finances: &dyn RecordStore<FinanceEntry>,
    ) -> CoreResult<Self> {
        let me = session.principal_id();
        let (tasks, finances) = futures::try_join!(
            async {
                tasks
                    .shared_with(me)
                    .await
                    .map_err(|e| CoreError::fetch_failed("shared-in tasks", e))
            },
            async {
                finances
                    .shared_with(me)
                    .await
                    .map_err(|e| CoreError::fetch_failed("shared-in finances", e))
            },
        )
        .inspect_err(|e| tracing::warn!(error = %e, "shared inbox load failed"))?;

        let tasks: Vec<_> = tasks.into_iter().filter(|s| s.record.owner_id != me).collect();
        let finances: Vec<_> = finances
            .into_iter()
            .filter(|s| s.record.owner_id != me)
            .collect();
        tracing::debug!(tasks = tasks.len(), finances = finances.len(), "shared inbox loaded");
        Ok(Self { tasks, finances })
    }

    /// Load through one backend implementing both record stores.
    pub async fn load_from<B>(session: &SessionHandle, backend: &Arc<B>) -> CoreResult<Self>
    where
        B: RecordStore<Task> + RecordStore<FinanceEntry> + 'static,
    {
        Self::load(session, &**backend, &**backend).await
    }

    pub fn len(&self) -> usize {
        self.tasks.len() + self.finances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FetchSide, MemoryBackend};
    use chrono::NaiveDate;
    use kyoyu_types::Flow;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_loads_both_kinds_with_owner_names() {
        let backend = Arc::new(MemoryBackend::new());
        let ana = backend.register("ana@example.com", "Ana");
        let bo = backend.register("bo@example.com", "Bo");
        backend.provision_profiles();

        let task = RecordStore::<Task>::insert(&*backend, ana.id, Task::new("groceries"))
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rent = FinanceEntry::new("Rent", Decimal::new(900, 0), date, Flow::Expense);
        let finance = RecordStore::<FinanceEntry>::insert(&*backend, ana.id, rent).await.unwrap();
        backend.grant(&task, bo.id);
        backend.grant(&finance, bo.id);

        let inbox = SharedInbox::load_from(&SessionHandle::new(bo), &backend).await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox.tasks[0].owner_name(), "Ana");
        assert_eq!(inbox.finances[0].record.payload.description, "Rent");

        let empty = SharedInbox::load_from(&SessionHandle::new(ana), &backend).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_side_fails_the_page() {
        let backend = Arc::new(MemoryBackend::new());
        let bo = backend.register("bo@example.com", "Bo");
        backend.fail_next(FetchSide::SharedIn);

        let err = SharedInbox::load_from(&SessionHandle::new(bo), &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::FetchFailed(_)));
    }
}
