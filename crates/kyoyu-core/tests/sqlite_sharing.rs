//! The sharing flow over an on-disk SQLite database.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use kyoyu_core::{
    CoreError, Denied, FinanceSummary, Relation, SessionHandle, ShareOutcome, SharedInbox,
    SqliteBackend, ViewController,
};
use kyoyu_types::{FinanceEntry, Flow, Task};

fn open(path: &std::path::Path) -> Arc<SqliteBackend> {
    Arc::new(SqliteBackend::open(path).unwrap())
}

#[tokio::test]
async fn finance_sharing_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kyoyu.db");

    let (ana, bo) = {
        let db = open(&path);
        let ana = db.register("ana@example.com", "Ana").unwrap();
        let bo = db.register("bo@example.com", "Bo").unwrap();
        db.provision_profiles().unwrap();
        let ana = SessionHandle::new(db.confirm_email(ana.id).unwrap());
        let bo = SessionHandle::new(db.confirm_email(bo.id).unwrap());

        let view = ViewController::<FinanceEntry>::from_backend(db.clone());
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let rent = view
            .create(&ana, FinanceEntry::new("Rent", Decimal::new(1_200_000, 0), date, Flow::Expense))
            .await
            .unwrap();
        view.create(&ana, FinanceEntry::new("Salary", Decimal::new(3_000_000, 0), date, Flow::Income))
            .await
            .unwrap();

        assert_eq!(
            view.share(&ana, rent.id(), bo.principal_id()).await.unwrap(),
            ShareOutcome::Shared
        );
        assert_eq!(
            view.share(&ana, rent.id(), bo.principal_id()).await.unwrap(),
            ShareOutcome::AlreadyShared
        );
        (ana, bo)
    };

    let db = open(&path);
    let ana_view = ViewController::<FinanceEntry>::from_backend(db.clone());
    ana_view.refresh(&ana).await.unwrap();
    let summary = ana_view.with_entries(|entries| FinanceSummary::of(entries.iter().map(|e| &e.record.payload)));
    assert_eq!(summary.balance, Decimal::new(1_800_000, 0));

    let bo_view = ViewController::<FinanceEntry>::from_backend(db.clone());
    bo_view.refresh(&bo).await.unwrap();
    let entries = bo_view.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].relation, Relation::SharedIn);
    assert_eq!(
        bo_view.delete(&bo, entries[0].id()).await.unwrap_err(),
        CoreError::MutationDenied(Denied::NotOwner)
    );

    let inbox = SharedInbox::load_from(&bo, &db).await.unwrap();
    assert!(inbox.tasks.is_empty());
    assert_eq!(inbox.finances.len(), 1);
    assert_eq!(inbox.finances[0].owner_name(), "Ana");
}

#[tokio::test]
async fn task_edit_and_delete_round_trip_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("kyoyu.db"));
    let ana = db.register("ana@example.com", "Ana").unwrap();
    db.provision_profiles().unwrap();
    let ana = SessionHandle::new(db.confirm_email(ana.id).unwrap());

    let view = ViewController::<Task>::from_backend(db.clone());
    let task = view.create(&ana, Task::new("Draft")).await.unwrap();
    view.edit(&ana, task.id(), Task::new("Final")).await.unwrap();
    view.toggle_complete(&ana, task.id()).await.unwrap();

    let fresh = ViewController::<Task>::from_backend(db.clone());
    fresh.refresh(&ana).await.unwrap();
    let stored = fresh.entry(task.id()).unwrap();
    assert_eq!(stored.record.payload.text, "Final");
    assert!(stored.record.payload.completed);

    fresh.delete(&ana, task.id()).await.unwrap();
    fresh.refresh(&ana).await.unwrap();
    assert!(fresh.entries().is_empty());
}
