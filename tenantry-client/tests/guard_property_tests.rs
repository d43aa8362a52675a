//! Property-Based Tests for Tenant Guarding
//!
//! For any rows and any pair of tenants, guarded calls SHALL only read,
//! stamp, and mutate rows of the resolved tenant, and SHALL fail closed
//! without touching the store when no tenant resolves.

use proptest::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use tenantry_client::TenantSession;
use tenantry_storage::{InsertOptions, NoopObserver, OperationLog, SelectOptions};
use tenantry_test_utils::{
    assertions, fixtures, generators, IdType, InMemoryChangeFeed, InMemoryStore,
    MockTenantDirectory, OperationStatus, Row, TenantId,
};
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every inserted row carries the resolved tenant, whatever the payload said.
    #[test]
    fn prop_insert_stamps_every_row(
        tenant in generators::arb_tenant_id(),
        rows in prop::collection::vec(generators::arb_row_with_tenant("company_id"), 1..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (store, _, guard) = fixtures::guard_for(Some(tenant));
            let count = rows.len();

            let envelope = guard.insert("tasks", rows, InsertOptions::default()).await;
            assertions::assert_status(&envelope, OperationStatus::Success);

            let stored = store.rows("tasks");
            prop_assert_eq!(stored.len(), count);
            assertions::assert_all_stamped(&stored, "company_id", tenant);
            Ok(())
        })?;
    }

    /// A select never returns another tenant's rows.
    #[test]
    fn prop_select_only_sees_own_tenant(
        (tenant, other) in generators::arb_tenant_pair(),
        own in 0usize..6,
        foreign in 0usize..6,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (store, _, guard) = fixtures::guard_for(Some(tenant));
            for i in 0..own {
                store.seed("employees", vec![fixtures::employee_row(tenant, &format!("own-{i}"), "A")]);
            }
            for i in 0..foreign {
                store.seed("employees", vec![fixtures::employee_row(other, &format!("foreign-{i}"), "B")]);
            }

            let envelope = guard.select("employees", "*", SelectOptions::new()).await;
            let expected = if own == 0 { OperationStatus::Empty } else { OperationStatus::Success };
            assertions::assert_status(&envelope, expected);

            let rows = envelope.into_result().map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(rows.len(), own);
            assertions::assert_all_stamped(&rows, "company_id", tenant);
            Ok(())
        })?;
    }

    /// Update and delete aimed at another tenant's row change nothing.
    #[test]
    fn prop_cross_tenant_mutations_affect_nothing(
        (tenant, other) in generators::arb_tenant_pair(),
        values in generators::arb_row(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (store, _, guard) = fixtures::guard_for(Some(tenant));
            let victim = fixtures::employee_row(other, "victim", "Vic");
            store.seed("employees", vec![victim.clone()]);

            let update = guard.update("employees", values, "id", "victim").await;
            assertions::assert_status(&update, OperationStatus::Empty);
            let delete = guard.delete("employees", "id", "victim").await;
            assertions::assert_status(&delete, OperationStatus::Empty);

            prop_assert_eq!(store.rows("employees"), vec![victim]);
            Ok(())
        })?;
    }

    /// Without a tenant, no operation reaches the store.
    #[test]
    fn prop_unresolved_tenant_never_reaches_store(
        row in generators::arb_row(),
        match_value in "[a-z0-9]{1,8}",
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let (store, _, guard) = fixtures::guard_for(None);

            let select = guard.select("employees", "*", SelectOptions::new()).await;
            let insert = guard.insert("employees", row.clone(), InsertOptions::default()).await;
            let update = guard.update("employees", row, "id", Value::String(match_value.clone())).await;
            let delete = guard.delete("employees", "id", Value::String(match_value)).await;

            assertions::assert_no_tenant_context(&select);
            assertions::assert_no_tenant_context(&insert);
            assertions::assert_no_tenant_context(&update);
            assertions::assert_no_tenant_context(&delete);
            prop_assert_eq!(store.calls(), 0);
            Ok(())
        })?;
    }

    /// Without a primary tenant, the actor's membership scopes the session.
    #[test]
    fn prop_actor_membership_scopes_inserts(
        user in generators::arb_user_id(),
        tenant in generators::arb_tenant_id(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let directory = MockTenantDirectory::new();
            directory.set_membership(user, tenant);
            let store = Arc::new(InMemoryStore::new());
            let session = TenantSession::builder(
                Arc::clone(&store),
                Arc::new(directory),
                Arc::new(InMemoryChangeFeed::new()),
            )
            .actor(user)
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let row = fixtures::row(serde_json::json!({"title": "Onboarding"}));
            let envelope = session.guard().insert("tasks", row, InsertOptions::default()).await;
            assertions::assert_status(&envelope, OperationStatus::Success);
            assertions::assert_all_stamped(&store.rows("tasks"), "company_id", tenant);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// The log keeps at most its capacity, newest first.
    #[test]
    fn prop_log_is_bounded_newest_first(
        entries in prop::collection::vec(generators::arb_log_entry(), 0..120),
    ) {
        let log = OperationLog::with_observer(OperationLog::DEFAULT_CAPACITY, Arc::new(NoopObserver));
        for entry in &entries {
            log.record(entry.clone());
        }

        let kept = log.get_all();
        prop_assert_eq!(kept.len(), entries.len().min(OperationLog::DEFAULT_CAPACITY));
        let expected: Vec<_> = entries.iter().rev().take(OperationLog::DEFAULT_CAPACITY).cloned().collect();
        prop_assert_eq!(kept, expected);
    }
}

#[test]
fn stamped_rows_keep_caller_columns() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let tenant = TenantId::now_v7();
        let (_, _, guard) = fixtures::guard_for(Some(tenant));
        let payload: Row = fixtures::row(serde_json::json!({"title": "Plan Q3"}));

        let rows = guard
            .insert("tasks", payload, InsertOptions::default())
            .await
            .into_result()
            .unwrap();
        assert_eq!(rows[0]["title"], "Plan Q3");
        assertions::assert_all_stamped(&rows, "company_id", tenant);
    });
}
