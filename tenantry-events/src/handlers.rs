//! Per-entity invalidation strategies.
//!
//! Every watched table maps to exactly one [`InvalidationStrategy`]:
//! a bespoke [`EntityHandler`] that knows which views a given change can
//! affect, or the table's full static mapping. The match in
//! [`strategy_for`] is exhaustive, so adding a table forces a decision here.

use tenantry_core::{ChangeEvent, ChangeKind, QueryKey, WatchedTable};

use crate::mapping::query_keys;
use crate::signal::CrossCuttingSignal;

/// Settings column carrying the tenant's display language.
pub const LANGUAGE_COLUMN: &str = "language";

/// What a single change event should invalidate and emit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationPlan {
    pub keys: Vec<QueryKey>,
    pub signals: Vec<CrossCuttingSignal>,
}

impl InvalidationPlan {
    pub fn keys(keys: Vec<QueryKey>) -> Self {
        Self {
            keys,
            signals: Vec::new(),
        }
    }

    fn roots(roots: &[&str]) -> Self {
        Self::keys(roots.iter().map(|root| QueryKey::root(*root)).collect())
    }

    pub fn with_signal(mut self, signal: CrossCuttingSignal) -> Self {
        self.signals.push(signal);
        self
    }
}

/// Session facts handlers may need to interpret a row.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub tenant_column: &'a str,
}

/// Entity-specific invalidation logic.
pub trait EntityHandler: Send + Sync {
    fn plan(&self, event: &ChangeEvent, ctx: &HandlerContext<'_>) -> InvalidationPlan;
}

/// How a table's changes are turned into invalidations.
#[derive(Clone, Copy)]
pub enum InvalidationStrategy {
    Bespoke(&'static dyn EntityHandler),
    StaticMapping,
}

impl std::fmt::Debug for InvalidationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationStrategy::Bespoke(_) => f.write_str("Bespoke"),
            InvalidationStrategy::StaticMapping => f.write_str("StaticMapping"),
        }
    }
}

static EMPLOYEES: EmployeeHandler = EmployeeHandler;
static COMPANY_SETTINGS: CompanySettingsHandler = CompanySettingsHandler;
static ABSENCE_REQUESTS: AbsenceRequestHandler = AbsenceRequestHandler;

/// Registry lookup.
pub fn strategy_for(table: WatchedTable) -> InvalidationStrategy {
    match table {
        WatchedTable::Employees => InvalidationStrategy::Bespoke(&EMPLOYEES),
        WatchedTable::CompanySettings => InvalidationStrategy::Bespoke(&COMPANY_SETTINGS),
        WatchedTable::AbsenceRequests => InvalidationStrategy::Bespoke(&ABSENCE_REQUESTS),
        WatchedTable::TimeEntries
        | WatchedTable::Shifts
        | WatchedTable::Tasks
        | WatchedTable::Projects
        | WatchedTable::Departments
        | WatchedTable::Documents
        | WatchedTable::Notifications => InvalidationStrategy::StaticMapping,
    }
}

/// Plan the invalidations for one event.
pub fn plan_for(event: &ChangeEvent, ctx: &HandlerContext<'_>) -> InvalidationPlan {
    match strategy_for(event.table) {
        InvalidationStrategy::Bespoke(handler) => handler.plan(event, ctx),
        InvalidationStrategy::StaticMapping => InvalidationPlan::keys(query_keys(event.table)),
    }
}

fn id_segment(event: &ChangeEvent, column: &str) -> Option<String> {
    match event.field(column)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Employees: inserts touch list views, updates the single record too,
/// deletes only the list.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmployeeHandler;

impl EntityHandler for EmployeeHandler {
    fn plan(&self, event: &ChangeEvent, _ctx: &HandlerContext<'_>) -> InvalidationPlan {
        match event.kind {
            ChangeKind::Insert => InvalidationPlan::roots(&[
                "employees",
                "timetracking-employees",
                "shift-employees",
                "tasks",
                "projects",
            ]),
            ChangeKind::Update => {
                let mut keys = Vec::with_capacity(2);
                if let Some(id) = id_segment(event, "id") {
                    keys.push(QueryKey::root("employee").with(id));
                }
                keys.push(QueryKey::root("employees"));
                InvalidationPlan::keys(keys)
            }
            ChangeKind::Delete => InvalidationPlan::roots(&["employees"]),
        }
    }
}

/// Company settings: the settings views, plus a language signal when the
/// display language actually changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompanySettingsHandler;

impl EntityHandler for CompanySettingsHandler {
    fn plan(&self, event: &ChangeEvent, ctx: &HandlerContext<'_>) -> InvalidationPlan {
        let plan = InvalidationPlan::keys(query_keys(WatchedTable::CompanySettings));
        if event.kind != ChangeKind::Update {
            return plan;
        }
        match event.field_change(LANGUAGE_COLUMN) {
            Some((old, new)) => plan.with_signal(CrossCuttingSignal::LanguageChanged {
                tenant_id: event.tenant_id(ctx.tenant_column),
                old: old.clone(),
                new: new.clone(),
            }),
            None => plan,
        }
    }
}

/// Absence requests: list, calendar and dashboard, plus the affected
/// employee's absence view.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsenceRequestHandler;

impl EntityHandler for AbsenceRequestHandler {
    fn plan(&self, event: &ChangeEvent, _ctx: &HandlerContext<'_>) -> InvalidationPlan {
        let mut plan = InvalidationPlan::roots(&["absence-requests", "absence-calendar", "dashboard-stats"]);
        if let Some(employee_id) = id_segment(event, "employee_id") {
            plan.keys.push(QueryKey::root("employee-absences").with(employee_id));
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tenantry_core::{IdType, Row, TenantId};

    const CTX: HandlerContext<'static> = HandlerContext {
        tenant_column: "company_id",
    };

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn key_set(plan: &InvalidationPlan) -> HashSet<QueryKey> {
        plan.keys.iter().cloned().collect()
    }

    #[test]
    fn test_employee_insert_invalidates_exact_set() {
        let event = ChangeEvent::insert(WatchedTable::Employees, row(json!({"id": "e1"})));
        let plan = plan_for(&event, &CTX);

        let expected: HashSet<QueryKey> = [
            "employees",
            "timetracking-employees",
            "shift-employees",
            "tasks",
            "projects",
        ]
        .into_iter()
        .map(QueryKey::root)
        .collect();
        assert_eq!(plan.keys.len(), 5);
        assert_eq!(key_set(&plan), expected);
        assert!(plan.signals.is_empty());
    }

    #[test]
    fn test_employee_update_targets_record_and_list() {
        let event = ChangeEvent::update(
            WatchedTable::Employees,
            row(json!({"id": "e1", "name": "A"})),
            row(json!({"id": "e1", "name": "B"})),
        );
        let plan = plan_for(&event, &CTX);
        assert_eq!(
            plan.keys,
            vec![QueryKey::new(["employee", "e1"]), QueryKey::root("employees")]
        );
    }

    #[test]
    fn test_employee_delete_invalidates_list_only() {
        let event = ChangeEvent::delete(WatchedTable::Employees, row(json!({"id": "e1"})));
        assert_eq!(plan_for(&event, &CTX).keys, vec![QueryKey::root("employees")]);
    }

    #[test]
    fn test_settings_language_unchanged_emits_no_signal() {
        let tenant = TenantId::now_v7();
        let event = ChangeEvent::update(
            WatchedTable::CompanySettings,
            row(json!({"company_id": tenant.to_string(), "language": "de", "name": "A"})),
            row(json!({"company_id": tenant.to_string(), "language": "de", "name": "B"})),
        );
        let plan = plan_for(&event, &CTX);
        assert_eq!(plan.keys, query_keys(WatchedTable::CompanySettings));
        assert!(plan.signals.is_empty());
    }

    #[test]
    fn test_settings_language_change_emits_signal_with_values() {
        let tenant = TenantId::now_v7();
        let event = ChangeEvent::update(
            WatchedTable::CompanySettings,
            row(json!({"company_id": tenant.to_string(), "language": "de"})),
            row(json!({"company_id": tenant.to_string(), "language": "en"})),
        );
        let plan = plan_for(&event, &CTX);
        assert_eq!(plan.keys, query_keys(WatchedTable::CompanySettings));
        assert_eq!(
            plan.signals,
            vec![CrossCuttingSignal::LanguageChanged {
                tenant_id: Some(tenant),
                old: json!("de"),
                new: json!("en"),
            }]
        );
    }

    #[test]
    fn test_settings_insert_never_signals() {
        let event = ChangeEvent::insert(
            WatchedTable::CompanySettings,
            row(json!({"language": "en"})),
        );
        assert!(plan_for(&event, &CTX).signals.is_empty());
    }

    #[test]
    fn test_absence_request_includes_employee_view() {
        let event = ChangeEvent::insert(
            WatchedTable::AbsenceRequests,
            row(json!({"id": 7, "employee_id": "e9"})),
        );
        let plan = plan_for(&event, &CTX);
        assert!(plan.keys.contains(&QueryKey::new(["employee-absences", "e9"])));
        assert!(plan.keys.contains(&QueryKey::root("absence-calendar")));
    }

    #[test]
    fn test_tables_without_handler_use_exact_mapping() {
        for table in WatchedTable::ALL {
            if let InvalidationStrategy::StaticMapping = strategy_for(table) {
                let event = ChangeEvent::delete(table, row(json!({"id": 1})));
                assert_eq!(plan_for(&event, &CTX).keys, query_keys(table));
            }
        }
    }
}
