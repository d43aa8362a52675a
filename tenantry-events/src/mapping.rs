//! Static table to cache-key mapping.
//!
//! Each watched table lists every cached view that reads from it. A change
//! on a table without a bespoke handler invalidates exactly this list.

use tenantry_core::{ChangeEventError, QueryKey, WatchedTable};

use crate::cache::QueryCache;

/// Root keys of every view that depends on `table`.
pub fn mapped_roots(table: WatchedTable) -> &'static [&'static str] {
    match table {
        WatchedTable::Employees => &[
            "employees",
            "employee",
            "timetracking-employees",
            "shift-employees",
            "tasks",
            "projects",
            "absence-requests",
            "department-members",
            "dashboard-stats",
        ],
        WatchedTable::TimeEntries => &[
            "time-entries",
            "timetracking",
            "timetracking-employees",
            "payroll-hours",
            "dashboard-stats",
        ],
        WatchedTable::Shifts => &["shifts", "shift-schedule", "shift-employees", "dashboard-stats"],
        WatchedTable::Tasks => &["tasks", "task", "projects", "dashboard-stats"],
        WatchedTable::Projects => &["projects", "project", "tasks", "dashboard-stats"],
        WatchedTable::AbsenceRequests => &[
            "absence-requests",
            "absence-calendar",
            "employee-absences",
            "dashboard-stats",
        ],
        WatchedTable::Departments => &["departments", "department-members", "employees"],
        WatchedTable::Documents => &["documents", "employee-documents"],
        WatchedTable::CompanySettings => &["company-settings", "settings", "company-language"],
        WatchedTable::Notifications => &["notifications", "notification-count"],
    }
}

/// Mapped keys for `table`, in declaration order.
pub fn query_keys(table: WatchedTable) -> Vec<QueryKey> {
    mapped_roots(table)
        .iter()
        .map(|root| QueryKey::root(*root))
        .collect()
}

/// Invalidate the full mapping of the table named `name`.
///
/// Returns the number of keys invalidated.
pub fn invalidate_table(cache: &dyn QueryCache, name: &str) -> Result<usize, ChangeEventError> {
    let table: WatchedTable = name.parse()?;
    let keys = query_keys(table);
    for key in &keys {
        cache.invalidate(key);
    }
    tracing::debug!(%table, keys = keys.len(), "Invalidated table mapping");
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<QueryKey>>);

    impl QueryCache for Recording {
        fn invalidate(&self, key: &QueryKey) {
            self.0.lock().unwrap().push(key.clone());
        }
    }

    #[test]
    fn test_every_table_has_unique_nonempty_mapping() {
        for table in WatchedTable::ALL {
            let roots = mapped_roots(table);
            assert!(!roots.is_empty(), "{table} has no mapped keys");
            let unique: HashSet<_> = roots.iter().collect();
            assert_eq!(unique.len(), roots.len(), "{table} repeats a key");
        }
    }

    #[test]
    fn test_invalidate_table_by_name() {
        let cache = Recording::default();
        let count = invalidate_table(&cache, "documents").unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            *cache.0.lock().unwrap(),
            vec![QueryKey::root("documents"), QueryKey::root("employee-documents")]
        );
    }

    #[test]
    fn test_invalidate_unknown_table_is_rejected() {
        let cache = Recording::default();
        let err = invalidate_table(&cache, "payroll_runs").unwrap_err();
        assert!(matches!(err, ChangeEventError::UnknownTable { .. }));
        assert!(cache.0.lock().unwrap().is_empty());
    }
}
