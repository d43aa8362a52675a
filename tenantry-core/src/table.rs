//! The closed set of tables whose change streams are watched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ChangeEventError;

/// A table whose change stream drives client cache invalidation.
///
/// Every variant must be given an invalidation strategy and a static key
/// mapping; both are exhaustive matches, so adding a table here without
/// deciding how it invalidates does not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedTable {
    Employees,
    TimeEntries,
    Shifts,
    Tasks,
    Projects,
    AbsenceRequests,
    Departments,
    Documents,
    CompanySettings,
    Notifications,
}

impl WatchedTable {
    /// Every watched table, in subscription order.
    pub const ALL: [WatchedTable; 10] = [
        WatchedTable::Employees,
        WatchedTable::TimeEntries,
        WatchedTable::Shifts,
        WatchedTable::Tasks,
        WatchedTable::Projects,
        WatchedTable::AbsenceRequests,
        WatchedTable::Departments,
        WatchedTable::Documents,
        WatchedTable::CompanySettings,
        WatchedTable::Notifications,
    ];

    /// Table name as known to the remote store.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchedTable::Employees => "employees",
            WatchedTable::TimeEntries => "time_entries",
            WatchedTable::Shifts => "shifts",
            WatchedTable::Tasks => "tasks",
            WatchedTable::Projects => "projects",
            WatchedTable::AbsenceRequests => "absence_requests",
            WatchedTable::Departments => "departments",
            WatchedTable::Documents => "documents",
            WatchedTable::CompanySettings => "company_settings",
            WatchedTable::Notifications => "notifications",
        }
    }
}

impl fmt::Display for WatchedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchedTable {
    type Err = ChangeEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatchedTable::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| ChangeEventError::UnknownTable {
                table: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_parses_from_its_name() {
        for table in WatchedTable::ALL {
            assert_eq!(table.as_str().parse::<WatchedTable>().unwrap(), table);
        }
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let err = "payroll_runs".parse::<WatchedTable>().unwrap_err();
        assert!(matches!(err, ChangeEventError::UnknownTable { ref table } if table == "payroll_runs"));
    }

    #[test]
    fn test_serde_uses_store_names() {
        let json = serde_json::to_string(&WatchedTable::CompanySettings).unwrap();
        assert_eq!(json, "\"company_settings\"");
    }
}
