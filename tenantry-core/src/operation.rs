//! Guarded operation kinds and their classified outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of guarded store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Mutations never run without a resolved tenant.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Select)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// Classified outcome of a guarded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Rows were returned or affected.
    Success,
    /// The call failed and the failure is not a policy denial.
    Error,
    /// No error, zero rows.
    Empty,
    /// The store rejected the call under a row-level policy.
    RlsBlocked,
}

impl OperationStatus {
    pub fn severity(&self) -> Severity {
        match self {
            OperationStatus::Success => Severity::Success,
            OperationStatus::Error => Severity::Error,
            OperationStatus::Empty => Severity::Empty,
            OperationStatus::RlsBlocked => Severity::PolicyDenied,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OperationStatus::Error | OperationStatus::RlsBlocked)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
            OperationStatus::Empty => "empty",
            OperationStatus::RlsBlocked => "rls_blocked",
        };
        f.write_str(s)
    }
}

/// Severity tag carried by operation diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
    Empty,
    PolicyDenied,
}
