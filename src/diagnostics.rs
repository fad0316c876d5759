//! Diagnostic reporting for subgroup codegen
//!
//! This module provides the crate error type using thiserror and miette.
//! Only [`SubgroupError::Unsupported`] is recoverable; the caller decides
//! whether to surface it as a DSL-level error. Everything else aborts the
//! compilation unit.

use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SubgroupError>;

/// A patched block that could not be emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckBlock {
    pub name: String,
    pub total_deps: usize,
    pub missing: Vec<String>,
}

impl fmt::Display for StuckBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] has {} dependencies, missing [{}]",
            self.name,
            self.total_deps,
            self.missing.join(", ")
        )
    }
}

/// Subgroup codegen diagnostic
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum SubgroupError {
    // === Resolution Errors ===
    #[error("{op} with type [{vtype}] not supported: {reason}")]
    #[diagnostic(
        code(subgroup::unsupported),
        help("enable more capabilities with `oclu.SubgroupExt` or pick a mimic backend")
    )]
    Unsupported {
        op: String,
        vtype: String,
        reason: String,
    },

    // === Fatal Errors ===
    #[error("Subgroup mimic [local] invariant violated: {message}")]
    #[diagnostic(
        code(subgroup::invariant),
        help("local mimic requires exactly one subgroup spanning the whole workgroup")
    )]
    InvariantViolation { message: String },

    #[error("Patched blocks with unresolved dependencies: {}", names(.stuck))]
    #[diagnostic(code(patch::dependency))]
    Dependency {
        stuck: Vec<StuckBlock>,
        cycles: Vec<Vec<String>>,
        #[help]
        report: Option<String>,
    },

    // === Input Errors ===
    #[error("Invalid vector type `{text}` for [{func}]")]
    #[diagnostic(code(subgroup::invalid_type))]
    InvalidVecType { func: String, text: String },

    #[error("[{func}] expects {expected} args, found {found}")]
    #[diagnostic(code(subgroup::arg_count))]
    ArgCount {
        func: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown subgroup request `{text}`")]
    #[diagnostic(
        code(subgroup::unknown_request),
        help("requests look like `broadcast:u8v4`, `reduce_sum:i16v4` or `size`")
    )]
    UnknownRequest { text: String },

    #[error("Invalid meta [{meta}]: {message}")]
    #[diagnostic(code(subgroup::invalid_meta))]
    InvalidMeta { meta: String, message: String },

    #[error("Device profile error: {message}")]
    #[diagnostic(code(config::device))]
    Config { message: String },
}

fn names(stuck: &[StuckBlock]) -> String {
    stuck
        .iter()
        .map(|b| b.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SubgroupError {
    pub fn unsupported(op: impl Into<String>, vtype: impl fmt::Display, reason: impl Into<String>) -> Self {
        SubgroupError::Unsupported {
            op: op.into(),
            vtype: vtype.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        SubgroupError::InvariantViolation {
            message: message.into(),
        }
    }

    /// Build a dependency error with the full per-block report
    pub fn dependency(stuck: Vec<StuckBlock>, cycles: Vec<Vec<String>>) -> Self {
        let mut report = String::new();
        for block in &stuck {
            report.push_str(&format!(" - {}\n", block));
        }
        for cycle in &cycles {
            report.push_str(&format!(" - cycle: {}\n", cycle.join(" -> ")));
        }
        SubgroupError::Dependency {
            stuck,
            cycles,
            report: Some(report),
        }
    }

    /// Whether the caller may fall back instead of aborting
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SubgroupError::Unsupported { .. })
    }
}
