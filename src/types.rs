// =============================================================================
// Shared types used across the Aurora sentinel engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an open perpetual position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1.0 for longs, -1.0 for shorts.
    pub fn direction(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Final outcome of one advisor pass (or close event), as journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Action validated and dispatched successfully.
    Ok,
    /// LLM or order dispatch failed.
    Failed,
    /// Action failed safety validation; nothing dispatched.
    Rejected,
    /// Advisor budget exhausted; no LLM call was made.
    Skipped,
    /// Informational record (e.g. position closed), no action path.
    Info,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Failed => write!(f, "failed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Skipped => write!(f, "skipped"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Sign of a funding rate, collapsed to {-1, 0, +1}.
pub fn funding_sign(rate: f64) -> i8 {
    if !rate.is_finite() || rate == 0.0 {
        0
    } else if rate > 0.0 {
        1
    } else {
        -1
    }
}
