//! Disbursement lifecycle states
//!
//! State IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Disbursement lifecycle state
///
/// `Success` is the only state that is terminal on its own. `Failed` becomes
/// terminal once the record is out of retries or the failure was permanent,
/// see [`super::types::DisbursementRecord::is_finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum DisbursementStatus {
    /// Persisted, gateway not yet answered
    Queued = 0,

    /// Gateway queued the payout, result arrives by callback
    Accepted = 10,

    /// Outcome unknown (timeout, queue timeout, no callback in time)
    Pending = 20,

    /// Terminal: recipient was paid
    Success = 40,

    /// Rejected or failed, retry-eligible until finished
    Failed = -10,
}

impl DisbursementStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(DisbursementStatus::Queued),
            10 => Some(DisbursementStatus::Accepted),
            20 => Some(DisbursementStatus::Pending),
            40 => Some(DisbursementStatus::Success),
            -10 => Some(DisbursementStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementStatus::Queued => "queued",
            DisbursementStatus::Accepted => "accepted",
            DisbursementStatus::Pending => "pending",
            DisbursementStatus::Success => "success",
            DisbursementStatus::Failed => "failed",
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, DisbursementStatus::Success)
    }

    /// States the retry scheduler picks candidates from
    #[inline]
    pub fn is_retry_candidate(&self) -> bool {
        matches!(
            self,
            DisbursementStatus::Failed | DisbursementStatus::Pending
        )
    }

    /// Allowed state machine edges
    ///
    /// ```text
    /// Queued   -> Accepted | Pending | Failed
    /// Accepted -> Pending | Success | Failed
    /// Pending  -> Accepted | Pending | Success | Failed
    /// Failed   -> Accepted | Pending | Success | Failed
    /// Success  -> (none)
    /// ```
    pub fn can_transition_to(&self, next: DisbursementStatus) -> bool {
        use DisbursementStatus::*;
        match self {
            Queued => matches!(next, Accepted | Pending | Failed),
            Accepted => matches!(next, Pending | Success | Failed),
            Pending | Failed => !matches!(next, Queued),
            Success => false,
        }
    }
}

impl fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for DisbursementStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        DisbursementStatus::from_id(value).ok_or(())
    }
}
