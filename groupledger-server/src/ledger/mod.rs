//! Domain operations on the shared economy: point balances, task-claim slots,
//! auction bids, and the admin operations that create and retire them.
//!
//! Every operation is a `Store` method that runs as one immediate
//! transaction and returns a typed [`LedgerError`]. Balances and quantities are
//! always re-read inside that transaction; nothing is cached in-process.

mod auctions;
mod bids;
mod claims;
mod members;
mod tasks;

use std::fmt;

pub use auctions::NewAuctionSpec;
pub use claims::{ClaimDetail, GradeOutcome, SubmitOutcome};
pub use members::{GroupSeed, MemberAccess, MemberSeed};
pub use tasks::{NewTaskSpec, TaskPointRange};

pub(crate) use members::active_membership;

use crate::storage::StorageError;

/// Largest bid a member may place.
pub const MAX_BID_AMOUNT: i32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotOpenReason {
    NotStarted,
    Ended,
}

impl fmt::Display for NotOpenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotOpenReason::NotStarted => f.write_str("auction has not started yet"),
            NotOpenReason::Ended => f.write_str("auction has ended"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Entity missing, in another group, or already closed.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    NotOpen(NotOpenReason),

    #[error("task is past its due date")]
    Expired,

    #[error("insufficient points: have {available}, need {required}")]
    InsufficientFunds { available: i32, required: i32 },

    #[error("bid amount must be at least {minimum} points")]
    BidTooLow { minimum: i32 },

    #[error("you already hold the highest bid")]
    AlreadyHighestBidder,

    #[error("you already have an active claim on this task")]
    AlreadyClaimed,

    #[error("you do not have an active claim")]
    NoActiveClaim,

    /// Lost the race against a concurrent bid of the same amount.
    #[error("another bid with this amount was just placed; retry with a higher amount")]
    ConflictRetryHigher,

    #[error("task is not available")]
    Unavailable,

    #[error("not an active member of the group")]
    NotAMember,

    #[error("a submission already exists for this claim")]
    AlreadySubmitted,

    #[error("submission has already been graded")]
    AlreadyGraded,

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Stable machine-readable tag for logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::NotOpen(NotOpenReason::NotStarted) => "not_started",
            LedgerError::NotOpen(NotOpenReason::Ended) => "ended",
            LedgerError::Expired => "expired",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::BidTooLow { .. } => "bid_too_low",
            LedgerError::AlreadyHighestBidder => "already_highest_bidder",
            LedgerError::AlreadyClaimed => "already_claimed",
            LedgerError::NoActiveClaim => "no_active_claim",
            LedgerError::ConflictRetryHigher => "conflict_retry_higher",
            LedgerError::Unavailable => "unavailable",
            LedgerError::NotAMember => "not_a_member",
            LedgerError::AlreadySubmitted => "already_submitted",
            LedgerError::AlreadyGraded => "already_graded",
            LedgerError::Invalid(_) => "invalid",
            LedgerError::Storage(_) => "internal",
        }
    }

    pub(crate) fn invalid<T: Into<String>>(msg: T) -> Self {
        LedgerError::Invalid(msg.into())
    }
}

/// Trims a display name and checks it is 3 to 100 characters long.
pub(crate) fn validate_name(label: &str, raw: &str) -> Result<String, LedgerError> {
    let name = raw.trim();
    let len = name.chars().count();
    if len == 0 {
        return Err(LedgerError::invalid(format!("{label} cannot be blank")));
    }
    if len < 3 {
        return Err(LedgerError::invalid(format!(
            "{label} must be at least 3 characters"
        )));
    }
    if len > 100 {
        return Err(LedgerError::invalid(format!(
            "{label} cannot exceed 100 characters"
        )));
    }
    Ok(name.to_string())
}

impl From<diesel::result::Error> for LedgerError {
    fn from(value: diesel::result::Error) -> Self {
        LedgerError::Storage(StorageError::Database(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diesel_errors_surface_as_storage_faults() {
        let err: LedgerError = diesel::result::Error::NotFound.into();
        assert_eq!(err.kind(), "internal");
        assert!(matches!(
            err,
            LedgerError::Storage(StorageError::Database(_))
        ));
    }

    #[test]
    fn not_open_distinguishes_start_and_end() {
        assert_eq!(
            LedgerError::NotOpen(NotOpenReason::NotStarted).kind(),
            "not_started"
        );
        assert_eq!(
            LedgerError::NotOpen(NotOpenReason::Ended).to_string(),
            "auction has ended"
        );
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(validate_name("Task name", "  Dishes ").unwrap(), "Dishes");
        assert!(validate_name("Task name", "   ").is_err());
        assert!(validate_name("Task name", "ab").is_err());
        assert!(validate_name("Task name", &"x".repeat(101)).is_err());
    }
}
