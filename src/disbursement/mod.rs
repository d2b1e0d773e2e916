//! Disbursement lifecycle
//!
//! Durable record of each payout and the state machine that drives it.
//!
//! # State Machine
//!
//! ```text
//! QUEUED -> ACCEPTED -> SUCCESS
//!    |         |  \
//!    |         |   -> FAILED <-> (retry) -> ACCEPTED | PENDING | FAILED
//!    |         v
//!    +----> PENDING -> (retry) -> ...
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: the record exists before the gateway is called
//! 2. **Success is absorbing**: nothing leaves `SUCCESS`
//! 3. **CAS writes**: every update is conditioned on the expected status
//! 4. **Timeout is not failure**: an unanswered call leaves the record `PENDING`
//! 5. **Fresh key per attempt**: `{id}-{attempt}`, never reused
//! 6. `retry_count <= max_retries`

pub mod coordinator;
pub mod db;
pub mod error;
pub mod repository;
pub mod state;
pub mod types;


pub use coordinator::{DisbursementCoordinator, Dispatch, SubmitRequest, SubmitResult};
pub use db::PgDisbursementRepository;
pub use error::DisbursementError;
pub use repository::{DisbursementRepository, InMemoryDisbursementRepository};
pub use state::DisbursementStatus;
pub use types::{
    AttemptMatch, AttemptOutcome, DisbursementId, DisbursementRecord, MinorUnits, RetryLogEntry,
    StatusUpdate,
};
