//! Gateway callbacks
//!
//! The gateway reports the final outcome of an accepted payout asynchronously,
//! either as a result notification or as a queue-timeout notification. Both
//! may arrive more than once, out of order, or before the synchronous
//! acknowledgement was persisted.
//!
//! ```text
//! POST /api/v1/callbacks/{result|timeout}
//!     -> parse_callback (never rejects a body)
//!     -> CallbackRepository::store (dedup key)
//!     -> CallbackCorrelator (lookup, CAS, settlement event)
//! ```

pub mod correlator;
pub mod db;
pub mod payload;
pub mod repository;

pub use correlator::{CallbackCorrelator, CorrelationOutcome, IgnoredReason};
pub use db::PgCallbackRepository;
pub use payload::{CallbackRecord, CallbackResult, CallbackType, parse_callback};
pub use repository::{
    CallbackError, CallbackRepository, InMemoryCallbackRepository, StoreOutcome,
};
