//! Outbox - outgoing messages held until the unit of work commits.
//!
//! ## Flow
//!
//! ```text
//! handler ──send()──▶ MessageContext (pending)
//!                          │
//!                  complete(): commit UnitOfWork
//!                          │ ok (even with zero changes)
//!                          ▼
//!                   flush_outgoing() ──▶ EnvelopeSender (Transport)
//! ```
//!
//! A failed commit discards the pending envelopes, so messages only leave
//! after the work they describe is stored.

mod context;
mod sender;
mod unit_of_work;

pub use context::{FlushPolicy, FlushReport, MessageContext, OutboxError};
pub use sender::{EnvelopeSender, PartialSend, SendError};
pub use unit_of_work::{CommitOutcome, UnitOfWork, UnitOfWorkError};
