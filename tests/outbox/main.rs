//! Outbox integration tests: MessageContext commit-then-flush against the
//! transport and the in-memory broker.
