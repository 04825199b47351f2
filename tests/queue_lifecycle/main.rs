//! Queue lifecycle integration tests: declare, initialize, check, setup,
//! teardown, purge and attributes against the in-memory broker.

mod support;
mod initialize;
