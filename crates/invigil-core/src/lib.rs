//! Pure state machines for the timed-exam attempt client: countdown
//! arithmetic, clock-drift reconciliation decisions, and the master-tab
//! lease protocol.
//!
//! No I/O and no async anywhere in this crate; every function takes `now`
//! as a parameter, so everything is unit-testable without mocking clocks.

pub mod lease;
pub mod sync;
pub mod timer;
pub mod types;
