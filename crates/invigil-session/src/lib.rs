//! Tab-session orchestration for the timed-exam client.
//!
//! One [`session::ExamSession`] per attempt per tab: it loads the attempt
//! from the server, runs the countdown, reconciles against the server on a
//! cadence, and participates in the cross-tab master election. Only the
//! master tab drives auto-submit; blocked tabs display a read-only countdown.

pub mod bus;
pub mod config;
pub mod leadership;
pub mod service;
pub mod session;
pub mod sync;

#[cfg(test)]
pub(crate) mod testutil;
