//! Outcome tracking: the state machine linking decisions to observed
//! consequences (commits, PRs, CI runs, incidents, performance).

mod tracker;

pub use tracker::{OutcomeTracker, SuccessCheck};
