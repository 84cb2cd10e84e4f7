//! The per-run trading state machine and concurrency engine.
//!
//! Submodules map one-to-one onto the pipeline stages: placement, fill
//! detection, TP/SL attachment, position monitoring, and the top-level
//! controller. `run` wires them all together into the public
//! `Run::execute` entry point.

pub mod account_state;
pub mod cancel;
pub mod controller;
pub mod fill_detector;
pub mod placement;
pub mod position_monitor;
pub mod run;
pub mod tpsl_worker;

#[cfg(test)]
pub mod tests_support;
