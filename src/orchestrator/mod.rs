//! Application-level orchestration.
//!
//! This module owns run lifecycle control (start/cancel/quit) and input
//! formatting. UI layers talk to it through `UiCommand`s and hear back through
//! `RunNotice`s.

mod controller;

pub(crate) use controller::{run_controller, UiCommand};
