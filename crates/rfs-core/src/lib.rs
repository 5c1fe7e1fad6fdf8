//! # remotefs – core
//!
//! Shared building blocks used by the protocol crates:
//!   • Diagnostic step / report types
//!   • Blocking DNS, TCP and banner probes

pub mod diagnostics;

pub use diagnostics::{DiagnosticReport, DiagnosticStep, StepStatus};
