//! Bypass policies
//!
//! This module provides:
//! - Built-in bypass rules (delay only, allow all, allowlist, value limit, approval shortcut)
//! - The `BypassPolicy` trait for custom policies
//! - Target / method-selector bindings and their resolution

pub mod engine;
pub mod rules;

pub use engine::{Evaluation, PolicyEngine, PolicyFile, PolicyId, PolicySource, DEFAULT_POLICY};
pub use rules::{AllowlistRule, BypassPolicy, BypassRule, CallContext, ValueLimitRule, Verdict};
