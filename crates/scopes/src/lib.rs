//! Device layer for the ScopeVNS acquisition daemon.
//!
//! [`types::ScopeDevice`] is the capability set the acquisition state machine
//! drives: configure channel, configure trigger, arm a block capture, poll
//! readiness, read samples, shut down. Two families implement it with
//! incompatible parameter encodings ([`ps2204a`], [`ps2206b`]); both sit on
//! top of the abstract vendor-driver contract in [`bindings`], so the bit-level
//! SDK calls stay outside this crate. [`mock`] provides an in-memory bindings
//! implementation for tests and simulated operation.

pub mod bindings;
pub mod discover;
pub mod mock;
pub mod ps2204a;
pub mod ps2206b;
pub mod timebase;
pub mod types;

pub use types::{ScopeDevice, ScopeError};
