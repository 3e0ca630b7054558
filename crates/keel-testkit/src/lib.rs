//! Test utilities for driving the reconcile kernel deterministically.
//!
//! - `fixtures`: declarations for every managed kind, keyed by small integers
//! - `signals`: stand-ins for the subsystems that report on external objects
//! - `TestWorld`: single-threaded driver that routes store notifications to
//!   the engine until nothing is left to do

pub mod fixtures;
pub mod signals;
mod world;

pub use world::TestWorld;
