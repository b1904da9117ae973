//! Integration test suite.
//!
//! - `modules`: loading modules from addons directories, upgrades
//! - `scenarios`: end-to-end install, view and uninstall flows
//! - `invariants`: properties that hold across every installation

pub mod helpers;
pub mod invariants;
pub mod modules;
pub mod scenarios;
