//! Validation harness for a disk-image installer.
//!
//! Tests attach a sparse disk file to a loop device, run the installer
//! against it, map and mount the resulting partitions and assert on what
//! the installer wrote. Everything acquired along the way is released in
//! reverse order when a test ends, pass or fail.

pub mod config;
pub mod core;
pub mod image;
pub mod preflight;
pub mod suites;
pub mod utils;
