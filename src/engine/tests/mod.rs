//! Tests for the engine
//!
//! Organized by feature area; every test runs real scripts from a temp dir

mod cancellation_tests;
mod helpers;
mod module_tests;
