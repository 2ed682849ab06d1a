//! Unit tests for strata CLI
//!
//! These tests drive the application services with mocked tool ports over
//! real local storage in temp directories. No external tool is executed.

mod property_tests;
mod run_service;
