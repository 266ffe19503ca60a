//! Shared helpers for integration test suites.
