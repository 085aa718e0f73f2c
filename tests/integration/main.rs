//! Integration tests for the harvester
//!
//! These tests run the full stack (HTTP page sessions, selector extraction,
//! CSV ledger) against wiremock registries.

mod harvest_tests;
