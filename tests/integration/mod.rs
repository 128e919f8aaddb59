//! Integration Tests Module
//!
//! End-to-end tests for the analysis engine. Objectives run against a small
//! seeded Hacker News dataset with scripted planners standing in for real
//! providers. Covers the ledger contract, the analysis loop, provider
//! fallback, multi-objective coordination, workspace persistence and the
//! HTTP API.

// Shared fixtures: seeded dataset, coordinator builder, polling helpers
mod support;

// Step lifecycle and tool execution outcome rules
mod ledger_test;

// Planning loop: answers, iteration cap, streamed synthesis
mod analysis_test;

// Provider fallback chain as seen from the ledger
mod fallback_test;

// Cancellation isolation and follow-up messages across objectives
mod coordinator_test;

// Save/load of workspaces mid-conversation
mod persistence_test;

// HTTP routes through the axum router
mod api_test;
