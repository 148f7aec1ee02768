#![cfg_attr(
    test,
    expect(clippy::expect_used, reason = "tests require contextual panics")
)]
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//! OSM replication pipeline daemon.
//!
//! Pulls changeset and osmChange replication artifacts from planet
//! mirrors, filters them by a priority polygon, computes per-user
//! statistics, validates features, materializes raw geometry, and
//! persists its own progress so restarts neither replay nor lose work.

pub mod config;
pub mod domain;
pub mod outbound;
pub mod parse;
pub mod replication;
pub mod sync;
