//! Shared test utilities for manifold integration tests.
//!
//! This module provides:
//! - `TestHarness` wrapping an in-memory cluster, secret store and resolver
//! - Builders for deployments and ops files

#![allow(dead_code)]

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::{wait_until, TestHarness};
