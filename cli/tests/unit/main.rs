//! Unit tests for the privatebox CLI
//!
//! These tests use in-memory doubles and run fast without external I/O.

mod convergence;
mod mocks;
