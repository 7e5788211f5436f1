//! Integration tests for forward-harness
//!
//! `infrastructure` provides an in-process stand-in for the forwarding
//! service (plaintext and TLS, rcgen certificates) and a runner for the
//! built binary; `scenarios` holds the tests.

pub mod infrastructure;
