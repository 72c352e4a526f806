//! Shared helpers for the integration suites.

// Each suite is its own binary and uses a different slice of the server.
#![allow(dead_code)]

pub mod test_server;
