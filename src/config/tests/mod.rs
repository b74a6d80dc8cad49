//! Unit tests for configuration loading and precedence.
//!
//! Tests are organised into modules by functional area:
//! - `helpers`: Shared test utilities
//! - `precedence`: Layer precedence tests
//! - `loading`: Loading from real CLI arguments and environment variables
//! - `validation`: Line limit, phase, and capture directory checks

mod helpers;
