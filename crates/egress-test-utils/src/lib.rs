//! Shared test utilities for regional-egress
//!
//! ## Modules
//!
//! - [`aws`]: AWS region detection and test run ID generation
//! - [`fake_ec2`]: Stateful in-memory `Ec2Api` implementation

pub mod aws;
pub mod fake_ec2;

// Re-export commonly used items
pub use aws::{get_test_region, test_egress_name, test_run_id};
pub use fake_ec2::FakeEc2;
