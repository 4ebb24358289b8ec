//! AWS client modules
//!
//! - `context`: immutable SDK configuration shared by all clients of a call
//! - `ec2`: EC2 client implementing `Ec2Api`
//! - `account`: STS identity lookup for credential validation
//! - `error`: SDK error classification
//! - `tags`: tag specification helpers

pub mod account;
pub mod context;
pub mod ec2;
pub mod error;
pub mod tags;

pub use account::{AccountId, CallerIdentity, get_caller_identity};
pub use context::{AwsContext, FromAwsContext};
pub use ec2::Ec2Client;
pub use error::{classify_anyhow_error, from_sdk_error, ignore_already_exists, ignore_not_found};
