//! EC2 client
//!
//! `Ec2Client` wraps the SDK client. Its inherent methods are split by
//! resource family across the submodules; [`operations`] exposes them
//! through the `Ec2Api` trait the provisioners are generic over.

mod address;
mod image;
mod instance;
mod nat;
mod network;
mod operations;
mod security_group;
mod types;

use crate::aws::context::{AwsContext, FromAwsContext};
use aws_sdk_ec2::Client;

/// EC2 client for managing egress resources
#[derive(Clone)]
pub struct Ec2Client {
    pub(crate) client: Client,
}

impl Ec2Client {
    /// Create a new EC2 client (loads AWS config from environment)
    pub async fn new(region: &str) -> Self {
        let ctx = AwsContext::new(region).await;
        Self::from_context(&ctx)
    }
}

impl FromAwsContext for Ec2Client {
    fn from_context(ctx: &AwsContext) -> Self {
        Self {
            client: ctx.ec2_client(),
        }
    }
}

impl std::fmt::Debug for Ec2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ec2Client").finish_non_exhaustive()
    }
}
