//! egress-common - Shared types for regional-egress
//!
//! This crate carries the resource model, the EC2 operations trait and the
//! error taxonomy without any AWS SDK dependencies, so test fakes can
//! implement the trait without pulling in the SDK.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values
//! - [`ec2_api`]: The `Ec2Api` trait
//! - [`error`]: `AwsError` classification
//! - [`model`]: Provider-neutral resource views
//! - [`resource_kind`]: Resource kinds and teardown ordering
//! - [`tags`]: Tag constants for discovery

pub mod defaults;
pub mod ec2_api;
pub mod error;
pub mod model;
pub mod resource_kind;
pub mod tags;

pub use ec2_api::Ec2Api;
pub use error::{
    AwsError, classify_anyhow_error, classify_aws_error, ignore_already_exists, ignore_not_found,
};
pub use model::{
    Address, Image, ImageQuery, IngressRule, Instance, InstanceState, InternetGateway, LaunchSpec,
    NatGateway, NatGatewayState, Network, Protocol, Route, RouteState, RouteTable, SecurityGroup,
    Subnet, TaggedResource,
};
pub use resource_kind::ResourceKind;
