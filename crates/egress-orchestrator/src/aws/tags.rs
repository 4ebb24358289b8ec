//! EC2 tag helpers
//!
//! Tag constants live in `egress_common::tags`; this module turns them into
//! SDK tag specifications and reads them back.

pub use egress_common::tags::*;

use aws_sdk_ec2::types::{Filter, ResourceType, Tag, TagSpecification};

/// Build an EC2 TagSpecification carrying the standard tags for `name`.
pub fn ec2_tag_spec(resource_type: ResourceType, name: &str) -> TagSpecification {
    standard_tags(name, chrono::Utc::now())
        .into_iter()
        .fold(
            TagSpecification::builder().resource_type(resource_type),
            |builder, (key, value)| builder.tags(Tag::builder().key(key).value(value).build()),
        )
        .build()
}

/// Value of the `Name` tag, if present
pub fn name_from_tags(tags: &[Tag]) -> Option<String> {
    tags.iter()
        .find(|t| t.key() == Some(TAG_NAME))
        .and_then(|t| t.value())
        .map(str::to_string)
}

/// `tag:Name = name` filter
pub fn name_filter(name: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{TAG_NAME}"))
        .values(name)
        .build()
}

/// Single-value filter shorthand
pub fn filter(name: &str, value: impl Into<String>) -> Filter {
    Filter::builder().name(name).values(value).build()
}
