//! Machine image lookup

use super::{Ec2Client, types};
use crate::aws::error::SdkResultExt;
use crate::aws::tags::filter;
use anyhow::Result;
use egress_common::model::{Image, ImageQuery};
use tracing::debug;

impl Ec2Client {
    /// All non-deprecated images matching the query
    pub async fn images(&self, query: &ImageQuery) -> Result<Vec<Image>> {
        let response = self
            .client
            .describe_images()
            .owners(&query.owner)
            .filters(filter("name", &query.name_pattern))
            .filters(filter("state", "available"))
            .filters(filter("architecture", &query.architecture))
            .filters(filter("virtualization-type", &query.virtualization))
            .filters(filter("root-device-type", &query.root_device))
            .include_deprecated(false)
            .send()
            .await
            .aws_context("Failed to describe images")?;

        let images: Vec<Image> = response.images().iter().filter_map(types::image).collect();
        debug!(count = images.len(), pattern = %query.name_pattern, "Described images");
        Ok(images)
    }
}
