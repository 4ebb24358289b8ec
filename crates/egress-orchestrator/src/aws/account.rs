//! AWS account validation and identity

use crate::aws::error::SdkResultExt;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

/// Strongly-typed AWS account ID (12-digit string)
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, derive_more::Display, derive_more::Deref,
)]
pub struct AccountId(String);

/// Identity behind the active credentials
#[derive(Debug, Clone, Serialize)]
pub struct CallerIdentity {
    pub account_id: AccountId,
    pub arn: Option<String>,
    pub region: String,
}

/// Validate credentials via STS GetCallerIdentity.
///
/// Requires no permissions, so any failure means the credentials
/// themselves are unusable.
pub async fn get_caller_identity(ctx: &crate::aws::AwsContext) -> Result<CallerIdentity> {
    let identity = ctx
        .sts_client()
        .get_caller_identity()
        .send()
        .await
        .aws_context("Failed to get AWS caller identity - check credentials")?;

    let account = identity
        .account()
        .context("No account ID returned from STS GetCallerIdentity")?;

    info!(account_id = %account, region = %ctx.region(), "AWS credentials validated");

    Ok(CallerIdentity {
        account_id: AccountId(account.to_string()),
        arn: identity.arn().map(str::to_string),
        region: ctx.region().to_string(),
    })
}
