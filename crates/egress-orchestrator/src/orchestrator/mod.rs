//! Regional egress entry points
//!
//! [`upsert_regional_egress`] and [`delete_regional_egress`] resolve the
//! region, build an immutable [`AwsContext`] for the call and hand an
//! `Arc`-shared EC2 client to the region-scoped orchestrators.

mod teardown;
mod types;
mod upsert;
mod worker;

pub use teardown::TeardownOrchestrator;
pub use types::{
    CleanupEntry, CleanupResult, DeletionRequest, DeletionResult, DeletionStatus, EgressOutcome,
    EgressRequest, EgressResult, EgressType, InstanceProgress, Teardown, TeardownReport, Upsert,
};
pub use upsert::EgressOrchestrator;
pub use worker::{CompletionHandle, CompletionReport, TeardownHandle, WorkerHandle};

use crate::aws::{AwsContext, Ec2Client, FromAwsContext};
use crate::config::OrchestratorConfig;
use std::sync::Arc;
use tracing::info;

/// Trimmed egress name, or the reason it is unusable
pub(crate) fn validate_name(name: &str) -> Result<&str, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Egress name must not be empty".to_string());
    }
    Ok(name)
}

async fn ec2_for(config: &OrchestratorConfig, region: &str) -> Arc<Ec2Client> {
    if let Some(profile) = &config.aws.aws_profile {
        info!(profile = %profile, region = %region, "Using AWS profile");
    }
    let ctx = AwsContext::with_profile(region, config.aws.aws_profile.as_deref()).await;
    Arc::new(Ec2Client::from_context(&ctx))
}

/// Create or reconcile the egress point described by `request`.
pub async fn upsert_regional_egress(config: &OrchestratorConfig, request: &EgressRequest) -> Upsert {
    if let Err(reason) = validate_name(&request.name) {
        return Upsert::finished(EgressOutcome::failure(reason));
    }
    let Some(region) = config.resolve_region(request.region.as_deref()) else {
        return Upsert::finished(EgressOutcome::failure(
            "No region given and no default region configured",
        ));
    };

    let ec2 = ec2_for(config, &region).await;
    EgressOrchestrator::new(ec2, config.clone(), region)
        .upsert(request)
        .await
}

/// Start tearing down the egress point described by `request`.
///
/// Returns as soon as the workers are running; use the handle to wait.
pub async fn delete_regional_egress(config: &OrchestratorConfig, request: &DeletionRequest) -> Teardown {
    if let Err(reason) = validate_name(&request.name) {
        return Teardown {
            result: DeletionResult::failure(request, request.region.clone(), reason),
            handle: None,
        };
    }
    let Some(region) = config.resolve_region(request.region.as_deref()) else {
        return Teardown {
            result: DeletionResult::failure(
                request,
                None,
                "No region given and no default region configured",
            ),
            handle: None,
        };
    };

    let ec2 = ec2_for(config, &region).await;
    TeardownOrchestrator::new(ec2, region).delete(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed() {
        assert_eq!(validate_name("  acme-branch "), Ok("acme-branch"));
        assert!(validate_name(" \t").is_err());
    }

    #[tokio::test]
    async fn empty_name_fails_before_touching_aws() {
        let config = OrchestratorConfig::default();
        let upsert = upsert_regional_egress(&config, &EgressRequest::new("")).await;
        assert!(matches!(upsert.outcome, EgressOutcome::Failure { .. }));
        assert!(upsert.completion.is_none());

        let teardown = delete_regional_egress(&config, &DeletionRequest::new(" ")).await;
        assert_eq!(teardown.result.status, DeletionStatus::Failure);
        assert!(teardown.handle.is_none());
    }

    #[tokio::test]
    async fn missing_region_fails_before_touching_aws() {
        let config = OrchestratorConfig::default();
        let upsert = upsert_regional_egress(&config, &EgressRequest::new("acme").public()).await;
        assert_eq!(
            upsert.outcome.reason(),
            Some("No region given and no default region configured")
        );

        let teardown = delete_regional_egress(&config, &DeletionRequest::new("acme")).await;
        assert_eq!(teardown.result.status, DeletionStatus::Failure);
        assert_eq!(teardown.result.region, None);
    }
}
