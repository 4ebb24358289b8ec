//! Bridge from AWS SDK errors into the classified `AwsError` taxonomy
//!
//! Classification reads the typed error metadata (`ProvideErrorMetadata`)
//! and the SDK error variant. Messages are carried along for display only.

use anyhow::Result;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use egress_common::{AwsError, classify_aws_error};

pub use egress_common::error::{
    classify_anyhow_error, ignore_already_exists, ignore_not_found,
};

/// Classify a single SDK error.
pub fn from_sdk_error<E, R>(err: &SdkError<E, R>) -> AwsError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => AwsError::Transport {
            message: DisplayErrorContext(err).to_string(),
        },
        _ => classify_aws_error(err.code(), err.message()),
    }
}

/// Attach a classified `AwsError` plus an action description to SDK results.
pub(crate) trait SdkResultExt<T> {
    fn aws_context(self, action: &'static str) -> Result<T>;
}

impl<T, E, R> SdkResultExt<T> for std::result::Result<T, SdkError<E, R>>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn aws_context(self, action: &'static str) -> Result<T> {
        self.map_err(|e| anyhow::Error::new(from_sdk_error(&e)).context(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_ec2::error::ErrorMetadata;
    use aws_sdk_ec2::operation::describe_vpcs::DescribeVpcsError;

    type VpcError = SdkError<DescribeVpcsError, ()>;

    fn service_error(code: &str) -> VpcError {
        let meta = ErrorMetadata::builder().code(code).message("details").build();
        SdkError::service_error(DescribeVpcsError::generic(meta), ())
    }

    #[test]
    fn service_errors_classify_by_code() {
        assert!(from_sdk_error(&service_error("InvalidVpcID.NotFound")).is_not_found());
        assert!(from_sdk_error(&service_error("InvalidSubnet.Conflict")).is_cidr_conflict());
        assert_eq!(from_sdk_error(&service_error("RequestLimitExceeded")), AwsError::Throttled);
    }

    #[test]
    fn timeouts_are_transport_failures() {
        let err = VpcError::timeout_error("request timed out");
        assert!(matches!(from_sdk_error(&err), AwsError::Transport { .. }));
    }

    #[test]
    fn aws_context_keeps_the_classification() {
        let result: std::result::Result<(), VpcError> = Err(service_error("DependencyViolation"));
        let err = result.aws_context("Failed to delete subnet").unwrap_err();

        assert_eq!(err.to_string(), "Failed to delete subnet");
        assert!(classify_anyhow_error(&err).is_dependency_violation());
    }
}
