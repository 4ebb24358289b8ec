//! AWS error classification
//!
//! Provider failures are mapped to `AwsError` from their typed error code,
//! never from the message text. The classified error travels inside an
//! `anyhow::Error` chain and is recovered with [`classify_anyhow_error`].

use thiserror::Error;

/// AWS error categories driving retry, reuse and cleanup decisions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwsError {
    /// Resource was not found (success for idempotent deletes)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Duplicate rule, route, group or association
    #[error("Resource already exists: {message}")]
    AlreadyExists { message: String },

    /// Requested subnet CIDR overlaps an existing one
    #[error("Subnet CIDR conflict: {message}")]
    CidrConflict { message: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    Throttled,

    /// Resource is still referenced by something else
    #[error("Resource has dependent objects: {message}")]
    DependencyViolation { message: String },

    /// Credentials missing, expired or lacking permission
    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// Request never reached AWS or timed out
    #[error("Transport failure: {message}")]
    Transport { message: String },

    /// Anything else reported by the SDK
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Shorthand for a typed not-found error.
    pub fn not_found(resource_type: &'static str, resource_id: impl Into<String>) -> Self {
        AwsError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, AwsError::AlreadyExists { .. })
    }

    pub fn is_cidr_conflict(&self) -> bool {
        matches!(self, AwsError::CidrConflict { .. })
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, AwsError::DependencyViolation { .. })
    }

    /// Only throttling is worth retrying; dependency violations are reported
    /// to the caller instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }

    /// Get a user-friendly suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AwsError::Unauthorized { .. } => {
                Some("Check AWS_PROFILE or the access keys in the environment.")
            }
            AwsError::Throttled => Some("AWS API rate limit hit. Try again shortly."),
            AwsError::DependencyViolation { .. } => {
                Some("The resource is still in use. Retry once dependents are gone.")
            }
            AwsError::Sdk { code: Some(c), .. } => suggestion_for_code(c),
            _ => None,
        }
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidInstanceID.NotFound",
    "InvalidAllocationID.NotFound",
    "InvalidAssociationID.NotFound",
    "InvalidAddress.NotFound",
    "InvalidGroup.NotFound",
    "InvalidPermission.NotFound",
    "InvalidSubnetID.NotFound",
    "InvalidRouteTableID.NotFound",
    "InvalidInternetGatewayID.NotFound",
    "InvalidVpcID.NotFound",
    "NatGatewayNotFound",
];

/// Known AWS error codes for "already exists" conditions
const ALREADY_EXISTS_CODES: &[&str] = &[
    "InvalidPermission.Duplicate",
    "InvalidGroup.Duplicate",
    "RouteAlreadyExists",
    "Resource.AlreadyAssociated",
];

/// Known AWS error codes for subnet CIDR collisions
const CIDR_CONFLICT_CODES: &[&str] = &["InvalidSubnet.Conflict", "InvalidSubnet"];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for dependency violations (resource still in use)
const DEPENDENCY_CODES: &[&str] = &["DependencyViolation", "InvalidIPAddress.InUse"];

/// Known AWS error codes for credential and permission failures
const UNAUTHORIZED_CODES: &[&str] = &[
    "UnauthorizedOperation",
    "AuthFailure",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "OptInRequired",
];

/// Classify an AWS error from its code and message.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: resource_type_for_code(c),
            resource_id: message,
        },
        Some(c) if ALREADY_EXISTS_CODES.contains(&c) => AwsError::AlreadyExists { message },
        Some(c) if CIDR_CONFLICT_CODES.contains(&c) => AwsError::CidrConflict { message },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if DEPENDENCY_CODES.contains(&c) => AwsError::DependencyViolation { message },
        Some(c) if UNAUTHORIZED_CODES.contains(&c) => AwsError::Unauthorized { message },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

fn resource_type_for_code(code: &str) -> &'static str {
    match code.split('.').next().unwrap_or(code) {
        "InvalidInstanceID" => "instance",
        "InvalidAllocationID" | "InvalidAddress" => "address",
        "InvalidAssociationID" => "association",
        "InvalidGroup" => "security group",
        "InvalidPermission" => "permission",
        "InvalidSubnetID" => "subnet",
        "InvalidRouteTableID" => "route table",
        "InvalidInternetGatewayID" => "internet gateway",
        "InvalidVpcID" => "network",
        "NatGatewayNotFound" => "nat gateway",
        _ => "resource",
    }
}

/// Recover the classified error from an `anyhow::Error` chain.
///
/// Errors that never passed through classification are reported as
/// `AwsError::Sdk` without a code.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<AwsError>())
        .cloned()
        .unwrap_or_else(|| AwsError::Sdk {
            code: None,
            message: error.to_string(),
        })
}

/// Map a not-found error to `Ok(None)`, passing everything else through.
pub fn ignore_not_found<T>(result: anyhow::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if classify_anyhow_error(&e).is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Map an already-exists error to `Ok(false)`; `Ok(true)` means newly applied.
pub fn ignore_already_exists(result: anyhow::Result<()>) -> anyhow::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if classify_anyhow_error(&e).is_already_exists() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Error code to user-friendly suggestion mapping
const SUGGESTIONS: &[(&str, &str)] = &[
    (
        "InsufficientInstanceCapacity",
        "Try again later or pick a different instance type.",
    ),
    (
        "AddressLimitExceeded",
        "Release unused Elastic IPs or request a quota increase.",
    ),
    (
        "NatGatewayLimitExceeded",
        "Delete unused NAT gateways or request a quota increase.",
    ),
    (
        "InvalidKeyPair.NotFound",
        "Create the configured key pair in this region or pass --key-name.",
    ),
];

fn suggestion_for_code(code: &str) -> Option<&'static str> {
    SUGGESTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn not_found_codes() {
        for code in NOT_FOUND_CODES {
            let err = classify_aws_error(Some(code), Some("some message"));
            assert!(err.is_not_found(), "Expected NotFound for code: {code}");
        }
    }

    #[test]
    fn already_exists_codes() {
        for code in ALREADY_EXISTS_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert!(
                err.is_already_exists(),
                "Expected AlreadyExists for code: {code}"
            );
        }
    }

    #[test]
    fn cidr_conflict_codes() {
        for code in CIDR_CONFLICT_CODES {
            let err = classify_aws_error(Some(code), Some("overlaps"));
            assert!(err.is_cidr_conflict(), "Expected CidrConflict for {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn dependency_violation_is_not_retryable() {
        let err = classify_aws_error(Some("DependencyViolation"), Some("ENI attached"));
        assert!(err.is_dependency_violation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn unauthorized_codes_carry_a_suggestion() {
        for code in UNAUTHORIZED_CODES {
            let err = classify_aws_error(Some(code), None);
            assert!(matches!(err, AwsError::Unauthorized { .. }), "Expected Unauthorized for {code}");
            assert!(err.suggestion().is_some());
        }
    }

    #[test]
    fn throttling_codes() {
        for code in THROTTLING_CODES {
            let err = classify_aws_error(Some(code), Some("msg"));
            assert_eq!(err, AwsError::Throttled);
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn unknown_and_missing_codes() {
        let err = classify_aws_error(Some("SomeNewError"), Some("details"));
        assert!(matches!(err, AwsError::Sdk { code: Some(ref c), .. } if c == "SomeNewError"));

        let err = classify_aws_error(None, Some("something failed"));
        assert!(matches!(err, AwsError::Sdk { code: None, .. }));
    }

    #[test]
    fn message_text_does_not_drive_classification() {
        let err = classify_aws_error(Some("SomeCode"), Some("InvalidGroup.NotFound already exists"));
        assert!(matches!(err, AwsError::Sdk { .. }));
    }

    #[test]
    fn not_found_carries_resource_type() {
        let err = classify_aws_error(Some("InvalidSubnetID.NotFound"), Some("subnet-1"));
        assert_eq!(err, AwsError::not_found("subnet", "subnet-1"));
    }

    #[test]
    fn classify_through_anyhow_context() {
        let result: anyhow::Result<()> = Err(AwsError::Throttled.into());
        let err = result.context("Failed to describe subnets").unwrap_err();
        assert_eq!(classify_anyhow_error(&err), AwsError::Throttled);

        let plain = anyhow::anyhow!("boom");
        assert!(matches!(
            classify_anyhow_error(&plain),
            AwsError::Sdk { code: None, .. }
        ));
    }

    #[test]
    fn ignore_helpers() {
        let missing: anyhow::Result<u8> = Err(AwsError::not_found("instance", "i-1").into());
        assert_eq!(ignore_not_found(missing).unwrap(), None);

        let dup: anyhow::Result<()> = Err(AwsError::AlreadyExists {
            message: "dup".into(),
        }
        .into());
        assert!(!ignore_already_exists(dup).unwrap());
        assert!(ignore_already_exists(Ok(())).unwrap());

        let other: anyhow::Result<u8> = Err(AwsError::Throttled.into());
        assert!(ignore_not_found(other).is_err());
    }

    #[test]
    fn suggestions_for_known_codes() {
        for (code, _) in SUGGESTIONS {
            assert!(suggestion_for_code(code).is_some());
        }
        assert!(suggestion_for_code("SomeUnknownCode").is_none());
    }
}
