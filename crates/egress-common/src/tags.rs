//! AWS resource tag constants for regional-egress
//!
//! The `Name` tag is the only idempotency key: every lookup finds resources
//! by it. The remaining tags make resources discoverable for audits.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `Name` | Egress point name supplied by the caller |
//! | `regional-egress:managed-by` | Static identifier ("regional-egress") |
//! | `regional-egress:created-at` | RFC 3339 creation timestamp |

/// Tag key used as the idempotency key for every resource
pub const TAG_NAME: &str = "Name";

/// Tag key marking resources created by this tool
pub const TAG_MANAGED_BY: &str = "regional-egress:managed-by";

/// Tag value for [`TAG_MANAGED_BY`]
pub const TAG_MANAGED_BY_VALUE: &str = "regional-egress";

/// Tag key for creation timestamp (RFC 3339 format)
pub const TAG_CREATED_AT: &str = "regional-egress:created-at";

/// Helper to format creation timestamp for tags
pub fn format_created_at(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339()
}

/// Standard tag set for a newly created resource named `name`
pub fn standard_tags(name: &str, now: chrono::DateTime<chrono::Utc>) -> Vec<(&'static str, String)> {
    vec![
        (TAG_NAME, name.to_string()),
        (TAG_MANAGED_BY, TAG_MANAGED_BY_VALUE.to_string()),
        (TAG_CREATED_AT, format_created_at(now)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_created_at_is_rfc3339() {
        let now = Utc::now();
        let formatted = format_created_at(now);
        let parsed = chrono::DateTime::parse_from_rfc3339(&formatted).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_standard_tags_lead_with_name() {
        let tags = standard_tags("acme-branch", Utc::now());
        assert_eq!(tags[0], (TAG_NAME, "acme-branch".to_string()));
        assert!(tags.iter().any(|(k, v)| *k == TAG_MANAGED_BY && v == TAG_MANAGED_BY_VALUE));
    }
}
