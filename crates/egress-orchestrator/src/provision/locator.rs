//! Tag-based find-or-create
//!
//! Every provisioner funnels through [`reuse_or_create`]: given the
//! candidates a type-specific lookup returned, reuse the first one (repairing
//! its `Name` tag if it was found by another key) or create a new tagged
//! resource. There is no cross-call locking; two concurrent callers with the
//! same name can both end up creating.

use anyhow::Result;
use egress_common::{Ec2Api, ResourceKind, TaggedResource};
use serde::Serialize;
use std::future::Future;
use tracing::{info, warn};

/// How a located resource came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Reused as-is
    Found,
    /// Reused after its name tag was corrected
    Repaired,
    Created,
}

#[derive(Debug, Clone)]
pub struct Located<T> {
    pub resource: T,
    pub origin: Origin,
}

impl<T> Located<T> {
    pub fn created(&self) -> bool {
        self.origin == Origin::Created
    }
}

/// Reuse the first candidate or run `create`.
///
/// A name-tag repair that fails is logged and otherwise ignored.
pub async fn reuse_or_create<E, T, F, Fut>(
    ec2: &E,
    kind: ResourceKind,
    name: &str,
    candidates: Vec<T>,
    create: F,
) -> Result<Located<T>>
where
    E: Ec2Api,
    T: TaggedResource,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let found = candidates.len();
    let Some(existing) = candidates.into_iter().next() else {
        let resource = create().await?;
        info!(kind = %kind, id = %resource.id(), name = %name, "Created resource");
        return Ok(Located {
            resource,
            origin: Origin::Created,
        });
    };

    if found > 1 {
        warn!(kind = %kind, name = %name, count = found, chosen = %existing.id(), "Multiple resources match, using the first");
    }

    let origin = if existing.name_tag() == Some(name) {
        Origin::Found
    } else {
        match ec2.set_name_tag(existing.id(), name).await {
            Ok(()) => {
                info!(kind = %kind, id = %existing.id(), name = %name, "Repaired name tag");
                Origin::Repaired
            }
            Err(e) => {
                warn!(kind = %kind, id = %existing.id(), error = %e, "Failed to repair name tag, continuing");
                Origin::Found
            }
        }
    };

    info!(kind = %kind, id = %existing.id(), "Reusing existing resource");
    Ok(Located {
        resource: existing,
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use egress_common::AwsError;
    use egress_common::model::InternetGateway;
    use egress_test_utils::FakeEc2;

    fn gateway(id: &str, name: Option<&str>) -> InternetGateway {
        InternetGateway {
            id: id.to_string(),
            name: name.map(str::to_string),
            attached_networks: Vec::new(),
        }
    }

    #[tokio::test]
    async fn creates_when_nothing_matches() {
        let fake = FakeEc2::new();
        let located = reuse_or_create(&fake, ResourceKind::InternetGateway, "acme", Vec::new(), || async {
            Ok(gateway("igw-new", Some("acme")))
        })
        .await
        .unwrap();

        assert!(located.created());
        assert_eq!(located.resource.id, "igw-new");
    }

    #[tokio::test]
    async fn reuses_first_match_without_retagging() {
        let fake = FakeEc2::new();
        let candidates = vec![gateway("igw-1", Some("acme")), gateway("igw-2", Some("acme"))];
        let located = reuse_or_create(&fake, ResourceKind::InternetGateway, "acme", candidates, || async {
            Err(anyhow::anyhow!("must not create"))
        })
        .await
        .unwrap();

        assert_eq!(located.origin, Origin::Found);
        assert_eq!(located.resource.id, "igw-1");
        assert_eq!(fake.calls("set_name_tag"), 0);
    }

    #[tokio::test]
    async fn repairs_a_missing_name_tag() {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let vpc = fake.default_network_id().unwrap();
        let igw = fake.add_internet_gateway(&vpc, None);

        let located = reuse_or_create(
            &fake,
            ResourceKind::InternetGateway,
            "acme",
            vec![gateway(&igw, None)],
            || async { Err(anyhow::anyhow!("must not create")) },
        )
        .await
        .unwrap();

        assert_eq!(located.origin, Origin::Repaired);
        assert_eq!(fake.all_gateways()[0].name.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn failed_repair_still_reuses() {
        let fake = FakeEc2::new();
        fake.fail_on(
            "set_name_tag",
            AwsError::Unauthorized {
                message: "no ec2:CreateTags".to_string(),
            },
        );

        let located = reuse_or_create(
            &fake,
            ResourceKind::InternetGateway,
            "acme",
            vec![gateway("igw-1", Some("other"))],
            || async { Err(anyhow::anyhow!("must not create")) },
        )
        .await
        .unwrap();

        assert_eq!(located.origin, Origin::Found);
        assert_eq!(located.resource.id, "igw-1");
    }

    #[tokio::test]
    async fn create_errors_propagate() {
        let fake = FakeEc2::new();
        let result = reuse_or_create(&fake, ResourceKind::Subnet, "acme", Vec::<InternetGateway>::new(), || async {
            Err(anyhow::anyhow!("quota exceeded"))
        })
        .await;
        assert!(result.is_err());
    }
}
