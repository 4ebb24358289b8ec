//! Network fabric: default VPC, internet gateway, subnet and default route

use super::cidr::{allocate_subnet, candidate_subnets};
use super::locator::{Located, reuse_or_create};
use crate::wait::{WaitConfig, wait_for_resource};
use anyhow::{Context, Result};
use egress_common::defaults::DEFAULT_ROUTE_DESTINATION;
use egress_common::model::{InternetGateway, Network, RouteState, Subnet};
use egress_common::{Ec2Api, ResourceKind, ignore_already_exists};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// What `ensure_default_route` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Created,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    pub route_table_id: String,
    pub action: RouteAction,
}

/// Gateway, subnet and routing provisioning against one network
pub struct NetworkFabric<'a, E> {
    ec2: &'a E,
}

impl<'a, E: Ec2Api> NetworkFabric<'a, E> {
    pub fn new(ec2: &'a E) -> Self {
        Self { ec2 }
    }

    /// The account's default VPC, `None` when the region has none
    pub async fn default_network(&self) -> Result<Option<Network>> {
        let network = self
            .ec2
            .default_network()
            .await
            .context("Failed to look up the default VPC")?;
        if let Some(n) = &network {
            debug!(vpc_id = %n.id, cidr = %n.cidr, "Found default VPC");
        }
        Ok(network)
    }

    /// Find the gateway attached to the network or create and attach one.
    #[instrument(skip(self, network), fields(vpc_id = %network.id))]
    pub async fn upsert_gateway(
        &self,
        network: &Network,
        name: &str,
    ) -> Result<Located<InternetGateway>> {
        let existing = self
            .ec2
            .internet_gateways_for_network(&network.id)
            .await
            .context("Failed to look up internet gateways")?;

        reuse_or_create(self.ec2, ResourceKind::InternetGateway, name, existing, || async {
            let mut igw = self
                .ec2
                .create_internet_gateway(name)
                .await
                .context("Failed to create internet gateway")?;
            self.ec2
                .attach_internet_gateway(&igw.id, &network.id)
                .await
                .with_context(|| format!("Failed to attach internet gateway {}", igw.id))?;
            igw.attached_networks.push(network.id.clone());
            Ok(igw)
        })
        .await
    }

    /// Reuse the subnet named `name` or carve a free /24 out of the network.
    ///
    /// Auto-assign of public addresses is switched on either way.
    #[instrument(skip(self, network, wait), fields(vpc_id = %network.id))]
    pub async fn upsert_subnet(
        &self,
        network: &Network,
        name: &str,
        max_attempts: usize,
        wait: WaitConfig,
    ) -> Result<Located<Subnet>> {
        let subnets = self
            .ec2
            .subnets(&network.id)
            .await
            .context("Failed to list subnets")?;

        let (named, others): (Vec<Subnet>, Vec<Subnet>) = subnets
            .into_iter()
            .partition(|s| s.name.as_deref() == Some(name));
        let taken: Vec<String> = others.iter().map(|s| s.cidr.clone()).collect();

        let mut located = reuse_or_create(self.ec2, ResourceKind::Subnet, name, named, || async {
            let candidates = {
                let mut rng = rand::thread_rng();
                candidate_subnets(&network.cidr, &taken, max_attempts, &mut rng)?
            };
            let subnet = allocate_subnet(self.ec2, &network.id, name, &candidates).await?;
            self.wait_for_subnet_available(&subnet.id, wait).await
        })
        .await?;

        if !located.resource.map_public_ip_on_launch {
            self.ec2
                .enable_public_ip_on_launch(&located.resource.id)
                .await
                .context("Failed to enable public IP assignment on subnet")?;
            located.resource.map_public_ip_on_launch = true;
        }

        Ok(located)
    }

    async fn wait_for_subnet_available(&self, subnet_id: &str, wait: WaitConfig) -> Result<Subnet> {
        wait_for_resource(
            wait,
            None,
            move || async move {
                Ok(self
                    .ec2
                    .subnet(subnet_id)
                    .await?
                    .filter(|s| s.available))
            },
            &format!("subnet {subnet_id} available"),
        )
        .await
    }

    /// Point 0.0.0.0/0 of the subnet's route table at the gateway.
    ///
    /// The table is the subnet's explicit association, else the network's
    /// main table. A correct active route is left alone; a stale or
    /// blackholed one is replaced.
    #[instrument(skip(self))]
    pub async fn ensure_default_route(
        &self,
        network_id: &str,
        subnet_id: &str,
        gateway_id: &str,
    ) -> Result<DefaultRoute> {
        let table = match self.ec2.route_table_for_subnet(subnet_id).await? {
            Some(table) => table,
            None => self
                .ec2
                .main_route_table(network_id)
                .await?
                .with_context(|| format!("No route table found for subnet {subnet_id}"))?,
        };
        let dest = DEFAULT_ROUTE_DESTINATION;

        let created = ignore_already_exists(self.ec2.create_route(&table.id, dest, gateway_id).await)
            .context("Failed to create default route")?;
        if created {
            return Ok(DefaultRoute {
                route_table_id: table.id,
                action: RouteAction::Created,
            });
        }

        let current = self
            .ec2
            .route_table(&table.id)
            .await?
            .and_then(|t| t.route_to(dest).cloned());

        let action = match current {
            Some(route)
                if route.gateway_id.as_deref() == Some(gateway_id)
                    && route.state == RouteState::Active =>
            {
                debug!(route_table_id = %table.id, "Default route already correct");
                RouteAction::Unchanged
            }
            Some(route) => {
                info!(
                    route_table_id = %table.id,
                    current_target = ?route.gateway_id,
                    state = ?route.state,
                    "Default route points elsewhere, replacing"
                );
                self.ec2
                    .replace_route(&table.id, dest, gateway_id)
                    .await
                    .context("Failed to replace default route")?;
                RouteAction::Replaced
            }
            None => {
                self.ec2
                    .create_route(&table.id, dest, gateway_id)
                    .await
                    .context("Failed to re-create default route")?;
                RouteAction::Created
            }
        };

        Ok(DefaultRoute {
            route_table_id: table.id,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WaitSettings;
    use crate::provision::locator::Origin;
    use egress_common::AwsError;
    use egress_test_utils::FakeEc2;
    use ipnetwork::Ipv4Network;

    async fn setup() -> (FakeEc2, Network) {
        let fake = FakeEc2::with_default_network("10.0.0.0/16");
        let network = fake.default_network().await.unwrap().unwrap();
        (fake, network)
    }

    #[tokio::test]
    async fn gateway_is_created_once() {
        let (fake, network) = setup().await;
        let fabric = NetworkFabric::new(&fake);

        let first = fabric.upsert_gateway(&network, "acme").await.unwrap();
        assert!(first.created());
        assert_eq!(first.resource.attached_networks, vec![network.id.clone()]);

        let second = fabric.upsert_gateway(&network, "acme").await.unwrap();
        assert_eq!(second.origin, Origin::Found);
        assert_eq!(second.resource.id, first.resource.id);
        assert_eq!(fake.all_gateways().len(), 1);
    }

    #[tokio::test]
    async fn subnet_avoids_existing_blocks_and_is_reused() {
        let (fake, network) = setup().await;
        fake.add_subnet(&network.id, "10.0.0.0/20", Some("existing"));
        let fabric = NetworkFabric::new(&fake);
        let wait = WaitSettings::immediate().subnet;

        let first = fabric.upsert_subnet(&network, "acme", 50, wait).await.unwrap();
        assert!(first.created());
        assert!(first.resource.map_public_ip_on_launch);
        let cidr: Ipv4Network = first.resource.cidr.parse().unwrap();
        assert_eq!(cidr.prefix(), 24);
        assert!(cidr.network().octets()[2] >= 16);

        let second = fabric.upsert_subnet(&network, "acme", 50, wait).await.unwrap();
        assert_eq!(second.origin, Origin::Found);
        assert_eq!(second.resource.id, first.resource.id);
        assert_eq!(fake.all_subnets().len(), 2);
    }

    #[tokio::test]
    async fn subnet_creation_moves_past_conflicts() {
        let (fake, network) = setup().await;
        fake.fail_on(
            "create_subnet",
            AwsError::CidrConflict {
                message: "taken concurrently".to_string(),
            },
        );
        let fabric = NetworkFabric::new(&fake);

        let located = fabric
            .upsert_subnet(&network, "acme", 50, WaitSettings::immediate().subnet)
            .await
            .unwrap();
        assert!(located.created());
        assert_eq!(fake.calls("create_subnet"), 2);
    }

    #[tokio::test]
    async fn other_subnet_errors_abort() {
        let (fake, network) = setup().await;
        fake.fail_on(
            "create_subnet",
            AwsError::Unauthorized {
                message: "denied".to_string(),
            },
        );
        let fabric = NetworkFabric::new(&fake);

        let result = fabric
            .upsert_subnet(&network, "acme", 50, WaitSettings::immediate().subnet)
            .await;
        assert!(result.is_err());
        assert_eq!(fake.calls("create_subnet"), 1);
    }

    #[tokio::test]
    async fn default_route_is_created_then_left_alone() {
        let (fake, network) = setup().await;
        let subnet = fake.add_subnet(&network.id, "10.0.1.0/24", Some("acme"));
        let igw = fake.add_internet_gateway(&network.id, Some("acme"));
        let fabric = NetworkFabric::new(&fake);

        let first = fabric.ensure_default_route(&network.id, &subnet, &igw).await.unwrap();
        assert_eq!(first.action, RouteAction::Created);
        assert_eq!(Some(first.route_table_id.clone()), fake.main_route_table_id(&network.id));

        let second = fabric.ensure_default_route(&network.id, &subnet, &igw).await.unwrap();
        assert_eq!(second.action, RouteAction::Unchanged);
        assert_eq!(fake.calls("replace_route"), 0);
    }

    #[tokio::test]
    async fn blackholed_route_is_replaced() {
        let (fake, network) = setup().await;
        let subnet = fake.add_subnet(&network.id, "10.0.1.0/24", Some("acme"));
        let igw = fake.add_internet_gateway(&network.id, Some("acme"));
        let table = fake.main_route_table_id(&network.id).unwrap();
        fake.put_route(&table, DEFAULT_ROUTE_DESTINATION, "igw-deleted", RouteState::Blackhole);
        let fabric = NetworkFabric::new(&fake);

        let route = fabric.ensure_default_route(&network.id, &subnet, &igw).await.unwrap();
        assert_eq!(route.action, RouteAction::Replaced);

        let tables = fake.all_route_tables();
        let current = tables[0].route_to(DEFAULT_ROUTE_DESTINATION).unwrap();
        assert_eq!(current.gateway_id.as_deref(), Some(igw.as_str()));
        assert_eq!(current.state, RouteState::Active);
    }
}
