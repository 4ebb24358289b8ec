//! Upsert flows against the in-memory EC2 fake
//!
//! Run with:
//! ```
//! cargo test -p egress-orchestrator --test upsert_integration
//! ```

use egress_common::AwsError;
use egress_common::defaults::DEFAULT_ROUTE_DESTINATION;
use egress_common::model::{InstanceState, RouteState};
use egress_orchestrator::config::{OrchestratorConfig, WaitSettings};
use egress_orchestrator::orchestrator::{
    EgressOrchestrator, EgressOutcome, EgressRequest, EgressResult, EgressType, InstanceProgress,
};
use egress_test_utils::FakeEc2;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const REGION: &str = "us-east-2";
const AMI: &str = "ami-al2023-new";
const PROFILE: &str = "client\ndev tun\nproto udp\nremote vpn.example.com 1194\n";

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        waits: WaitSettings::immediate(),
        ..OrchestratorConfig::default()
    }
}

fn orchestrator(fake: &Arc<FakeEc2>) -> EgressOrchestrator<FakeEc2> {
    EgressOrchestrator::new(Arc::clone(fake), config(), REGION)
}

fn compute_request() -> EgressRequest {
    EgressRequest::new("acme-branch").public().with_profile(PROFILE)
}

fn expect_success(outcome: &EgressOutcome) -> &EgressResult {
    match outcome {
        EgressOutcome::Success(result) => result,
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn compute_egress_returns_before_the_instance_runs() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let result = expect_success(&upsert.outcome);

    assert_eq!(result.egress_type, EgressType::ComputeEgress);
    assert_eq!(result.instance_state, Some(InstanceProgress::ProvisioningStarted));
    assert_eq!(result.public_ip, None);
    assert!(result.instance_id.is_some());

    let cidr = result.subnet_cidr.as_deref().unwrap();
    assert!(cidr.starts_with("10.0.") && cidr.ends_with(".0/24"), "{cidr}");

    let launches = fake.launches();
    assert_eq!(launches.len(), 1);
    assert!(launches[0].user_data.contains("remote vpn.example.com 1194"));
    assert_eq!(launches[0].security_group_ids, vec![result.security_group_id.clone().unwrap()]);
    assert!(upsert.completion.is_some());
}

#[tokio::test]
async fn completion_worker_binds_a_floating_ip() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let instance_id = expect_success(&upsert.outcome).instance_id.clone().unwrap();
    let report = upsert.completion.unwrap().wait().await.unwrap();

    assert_eq!(report.instance_id, instance_id);
    let addresses = fake.all_addresses();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].instance_id.as_deref(), Some(instance_id.as_str()));
    assert_eq!(addresses[0].public_ip, report.public_ip);
    assert_eq!(addresses[0].name.as_deref(), Some("acme-branch"));
}

#[tokio::test]
async fn completion_tolerates_describe_lag_after_launch() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    fake.set_describe_lag(3);

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let instance_id = expect_success(&upsert.outcome).instance_id.clone().unwrap();
    let report = upsert.completion.unwrap().wait().await.unwrap();

    assert_eq!(report.instance_id, instance_id);
    let addresses = fake.all_addresses();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].instance_id.as_deref(), Some(instance_id.as_str()));
}

#[tokio::test]
async fn repeated_upsert_converges_on_the_same_resources() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let orchestrator = orchestrator(&fake);

    let first = orchestrator.upsert(&compute_request()).await;
    first.completion.unwrap().wait().await.unwrap();
    let first = expect_success(&first.outcome).clone();

    let second = orchestrator.upsert(&compute_request()).await;
    assert!(second.completion.is_none());
    let second = expect_success(&second.outcome);

    assert_eq!(second.network_id, first.network_id);
    assert_eq!(second.gateway_id, first.gateway_id);
    assert_eq!(second.subnet_id, first.subnet_id);
    assert_eq!(second.security_group_id, first.security_group_id);
    assert_eq!(second.instance_id, first.instance_id);
    assert_eq!(second.instance_state, Some(InstanceProgress::Running));
    assert!(second.public_ip.is_some());

    assert_eq!(fake.launches().len(), 1);
    assert_eq!(fake.all_subnets().len(), 1);
    assert_eq!(fake.all_security_groups().len(), 1);
    assert_eq!(fake.all_addresses().len(), 1);
}

#[tokio::test]
async fn nat_egress_waits_for_the_gateway() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));

    let upsert = orchestrator(&fake).upsert(&EgressRequest::new("acme-branch").public()).await;
    assert!(upsert.completion.is_none());
    let result = expect_success(&upsert.outcome);

    assert_eq!(result.egress_type, EgressType::NatGateway);
    assert!(result.nat_gateway_id.is_some());
    let ip: Ipv4Addr = result.public_ip.as_deref().unwrap().parse().unwrap();
    assert!(!ip.is_unspecified());
    assert!(result.security_group_id.is_none());
    assert!(result.instance_id.is_none());
}

#[tokio::test]
async fn private_egress_only_ensures_the_gateway() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));

    let upsert = orchestrator(&fake).upsert(&EgressRequest::new("acme-branch")).await;
    let result = expect_success(&upsert.outcome);

    assert_eq!(result.egress_type, EgressType::GatewayOnly);
    assert!(result.gateway_id.is_some());
    assert!(result.subnet_id.is_none());
    assert!(result.public_ip.is_none());
    assert_eq!(result.notes.len(), 1);
    assert!(fake.all_subnets().is_empty());
}

#[tokio::test]
async fn missing_default_network_is_a_failure() {
    let fake = Arc::new(FakeEc2::new());

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;

    assert!(matches!(upsert.outcome, EgressOutcome::Failure { .. }));
    assert_eq!(upsert.outcome.reason(), Some("No default VPC in region us-east-2"));
    assert_eq!(fake.calls("create_internet_gateway"), 0);
}

#[tokio::test]
async fn invalid_profile_fails_before_any_call() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let request = EgressRequest::new("acme-branch").public().with_profile("  \n");

    let upsert = orchestrator(&fake).upsert(&request).await;

    assert!(upsert.outcome.reason().unwrap().starts_with("Invalid VPN profile"));
    assert!(fake.call_log().is_empty());
}

#[tokio::test]
async fn failed_step_reports_what_was_done() {
    let fake = Arc::new(FakeEc2::new());
    fake.add_network("10.0.0.0/16", true);

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;

    let EgressOutcome::PartialFailure { completed, reason } = &upsert.outcome else {
        panic!("expected partial failure, got {:?}", upsert.outcome);
    };
    assert!(reason.contains("No image found"), "{reason}");
    assert!(completed.subnet_id.is_some());
    assert!(completed.route_table_id.is_some());
    assert!(completed.security_group_id.is_some());
    assert!(completed.instance_id.is_none());
    assert!(upsert.completion.is_none());
}

#[tokio::test]
async fn stale_default_route_is_replaced_and_noted() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let vpc = fake.default_network_id().unwrap();
    let table = fake.main_route_table_id(&vpc).unwrap();
    fake.put_route(&table, DEFAULT_ROUTE_DESTINATION, "igw-gone", RouteState::Blackhole);

    let upsert = orchestrator(&fake).upsert(&EgressRequest::new("acme-branch").public()).await;
    let result = expect_success(&upsert.outcome);

    assert!(result.notes.iter().any(|n| n.contains("replaced")));
    let tables = fake.all_route_tables();
    let route = tables[0].route_to(DEFAULT_ROUTE_DESTINATION).unwrap();
    assert_eq!(route.gateway_id, result.gateway_id);
    assert_eq!(route.state, RouteState::Active);
}

#[tokio::test]
async fn nat_creation_failure_releases_the_address() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    fake.fail_on(
        "create_nat_gateway",
        AwsError::Sdk {
            code: Some("NatGatewayLimitExceeded".to_string()),
            message: "The maximum number of NAT gateways has been reached".to_string(),
        },
    );

    let upsert = orchestrator(&fake).upsert(&EgressRequest::new("acme-branch").public()).await;

    let EgressOutcome::PartialFailure { completed, .. } = &upsert.outcome else {
        panic!("expected partial failure, got {:?}", upsert.outcome);
    };
    assert!(completed.subnet_id.is_some());
    assert!(completed.nat_gateway_id.is_none());
    assert_eq!(fake.calls("allocate_address"), 1);
    assert!(fake.all_addresses().is_empty());
}

#[tokio::test]
async fn running_instance_without_address_is_cycled() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let vpc = fake.default_network_id().unwrap();
    let subnet = fake.add_subnet(&vpc, "10.0.200.0/24", Some("elsewhere"));
    let id = fake.add_instance("acme-branch", &vpc, &subnet, AMI, InstanceState::Running, None);

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let result = expect_success(&upsert.outcome);

    assert_eq!(result.instance_id.as_deref(), Some(id.as_str()));
    assert_eq!(result.instance_state, Some(InstanceProgress::Running));
    assert!(result.public_ip.is_some());
    assert!(result.notes.iter().any(|n| n.contains("restarted")));
    assert_eq!(fake.calls("stop_instance"), 1);
    assert!(fake.launches().is_empty());
}

#[tokio::test]
async fn stopped_instance_is_resumed_in_the_background() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let vpc = fake.default_network_id().unwrap();
    let subnet = fake.add_subnet(&vpc, "10.0.200.0/24", Some("elsewhere"));
    let id = fake.add_instance("acme-branch", &vpc, &subnet, AMI, InstanceState::Stopped, None);

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let result = expect_success(&upsert.outcome);
    assert_eq!(result.instance_id.as_deref(), Some(id.as_str()));
    assert_eq!(result.instance_state, Some(InstanceProgress::Pending));

    let report = upsert.completion.unwrap().wait().await.unwrap();
    assert_eq!(report.instance_id, id);
    assert!(fake.launches().is_empty());
}

#[tokio::test]
async fn instance_on_another_image_is_left_alone() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    let vpc = fake.default_network_id().unwrap();
    let subnet = fake.add_subnet(&vpc, "10.0.200.0/24", Some("elsewhere"));
    let old = fake.add_instance("acme-branch", &vpc, &subnet, "ami-old", InstanceState::Running, None);

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let result = expect_success(&upsert.outcome);

    assert_ne!(result.instance_id.as_deref(), Some(old.as_str()));
    assert_eq!(result.instance_state, Some(InstanceProgress::ProvisioningStarted));
    assert!(result.notes.iter().any(|n| n.contains(&old)));
    assert_eq!(fake.launches().len(), 1);
}

#[tokio::test]
async fn cancelled_completion_reports_an_error() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));

    let upsert = orchestrator(&fake).upsert(&compute_request()).await;
    let completion = upsert.completion.unwrap();
    completion.cancel();

    assert!(completion.wait().await.is_err());
    assert!(fake.all_addresses().is_empty());
}

#[tokio::test]
async fn nat_timeout_then_rerun_reuses_the_gateway() {
    let fake = Arc::new(FakeEc2::with_default_network("10.0.0.0/16"));
    fake.set_nat_polls(u32::MAX);
    let mut config = config();
    config.waits.nat_gateway.timeout = Duration::from_millis(20);
    let orchestrator = EgressOrchestrator::new(Arc::clone(&fake), config, REGION);
    let request = EgressRequest::new("acme-branch").public();

    let first = orchestrator.upsert(&request).await;
    let EgressOutcome::PartialFailure { completed, reason } = &first.outcome else {
        panic!("expected partial failure, got {:?}", first.outcome);
    };
    assert!(reason.contains("Timeout"), "{reason}");
    let nat_id = completed.nat_gateway_id.clone().unwrap();
    assert!(completed.allocation_id.is_some());

    let second = orchestrator.upsert(&request).await;
    let EgressOutcome::PartialFailure { completed, .. } = &second.outcome else {
        panic!("expected partial failure, got {:?}", second.outcome);
    };
    assert_eq!(completed.nat_gateway_id.as_deref(), Some(nat_id.as_str()));

    assert_eq!(fake.all_nat_gateways().len(), 1);
    assert_eq!(fake.all_addresses().len(), 1);
    assert_eq!(fake.calls("allocate_address"), 1);
}
