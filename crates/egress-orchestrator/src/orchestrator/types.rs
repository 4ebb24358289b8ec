//! Request and result types for the egress entry points

use super::worker::{CompletionHandle, TeardownHandle};
use egress_common::ResourceKind;
use serde::Serialize;

/// Input to [`super::upsert_regional_egress`]
#[derive(Debug, Clone, Default)]
pub struct EgressRequest {
    /// Sole idempotency key, written to every resource's `Name` tag
    pub name: String,
    pub public: bool,
    pub region: Option<String>,
    /// OpenVPN client profile; selects compute egress when `public` is set
    pub vpn_profile: Option<String>,
}

impl EgressRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.vpn_profile = Some(profile.into());
        self
    }

    /// Which branch the request takes
    pub fn egress_type(&self) -> EgressType {
        match (self.public, self.vpn_profile.is_some()) {
            (true, true) => EgressType::ComputeEgress,
            (true, false) => EgressType::NatGateway,
            (false, _) => EgressType::GatewayOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EgressType {
    ComputeEgress,
    NatGateway,
    GatewayOnly,
}

/// Instance state as reported at return time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceProgress {
    /// Launched by this call; readiness and IP are handled in the background
    ProvisioningStarted,
    /// Existing instance still coming up, handed to the background worker
    Pending,
    Running,
}

/// Everything provisioned so far. Fields fill in as steps complete, so a
/// partial result shows exactly how far the call got.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EgressResult {
    pub name: String,
    pub region: String,
    pub egress_type: EgressType,
    pub network_id: Option<String>,
    pub network_cidr: Option<String>,
    pub gateway_id: Option<String>,
    pub subnet_id: Option<String>,
    pub subnet_cidr: Option<String>,
    pub route_table_id: Option<String>,
    pub security_group_id: Option<String>,
    pub security_group_name: Option<String>,
    pub instance_id: Option<String>,
    pub instance_state: Option<InstanceProgress>,
    pub nat_gateway_id: Option<String>,
    pub allocation_id: Option<String>,
    pub public_ip: Option<String>,
    pub notes: Vec<String>,
}

impl EgressResult {
    pub fn new(name: &str, region: &str, egress_type: EgressType) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            egress_type,
            network_id: None,
            network_cidr: None,
            gateway_id: None,
            subnet_id: None,
            subnet_cidr: None,
            route_table_id: None,
            security_group_id: None,
            security_group_name: None,
            instance_id: None,
            instance_state: None,
            nat_gateway_id: None,
            allocation_id: None,
            public_ip: None,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Outcome of an upsert. Business failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EgressOutcome {
    Success(EgressResult),
    /// A step failed after earlier ones succeeded
    PartialFailure {
        completed: EgressResult,
        reason: String,
    },
    /// Nothing was provisioned
    Failure { reason: String, notes: Vec<String> },
}

impl EgressOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        EgressOutcome::Failure {
            reason: reason.into(),
            notes: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, EgressOutcome::Success(_))
    }

    /// The provisioned (or partially provisioned) resources
    pub fn result(&self) -> Option<&EgressResult> {
        match self {
            EgressOutcome::Success(result) => Some(result),
            EgressOutcome::PartialFailure { completed, .. } => Some(completed),
            EgressOutcome::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EgressOutcome::Success(_) => None,
            EgressOutcome::PartialFailure { reason, .. } | EgressOutcome::Failure { reason, .. } => {
                Some(reason)
            }
        }
    }
}

/// Upsert return value: the outcome plus the background worker, if one
/// was started. Dropping the handle detaches the worker.
#[derive(Debug)]
pub struct Upsert {
    pub outcome: EgressOutcome,
    pub completion: Option<CompletionHandle>,
}

impl Upsert {
    pub fn finished(outcome: EgressOutcome) -> Self {
        Self {
            outcome,
            completion: None,
        }
    }
}

/// Input to [`super::delete_regional_egress`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionRequest {
    pub instance_id: Option<String>,
    pub name: String,
    pub region: Option<String>,
    /// Defaults to `name`
    pub security_group_name: Option<String>,
    /// Defaults to the account's default network
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
}

impl DeletionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn security_group_name(&self) -> &str {
        self.security_group_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    DeletionInitiated,
    Failure,
}

/// Synchronous teardown answer. Work happens in the background.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionResult {
    pub status: DeletionStatus,
    pub name: String,
    pub region: Option<String>,
    pub instance_id: Option<String>,
    pub security_group_name: String,
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub notes: Vec<String>,
}

impl DeletionResult {
    pub fn new(request: &DeletionRequest, region: Option<String>, status: DeletionStatus) -> Self {
        Self {
            status,
            name: request.name.clone(),
            region,
            instance_id: request.instance_id.clone(),
            security_group_name: request.security_group_name().to_string(),
            network_id: request.network_id.clone(),
            subnet_id: request.subnet_id.clone(),
            notes: Vec::new(),
        }
    }

    pub fn failure(request: &DeletionRequest, region: Option<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(request, region, DeletionStatus::Failure);
        result.notes.push(reason.into());
        result
    }
}

#[derive(Debug)]
pub struct Teardown {
    pub result: DeletionResult,
    pub handle: Option<TeardownHandle>,
}

/// Result of cleaning up a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupResult {
    Deleted,
    AlreadyDeleted,
    /// Still referenced by something else
    InUse,
    Failed,
    /// Deliberately left alone
    Skipped,
}

impl CleanupResult {
    pub fn is_ok(self) -> bool {
        matches!(
            self,
            CleanupResult::Deleted | CleanupResult::AlreadyDeleted | CleanupResult::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupEntry {
    pub kind: ResourceKind,
    pub id: String,
    pub result: CleanupResult,
    pub message: Option<String>,
}

impl CleanupEntry {
    pub fn new(kind: ResourceKind, id: impl Into<String>, result: CleanupResult) -> Self {
        Self {
            kind,
            id: id.into(),
            result,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// What both teardown workers did, in execution order per worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub entries: Vec<CleanupEntry>,
}

impl TeardownReport {
    pub fn extend(&mut self, entries: impl IntoIterator<Item = CleanupEntry>) {
        self.entries.extend(entries);
    }

    pub fn failures(&self) -> impl Iterator<Item = &CleanupEntry> {
        self.entries.iter().filter(|e| !e.result.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Entries for one kind of resource
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &CleanupEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }
}
