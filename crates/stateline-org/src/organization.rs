//! The organization
//!
//! A singleton kind: one organization per management account. The feature
//! set is create-only, so upsert carries no reconcilable categories, and
//! deletion is forbidden by policy (no delete operation is exposed).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Hydrated, KindDescriptor, KindOps, OpContext, RemoteError, RemoteResult,
    Result, SetMode, absent_ok, require, wrap,
};
use std::fmt;

pub const ORGANIZATION: KindDescriptor = KindDescriptor {
    kind: "organization",
    primary_key: &["org_id"],
    unique_key: &["management_account"],
    readonly: &["org_id", "arn"],
    metadata: &[],
};

/// Feature set chosen at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureSet {
    All,
    ConsolidatedBilling,
}

/// Canonical organization record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Account that owns the organization; doubles as the unique key.
    pub management_account: String,
    /// Create-only; drift is not reconcilable.
    pub feature_set: FeatureSet,

    // Remote-assigned
    pub org_id: Option<String>,
    pub arn: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn new(management_account: impl Into<String>, feature_set: FeatureSet) -> Self {
        Self {
            management_account: management_account.into(),
            feature_set,
            org_id: None,
            arn: None,
            created_at: None,
        }
    }
}

impl Hydrated for Organization {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "org_id" => self.org_id.is_some(),
            "arn" => self.arn.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgIdentity {
    Id(String),
    ManagementAccount(String),
}

impl fmt::Display for OrgIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrgIdentity::Id(id) => write!(f, "{id}"),
            OrgIdentity::ManagementAccount(account) => write!(f, "{account}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawOrganization {
    pub id: Option<String>,
    pub arn: Option<String>,
    pub master_account_id: Option<String>,
    pub feature_set: Option<FeatureSet>,
    pub created_date: Option<DateTime<Utc>>,
}

pub fn from_remote(raw: RawOrganization) -> Result<Organization> {
    Ok(Organization {
        management_account: require("organization", "master_account_id", raw.master_account_id)?,
        feature_set: require("organization", "feature_set", raw.feature_set)?,
        org_id: Some(require("organization", "id", raw.id)?),
        arn: Some(require("organization", "arn", raw.arn)?),
        created_at: raw.created_date,
    })
}

/// Remote control-plane boundary. There is at most one visible organization,
/// so reads take no identity beyond the context.
#[async_trait]
pub trait OrganizationApi: Send + Sync {
    async fn describe_organization(&self, cx: &OpContext) -> RemoteResult<RawOrganization>;
    async fn create_organization(
        &self,
        cx: &OpContext,
        feature_set: FeatureSet,
    ) -> RemoteResult<RawOrganization>;
}

/// Organizations never diverge after creation.
#[derive(Debug)]
pub enum OrgPatch {}

/// Organization operation set. No delete: removal is forbidden by policy.
pub struct Organizations<A> {
    api: A,
}

impl<A: OrganizationApi> Organizations<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get(&self, cx: &OpContext) -> Result<Option<Organization>> {
        let id = OrgIdentity::ManagementAccount(cx.account.clone());
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Organization) -> Result<Organization> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    /// Degenerate: the feature set is create-only, so nothing reconciles.
    pub async fn upsert(&self, cx: &OpContext, desired: &Organization) -> Result<Organization> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }
}

#[async_trait]
impl<A: OrganizationApi> KindOps for Organizations<A> {
    type Record = Organization;
    type Identity = OrgIdentity;
    type Patch = OrgPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ORGANIZATION
    }

    fn unique_identity(&self, desired: &Organization) -> Result<OrgIdentity> {
        Ok(OrgIdentity::ManagementAccount(
            desired.management_account.clone(),
        ))
    }

    fn primary_identity(&self, record: &Organization) -> Option<OrgIdentity> {
        record.org_id.clone().map(OrgIdentity::Id)
    }

    async fn fetch(&self, cx: &OpContext, id: &OrgIdentity) -> Result<Option<Organization>> {
        absent_ok(
            "read",
            "organization",
            id.to_string(),
            self.api.describe_organization(cx).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &Organization,
    ) -> Result<Creation<OrgIdentity>> {
        match self.api.create_organization(cx, desired.feature_set).await {
            Ok(raw) => Ok(Creation::Created(raw.id.map(OrgIdentity::Id))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap(
                "create",
                "organization",
                desired.management_account.clone(),
                Err(e),
            ),
        }
    }

    fn plan_patches(&self, _before: &Organization, _desired: &Organization) -> Vec<OrgPatch> {
        Vec::new()
    }

    async fn apply_patch(
        &self,
        _cx: &OpContext,
        _id: &OrgIdentity,
        patch: &OrgPatch,
    ) -> Result<()> {
        match *patch {}
    }

    async fn remove(
        &self,
        _cx: &OpContext,
        id: &OrgIdentity,
        _current: &Organization,
    ) -> Result<()> {
        // Never reachable through the public surface; kept explicit so a
        // future caller cannot silently delete an organization.
        Err(CoreError::Remote {
            operation: "delete",
            kind: "organization",
            identity: id.to_string(),
            source: RemoteError::api(
                "UnsupportedOperation",
                "organizations cannot be deleted through this layer",
            ),
        })
    }
}
