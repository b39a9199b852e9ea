//! Managed policies
//!
//! A managed policy carries a versioned document; reconciling a drifted
//! document publishes a new default version rather than editing in place.
//! The description is create-only upstream, so it is not a reconcilable
//! category.

use crate::wire::{RawTag, tags_from_wire, tags_to_wire};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stateline_core::{
    Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference, RemoteResult,
    Result, SetMode, TagDiff, TagMap, absent_ok, diff_tags, gone_ok, require, resolve, wrap,
};
use std::fmt;

pub const POLICY: KindDescriptor = KindDescriptor {
    kind: "policy",
    primary_key: &["arn"],
    unique_key: &["path", "name"],
    readonly: &["arn", "created_at", "default_version"],
    metadata: &["policy_id"],
};

const DEFAULT_PATH: &str = "/";

/// Canonical managed-policy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub path: String,
    /// Policy document of the default version, kept as opaque JSON.
    pub document: Value,
    /// Create-only upstream; never diffed.
    pub description: Option<String>,
    pub tags: TagMap,

    // Remote-assigned
    pub arn: Option<String>,
    pub policy_id: Option<String>,
    pub default_version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Policy {
    pub fn new(name: impl Into<String>, document: Value) -> Self {
        Self {
            name: name.into(),
            path: DEFAULT_PATH.to_string(),
            document,
            description: None,
            tags: TagMap::new(),
            arn: None,
            policy_id: None,
            default_version: None,
            created_at: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Hydrated for Policy {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "policy_id" => self.policy_id.is_some(),
            "default_version" => self.default_version.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyIdentity {
    Arn(String),
    PathName { path: String, name: String },
}

impl fmt::Display for PolicyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyIdentity::Arn(arn) => write!(f, "{arn}"),
            PolicyIdentity::PathName { path, name } => write!(f, "{path}{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyRef {
    pub arn: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
}

impl Reference for PolicyRef {
    type Identity = PolicyIdentity;

    fn as_primary(&self) -> Option<PolicyIdentity> {
        self.arn.clone().map(PolicyIdentity::Arn)
    }

    fn as_unique(&self) -> Option<PolicyIdentity> {
        self.name.clone().map(|name| PolicyIdentity::PathName {
            path: self.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            name,
        })
    }
}

/// Policy as the remote API returns it, default-version document inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPolicy {
    pub policy_name: Option<String>,
    pub path: Option<String>,
    pub arn: Option<String>,
    pub policy_id: Option<String>,
    pub default_version_id: Option<String>,
    pub document: Option<Value>,
    pub description: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicySpec {
    pub policy_name: String,
    pub path: String,
    pub document: Value,
    pub description: Option<String>,
    pub tags: Vec<RawTag>,
}

pub fn from_remote(raw: RawPolicy) -> Result<Policy> {
    Ok(Policy {
        name: require("policy", "policy_name", raw.policy_name)?,
        path: raw.path.unwrap_or_else(|| DEFAULT_PATH.to_string()),
        document: require("policy", "document", raw.document)?,
        description: raw.description,
        tags: tags_from_wire(&raw.tags),
        arn: Some(require("policy", "arn", raw.arn)?),
        policy_id: Some(require("policy", "policy_id", raw.policy_id)?),
        default_version: Some(require("policy", "default_version_id", raw.default_version_id)?),
        created_at: Some(require("policy", "create_date", raw.create_date)?),
    })
}

pub fn to_remote(record: &Policy) -> PolicySpec {
    PolicySpec {
        policy_name: record.name.clone(),
        path: record.path.clone(),
        document: record.document.clone(),
        description: record.description.clone(),
        tags: tags_to_wire(&record.tags),
    }
}

/// Remote control-plane boundary for managed policies.
#[async_trait]
pub trait PolicyApi: Send + Sync {
    async fn get_policy(&self, cx: &OpContext, id: &PolicyIdentity) -> RemoteResult<RawPolicy>;
    async fn create_policy(&self, cx: &OpContext, spec: &PolicySpec) -> RemoteResult<RawPolicy>;
    /// Publish a new version and mark it the default.
    async fn create_policy_version(
        &self,
        cx: &OpContext,
        id: &PolicyIdentity,
        document: &Value,
    ) -> RemoteResult<()>;
    async fn tag_policy(
        &self,
        cx: &OpContext,
        id: &PolicyIdentity,
        tags: &[RawTag],
    ) -> RemoteResult<()>;
    async fn untag_policy(
        &self,
        cx: &OpContext,
        id: &PolicyIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn delete_policy(&self, cx: &OpContext, id: &PolicyIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum PolicyPatch {
    Document(Value),
    Tags(TagDiff),
}

/// Managed-policy operation set exposed to the orchestrator.
pub struct Policies<A> {
    api: A,
}

impl<A: PolicyApi> Policies<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<Policy>> {
        stateline_core::get_one(self, cx, &PolicyIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(
        &self,
        cx: &OpContext,
        path: &str,
        name: &str,
    ) -> Result<Option<Policy>> {
        let id = PolicyIdentity::PathName {
            path: path.to_string(),
            name: name.to_string(),
        };
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &PolicyRef) -> Result<Option<Policy>> {
        let (_, id) = resolve(&POLICY, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Policy) -> Result<Policy> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Policy) -> Result<Policy> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &PolicyRef) -> Result<Deletion> {
        let (_, id) = resolve(&POLICY, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }
}

#[async_trait]
impl<A: PolicyApi> KindOps for Policies<A> {
    type Record = Policy;
    type Identity = PolicyIdentity;
    type Patch = PolicyPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &POLICY
    }

    fn unique_identity(&self, desired: &Policy) -> Result<PolicyIdentity> {
        if desired.name.is_empty() {
            return Err(stateline_core::CoreError::MissingField {
                kind: "policy",
                field: "name",
            });
        }
        Ok(PolicyIdentity::PathName {
            path: desired.path.clone(),
            name: desired.name.clone(),
        })
    }

    fn primary_identity(&self, record: &Policy) -> Option<PolicyIdentity> {
        record.arn.clone().map(PolicyIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &PolicyIdentity) -> Result<Option<Policy>> {
        absent_ok(
            "read",
            "policy",
            id.to_string(),
            self.api.get_policy(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &Policy) -> Result<Creation<PolicyIdentity>> {
        let spec = to_remote(desired);
        match self.api.create_policy(cx, &spec).await {
            Ok(raw) => Ok(Creation::Created(raw.arn.map(PolicyIdentity::Arn))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "policy", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(&self, before: &Policy, desired: &Policy) -> Vec<PolicyPatch> {
        let mut patches = Vec::new();
        if before.document != desired.document {
            patches.push(PolicyPatch::Document(desired.document.clone()));
        }
        let tags = diff_tags(&before.tags, &desired.tags);
        if !tags.is_empty() {
            patches.push(PolicyPatch::Tags(tags));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &PolicyIdentity,
        patch: &PolicyPatch,
    ) -> Result<()> {
        match patch {
            PolicyPatch::Document(document) => {
                tracing::debug!(policy = %id, "publishing new default policy version");
                wrap(
                    "create_policy_version",
                    "policy",
                    id.to_string(),
                    self.api.create_policy_version(cx, id, document).await,
                )
            }
            PolicyPatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "policy",
                        id.to_string(),
                        self.api.tag_policy(cx, id, &tags_to_wire(&diff.set)).await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "policy",
                        id.to_string(),
                        self.api.untag_policy(cx, id, &keys).await,
                    )?;
                }
                Ok(())
            }
        }
    }

    async fn remove(&self, cx: &OpContext, id: &PolicyIdentity, _current: &Policy) -> Result<()> {
        gone_ok(
            "delete",
            "policy",
            id.to_string(),
            self.api.delete_policy(cx, id).await,
        )
    }
}
