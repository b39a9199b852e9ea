//! Published function versions
//!
//! Versions are immutable snapshots: there are no mutable sub-fields, so
//! findsert publishes only when no version with the desired code digest
//! exists yet. The remote refuses to delete a version an alias still points
//! at; that refusal propagates as a remote error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference,
    RemoteResult, Result, SetMode, absent_ok, gone_ok, require, resolve, wrap,
};
use std::fmt;

pub const FUNCTION_VERSION: KindDescriptor = KindDescriptor {
    kind: "function_version",
    primary_key: &["arn"],
    unique_key: &["function_name", "code_digest"],
    readonly: &["arn", "version", "created_at"],
    metadata: &[],
};

/// Canonical version record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionVersion {
    pub function_name: String,
    /// Digest of the snapshot; doubles as the unique key component.
    pub code_digest: String,
    pub description: Option<String>,

    // Remote-assigned
    pub arn: Option<String>,
    pub version: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl FunctionVersion {
    pub fn new(function_name: impl Into<String>, code_digest: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            code_digest: code_digest.into(),
            description: None,
            arn: None,
            version: None,
            created_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Hydrated for FunctionVersion {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "version" => self.version.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionIdentity {
    Arn(String),
    Digest {
        function_name: String,
        code_digest: String,
    },
}

impl fmt::Display for VersionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionIdentity::Arn(arn) => write!(f, "{arn}"),
            VersionIdentity::Digest {
                function_name,
                code_digest,
            } => write!(f, "{function_name}@{code_digest}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionRef {
    pub arn: Option<String>,
    pub function_name: Option<String>,
    pub code_digest: Option<String>,
}

impl Reference for VersionRef {
    type Identity = VersionIdentity;

    fn as_primary(&self) -> Option<VersionIdentity> {
        self.arn.clone().map(VersionIdentity::Arn)
    }

    fn as_unique(&self) -> Option<VersionIdentity> {
        match (&self.function_name, &self.code_digest) {
            (Some(function_name), Some(code_digest)) => Some(VersionIdentity::Digest {
                function_name: function_name.clone(),
                code_digest: code_digest.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawVersion {
    pub function_name: Option<String>,
    pub function_arn: Option<String>,
    pub version: Option<String>,
    pub code_sha256: Option<String>,
    pub description: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
}

pub fn from_remote(raw: RawVersion) -> Result<FunctionVersion> {
    Ok(FunctionVersion {
        function_name: require("function_version", "function_name", raw.function_name)?,
        code_digest: require("function_version", "code_sha256", raw.code_sha256)?,
        description: raw.description,
        arn: Some(require("function_version", "function_arn", raw.function_arn)?),
        version: Some(require("function_version", "version", raw.version)?),
        created_at: Some(require("function_version", "created_date", raw.created_date)?),
    })
}

/// Remote control-plane boundary for versions.
#[async_trait]
pub trait VersionApi: Send + Sync {
    async fn get_version(&self, cx: &OpContext, id: &VersionIdentity) -> RemoteResult<RawVersion>;
    /// Publish a snapshot of the function's current code. The remote rejects
    /// the publish when the current digest differs from the expected one.
    async fn publish_version(
        &self,
        cx: &OpContext,
        function_name: &str,
        expected_digest: &str,
        description: Option<&str>,
    ) -> RemoteResult<RawVersion>;
    async fn delete_version(&self, cx: &OpContext, id: &VersionIdentity) -> RemoteResult<()>;
}

/// Versions are immutable.
#[derive(Debug)]
pub enum VersionPatch {}

/// Version operation set exposed to the orchestrator.
pub struct Versions<A> {
    api: A,
}

impl<A: VersionApi> Versions<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<FunctionVersion>> {
        stateline_core::get_one(self, cx, &VersionIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_digest(
        &self,
        cx: &OpContext,
        function_name: &str,
        code_digest: &str,
    ) -> Result<Option<FunctionVersion>> {
        let id = VersionIdentity::Digest {
            function_name: function_name.to_string(),
            code_digest: code_digest.to_string(),
        };
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn get(
        &self,
        cx: &OpContext,
        reference: &VersionRef,
    ) -> Result<Option<FunctionVersion>> {
        let (_, id) = resolve(&FUNCTION_VERSION, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    /// Publish if no version with the desired digest exists.
    pub async fn findsert(&self, cx: &OpContext, desired: &FunctionVersion) -> Result<FunctionVersion> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    /// Degenerate: versions never change once published, so this is
    /// findsert under another name.
    pub async fn upsert(&self, cx: &OpContext, desired: &FunctionVersion) -> Result<FunctionVersion> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &VersionRef) -> Result<Deletion> {
        let (_, id) = resolve(&FUNCTION_VERSION, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }
}

#[async_trait]
impl<A: VersionApi> KindOps for Versions<A> {
    type Record = FunctionVersion;
    type Identity = VersionIdentity;
    type Patch = VersionPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &FUNCTION_VERSION
    }

    fn unique_identity(&self, desired: &FunctionVersion) -> Result<VersionIdentity> {
        if desired.function_name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "function_version",
                field: "function_name",
            });
        }
        Ok(VersionIdentity::Digest {
            function_name: desired.function_name.clone(),
            code_digest: desired.code_digest.clone(),
        })
    }

    fn primary_identity(&self, record: &FunctionVersion) -> Option<VersionIdentity> {
        record.arn.clone().map(VersionIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &VersionIdentity) -> Result<Option<FunctionVersion>> {
        absent_ok(
            "read",
            "function_version",
            id.to_string(),
            self.api.get_version(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &FunctionVersion,
    ) -> Result<Creation<VersionIdentity>> {
        match self
            .api
            .publish_version(
                cx,
                &desired.function_name,
                &desired.code_digest,
                desired.description.as_deref(),
            )
            .await
        {
            Ok(raw) => Ok(Creation::Created(raw.function_arn.map(VersionIdentity::Arn))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap(
                "publish",
                "function_version",
                desired.function_name.clone(),
                Err(e),
            ),
        }
    }

    fn plan_patches(
        &self,
        _before: &FunctionVersion,
        _desired: &FunctionVersion,
    ) -> Vec<VersionPatch> {
        Vec::new()
    }

    async fn apply_patch(
        &self,
        _cx: &OpContext,
        _id: &VersionIdentity,
        patch: &VersionPatch,
    ) -> Result<()> {
        match *patch {}
    }

    async fn remove(
        &self,
        cx: &OpContext,
        id: &VersionIdentity,
        _current: &FunctionVersion,
    ) -> Result<()> {
        gone_ok(
            "delete",
            "function_version",
            id.to_string(),
            self.api.delete_version(cx, id).await,
        )
    }
}
