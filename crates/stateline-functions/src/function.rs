//! Compute functions
//!
//! Creation is asynchronous server-side: a new function sits in `Pending`
//! until the platform finishes provisioning, so the setter polls readiness
//! before the final read. A function not yet visible to reads counts as
//! still pending (create propagation delay). Mutable sub-field categories:
//! code (by digest), runtime configuration, environment, tags.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, PollConfig,
    PollStatus, Reference, RemoteError, RemoteResult, Result, SetMode, TagDiff, TagMap, absent_ok,
    diff_tags, gone_ok, poll_until_terminal, require, resolve, wrap,
};
use std::collections::BTreeMap;
use std::fmt;

pub const FUNCTION: KindDescriptor = KindDescriptor {
    kind: "function",
    primary_key: &["arn"],
    unique_key: &["name"],
    readonly: &["arn", "revision", "state", "last_modified"],
    metadata: &[],
};

/// Remote lifecycle state of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FunctionState {
    Pending,
    Active,
    Inactive,
    Failed,
}

/// Environment variables, ordered for stable diffs.
pub type EnvMap = BTreeMap<String, String>;

/// Canonical function record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    /// Digest of the deployed code package; code drift is detected by digest.
    pub code_digest: String,
    pub env: EnvMap,
    pub tags: TagMap,

    // Remote-assigned
    pub arn: Option<String>,
    pub revision: Option<String>,
    pub state: Option<FunctionState>,
    pub state_reason: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        runtime: impl Into<String>,
        handler: impl Into<String>,
        code_digest: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            handler: handler.into(),
            memory_mb: 128,
            timeout_secs: 3,
            code_digest: code_digest.into(),
            env: EnvMap::new(),
            tags: TagMap::new(),
            arn: None,
            revision: None,
            state: None,
            state_reason: None,
            last_modified: None,
        }
    }

    pub fn with_memory(mut self, memory_mb: u32) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Hydrated for Function {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "revision" => self.revision.is_some(),
            "state" => self.state.is_some(),
            "last_modified" => self.last_modified.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionIdentity {
    Arn(String),
    Name(String),
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionIdentity::Arn(arn) => write!(f, "{arn}"),
            FunctionIdentity::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRef {
    pub arn: Option<String>,
    pub name: Option<String>,
}

impl Reference for FunctionRef {
    type Identity = FunctionIdentity;

    fn as_primary(&self) -> Option<FunctionIdentity> {
        self.arn.clone().map(FunctionIdentity::Arn)
    }

    fn as_unique(&self) -> Option<FunctionIdentity> {
        self.name.clone().map(FunctionIdentity::Name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawFunction {
    pub function_name: Option<String>,
    pub function_arn: Option<String>,
    pub runtime: Option<String>,
    pub handler: Option<String>,
    pub memory_size: Option<u32>,
    pub timeout: Option<u32>,
    pub code_sha256: Option<String>,
    #[serde(default)]
    pub environment: EnvMap,
    #[serde(default)]
    pub tags: TagMap,
    pub revision_id: Option<String>,
    pub state: Option<FunctionState>,
    pub state_reason: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionSpec {
    pub function_name: String,
    pub runtime: String,
    pub handler: String,
    pub memory_size: u32,
    pub timeout: u32,
    pub code_sha256: String,
    pub environment: EnvMap,
    pub tags: TagMap,
}

pub fn from_remote(raw: RawFunction) -> Result<Function> {
    Ok(Function {
        name: require("function", "function_name", raw.function_name)?,
        runtime: require("function", "runtime", raw.runtime)?,
        handler: require("function", "handler", raw.handler)?,
        memory_mb: raw.memory_size.unwrap_or(128),
        timeout_secs: raw.timeout.unwrap_or(3),
        code_digest: require("function", "code_sha256", raw.code_sha256)?,
        env: raw.environment,
        tags: raw.tags,
        arn: Some(require("function", "function_arn", raw.function_arn)?),
        revision: Some(require("function", "revision_id", raw.revision_id)?),
        state: Some(require("function", "state", raw.state)?),
        state_reason: raw.state_reason,
        last_modified: Some(require("function", "last_modified", raw.last_modified)?),
    })
}

pub fn to_remote(record: &Function) -> FunctionSpec {
    FunctionSpec {
        function_name: record.name.clone(),
        runtime: record.runtime.clone(),
        handler: record.handler.clone(),
        memory_size: record.memory_mb,
        timeout: record.timeout_secs,
        code_sha256: record.code_digest.clone(),
        environment: record.env.clone(),
        tags: record.tags.clone(),
    }
}

/// Remote control-plane boundary for functions.
#[async_trait]
pub trait FunctionApi: Send + Sync {
    async fn get_function(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
    ) -> RemoteResult<RawFunction>;
    async fn create_function(&self, cx: &OpContext, spec: &FunctionSpec)
    -> RemoteResult<RawFunction>;
    async fn update_code(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        code_sha256: &str,
    ) -> RemoteResult<()>;
    async fn update_configuration(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        runtime: &str,
        handler: &str,
        memory_size: u32,
        timeout: u32,
    ) -> RemoteResult<()>;
    async fn update_environment(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        environment: &EnvMap,
    ) -> RemoteResult<()>;
    async fn tag_function(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        tags: &TagMap,
    ) -> RemoteResult<()>;
    async fn untag_function(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn delete_function(&self, cx: &OpContext, id: &FunctionIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum FunctionPatch {
    Code(String),
    Config {
        runtime: String,
        handler: String,
        memory_mb: u32,
        timeout_secs: u32,
    },
    Env(EnvMap),
    Tags(TagDiff),
}

/// Function operation set exposed to the orchestrator.
pub struct Functions<A> {
    api: A,
    poll: PollConfig,
}

impl<A: FunctionApi> Functions<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<Function>> {
        stateline_core::get_one(self, cx, &FunctionIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, name: &str) -> Result<Option<Function>> {
        stateline_core::get_one(self, cx, &FunctionIdentity::Name(name.to_string())).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &FunctionRef) -> Result<Option<Function>> {
        let (_, id) = resolve(&FUNCTION, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Function) -> Result<Function> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Function) -> Result<Function> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &FunctionRef) -> Result<Deletion> {
        let (_, id) = resolve(&FUNCTION, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    /// Readiness classification for a just-mutated function. A read miss is
    /// create propagation delay, not an error.
    fn classify(
        id: &FunctionIdentity,
        observed: RemoteResult<RawFunction>,
    ) -> Result<PollStatus<()>> {
        match observed {
            Err(RemoteError::NotFound) => Ok(PollStatus::Pending),
            Err(e) => Err(CoreError::Remote {
                operation: "check_readiness",
                kind: "function",
                identity: id.to_string(),
                source: e,
            }),
            Ok(raw) => Ok(match raw.state {
                None | Some(FunctionState::Pending) => PollStatus::InProgress,
                Some(FunctionState::Active) | Some(FunctionState::Inactive) => {
                    PollStatus::Succeeded(())
                }
                Some(FunctionState::Failed) => PollStatus::Failed(
                    raw.state_reason
                        .unwrap_or_else(|| "function entered the failed state".to_string()),
                ),
            }),
        }
    }
}

#[async_trait]
impl<A: FunctionApi> KindOps for Functions<A> {
    type Record = Function;
    type Identity = FunctionIdentity;
    type Patch = FunctionPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &FUNCTION
    }

    fn unique_identity(&self, desired: &Function) -> Result<FunctionIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "function",
                field: "name",
            });
        }
        Ok(FunctionIdentity::Name(desired.name.clone()))
    }

    fn primary_identity(&self, record: &Function) -> Option<FunctionIdentity> {
        record.arn.clone().map(FunctionIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &FunctionIdentity) -> Result<Option<Function>> {
        absent_ok(
            "read",
            "function",
            id.to_string(),
            self.api.get_function(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &Function,
    ) -> Result<Creation<FunctionIdentity>> {
        let spec = to_remote(desired);
        match self.api.create_function(cx, &spec).await {
            Ok(raw) => Ok(Creation::Created(raw.function_arn.map(FunctionIdentity::Arn))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "function", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(&self, before: &Function, desired: &Function) -> Vec<FunctionPatch> {
        let mut patches = Vec::new();
        if before.code_digest != desired.code_digest {
            patches.push(FunctionPatch::Code(desired.code_digest.clone()));
        }
        if before.runtime != desired.runtime
            || before.handler != desired.handler
            || before.memory_mb != desired.memory_mb
            || before.timeout_secs != desired.timeout_secs
        {
            patches.push(FunctionPatch::Config {
                runtime: desired.runtime.clone(),
                handler: desired.handler.clone(),
                memory_mb: desired.memory_mb,
                timeout_secs: desired.timeout_secs,
            });
        }
        if before.env != desired.env {
            patches.push(FunctionPatch::Env(desired.env.clone()));
        }
        let tags = diff_tags(&before.tags, &desired.tags);
        if !tags.is_empty() {
            patches.push(FunctionPatch::Tags(tags));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &FunctionIdentity,
        patch: &FunctionPatch,
    ) -> Result<()> {
        match patch {
            FunctionPatch::Code(code_sha256) => wrap(
                "update_code",
                "function",
                id.to_string(),
                self.api.update_code(cx, id, code_sha256).await,
            ),
            FunctionPatch::Config {
                runtime,
                handler,
                memory_mb,
                timeout_secs,
            } => wrap(
                "update_configuration",
                "function",
                id.to_string(),
                self.api
                    .update_configuration(cx, id, runtime, handler, *memory_mb, *timeout_secs)
                    .await,
            ),
            FunctionPatch::Env(environment) => wrap(
                "update_environment",
                "function",
                id.to_string(),
                self.api.update_environment(cx, id, environment).await,
            ),
            FunctionPatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "function",
                        id.to_string(),
                        self.api.tag_function(cx, id, &diff.set).await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "function",
                        id.to_string(),
                        self.api.untag_function(cx, id, &keys).await,
                    )?;
                }
                Ok(())
            }
        }
    }

    async fn await_settled(&self, cx: &OpContext, id: &FunctionIdentity) -> Result<()> {
        let api = &self.api;
        poll_until_terminal(&self.poll, move || async move {
            Self::classify(id, api.get_function(cx, id).await)
        })
        .await
    }

    async fn remove(&self, cx: &OpContext, id: &FunctionIdentity, _current: &Function) -> Result<()> {
        gone_ok(
            "delete",
            "function",
            id.to_string(),
            self.api.delete_function(cx, id).await,
        )
    }
}
