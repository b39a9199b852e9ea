//! Single-sign-on objects
//!
//! Permission sets are ordinary keyed resources scoped to one SSO instance.
//! Account assignments are attachment-shaped, and both their creation and
//! their deletion are asynchronous jobs polled to a terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, PollConfig,
    PollStatus, Reference, RemoteResult, Result, SetMode, TagDiff, TagMap, absent_ok, diff_tags,
    gone_ok, poll_until_terminal, require, resolve, wrap,
};
use std::fmt;

pub const PERMISSION_SET: KindDescriptor = KindDescriptor {
    kind: "permission_set",
    primary_key: &["arn"],
    unique_key: &["name"],
    readonly: &["arn", "created_at"],
    metadata: &[],
};

pub const ASSIGNMENT: KindDescriptor = KindDescriptor {
    kind: "account_assignment",
    primary_key: &[],
    unique_key: &["permission_set_arn", "account_id", "principal"],
    readonly: &[],
    metadata: &[],
};

/// Canonical permission set record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub name: String,
    pub session_duration: Option<String>,
    pub relay_state: Option<String>,
    pub tags: TagMap,

    // Remote-assigned
    pub arn: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PermissionSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_duration: None,
            relay_state: None,
            tags: TagMap::new(),
            arn: None,
            created_at: None,
        }
    }

    pub fn with_session_duration(mut self, duration: impl Into<String>) -> Self {
        self.session_duration = Some(duration.into());
        self
    }

    pub fn with_relay_state(mut self, relay_state: impl Into<String>) -> Self {
        self.relay_state = Some(relay_state.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Hydrated for PermissionSet {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSetIdentity {
    Arn(String),
    Name(String),
}

impl fmt::Display for PermissionSetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionSetIdentity::Arn(arn) => write!(f, "{arn}"),
            PermissionSetIdentity::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PermissionSetRef {
    pub arn: Option<String>,
    pub name: Option<String>,
}

impl Reference for PermissionSetRef {
    type Identity = PermissionSetIdentity;

    fn as_primary(&self) -> Option<PermissionSetIdentity> {
        self.arn.clone().map(PermissionSetIdentity::Arn)
    }

    fn as_unique(&self) -> Option<PermissionSetIdentity> {
        self.name.clone().map(PermissionSetIdentity::Name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPermissionSet {
    pub name: Option<String>,
    pub permission_set_arn: Option<String>,
    pub session_duration: Option<String>,
    pub relay_state: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TagMap,
}

pub fn permission_set_from_remote(raw: RawPermissionSet) -> Result<PermissionSet> {
    Ok(PermissionSet {
        name: require("permission_set", "name", raw.name)?,
        session_duration: raw.session_duration,
        relay_state: raw.relay_state,
        tags: raw.tags,
        arn: Some(require(
            "permission_set",
            "permission_set_arn",
            raw.permission_set_arn,
        )?),
        created_at: Some(require("permission_set", "created_date", raw.created_date)?),
    })
}

/// State of an in-flight assignment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentState {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawAssignmentStatus {
    pub state: AssignmentState,
    pub failure_reason: Option<String>,
}

fn classify_assignment(status: RawAssignmentStatus) -> Result<PollStatus<()>> {
    Ok(match status.state {
        AssignmentState::InProgress => PollStatus::InProgress,
        AssignmentState::Succeeded => PollStatus::Succeeded(()),
        AssignmentState::Failed => PollStatus::Failed(
            status
                .failure_reason
                .unwrap_or_else(|| "unspecified assignment failure".to_string()),
        ),
    })
}

/// Remote control-plane boundary for permission sets.
#[async_trait]
pub trait PermissionSetApi: Send + Sync {
    async fn get_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &PermissionSetIdentity,
    ) -> RemoteResult<RawPermissionSet>;
    async fn create_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        desired: &RawPermissionSet,
    ) -> RemoteResult<RawPermissionSet>;
    /// Session duration and relay state update together in one call.
    async fn update_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &PermissionSetIdentity,
        session_duration: Option<&str>,
        relay_state: Option<&str>,
    ) -> RemoteResult<()>;
    async fn tag_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &PermissionSetIdentity,
        tags: &TagMap,
    ) -> RemoteResult<()>;
    async fn untag_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &PermissionSetIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn delete_permission_set(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &PermissionSetIdentity,
    ) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum PermissionSetPatch {
    /// Session duration and relay state, one remote call.
    Settings {
        session_duration: Option<String>,
        relay_state: Option<String>,
    },
    Tags(TagDiff),
}

/// Permission set operation set, scoped to one SSO instance.
pub struct PermissionSets<A> {
    api: A,
    instance_arn: String,
}

impl<A: PermissionSetApi> PermissionSets<A> {
    pub fn new(api: A, instance_arn: impl Into<String>) -> Self {
        Self {
            api,
            instance_arn: instance_arn.into(),
        }
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<PermissionSet>> {
        stateline_core::get_one(self, cx, &PermissionSetIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, name: &str) -> Result<Option<PermissionSet>> {
        stateline_core::get_one(self, cx, &PermissionSetIdentity::Name(name.to_string())).await
    }

    pub async fn get(
        &self,
        cx: &OpContext,
        reference: &PermissionSetRef,
    ) -> Result<Option<PermissionSet>> {
        let (_, id) = resolve(&PERMISSION_SET, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &PermissionSet) -> Result<PermissionSet> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &PermissionSet) -> Result<PermissionSet> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &PermissionSetRef) -> Result<Deletion> {
        let (_, id) = resolve(&PERMISSION_SET, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    fn to_remote(&self, record: &PermissionSet) -> RawPermissionSet {
        RawPermissionSet {
            name: Some(record.name.clone()),
            permission_set_arn: None,
            session_duration: record.session_duration.clone(),
            relay_state: record.relay_state.clone(),
            created_date: None,
            tags: record.tags.clone(),
        }
    }
}

#[async_trait]
impl<A: PermissionSetApi> KindOps for PermissionSets<A> {
    type Record = PermissionSet;
    type Identity = PermissionSetIdentity;
    type Patch = PermissionSetPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &PERMISSION_SET
    }

    fn unique_identity(&self, desired: &PermissionSet) -> Result<PermissionSetIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "permission_set",
                field: "name",
            });
        }
        Ok(PermissionSetIdentity::Name(desired.name.clone()))
    }

    fn primary_identity(&self, record: &PermissionSet) -> Option<PermissionSetIdentity> {
        record.arn.clone().map(PermissionSetIdentity::Arn)
    }

    async fn fetch(
        &self,
        cx: &OpContext,
        id: &PermissionSetIdentity,
    ) -> Result<Option<PermissionSet>> {
        absent_ok(
            "read",
            "permission_set",
            id.to_string(),
            self.api.get_permission_set(cx, &self.instance_arn, id).await,
        )?
        .map(permission_set_from_remote)
        .transpose()
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &PermissionSet,
    ) -> Result<Creation<PermissionSetIdentity>> {
        let payload = self.to_remote(desired);
        match self
            .api
            .create_permission_set(cx, &self.instance_arn, &payload)
            .await
        {
            Ok(raw) => Ok(Creation::Created(
                raw.permission_set_arn.map(PermissionSetIdentity::Arn),
            )),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "permission_set", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(
        &self,
        before: &PermissionSet,
        desired: &PermissionSet,
    ) -> Vec<PermissionSetPatch> {
        let mut patches = Vec::new();
        if before.session_duration != desired.session_duration
            || before.relay_state != desired.relay_state
        {
            patches.push(PermissionSetPatch::Settings {
                session_duration: desired.session_duration.clone(),
                relay_state: desired.relay_state.clone(),
            });
        }
        let tags = diff_tags(&before.tags, &desired.tags);
        if !tags.is_empty() {
            patches.push(PermissionSetPatch::Tags(tags));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &PermissionSetIdentity,
        patch: &PermissionSetPatch,
    ) -> Result<()> {
        match patch {
            PermissionSetPatch::Settings {
                session_duration,
                relay_state,
            } => wrap(
                "update",
                "permission_set",
                id.to_string(),
                self.api
                    .update_permission_set(
                        cx,
                        &self.instance_arn,
                        id,
                        session_duration.as_deref(),
                        relay_state.as_deref(),
                    )
                    .await,
            ),
            PermissionSetPatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "permission_set",
                        id.to_string(),
                        self.api
                            .tag_permission_set(cx, &self.instance_arn, id, &diff.set)
                            .await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "permission_set",
                        id.to_string(),
                        self.api
                            .untag_permission_set(cx, &self.instance_arn, id, &keys)
                            .await,
                    )?;
                }
                Ok(())
            }
        }
    }

    async fn remove(
        &self,
        cx: &OpContext,
        id: &PermissionSetIdentity,
        _current: &PermissionSet,
    ) -> Result<()> {
        gone_ok(
            "delete",
            "permission_set",
            id.to_string(),
            self.api
                .delete_permission_set(cx, &self.instance_arn, id)
                .await,
        )
    }
}

/// Principal an assignment grants access to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrincipalType {
    User,
    Group,
}

/// Canonical account assignment record. Attachment-shaped: every field is
/// caller-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub permission_set_arn: String,
    pub account_id: String,
    pub principal_id: String,
    pub principal_type: PrincipalType,
}

impl Assignment {
    pub fn new(
        permission_set_arn: impl Into<String>,
        account_id: impl Into<String>,
        principal_id: impl Into<String>,
        principal_type: PrincipalType,
    ) -> Self {
        Self {
            permission_set_arn: permission_set_arn.into(),
            account_id: account_id.into(),
            principal_id: principal_id.into(),
            principal_type,
        }
    }
}

impl Hydrated for Assignment {
    fn field_present(&self, field: &str) -> bool {
        matches!(
            field,
            "permission_set_arn" | "account_id" | "principal_id" | "principal_type"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentIdentity {
    pub permission_set_arn: String,
    pub account_id: String,
    pub principal_id: String,
    pub principal_type: PrincipalType,
}

impl fmt::Display for AssignmentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.permission_set_arn, self.account_id, self.principal_id
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentRef {
    pub permission_set_arn: Option<String>,
    pub account_id: Option<String>,
    pub principal_id: Option<String>,
    pub principal_type: Option<PrincipalType>,
}

impl Reference for AssignmentRef {
    type Identity = AssignmentIdentity;

    fn as_primary(&self) -> Option<AssignmentIdentity> {
        None
    }

    fn as_unique(&self) -> Option<AssignmentIdentity> {
        match (
            &self.permission_set_arn,
            &self.account_id,
            &self.principal_id,
            &self.principal_type,
        ) {
            (Some(permission_set_arn), Some(account_id), Some(principal_id), Some(principal_type)) => {
                Some(AssignmentIdentity {
                    permission_set_arn: permission_set_arn.clone(),
                    account_id: account_id.clone(),
                    principal_id: principal_id.clone(),
                    principal_type: principal_type.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Remote control-plane boundary for assignments. Create and delete both
/// return job handles observed through `check_assignment_status`.
#[async_trait]
pub trait AssignmentApi: Send + Sync {
    async fn get_assignment(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &AssignmentIdentity,
    ) -> RemoteResult<()>;
    async fn create_assignment(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &AssignmentIdentity,
    ) -> RemoteResult<String>;
    async fn delete_assignment(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        id: &AssignmentIdentity,
    ) -> RemoteResult<String>;
    async fn check_assignment_status(
        &self,
        cx: &OpContext,
        instance_arn: &str,
        request_id: &str,
    ) -> RemoteResult<RawAssignmentStatus>;
}

/// Assignments carry no mutable sub-fields.
#[derive(Debug)]
pub enum AssignmentPatch {}

/// Assignment operation set, scoped to one SSO instance.
pub struct Assignments<A> {
    api: A,
    instance_arn: String,
    poll: PollConfig,
}

impl<A: AssignmentApi> Assignments<A> {
    pub fn new(api: A, instance_arn: impl Into<String>) -> Self {
        Self {
            api,
            instance_arn: instance_arn.into(),
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub async fn get(
        &self,
        cx: &OpContext,
        reference: &AssignmentRef,
    ) -> Result<Option<Assignment>> {
        let (_, id) = resolve(&ASSIGNMENT, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Assignment) -> Result<Assignment> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    /// Degenerate: assignments carry no mutable sub-fields.
    pub async fn upsert(&self, cx: &OpContext, desired: &Assignment) -> Result<Assignment> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &AssignmentRef) -> Result<Deletion> {
        let (_, id) = resolve(&ASSIGNMENT, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    async fn await_job(&self, cx: &OpContext, request_id: String) -> Result<()> {
        let api = &self.api;
        let instance_arn = self.instance_arn.as_str();
        poll_until_terminal(&self.poll, move || {
            let request_id = request_id.clone();
            async move {
                let status = wrap(
                    "check_assignment_status",
                    "account_assignment",
                    request_id.clone(),
                    api.check_assignment_status(cx, instance_arn, &request_id)
                        .await,
                )?;
                classify_assignment(status)
            }
        })
        .await
    }

    fn identity_of(record: &Assignment) -> AssignmentIdentity {
        AssignmentIdentity {
            permission_set_arn: record.permission_set_arn.clone(),
            account_id: record.account_id.clone(),
            principal_id: record.principal_id.clone(),
            principal_type: record.principal_type.clone(),
        }
    }
}

#[async_trait]
impl<A: AssignmentApi> KindOps for Assignments<A> {
    type Record = Assignment;
    type Identity = AssignmentIdentity;
    type Patch = AssignmentPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ASSIGNMENT
    }

    fn unique_identity(&self, desired: &Assignment) -> Result<AssignmentIdentity> {
        Ok(Self::identity_of(desired))
    }

    async fn fetch(
        &self,
        cx: &OpContext,
        id: &AssignmentIdentity,
    ) -> Result<Option<Assignment>> {
        let present = absent_ok(
            "read",
            "account_assignment",
            id.to_string(),
            self.api.get_assignment(cx, &self.instance_arn, id).await,
        )?;
        Ok(present.map(|()| Assignment {
            permission_set_arn: id.permission_set_arn.clone(),
            account_id: id.account_id.clone(),
            principal_id: id.principal_id.clone(),
            principal_type: id.principal_type.clone(),
        }))
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &Assignment,
    ) -> Result<Creation<AssignmentIdentity>> {
        let id = Self::identity_of(desired);
        let request_id = match self.api.create_assignment(cx, &self.instance_arn, &id).await {
            Ok(request_id) => request_id,
            Err(e) if e.is_conflict() => return Ok(Creation::AlreadyExists),
            Err(e) => return wrap("create", "account_assignment", id.to_string(), Err(e)),
        };
        self.await_job(cx, request_id).await?;
        Ok(Creation::Created(None))
    }

    fn plan_patches(&self, _before: &Assignment, _desired: &Assignment) -> Vec<AssignmentPatch> {
        Vec::new()
    }

    async fn apply_patch(
        &self,
        _cx: &OpContext,
        _id: &AssignmentIdentity,
        patch: &AssignmentPatch,
    ) -> Result<()> {
        match *patch {}
    }

    async fn remove(
        &self,
        cx: &OpContext,
        id: &AssignmentIdentity,
        _current: &Assignment,
    ) -> Result<()> {
        let request_id = match self.api.delete_assignment(cx, &self.instance_arn, id).await {
            Ok(request_id) => request_id,
            // The assignment vanished between the existence check and the
            // delete; that is the success we were after.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return wrap("delete", "account_assignment", id.to_string(), Err(e)),
        };
        self.await_job(cx, request_id).await
    }
}
