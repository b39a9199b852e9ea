//! Identity roles
//!
//! A role is addressed by its remote-assigned ARN (primary) or by its
//! caller-assigned path + name (unique). Mutable sub-field categories:
//! trust policy document, description, tags.

use crate::wire::{RawTag, tags_from_wire, tags_to_wire};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stateline_core::{
    Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, PollConfig, PollStatus,
    Reference, RemoteResult, Result, SetMode, TagDiff, TagMap, absent_ok, diff_tags, gone_ok,
    poll_until_terminal, require, resolve, wrap,
};
use std::fmt;

pub const ROLE: KindDescriptor = KindDescriptor {
    kind: "role",
    primary_key: &["arn"],
    unique_key: &["path", "name"],
    readonly: &["arn", "created_at"],
    metadata: &["role_id"],
};

const DEFAULT_PATH: &str = "/";

/// Canonical role record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub path: String,
    /// Trust relationship policy document, kept as opaque JSON.
    pub trust_policy: Value,
    pub description: Option<String>,
    pub tags: TagMap,

    // Remote-assigned
    pub arn: Option<String>,
    pub role_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new(name: impl Into<String>, trust_policy: Value) -> Self {
        Self {
            name: name.into(),
            path: DEFAULT_PATH.to_string(),
            trust_policy,
            description: None,
            tags: TagMap::new(),
            arn: None,
            role_id: None,
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

impl Hydrated for Role {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "role_id" => self.role_id.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

/// Resolved role identity, one shape at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleIdentity {
    Arn(String),
    PathName { path: String, name: String },
}

impl fmt::Display for RoleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleIdentity::Arn(arn) => write!(f, "{arn}"),
            // The composite lookup key the remote derives from unique fields.
            RoleIdentity::PathName { path, name } => write!(f, "{path}{name}"),
        }
    }
}

/// Partial caller reference, classified by [`stateline_core::resolve`].
#[derive(Debug, Clone, Default)]
pub struct RoleRef {
    pub arn: Option<String>,
    pub path: Option<String>,
    pub name: Option<String>,
}

impl Reference for RoleRef {
    type Identity = RoleIdentity;

    fn as_primary(&self) -> Option<RoleIdentity> {
        self.arn.clone().map(RoleIdentity::Arn)
    }

    fn as_unique(&self) -> Option<RoleIdentity> {
        self.name.clone().map(|name| RoleIdentity::PathName {
            path: self.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            name,
        })
    }
}

/// Role as the remote API returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawRole {
    pub role_name: Option<String>,
    pub path: Option<String>,
    pub arn: Option<String>,
    pub role_id: Option<String>,
    pub assume_role_policy_document: Option<Value>,
    pub description: Option<String>,
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<RawTag>,
}

/// Create payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoleSpec {
    pub role_name: String,
    pub path: String,
    pub assume_role_policy_document: Value,
    pub description: Option<String>,
    pub tags: Vec<RawTag>,
}

/// Translate a remote response into the canonical record, failing fast on
/// fields the remote always supplies.
pub fn from_remote(raw: RawRole) -> Result<Role> {
    Ok(Role {
        name: require("role", "role_name", raw.role_name)?,
        path: raw.path.unwrap_or_else(|| DEFAULT_PATH.to_string()),
        trust_policy: require(
            "role",
            "assume_role_policy_document",
            raw.assume_role_policy_document,
        )?,
        description: raw.description,
        tags: tags_from_wire(&raw.tags),
        arn: Some(require("role", "arn", raw.arn)?),
        role_id: Some(require("role", "role_id", raw.role_id)?),
        created_at: Some(require("role", "create_date", raw.create_date)?),
    })
}

pub fn to_remote(record: &Role) -> RoleSpec {
    RoleSpec {
        role_name: record.name.clone(),
        path: record.path.clone(),
        assume_role_policy_document: record.trust_policy.clone(),
        description: record.description.clone(),
        tags: tags_to_wire(&record.tags),
    }
}

/// Remote control-plane boundary for roles. Update calls are scoped to one
/// mutable sub-field category each.
#[async_trait]
pub trait RoleApi: Send + Sync {
    async fn get_role(&self, cx: &OpContext, id: &RoleIdentity) -> RemoteResult<RawRole>;
    async fn create_role(&self, cx: &OpContext, spec: &RoleSpec) -> RemoteResult<RawRole>;
    async fn update_trust_policy(
        &self,
        cx: &OpContext,
        id: &RoleIdentity,
        document: &Value,
    ) -> RemoteResult<()>;
    async fn update_description(
        &self,
        cx: &OpContext,
        id: &RoleIdentity,
        description: Option<&str>,
    ) -> RemoteResult<()>;
    async fn tag_role(&self, cx: &OpContext, id: &RoleIdentity, tags: &[RawTag])
    -> RemoteResult<()>;
    async fn untag_role(
        &self,
        cx: &OpContext,
        id: &RoleIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn delete_role(&self, cx: &OpContext, id: &RoleIdentity) -> RemoteResult<()>;
}

/// One divergent sub-field category.
#[derive(Debug)]
pub enum RolePatch {
    TrustPolicy(Value),
    Description(Option<String>),
    Tags(TagDiff),
}

/// Role operation set exposed to the orchestrator.
pub struct Roles<A> {
    api: A,
    poll: PollConfig,
}

impl<A: RoleApi> Roles<A> {
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

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<Role>> {
        stateline_core::get_one(self, cx, &RoleIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, path: &str, name: &str) -> Result<Option<Role>> {
        let id = RoleIdentity::PathName {
            path: path.to_string(),
            name: name.to_string(),
        };
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &RoleRef) -> Result<Option<Role>> {
        let (_, id) = resolve(&ROLE, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Role) -> Result<Role> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Role) -> Result<Role> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &RoleRef) -> Result<Deletion> {
        let (_, id) = resolve(&ROLE, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }
}

#[async_trait]
impl<A: RoleApi> KindOps for Roles<A> {
    type Record = Role;
    type Identity = RoleIdentity;
    type Patch = RolePatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ROLE
    }

    fn unique_identity(&self, desired: &Role) -> Result<RoleIdentity> {
        if desired.name.is_empty() {
            return Err(stateline_core::CoreError::MissingField {
                kind: "role",
                field: "name",
            });
        }
        Ok(RoleIdentity::PathName {
            path: desired.path.clone(),
            name: desired.name.clone(),
        })
    }

    fn primary_identity(&self, record: &Role) -> Option<RoleIdentity> {
        record.arn.clone().map(RoleIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &RoleIdentity) -> Result<Option<Role>> {
        absent_ok("read", "role", id.to_string(), self.api.get_role(cx, id).await)?
            .map(from_remote)
            .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &Role) -> Result<Creation<RoleIdentity>> {
        let spec = to_remote(desired);
        match self.api.create_role(cx, &spec).await {
            Ok(raw) => Ok(Creation::Created(raw.arn.map(RoleIdentity::Arn))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "role", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(&self, before: &Role, desired: &Role) -> Vec<RolePatch> {
        let mut patches = Vec::new();
        if before.trust_policy != desired.trust_policy {
            patches.push(RolePatch::TrustPolicy(desired.trust_policy.clone()));
        }
        if before.description != desired.description {
            patches.push(RolePatch::Description(desired.description.clone()));
        }
        let tags = diff_tags(&before.tags, &desired.tags);
        if !tags.is_empty() {
            patches.push(RolePatch::Tags(tags));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &RoleIdentity,
        patch: &RolePatch,
    ) -> Result<()> {
        match patch {
            RolePatch::TrustPolicy(document) => wrap(
                "update_trust_policy",
                "role",
                id.to_string(),
                self.api.update_trust_policy(cx, id, document).await,
            ),
            RolePatch::Description(description) => wrap(
                "update_description",
                "role",
                id.to_string(),
                self.api
                    .update_description(cx, id, description.as_deref())
                    .await,
            ),
            RolePatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "role",
                        id.to_string(),
                        self.api.tag_role(cx, id, &tags_to_wire(&diff.set)).await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "role",
                        id.to_string(),
                        self.api.untag_role(cx, id, &keys).await,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// The identity plane is eventually consistent: a fresh role can lag
    /// reads for a moment, so wait until it is visible before the final read.
    async fn await_settled(&self, cx: &OpContext, id: &RoleIdentity) -> Result<()> {
        let api = &self.api;
        poll_until_terminal(&self.poll, move || async move {
            match api.get_role(cx, id).await {
                Ok(_) => Ok(PollStatus::Succeeded(())),
                Err(e) if e.is_not_found() => Ok(PollStatus::Pending),
                Err(e) => wrap("check_visibility", "role", id.to_string(), Err(e)),
            }
        })
        .await
    }

    async fn remove(&self, cx: &OpContext, id: &RoleIdentity, _current: &Role) -> Result<()> {
        gone_ok(
            "delete",
            "role",
            id.to_string(),
            self.api.delete_role(cx, id).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stateline_core::{CoreError, RemoteError};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockRoleApi {
        store: Mutex<HashMap<String, RawRole>>,
        gets: AtomicUsize,
        creates: AtomicUsize,
        trust_updates: AtomicUsize,
        tag_calls: AtomicUsize,
        untag_calls: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl MockRoleApi {
        fn materialize(&self, spec: &RoleSpec, n: usize) -> RawRole {
            RawRole {
                role_name: Some(spec.role_name.clone()),
                path: Some(spec.path.clone()),
                arn: Some(format!(
                    "arn:aws:iam::123456789012:role{}{}",
                    spec.path, spec.role_name
                )),
                role_id: Some(format!("AROA{n:08}")),
                assume_role_policy_document: Some(spec.assume_role_policy_document.clone()),
                description: spec.description.clone(),
                create_date: Some(Utc::now()),
                tags: spec.tags.clone(),
            }
        }

        fn key_of(id: &RoleIdentity, store: &HashMap<String, RawRole>) -> Option<String> {
            match id {
                RoleIdentity::PathName { name, .. } => Some(name.clone()),
                RoleIdentity::Arn(arn) => store
                    .values()
                    .find(|r| r.arn.as_deref() == Some(arn))
                    .and_then(|r| r.role_name.clone()),
            }
        }
    }

    #[async_trait]
    impl RoleApi for MockRoleApi {
        async fn get_role(&self, _cx: &OpContext, id: &RoleIdentity) -> RemoteResult<RawRole> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let store = self.store.lock().unwrap();
            Self::key_of(id, &store)
                .and_then(|k| store.get(&k).cloned())
                .ok_or(RemoteError::NotFound)
        }

        async fn create_role(&self, _cx: &OpContext, spec: &RoleSpec) -> RemoteResult<RawRole> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            if store.contains_key(&spec.role_name) {
                return Err(RemoteError::AlreadyExists);
            }
            let raw = self.materialize(spec, n);
            store.insert(spec.role_name.clone(), raw.clone());
            Ok(raw)
        }

        async fn update_trust_policy(
            &self,
            _cx: &OpContext,
            id: &RoleIdentity,
            document: &Value,
        ) -> RemoteResult<()> {
            self.trust_updates.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store
                .get_mut(&key)
                .ok_or(RemoteError::NotFound)?
                .assume_role_policy_document = Some(document.clone());
            Ok(())
        }

        async fn update_description(
            &self,
            _cx: &OpContext,
            id: &RoleIdentity,
            description: Option<&str>,
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store.get_mut(&key).ok_or(RemoteError::NotFound)?.description =
                description.map(str::to_string);
            Ok(())
        }

        async fn tag_role(
            &self,
            _cx: &OpContext,
            id: &RoleIdentity,
            tags: &[RawTag],
        ) -> RemoteResult<()> {
            self.tag_calls.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(RemoteError::NotFound)?;
            for tag in tags {
                raw.tags.retain(|t| t.key != tag.key);
                raw.tags.push(tag.clone());
            }
            Ok(())
        }

        async fn untag_role(
            &self,
            _cx: &OpContext,
            id: &RoleIdentity,
            keys: &[String],
        ) -> RemoteResult<()> {
            self.untag_calls.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(RemoteError::NotFound)?;
            raw.tags.retain(|t| !keys.contains(&t.key));
            Ok(())
        }

        async fn delete_role(&self, _cx: &OpContext, id: &RoleIdentity) -> RemoteResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store.remove(&key);
            Ok(())
        }
    }

    fn cx() -> OpContext {
        OpContext::new("123456789012", "us-east-1")
    }

    fn trust_doc() -> Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {"Service": "lambda.amazonaws.com"},
                "Action": "sts:AssumeRole"
            }]
        })
    }

    #[tokio::test]
    async fn creating_a_fresh_role_populates_the_arn() {
        let roles = Roles::new(MockRoleApi::default());
        let desired = Role::new("deploy", trust_doc()).with_tag("env", "prod");

        let created = roles.findsert(&cx(), &desired).await.unwrap();

        assert_eq!(roles.api.creates.load(Ordering::SeqCst), 1);
        assert!(created.arn.as_deref().unwrap().ends_with("/deploy"));
        assert!(created.created_at.is_some());
    }

    #[tokio::test]
    async fn fresh_create_is_read_create_settle_read() {
        let roles = Roles::new(MockRoleApi::default());
        roles
            .findsert(&cx(), &Role::new("deploy", trust_doc()))
            .await
            .unwrap();

        assert_eq!(roles.api.creates.load(Ordering::SeqCst), 1);
        // Before-read miss, one visibility check, one final read.
        assert_eq!(roles.api.gets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn findsert_twice_is_side_effect_free() {
        let roles = Roles::new(MockRoleApi::default());
        let desired = Role::new("deploy", trust_doc());

        let first = roles.findsert(&cx(), &desired).await.unwrap();
        let second = roles.findsert(&cx(), &desired).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(roles.api.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upsert_reconciles_only_the_trust_policy_when_only_it_drifts() {
        let roles = Roles::new(MockRoleApi::default());
        let mut desired = Role::new("deploy", trust_doc()).with_tag("env", "prod");
        roles.upsert(&cx(), &desired).await.unwrap();

        desired.trust_policy = json!({"Version": "2012-10-17", "Statement": []});
        let updated = roles.upsert(&cx(), &desired).await.unwrap();

        assert_eq!(roles.api.trust_updates.load(Ordering::SeqCst), 1);
        // Tags were unchanged: only the create-time tagging touched the API.
        assert_eq!(roles.api.tag_calls.load(Ordering::SeqCst), 0);
        assert_eq!(roles.api.untag_calls.load(Ordering::SeqCst), 0);
        assert_eq!(updated.trust_policy, desired.trust_policy);
    }

    #[tokio::test]
    async fn tag_drift_issues_set_and_remove_calls() {
        let roles = Roles::new(MockRoleApi::default());
        let desired = Role::new("deploy", trust_doc())
            .with_tag("a", "1")
            .with_tag("b", "2");
        roles.upsert(&cx(), &desired).await.unwrap();

        let drifted = Role::new("deploy", trust_doc())
            .with_tag("b", "2")
            .with_tag("c", "3");
        let updated = roles.upsert(&cx(), &drifted).await.unwrap();

        assert_eq!(roles.api.tag_calls.load(Ordering::SeqCst), 1);
        assert_eq!(roles.api.untag_calls.load(Ordering::SeqCst), 1);
        assert_eq!(updated.tags, drifted.tags);
    }

    #[tokio::test]
    async fn empty_reference_fails_before_any_remote_call() {
        let roles = Roles::new(MockRoleApi::default());
        let err = roles.get(&cx(), &RoleRef::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::AmbiguousReference { kind: "role" }));
    }

    #[tokio::test]
    async fn delete_tolerates_already_absent() {
        let roles = Roles::new(MockRoleApi::default());
        let reference = RoleRef {
            name: Some("gone".into()),
            ..Default::default()
        };
        let outcome = roles.delete(&cx(), &reference).await.unwrap();
        assert_eq!(outcome, Deletion::AlreadyAbsent);
        assert_eq!(roles.api.deletes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn translator_requires_identity_fields() {
        let raw = RawRole {
            role_name: Some("deploy".into()),
            path: None,
            arn: None,
            role_id: Some("AROA1".into()),
            assume_role_policy_document: Some(trust_doc()),
            description: None,
            create_date: Some(Utc::now()),
            tags: Vec::new(),
        };
        let err = from_remote(raw).unwrap_err();
        assert!(matches!(
            err,
            CoreError::MissingField {
                kind: "role",
                field: "arn"
            }
        ));
    }

    #[test]
    fn round_trip_preserves_mutable_fields() {
        tokio_test::block_on(async {
            let roles = Roles::new(MockRoleApi::default());
            let desired = Role::new("deploy", trust_doc())
                .with_path("/service/")
                .with_description("deployment role")
                .with_tag("env", "prod");

            let record = roles.findsert(&cx(), &desired).await.unwrap();

            assert_eq!(record.name, desired.name);
            assert_eq!(record.path, desired.path);
            assert_eq!(record.trust_policy, desired.trust_policy);
            assert_eq!(record.description, desired.description);
            assert_eq!(record.tags, desired.tags);
        });
    }
}
