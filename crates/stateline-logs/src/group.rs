//! Log groups
//!
//! Mutable sub-field categories: retention and tags. Clearing retention
//! ("never expire") is a dedicated remote call, distinct from setting it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference,
    RemoteResult, Result, SetMode, TagDiff, TagMap, absent_ok, diff_tags, gone_ok, require,
    resolve, wrap,
};
use std::fmt;

pub const LOG_GROUP: KindDescriptor = KindDescriptor {
    kind: "log_group",
    primary_key: &["arn"],
    unique_key: &["name"],
    readonly: &["arn", "created_at"],
    metadata: &[],
};

/// Canonical log group record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogGroup {
    pub name: String,
    /// Days to keep events; `None` means never expire.
    pub retention_days: Option<u32>,
    pub tags: TagMap,

    // Remote-assigned
    pub arn: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LogGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retention_days: None,
            tags: TagMap::new(),
            arn: None,
            created_at: None,
        }
    }

    pub fn with_retention(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Hydrated for LogGroup {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogGroupIdentity {
    Arn(String),
    Name(String),
}

impl fmt::Display for LogGroupIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogGroupIdentity::Arn(arn) => write!(f, "{arn}"),
            LogGroupIdentity::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogGroupRef {
    pub arn: Option<String>,
    pub name: Option<String>,
}

impl Reference for LogGroupRef {
    type Identity = LogGroupIdentity;

    fn as_primary(&self) -> Option<LogGroupIdentity> {
        self.arn.clone().map(LogGroupIdentity::Arn)
    }

    fn as_unique(&self) -> Option<LogGroupIdentity> {
        self.name.clone().map(LogGroupIdentity::Name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawLogGroup {
    pub log_group_name: Option<String>,
    pub arn: Option<String>,
    pub retention_in_days: Option<u32>,
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TagMap,
}

pub fn from_remote(raw: RawLogGroup) -> Result<LogGroup> {
    Ok(LogGroup {
        name: require("log_group", "log_group_name", raw.log_group_name)?,
        retention_days: raw.retention_in_days,
        tags: raw.tags,
        arn: Some(require("log_group", "arn", raw.arn)?),
        created_at: Some(require("log_group", "creation_time", raw.creation_time)?),
    })
}

/// Remote control-plane boundary for log groups.
#[async_trait]
pub trait LogGroupApi: Send + Sync {
    async fn get_log_group(
        &self,
        cx: &OpContext,
        id: &LogGroupIdentity,
    ) -> RemoteResult<RawLogGroup>;
    async fn create_log_group(
        &self,
        cx: &OpContext,
        name: &str,
        tags: &TagMap,
    ) -> RemoteResult<RawLogGroup>;
    async fn put_retention(
        &self,
        cx: &OpContext,
        id: &LogGroupIdentity,
        days: u32,
    ) -> RemoteResult<()>;
    /// Dedicated call for "never expire"; not the same as `put_retention`.
    async fn delete_retention(&self, cx: &OpContext, id: &LogGroupIdentity) -> RemoteResult<()>;
    async fn tag_log_group(
        &self,
        cx: &OpContext,
        id: &LogGroupIdentity,
        tags: &TagMap,
    ) -> RemoteResult<()>;
    async fn untag_log_group(
        &self,
        cx: &OpContext,
        id: &LogGroupIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn delete_log_group(&self, cx: &OpContext, id: &LogGroupIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum LogGroupPatch {
    Retention(Option<u32>),
    Tags(TagDiff),
}

/// Log group operation set exposed to the orchestrator.
pub struct LogGroups<A> {
    api: A,
}

impl<A: LogGroupApi> LogGroups<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<LogGroup>> {
        stateline_core::get_one(self, cx, &LogGroupIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, name: &str) -> Result<Option<LogGroup>> {
        stateline_core::get_one(self, cx, &LogGroupIdentity::Name(name.to_string())).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &LogGroupRef) -> Result<Option<LogGroup>> {
        let (_, id) = resolve(&LOG_GROUP, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &LogGroup) -> Result<LogGroup> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &LogGroup) -> Result<LogGroup> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &LogGroupRef) -> Result<Deletion> {
        let (_, id) = resolve(&LOG_GROUP, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }
}

#[async_trait]
impl<A: LogGroupApi> KindOps for LogGroups<A> {
    type Record = LogGroup;
    type Identity = LogGroupIdentity;
    type Patch = LogGroupPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &LOG_GROUP
    }

    fn unique_identity(&self, desired: &LogGroup) -> Result<LogGroupIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "log_group",
                field: "name",
            });
        }
        Ok(LogGroupIdentity::Name(desired.name.clone()))
    }

    fn primary_identity(&self, record: &LogGroup) -> Option<LogGroupIdentity> {
        record.arn.clone().map(LogGroupIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &LogGroupIdentity) -> Result<Option<LogGroup>> {
        absent_ok(
            "read",
            "log_group",
            id.to_string(),
            self.api.get_log_group(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &LogGroup) -> Result<Creation<LogGroupIdentity>> {
        match self
            .api
            .create_log_group(cx, &desired.name, &desired.tags)
            .await
        {
            Ok(raw) => {
                // Retention is not part of the create payload upstream; a
                // desired retention lands as a follow-up call.
                if let Some(days) = desired.retention_days {
                    let id = LogGroupIdentity::Name(desired.name.clone());
                    wrap(
                        "put_retention",
                        "log_group",
                        id.to_string(),
                        self.api.put_retention(cx, &id, days).await,
                    )?;
                }
                Ok(Creation::Created(raw.arn.map(LogGroupIdentity::Arn)))
            }
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "log_group", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(&self, before: &LogGroup, desired: &LogGroup) -> Vec<LogGroupPatch> {
        let mut patches = Vec::new();
        if before.retention_days != desired.retention_days {
            patches.push(LogGroupPatch::Retention(desired.retention_days));
        }
        let tags = diff_tags(&before.tags, &desired.tags);
        if !tags.is_empty() {
            patches.push(LogGroupPatch::Tags(tags));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &LogGroupIdentity,
        patch: &LogGroupPatch,
    ) -> Result<()> {
        match patch {
            LogGroupPatch::Retention(Some(days)) => wrap(
                "put_retention",
                "log_group",
                id.to_string(),
                self.api.put_retention(cx, id, *days).await,
            ),
            LogGroupPatch::Retention(None) => wrap(
                "delete_retention",
                "log_group",
                id.to_string(),
                self.api.delete_retention(cx, id).await,
            ),
            LogGroupPatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "log_group",
                        id.to_string(),
                        self.api.tag_log_group(cx, id, &diff.set).await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "log_group",
                        id.to_string(),
                        self.api.untag_log_group(cx, id, &keys).await,
                    )?;
                }
                Ok(())
            }
        }
    }

    async fn remove(&self, cx: &OpContext, id: &LogGroupIdentity, _current: &LogGroup) -> Result<()> {
        gone_ok(
            "delete",
            "log_group",
            id.to_string(),
            self.api.delete_log_group(cx, id).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateline_core::RemoteError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockLogGroupApi {
        store: Mutex<HashMap<String, RawLogGroup>>,
        creates: AtomicUsize,
        retention_puts: AtomicUsize,
        retention_deletes: AtomicUsize,
    }

    impl MockLogGroupApi {
        fn key_of(id: &LogGroupIdentity, store: &HashMap<String, RawLogGroup>) -> Option<String> {
            match id {
                LogGroupIdentity::Name(name) => Some(name.clone()),
                LogGroupIdentity::Arn(arn) => store
                    .values()
                    .find(|g| g.arn.as_deref() == Some(arn))
                    .and_then(|g| g.log_group_name.clone()),
            }
        }
    }

    #[async_trait]
    impl LogGroupApi for MockLogGroupApi {
        async fn get_log_group(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
        ) -> RemoteResult<RawLogGroup> {
            let store = self.store.lock().unwrap();
            Self::key_of(id, &store)
                .and_then(|k| store.get(&k).cloned())
                .ok_or(RemoteError::NotFound)
        }

        async fn create_log_group(
            &self,
            _cx: &OpContext,
            name: &str,
            tags: &TagMap,
        ) -> RemoteResult<RawLogGroup> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            if store.contains_key(name) {
                return Err(RemoteError::AlreadyExists);
            }
            let raw = RawLogGroup {
                log_group_name: Some(name.to_string()),
                arn: Some(format!("arn:aws:logs:us-east-1:123456789012:log-group:{name}")),
                retention_in_days: None,
                creation_time: Some(Utc::now()),
                tags: tags.clone(),
            };
            store.insert(name.to_string(), raw.clone());
            Ok(raw)
        }

        async fn put_retention(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
            days: u32,
        ) -> RemoteResult<()> {
            self.retention_puts.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store
                .get_mut(&key)
                .ok_or(RemoteError::NotFound)?
                .retention_in_days = Some(days);
            Ok(())
        }

        async fn delete_retention(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
        ) -> RemoteResult<()> {
            self.retention_deletes.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store
                .get_mut(&key)
                .ok_or(RemoteError::NotFound)?
                .retention_in_days = None;
            Ok(())
        }

        async fn tag_log_group(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
            tags: &TagMap,
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(RemoteError::NotFound)?;
            for (k, v) in tags {
                raw.tags.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        async fn untag_log_group(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
            keys: &[String],
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(RemoteError::NotFound)?;
            for k in keys {
                raw.tags.remove(k);
            }
            Ok(())
        }

        async fn delete_log_group(
            &self,
            _cx: &OpContext,
            id: &LogGroupIdentity,
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(RemoteError::NotFound)?;
            store.remove(&key);
            Ok(())
        }
    }

    fn cx() -> OpContext {
        OpContext::new("123456789012", "us-east-1")
    }

    #[tokio::test]
    async fn desired_retention_lands_at_create_time() {
        let groups = LogGroups::new(MockLogGroupApi::default());
        let desired = LogGroup::new("/app/ingest").with_retention(30);

        let created = groups.findsert(&cx(), &desired).await.unwrap();

        assert_eq!(created.retention_days, Some(30));
        assert_eq!(groups.api.retention_puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clearing_retention_uses_the_dedicated_call() {
        let groups = LogGroups::new(MockLogGroupApi::default());
        groups
            .upsert(&cx(), &LogGroup::new("/app/ingest").with_retention(30))
            .await
            .unwrap();

        let updated = groups.upsert(&cx(), &LogGroup::new("/app/ingest")).await.unwrap();

        assert_eq!(updated.retention_days, None);
        assert_eq!(groups.api.retention_deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unchanged_upsert_is_quiet() {
        let groups = LogGroups::new(MockLogGroupApi::default());
        let desired = LogGroup::new("/app/ingest")
            .with_retention(14)
            .with_tag("team", "platform");

        groups.upsert(&cx(), &desired).await.unwrap();
        let puts_after_create = groups.api.retention_puts.load(Ordering::SeqCst);
        groups.upsert(&cx(), &desired).await.unwrap();

        assert_eq!(groups.api.creates.load(Ordering::SeqCst), 1);
        assert_eq!(groups.api.retention_puts.load(Ordering::SeqCst), puts_after_create);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let groups = LogGroups::new(MockLogGroupApi::default());
        groups.findsert(&cx(), &LogGroup::new("/app/ingest")).await.unwrap();

        let reference = LogGroupRef {
            name: Some("/app/ingest".into()),
            ..Default::default()
        };
        assert_eq!(
            groups.delete(&cx(), &reference).await.unwrap(),
            Deletion::Removed
        );
        assert_eq!(
            groups.delete(&cx(), &reference).await.unwrap(),
            Deletion::AlreadyAbsent
        );
    }
}
