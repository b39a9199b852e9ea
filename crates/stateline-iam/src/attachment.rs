//! Role-policy attachments
//!
//! A pure attachment kind: no remote-assigned primary key, no mutable
//! sub-fields. The unique key is the (role name, policy arn) pair, and
//! upsert degenerates to findsert.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stateline_core::{
    Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference, RemoteResult,
    Result, SetMode, absent_ok, gone_ok, resolve, wrap,
};
use std::fmt;

pub const ATTACHMENT: KindDescriptor = KindDescriptor {
    kind: "role_attachment",
    primary_key: &[],
    unique_key: &["role_name", "policy_arn"],
    readonly: &[],
    metadata: &[],
};

/// Canonical attachment record. Every field is caller-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub role_name: String,
    pub policy_arn: String,
}

impl Attachment {
    pub fn new(role_name: impl Into<String>, policy_arn: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            policy_arn: policy_arn.into(),
        }
    }
}

impl Hydrated for Attachment {
    fn field_present(&self, field: &str) -> bool {
        matches!(field, "role_name" | "policy_arn")
    }
}

/// Unique identity; attachments have no primary shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentIdentity {
    pub role_name: String,
    pub policy_arn: String,
}

impl fmt::Display for AttachmentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role_name, self.policy_arn)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AttachmentRef {
    pub role_name: Option<String>,
    pub policy_arn: Option<String>,
}

impl Reference for AttachmentRef {
    type Identity = AttachmentIdentity;

    fn as_primary(&self) -> Option<AttachmentIdentity> {
        None
    }

    fn as_unique(&self) -> Option<AttachmentIdentity> {
        match (&self.role_name, &self.policy_arn) {
            (Some(role_name), Some(policy_arn)) => Some(AttachmentIdentity {
                role_name: role_name.clone(),
                policy_arn: policy_arn.clone(),
            }),
            _ => None,
        }
    }
}

/// Remote control-plane boundary for attachments. Reads signal presence;
/// there is nothing else to translate.
#[async_trait]
pub trait AttachmentApi: Send + Sync {
    async fn get_attachment(&self, cx: &OpContext, id: &AttachmentIdentity) -> RemoteResult<()>;
    async fn attach(&self, cx: &OpContext, id: &AttachmentIdentity) -> RemoteResult<()>;
    async fn detach(&self, cx: &OpContext, id: &AttachmentIdentity) -> RemoteResult<()>;
}

/// Attachments carry no mutable sub-fields, so no patch is ever produced.
#[derive(Debug)]
pub enum AttachmentPatch {}

/// Attachment operation set exposed to the orchestrator.
pub struct Attachments<A> {
    api: A,
}

impl<A: AttachmentApi> Attachments<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_unique(
        &self,
        cx: &OpContext,
        role_name: &str,
        policy_arn: &str,
    ) -> Result<Option<Attachment>> {
        let id = AttachmentIdentity {
            role_name: role_name.to_string(),
            policy_arn: policy_arn.to_string(),
        };
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &AttachmentRef) -> Result<Option<Attachment>> {
        let (_, id) = resolve(&ATTACHMENT, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Attachment) -> Result<Attachment> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    /// Degenerate: with no mutable categories this is findsert under another name.
    pub async fn upsert(&self, cx: &OpContext, desired: &Attachment) -> Result<Attachment> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &AttachmentRef) -> Result<Deletion> {
        let (_, id) = resolve(&ATTACHMENT, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }
}

#[async_trait]
impl<A: AttachmentApi> KindOps for Attachments<A> {
    type Record = Attachment;
    type Identity = AttachmentIdentity;
    type Patch = AttachmentPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ATTACHMENT
    }

    fn unique_identity(&self, desired: &Attachment) -> Result<AttachmentIdentity> {
        Ok(AttachmentIdentity {
            role_name: desired.role_name.clone(),
            policy_arn: desired.policy_arn.clone(),
        })
    }

    async fn fetch(&self, cx: &OpContext, id: &AttachmentIdentity) -> Result<Option<Attachment>> {
        let present = absent_ok(
            "read",
            "role_attachment",
            id.to_string(),
            self.api.get_attachment(cx, id).await,
        )?;
        Ok(present.map(|()| Attachment {
            role_name: id.role_name.clone(),
            policy_arn: id.policy_arn.clone(),
        }))
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &Attachment,
    ) -> Result<Creation<AttachmentIdentity>> {
        let id = self.unique_identity(desired)?;
        match self.api.attach(cx, &id).await {
            Ok(()) => Ok(Creation::Created(None)),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("attach", "role_attachment", id.to_string(), Err(e)),
        }
    }

    fn plan_patches(&self, _before: &Attachment, _desired: &Attachment) -> Vec<AttachmentPatch> {
        Vec::new()
    }

    async fn apply_patch(
        &self,
        _cx: &OpContext,
        _id: &AttachmentIdentity,
        patch: &AttachmentPatch,
    ) -> Result<()> {
        match *patch {}
    }

    async fn remove(
        &self,
        cx: &OpContext,
        id: &AttachmentIdentity,
        _current: &Attachment,
    ) -> Result<()> {
        gone_ok(
            "detach",
            "role_attachment",
            id.to_string(),
            self.api.detach(cx, id).await,
        )
    }
}
