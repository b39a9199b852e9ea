//! Function aliases
//!
//! An alias names a published version, optionally splitting traffic across
//! additional versions by weight. Mutable sub-field categories: routing
//! (target version + weights) and description.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference,
    RemoteResult, Result, SetMode, absent_ok, gone_ok, require, resolve, wrap,
};
use std::collections::BTreeMap;
use std::fmt;

pub const ALIAS: KindDescriptor = KindDescriptor {
    kind: "alias",
    primary_key: &["arn"],
    unique_key: &["function_name", "name"],
    readonly: &["arn"],
    metadata: &[],
};

/// Additional version weights, ordered for stable comparison.
pub type RoutingMap = BTreeMap<String, f64>;

/// Canonical alias record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub function_name: String,
    pub name: String,
    pub target_version: String,
    pub routing: RoutingMap,
    pub description: Option<String>,

    // Remote-assigned
    pub arn: Option<String>,
}

impl Alias {
    pub fn new(
        function_name: impl Into<String>,
        name: impl Into<String>,
        target_version: impl Into<String>,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            name: name.into(),
            target_version: target_version.into(),
            routing: RoutingMap::new(),
            description: None,
            arn: None,
        }
    }

    pub fn with_weight(mut self, version: impl Into<String>, weight: f64) -> Self {
        self.routing.insert(version.into(), weight);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Hydrated for Alias {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "arn" => self.arn.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasIdentity {
    Arn(String),
    Name {
        function_name: String,
        name: String,
    },
}

impl fmt::Display for AliasIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasIdentity::Arn(arn) => write!(f, "{arn}"),
            AliasIdentity::Name {
                function_name,
                name,
            } => write!(f, "{function_name}:{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AliasRef {
    pub arn: Option<String>,
    pub function_name: Option<String>,
    pub name: Option<String>,
}

impl Reference for AliasRef {
    type Identity = AliasIdentity;

    fn as_primary(&self) -> Option<AliasIdentity> {
        self.arn.clone().map(AliasIdentity::Arn)
    }

    fn as_unique(&self) -> Option<AliasIdentity> {
        match (&self.function_name, &self.name) {
            (Some(function_name), Some(name)) => Some(AliasIdentity::Name {
                function_name: function_name.clone(),
                name: name.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawAlias {
    pub function_name: Option<String>,
    pub name: Option<String>,
    pub alias_arn: Option<String>,
    pub function_version: Option<String>,
    #[serde(default)]
    pub routing_config: RoutingMap,
    pub description: Option<String>,
}

pub fn from_remote(raw: RawAlias) -> Result<Alias> {
    Ok(Alias {
        function_name: require("alias", "function_name", raw.function_name)?,
        name: require("alias", "name", raw.name)?,
        target_version: require("alias", "function_version", raw.function_version)?,
        routing: raw.routing_config,
        description: raw.description,
        arn: Some(require("alias", "alias_arn", raw.alias_arn)?),
    })
}

/// Remote control-plane boundary for aliases.
#[async_trait]
pub trait AliasApi: Send + Sync {
    async fn get_alias(&self, cx: &OpContext, id: &AliasIdentity) -> RemoteResult<RawAlias>;
    async fn create_alias(&self, cx: &OpContext, desired: &RawAlias) -> RemoteResult<RawAlias>;
    /// Target version and weights update together in one call.
    async fn update_routing(
        &self,
        cx: &OpContext,
        id: &AliasIdentity,
        target_version: &str,
        routing: &RoutingMap,
    ) -> RemoteResult<()>;
    async fn update_description(
        &self,
        cx: &OpContext,
        id: &AliasIdentity,
        description: Option<&str>,
    ) -> RemoteResult<()>;
    async fn delete_alias(&self, cx: &OpContext, id: &AliasIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum AliasPatch {
    Routing {
        target_version: String,
        routing: RoutingMap,
    },
    Description(Option<String>),
}

/// Alias operation set exposed to the orchestrator.
pub struct Aliases<A> {
    api: A,
}

impl<A: AliasApi> Aliases<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_arn(&self, cx: &OpContext, arn: &str) -> Result<Option<Alias>> {
        stateline_core::get_one(self, cx, &AliasIdentity::Arn(arn.to_string())).await
    }

    pub async fn get_by_name(
        &self,
        cx: &OpContext,
        function_name: &str,
        name: &str,
    ) -> Result<Option<Alias>> {
        let id = AliasIdentity::Name {
            function_name: function_name.to_string(),
            name: name.to_string(),
        };
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &AliasRef) -> Result<Option<Alias>> {
        let (_, id) = resolve(&ALIAS, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Alias) -> Result<Alias> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Alias) -> Result<Alias> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &AliasRef) -> Result<Deletion> {
        let (_, id) = resolve(&ALIAS, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    fn to_remote(record: &Alias) -> RawAlias {
        RawAlias {
            function_name: Some(record.function_name.clone()),
            name: Some(record.name.clone()),
            alias_arn: None,
            function_version: Some(record.target_version.clone()),
            routing_config: record.routing.clone(),
            description: record.description.clone(),
        }
    }
}

#[async_trait]
impl<A: AliasApi> KindOps for Aliases<A> {
    type Record = Alias;
    type Identity = AliasIdentity;
    type Patch = AliasPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ALIAS
    }

    fn unique_identity(&self, desired: &Alias) -> Result<AliasIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "alias",
                field: "name",
            });
        }
        Ok(AliasIdentity::Name {
            function_name: desired.function_name.clone(),
            name: desired.name.clone(),
        })
    }

    fn primary_identity(&self, record: &Alias) -> Option<AliasIdentity> {
        record.arn.clone().map(AliasIdentity::Arn)
    }

    async fn fetch(&self, cx: &OpContext, id: &AliasIdentity) -> Result<Option<Alias>> {
        absent_ok(
            "read",
            "alias",
            id.to_string(),
            self.api.get_alias(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &Alias) -> Result<Creation<AliasIdentity>> {
        let payload = Self::to_remote(desired);
        match self.api.create_alias(cx, &payload).await {
            Ok(raw) => Ok(Creation::Created(raw.alias_arn.map(AliasIdentity::Arn))),
            Err(e) if e.is_conflict() => Ok(Creation::AlreadyExists),
            Err(e) => wrap("create", "alias", desired.name.clone(), Err(e)),
        }
    }

    fn plan_patches(&self, before: &Alias, desired: &Alias) -> Vec<AliasPatch> {
        let mut patches = Vec::new();
        if before.target_version != desired.target_version || before.routing != desired.routing {
            patches.push(AliasPatch::Routing {
                target_version: desired.target_version.clone(),
                routing: desired.routing.clone(),
            });
        }
        if before.description != desired.description {
            patches.push(AliasPatch::Description(desired.description.clone()));
        }
        patches
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &AliasIdentity,
        patch: &AliasPatch,
    ) -> Result<()> {
        match patch {
            AliasPatch::Routing {
                target_version,
                routing,
            } => wrap(
                "update_routing",
                "alias",
                id.to_string(),
                self.api.update_routing(cx, id, target_version, routing).await,
            ),
            AliasPatch::Description(description) => wrap(
                "update_description",
                "alias",
                id.to_string(),
                self.api
                    .update_description(cx, id, description.as_deref())
                    .await,
            ),
        }
    }

    async fn remove(&self, cx: &OpContext, id: &AliasIdentity, _current: &Alias) -> Result<()> {
        gone_ok(
            "delete",
            "alias",
            id.to_string(),
            self.api.delete_alias(cx, id).await,
        )
    }
}
