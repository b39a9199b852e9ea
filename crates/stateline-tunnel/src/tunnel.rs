//! Network tunnels
//!
//! A tunnel connects the target account's network to a remote endpoint.
//! Besides the remote resource, the kind maintains the local process
//! registry under the context's cache directory, so live connector
//! processes can be found again across invocations.

use crate::registry::{TunnelEntry, TunnelRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, Reference,
    RemoteResult, Result, SetMode, absent_ok, gone_ok, require, resolve, wrap,
};
use std::fmt;

pub const TUNNEL: KindDescriptor = KindDescriptor {
    kind: "tunnel",
    primary_key: &["tunnel_id"],
    unique_key: &["name"],
    readonly: &["tunnel_id", "created_at"],
    metadata: &[],
};

/// Canonical tunnel record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub name: String,
    /// Network routes carried through the tunnel; the one mutable category.
    pub routes: Vec<String>,

    // Remote-assigned
    pub tunnel_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Tunnel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            tunnel_id: None,
            created_at: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.routes.push(route.into());
        self
    }
}

impl Hydrated for Tunnel {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "tunnel_id" => self.tunnel_id.is_some(),
            "created_at" => self.created_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelIdentity {
    Id(String),
    Name(String),
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelIdentity::Id(id) => write!(f, "{id}"),
            TunnelIdentity::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TunnelRef {
    pub tunnel_id: Option<String>,
    pub name: Option<String>,
}

impl Reference for TunnelRef {
    type Identity = TunnelIdentity;

    fn as_primary(&self) -> Option<TunnelIdentity> {
        self.tunnel_id.clone().map(TunnelIdentity::Id)
    }

    fn as_unique(&self) -> Option<TunnelIdentity> {
        self.name.clone().map(TunnelIdentity::Name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawTunnel {
    pub name: Option<String>,
    pub tunnel_id: Option<String>,
    #[serde(default)]
    pub routes: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

pub fn from_remote(raw: RawTunnel) -> Result<Tunnel> {
    Ok(Tunnel {
        name: require("tunnel", "name", raw.name)?,
        routes: raw.routes,
        tunnel_id: Some(require("tunnel", "tunnel_id", raw.tunnel_id)?),
        created_at: Some(require("tunnel", "created_at", raw.created_at)?),
    })
}

/// Remote control-plane boundary for tunnels.
#[async_trait]
pub trait TunnelApi: Send + Sync {
    async fn get_tunnel(&self, cx: &OpContext, id: &TunnelIdentity) -> RemoteResult<RawTunnel>;
    async fn create_tunnel(
        &self,
        cx: &OpContext,
        name: &str,
        routes: &[String],
    ) -> RemoteResult<RawTunnel>;
    async fn update_routes(
        &self,
        cx: &OpContext,
        id: &TunnelIdentity,
        routes: &[String],
    ) -> RemoteResult<()>;
    async fn delete_tunnel(&self, cx: &OpContext, id: &TunnelIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum TunnelPatch {
    Routes(Vec<String>),
}

/// Tunnel operation set exposed to the orchestrator.
pub struct Tunnels<A> {
    api: A,
}

impl<A: TunnelApi> Tunnels<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub async fn get_by_id(&self, cx: &OpContext, tunnel_id: &str) -> Result<Option<Tunnel>> {
        stateline_core::get_one(self, cx, &TunnelIdentity::Id(tunnel_id.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, name: &str) -> Result<Option<Tunnel>> {
        stateline_core::get_one(self, cx, &TunnelIdentity::Name(name.to_string())).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &TunnelRef) -> Result<Option<Tunnel>> {
        let (_, id) = resolve(&TUNNEL, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Tunnel) -> Result<Tunnel> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Tunnel) -> Result<Tunnel> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    pub async fn delete(&self, cx: &OpContext, reference: &TunnelRef) -> Result<Deletion> {
        let (_, id) = resolve(&TUNNEL, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    fn registry(cx: &OpContext) -> Option<TunnelRegistry> {
        cx.cache_dir().map(TunnelRegistry::new)
    }
}

#[async_trait]
impl<A: TunnelApi> KindOps for Tunnels<A> {
    type Record = Tunnel;
    type Identity = TunnelIdentity;
    type Patch = TunnelPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &TUNNEL
    }

    fn unique_identity(&self, desired: &Tunnel) -> Result<TunnelIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "tunnel",
                field: "name",
            });
        }
        Ok(TunnelIdentity::Name(desired.name.clone()))
    }

    fn primary_identity(&self, record: &Tunnel) -> Option<TunnelIdentity> {
        record.tunnel_id.clone().map(TunnelIdentity::Id)
    }

    async fn fetch(&self, cx: &OpContext, id: &TunnelIdentity) -> Result<Option<Tunnel>> {
        absent_ok(
            "read",
            "tunnel",
            id.to_string(),
            self.api.get_tunnel(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &Tunnel) -> Result<Creation<TunnelIdentity>> {
        let raw = match self
            .api
            .create_tunnel(cx, &desired.name, &desired.routes)
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_conflict() => return Ok(Creation::AlreadyExists),
            Err(e) => return wrap("create", "tunnel", desired.name.clone(), Err(e)),
        };

        if let (Some(registry), Some(tunnel_id)) = (Self::registry(cx), raw.tunnel_id.clone()) {
            registry
                .register(&desired.name, TunnelEntry::new(tunnel_id))
                .await?;
        } else {
            tracing::debug!(tunnel = %desired.name, "no cache directory, skipping registry entry");
        }

        Ok(Creation::Created(raw.tunnel_id.map(TunnelIdentity::Id)))
    }

    fn plan_patches(&self, before: &Tunnel, desired: &Tunnel) -> Vec<TunnelPatch> {
        if before.routes != desired.routes {
            vec![TunnelPatch::Routes(desired.routes.clone())]
        } else {
            Vec::new()
        }
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &TunnelIdentity,
        patch: &TunnelPatch,
    ) -> Result<()> {
        match patch {
            TunnelPatch::Routes(routes) => wrap(
                "update_routes",
                "tunnel",
                id.to_string(),
                self.api.update_routes(cx, id, routes).await,
            ),
        }
    }

    async fn remove(&self, cx: &OpContext, id: &TunnelIdentity, current: &Tunnel) -> Result<()> {
        gone_ok(
            "delete",
            "tunnel",
            id.to_string(),
            self.api.delete_tunnel(cx, id).await,
        )?;

        if let Some(registry) = Self::registry(cx) {
            registry.unregister(&current.name).await?;
        }
        Ok(())
    }
}
