//! Log analytics reports
//!
//! A report is a named analytics query over a log group. Submitting the
//! query is asynchronous: the start call returns a query handle, and the
//! setter polls it to a terminal state before reading the finished report
//! back. "Deleting" a report cancels the query; a report already complete
//! or cancelled is treated as removed.

use crate::stats::{RowShare, shares};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, PollConfig,
    PollStatus, Reference, RemoteResult, Result, SetMode, absent_ok, gone_ok, poll_until_terminal,
    require, resolve, wrap,
};
use std::collections::BTreeMap;
use std::fmt;

pub const QUERY_REPORT: KindDescriptor = KindDescriptor {
    kind: "query_report",
    primary_key: &["query_id"],
    unique_key: &["name"],
    readonly: &["query_id", "status"],
    metadata: &[],
};

/// Remote lifecycle state of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ReportStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    TimedOut,
}

impl ReportStatus {
    /// Whether the query can still make progress.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Scheduled | ReportStatus::Running)
    }
}

/// One result row: field name to value.
pub type ReportRow = BTreeMap<String, String>;

/// Scan statistics the remote reports with the results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportStats {
    pub records_matched: u64,
    pub records_scanned: u64,
    pub bytes_scanned: u64,
}

/// Canonical report record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    /// Caller-assigned report name; the unique key.
    pub name: String,
    pub log_group: String,
    pub query: String,
    /// Query window, epoch seconds.
    pub start_time: i64,
    pub end_time: i64,

    // Remote-assigned
    pub query_id: Option<String>,
    pub status: Option<ReportStatus>,
    pub rows: Vec<ReportRow>,
    pub stats: Option<ReportStats>,
}

impl QueryReport {
    pub fn new(
        name: impl Into<String>,
        log_group: impl Into<String>,
        query: impl Into<String>,
        start_time: i64,
        end_time: i64,
    ) -> Self {
        Self {
            name: name.into(),
            log_group: log_group.into(),
            query: query.into(),
            start_time,
            end_time,
            query_id: None,
            status: None,
            rows: Vec::new(),
            stats: None,
        }
    }

    /// Percent-of-total shares for a labelled count column of the rows.
    pub fn shares(&self, label_field: &str, count_field: &str) -> Vec<RowShare> {
        let counted: Vec<(String, u64)> = self
            .rows
            .iter()
            .filter_map(|row| {
                let label = row.get(label_field)?.clone();
                let count = row.get(count_field)?.parse::<u64>().ok()?;
                Some((label, count))
            })
            .collect();
        shares(&counted)
    }
}

impl Hydrated for QueryReport {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "query_id" => self.query_id.is_some(),
            "status" => self.status.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportIdentity {
    QueryId(String),
    Name(String),
}

impl fmt::Display for ReportIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportIdentity::QueryId(id) => write!(f, "{id}"),
            ReportIdentity::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportRef {
    pub query_id: Option<String>,
    pub name: Option<String>,
}

impl Reference for ReportRef {
    type Identity = ReportIdentity;

    fn as_primary(&self) -> Option<ReportIdentity> {
        self.query_id.clone().map(ReportIdentity::QueryId)
    }

    fn as_unique(&self) -> Option<ReportIdentity> {
        self.name.clone().map(ReportIdentity::Name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawReport {
    pub name: Option<String>,
    pub query_id: Option<String>,
    pub log_group: Option<String>,
    pub query_string: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub results: Vec<ReportRow>,
    pub statistics: Option<ReportStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportSpec {
    pub name: String,
    pub log_group: String,
    pub query_string: String,
    pub start_time: i64,
    pub end_time: i64,
}

pub fn from_remote(raw: RawReport) -> Result<QueryReport> {
    Ok(QueryReport {
        name: require("query_report", "name", raw.name)?,
        log_group: require("query_report", "log_group", raw.log_group)?,
        query: require("query_report", "query_string", raw.query_string)?,
        start_time: raw.start_time.unwrap_or_default(),
        end_time: raw.end_time.unwrap_or_default(),
        query_id: Some(require("query_report", "query_id", raw.query_id)?),
        status: Some(require("query_report", "status", raw.status)?),
        rows: raw.results,
        stats: raw.statistics,
    })
}

pub fn to_remote(record: &QueryReport) -> ReportSpec {
    ReportSpec {
        name: record.name.clone(),
        log_group: record.log_group.clone(),
        query_string: record.query.clone(),
        start_time: record.start_time,
        end_time: record.end_time,
    }
}

/// Remote control-plane boundary for reports. `start_query` returns the
/// query handle; `check_query` observes it.
#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn get_report(&self, cx: &OpContext, id: &ReportIdentity) -> RemoteResult<RawReport>;
    async fn start_query(&self, cx: &OpContext, spec: &ReportSpec) -> RemoteResult<String>;
    async fn check_query(&self, cx: &OpContext, query_id: &str) -> RemoteResult<ReportStatus>;
    async fn cancel_query(&self, cx: &OpContext, query_id: &str) -> RemoteResult<()>;
}

/// Reports are immutable once started.
#[derive(Debug)]
pub enum ReportPatch {}

/// Report operation set exposed to the orchestrator.
pub struct Reports<A> {
    api: A,
    poll: PollConfig,
}

impl<A: ReportApi> Reports<A> {
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

    pub async fn get_by_query_id(
        &self,
        cx: &OpContext,
        query_id: &str,
    ) -> Result<Option<QueryReport>> {
        stateline_core::get_one(self, cx, &ReportIdentity::QueryId(query_id.to_string())).await
    }

    pub async fn get_by_name(&self, cx: &OpContext, name: &str) -> Result<Option<QueryReport>> {
        stateline_core::get_one(self, cx, &ReportIdentity::Name(name.to_string())).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &ReportRef) -> Result<Option<QueryReport>> {
        let (_, id) = resolve(&QUERY_REPORT, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    /// Run the query if no report with this name exists yet; an existing
    /// report is returned as-is, whatever its terminal state.
    pub async fn findsert(&self, cx: &OpContext, desired: &QueryReport) -> Result<QueryReport> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    /// Degenerate: a started query is immutable, so this is findsert under
    /// another name.
    pub async fn upsert(&self, cx: &OpContext, desired: &QueryReport) -> Result<QueryReport> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    /// Cancel the query. Complete or already-cancelled reports are left alone.
    pub async fn delete(&self, cx: &OpContext, reference: &ReportRef) -> Result<Deletion> {
        let (_, id) = resolve(&QUERY_REPORT, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    fn classify(query_id: &str, status: ReportStatus) -> PollStatus<()> {
        match status {
            ReportStatus::Scheduled => PollStatus::Pending,
            ReportStatus::Running => PollStatus::InProgress,
            ReportStatus::Complete => PollStatus::Succeeded(()),
            ReportStatus::Failed => {
                PollStatus::Failed(format!("query {query_id} failed remotely"))
            }
            ReportStatus::Cancelled => {
                PollStatus::Cancelled(format!("query {query_id} was cancelled"))
            }
            ReportStatus::TimedOut => {
                PollStatus::TimedOut(format!("query {query_id} exceeded the remote deadline"))
            }
        }
    }
}

#[async_trait]
impl<A: ReportApi> KindOps for Reports<A> {
    type Record = QueryReport;
    type Identity = ReportIdentity;
    type Patch = ReportPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &QUERY_REPORT
    }

    fn unique_identity(&self, desired: &QueryReport) -> Result<ReportIdentity> {
        if desired.name.is_empty() {
            return Err(CoreError::MissingField {
                kind: "query_report",
                field: "name",
            });
        }
        Ok(ReportIdentity::Name(desired.name.clone()))
    }

    fn primary_identity(&self, record: &QueryReport) -> Option<ReportIdentity> {
        record.query_id.clone().map(ReportIdentity::QueryId)
    }

    async fn fetch(&self, cx: &OpContext, id: &ReportIdentity) -> Result<Option<QueryReport>> {
        absent_ok(
            "read",
            "query_report",
            id.to_string(),
            self.api.get_report(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(
        &self,
        cx: &OpContext,
        desired: &QueryReport,
    ) -> Result<Creation<ReportIdentity>> {
        let spec = to_remote(desired);
        let query_id = match self.api.start_query(cx, &spec).await {
            Ok(query_id) => query_id,
            Err(e) if e.is_conflict() => return Ok(Creation::AlreadyExists),
            Err(e) => return wrap("start_query", "query_report", desired.name.clone(), Err(e)),
        };
        tracing::debug!(report = %desired.name, query_id = %query_id, "analytics query submitted");

        let api = &self.api;
        poll_until_terminal(&self.poll, move || {
            let query_id = query_id.clone();
            async move {
                let status = wrap(
                    "check_query",
                    "query_report",
                    query_id.clone(),
                    api.check_query(cx, &query_id).await,
                )?;
                Ok(Self::classify(&query_id, status))
            }
        })
        .await?;

        Ok(Creation::Created(None))
    }

    fn plan_patches(&self, _before: &QueryReport, _desired: &QueryReport) -> Vec<ReportPatch> {
        Vec::new()
    }

    async fn apply_patch(
        &self,
        _cx: &OpContext,
        _id: &ReportIdentity,
        patch: &ReportPatch,
    ) -> Result<()> {
        match *patch {}
    }

    fn is_retired(&self, record: &QueryReport) -> bool {
        record.status.is_some_and(|status| status.is_terminal())
    }

    async fn remove(&self, cx: &OpContext, id: &ReportIdentity, current: &QueryReport) -> Result<()> {
        let query_id = current
            .query_id
            .clone()
            .ok_or(CoreError::IncompleteRecord {
                kind: "query_report",
                field: "query_id".to_string(),
            })?;
        gone_ok(
            "cancel_query",
            "query_report",
            id.to_string(),
            self.api.cancel_query(cx, &query_id).await,
        )
    }
}
