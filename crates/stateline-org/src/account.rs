//! Member accounts
//!
//! Account creation is an asynchronous provisioning job: the create call
//! returns a request handle, and the job is polled to a terminal state
//! before the new account is read back. Closing an account is asynchronous
//! on the remote side too; an account already `Suspended` counts as removed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stateline_core::{
    CoreError, Creation, Deletion, Hydrated, KindDescriptor, KindOps, OpContext, PollConfig,
    PollStatus, Reference, RemoteResult, Result, SetMode, TagDiff, TagMap, absent_ok, diff_tags,
    gone_ok, poll_until_terminal, require, resolve, wrap,
};
use std::fmt;

pub const ACCOUNT: KindDescriptor = KindDescriptor {
    kind: "account",
    primary_key: &["account_id"],
    unique_key: &["email"],
    readonly: &["account_id", "arn", "status", "joined_at"],
    metadata: &[],
};

/// Remote lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    PendingClosure,
}

/// Canonical account record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    /// Caller-assigned unique key.
    pub email: String,
    pub tags: TagMap,

    // Remote-assigned
    pub account_id: Option<String>,
    pub arn: Option<String>,
    pub status: Option<AccountStatus>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            tags: TagMap::new(),
            account_id: None,
            arn: None,
            status: None,
            joined_at: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Hydrated for Account {
    fn field_present(&self, field: &str) -> bool {
        match field {
            "account_id" => self.account_id.is_some(),
            "arn" => self.arn.is_some(),
            "status" => self.status.is_some(),
            "joined_at" => self.joined_at.is_some(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountIdentity {
    Id(String),
    Email(String),
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountIdentity::Id(id) => write!(f, "{id}"),
            AccountIdentity::Email(email) => write!(f, "{email}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountRef {
    pub account_id: Option<String>,
    pub email: Option<String>,
}

impl Reference for AccountRef {
    type Identity = AccountIdentity;

    fn as_primary(&self) -> Option<AccountIdentity> {
        self.account_id.clone().map(AccountIdentity::Id)
    }

    fn as_unique(&self) -> Option<AccountIdentity> {
        self.email.clone().map(AccountIdentity::Email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawAccount {
    pub id: Option<String>,
    pub arn: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub status: Option<AccountStatus>,
    pub joined_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TagMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccountSpec {
    pub account_name: String,
    pub email: String,
    pub tags: TagMap,
}

/// State of an in-flight provisioning job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawCreateStatus {
    pub state: CreateState,
    pub account_id: Option<String>,
    pub failure_reason: Option<String>,
}

pub fn from_remote(raw: RawAccount) -> Result<Account> {
    Ok(Account {
        name: require("account", "name", raw.name)?,
        email: require("account", "email", raw.email)?,
        tags: raw.tags,
        account_id: Some(require("account", "id", raw.id)?),
        arn: Some(require("account", "arn", raw.arn)?),
        status: Some(require("account", "status", raw.status)?),
        joined_at: Some(require("account", "joined_timestamp", raw.joined_timestamp)?),
    })
}

pub fn to_remote(record: &Account) -> AccountSpec {
    AccountSpec {
        account_name: record.name.clone(),
        email: record.email.clone(),
        tags: record.tags.clone(),
    }
}

/// Remote control-plane boundary for accounts. `create_account` returns the
/// provisioning request handle; `check_create_status` observes it.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn get_account(&self, cx: &OpContext, id: &AccountIdentity) -> RemoteResult<RawAccount>;
    async fn create_account(&self, cx: &OpContext, spec: &AccountSpec) -> RemoteResult<String>;
    async fn check_create_status(
        &self,
        cx: &OpContext,
        request_id: &str,
    ) -> RemoteResult<RawCreateStatus>;
    async fn tag_account(
        &self,
        cx: &OpContext,
        id: &AccountIdentity,
        tags: &TagMap,
    ) -> RemoteResult<()>;
    async fn untag_account(
        &self,
        cx: &OpContext,
        id: &AccountIdentity,
        keys: &[String],
    ) -> RemoteResult<()>;
    async fn close_account(&self, cx: &OpContext, id: &AccountIdentity) -> RemoteResult<()>;
}

#[derive(Debug)]
pub enum AccountPatch {
    Tags(TagDiff),
}

/// Account operation set exposed to the orchestrator.
pub struct Accounts<A> {
    api: A,
    poll: PollConfig,
}

impl<A: AccountApi> Accounts<A> {
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

    pub async fn get_by_id(&self, cx: &OpContext, account_id: &str) -> Result<Option<Account>> {
        stateline_core::get_one(self, cx, &AccountIdentity::Id(account_id.to_string())).await
    }

    pub async fn get_by_email(&self, cx: &OpContext, email: &str) -> Result<Option<Account>> {
        stateline_core::get_one(self, cx, &AccountIdentity::Email(email.to_string())).await
    }

    pub async fn get(&self, cx: &OpContext, reference: &AccountRef) -> Result<Option<Account>> {
        let (_, id) = resolve(&ACCOUNT, reference)?;
        stateline_core::get_one(self, cx, &id).await
    }

    pub async fn findsert(&self, cx: &OpContext, desired: &Account) -> Result<Account> {
        stateline_core::set(self, cx, SetMode::Findsert, desired).await
    }

    pub async fn upsert(&self, cx: &OpContext, desired: &Account) -> Result<Account> {
        stateline_core::set(self, cx, SetMode::Upsert, desired).await
    }

    /// Close the account. Already-suspended accounts are left untouched.
    pub async fn delete(&self, cx: &OpContext, reference: &AccountRef) -> Result<Deletion> {
        let (_, id) = resolve(&ACCOUNT, reference)?;
        stateline_core::destroy(self, cx, &id).await
    }

    fn classify(status: RawCreateStatus) -> Result<PollStatus<String>> {
        Ok(match status.state {
            CreateState::Pending => PollStatus::Pending,
            CreateState::InProgress => PollStatus::InProgress,
            CreateState::Succeeded => {
                let account_id = require("account", "account_id", status.account_id)?;
                PollStatus::Succeeded(account_id)
            }
            CreateState::Failed => PollStatus::Failed(
                status
                    .failure_reason
                    .unwrap_or_else(|| "unspecified provisioning failure".to_string()),
            ),
        })
    }
}

#[async_trait]
impl<A: AccountApi> KindOps for Accounts<A> {
    type Record = Account;
    type Identity = AccountIdentity;
    type Patch = AccountPatch;

    fn descriptor(&self) -> &'static KindDescriptor {
        &ACCOUNT
    }

    fn unique_identity(&self, desired: &Account) -> Result<AccountIdentity> {
        if desired.email.is_empty() {
            return Err(CoreError::MissingField {
                kind: "account",
                field: "email",
            });
        }
        Ok(AccountIdentity::Email(desired.email.clone()))
    }

    fn primary_identity(&self, record: &Account) -> Option<AccountIdentity> {
        record.account_id.clone().map(AccountIdentity::Id)
    }

    async fn fetch(&self, cx: &OpContext, id: &AccountIdentity) -> Result<Option<Account>> {
        absent_ok(
            "read",
            "account",
            id.to_string(),
            self.api.get_account(cx, id).await,
        )?
        .map(from_remote)
        .transpose()
    }

    async fn create(&self, cx: &OpContext, desired: &Account) -> Result<Creation<AccountIdentity>> {
        let spec = to_remote(desired);
        let request_id = match self.api.create_account(cx, &spec).await {
            Ok(id) => id,
            Err(e) if e.is_conflict() => return Ok(Creation::AlreadyExists),
            Err(e) => return wrap("create", "account", desired.email.clone(), Err(e)),
        };
        tracing::debug!(email = %desired.email, request_id = %request_id, "account provisioning submitted");

        let api = &self.api;
        let account_id = poll_until_terminal(&self.poll, move || {
            let request_id = request_id.clone();
            async move {
                let status = wrap(
                    "check_create_status",
                    "account",
                    request_id.clone(),
                    api.check_create_status(cx, &request_id).await,
                )?;
                Self::classify(status)
            }
        })
        .await?;

        Ok(Creation::Created(Some(AccountIdentity::Id(account_id))))
    }

    fn plan_patches(&self, before: &Account, desired: &Account) -> Vec<AccountPatch> {
        let tags = diff_tags(&before.tags, &desired.tags);
        if tags.is_empty() {
            Vec::new()
        } else {
            vec![AccountPatch::Tags(tags)]
        }
    }

    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &AccountIdentity,
        patch: &AccountPatch,
    ) -> Result<()> {
        match patch {
            AccountPatch::Tags(diff) => {
                if !diff.set.is_empty() {
                    wrap(
                        "tag",
                        "account",
                        id.to_string(),
                        self.api.tag_account(cx, id, &diff.set).await,
                    )?;
                }
                if !diff.remove.is_empty() {
                    let keys: Vec<String> = diff.remove.iter().cloned().collect();
                    wrap(
                        "untag",
                        "account",
                        id.to_string(),
                        self.api.untag_account(cx, id, &keys).await,
                    )?;
                }
                Ok(())
            }
        }
    }

    fn is_retired(&self, record: &Account) -> bool {
        matches!(
            record.status,
            Some(AccountStatus::Suspended) | Some(AccountStatus::PendingClosure)
        )
    }

    async fn remove(&self, cx: &OpContext, id: &AccountIdentity, _current: &Account) -> Result<()> {
        gone_ok(
            "close",
            "account",
            id.to_string(),
            self.api.close_account(cx, id).await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateline_core::TerminalStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct MockAccountApi {
        store: Mutex<HashMap<String, RawAccount>>,
        /// Scripted provisioning states, consumed one per status check.
        script: Vec<CreateState>,
        checks: AtomicUsize,
        creates: AtomicUsize,
        closes: AtomicUsize,
        failure_reason: Option<String>,
    }

    impl MockAccountApi {
        fn new(script: Vec<CreateState>) -> Self {
            Self {
                store: Mutex::new(HashMap::new()),
                script,
                checks: AtomicUsize::new(0),
                creates: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                failure_reason: None,
            }
        }

        fn key_of(id: &AccountIdentity, store: &HashMap<String, RawAccount>) -> Option<String> {
            match id {
                AccountIdentity::Email(email) => Some(email.clone()),
                AccountIdentity::Id(account_id) => store
                    .values()
                    .find(|a| a.id.as_deref() == Some(account_id))
                    .and_then(|a| a.email.clone()),
            }
        }
    }

    #[async_trait]
    impl AccountApi for MockAccountApi {
        async fn get_account(
            &self,
            _cx: &OpContext,
            id: &AccountIdentity,
        ) -> RemoteResult<RawAccount> {
            let store = self.store.lock().unwrap();
            Self::key_of(id, &store)
                .and_then(|k| store.get(&k).cloned())
                .ok_or(stateline_core::RemoteError::NotFound)
        }

        async fn create_account(
            &self,
            _cx: &OpContext,
            spec: &AccountSpec,
        ) -> RemoteResult<String> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            // The account materializes only once the job succeeds; stash the
            // spec under the email so the final status check can commit it.
            let mut store = self.store.lock().unwrap();
            store.insert(
                spec.email.clone(),
                RawAccount {
                    id: None,
                    arn: None,
                    email: Some(spec.email.clone()),
                    name: Some(spec.account_name.clone()),
                    status: None,
                    joined_timestamp: None,
                    tags: spec.tags.clone(),
                },
            );
            Ok("car-0123456789".to_string())
        }

        async fn check_create_status(
            &self,
            _cx: &OpContext,
            _request_id: &str,
        ) -> RemoteResult<RawCreateStatus> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst);
            let state = self
                .script
                .get(n)
                .copied()
                .unwrap_or(CreateState::InProgress);
            if state == CreateState::Succeeded {
                // Commit the pending account with its remote-assigned fields.
                let mut store = self.store.lock().unwrap();
                for raw in store.values_mut() {
                    if raw.id.is_none() {
                        raw.id = Some("210987654321".to_string());
                        raw.arn = Some(
                            "arn:aws:organizations::123456789012:account/o-abcdef1234/210987654321"
                                .to_string(),
                        );
                        raw.status = Some(AccountStatus::Active);
                        raw.joined_timestamp = Some(Utc::now());
                    }
                }
                return Ok(RawCreateStatus {
                    state,
                    account_id: Some("210987654321".to_string()),
                    failure_reason: None,
                });
            }
            Ok(RawCreateStatus {
                state,
                account_id: None,
                failure_reason: self.failure_reason.clone(),
            })
        }

        async fn tag_account(
            &self,
            _cx: &OpContext,
            id: &AccountIdentity,
            tags: &TagMap,
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(stateline_core::RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(stateline_core::RemoteError::NotFound)?;
            for (k, v) in tags {
                raw.tags.insert(k.clone(), v.clone());
            }
            Ok(())
        }

        async fn untag_account(
            &self,
            _cx: &OpContext,
            id: &AccountIdentity,
            keys: &[String],
        ) -> RemoteResult<()> {
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(stateline_core::RemoteError::NotFound)?;
            let raw = store.get_mut(&key).ok_or(stateline_core::RemoteError::NotFound)?;
            for k in keys {
                raw.tags.remove(k);
            }
            Ok(())
        }

        async fn close_account(&self, _cx: &OpContext, id: &AccountIdentity) -> RemoteResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let key = Self::key_of(id, &store).ok_or(stateline_core::RemoteError::NotFound)?;
            store
                .get_mut(&key)
                .ok_or(stateline_core::RemoteError::NotFound)?
                .status = Some(AccountStatus::Suspended);
            Ok(())
        }
    }

    fn quick_poll() -> PollConfig {
        PollConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            max_attempts: 10,
        }
    }

    fn cx() -> OpContext {
        OpContext::new("123456789012", "us-east-1")
    }

    #[tokio::test]
    async fn provisioning_polls_the_job_to_completion() {
        let api = MockAccountApi::new(vec![
            CreateState::Pending,
            CreateState::InProgress,
            CreateState::Succeeded,
        ]);
        let accounts = Accounts::new(api).with_poll_config(quick_poll());

        let created = accounts
            .findsert(&cx(), &Account::new("workloads", "workloads@example.com"))
            .await
            .unwrap();

        assert_eq!(accounts.api.checks.load(Ordering::SeqCst), 3);
        assert_eq!(created.account_id.as_deref(), Some("210987654321"));
        assert_eq!(created.status, Some(AccountStatus::Active));
    }

    #[tokio::test]
    async fn provisioning_failure_surfaces_the_remote_reason() {
        let mut api = MockAccountApi::new(vec![CreateState::Pending, CreateState::Failed]);
        api.failure_reason = Some("EMAIL_ALREADY_EXISTS".to_string());
        let accounts = Accounts::new(api).with_poll_config(quick_poll());

        let err = accounts
            .findsert(&cx(), &Account::new("workloads", "workloads@example.com"))
            .await
            .unwrap_err();

        match err {
            CoreError::AsyncOperationFailed { status, reason } => {
                assert_eq!(status, TerminalStatus::Failed);
                assert_eq!(reason, "EMAIL_ALREADY_EXISTS");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn closing_a_suspended_account_is_skipped() {
        let api = MockAccountApi::new(vec![CreateState::Succeeded]);
        let accounts = Accounts::new(api).with_poll_config(quick_poll());
        accounts
            .findsert(&cx(), &Account::new("workloads", "workloads@example.com"))
            .await
            .unwrap();

        let reference = AccountRef {
            email: Some("workloads@example.com".into()),
            ..Default::default()
        };
        assert_eq!(
            accounts.delete(&cx(), &reference).await.unwrap(),
            Deletion::Removed
        );
        // The close left the account Suspended; a second delete skips the call.
        assert_eq!(
            accounts.delete(&cx(), &reference).await.unwrap(),
            Deletion::AlreadyRetired
        );
        assert_eq!(accounts.api.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tag_drift_is_the_only_reconcilable_category() {
        let api = MockAccountApi::new(vec![CreateState::Succeeded]);
        let accounts = Accounts::new(api).with_poll_config(quick_poll());
        let desired =
            Account::new("workloads", "workloads@example.com").with_tag("env", "prod");
        accounts.upsert(&cx(), &desired).await.unwrap();

        let drifted =
            Account::new("workloads", "workloads@example.com").with_tag("env", "staging");
        let updated = accounts.upsert(&cx(), &drifted).await.unwrap();

        assert_eq!(updated.tags, drifted.tags);
        assert_eq!(accounts.api.creates.load(Ordering::SeqCst), 1);
    }
}
