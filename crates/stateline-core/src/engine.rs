//! Idempotent operation engine
//!
//! The shared read/set/delete algorithms every resource kind instantiates.
//! A kind binds itself to the engine by implementing [`KindOps`]; the engine
//! owns the ordering guarantee (before-read, then mutation, then after-read)
//! and the idempotence policy (findsert no-ops, diff-skipped upserts,
//! conflict absorption, tolerant deletes).

use crate::context::OpContext;
use crate::descriptor::KindDescriptor;
use crate::error::{CoreError, Result};
use crate::record::{Hydrated, verify_complete};
use async_trait::async_trait;
use std::fmt;

/// How the setter treats an already-existing resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Create if absent, else return the existing record unchanged.
    Findsert,
    /// Create if absent, else update divergent sub-field categories.
    Upsert,
}

/// Outcome of a remote create call.
#[derive(Debug, Clone)]
pub enum Creation<I> {
    /// The remote accepted the create; the assigned primary identity when
    /// the response carried one.
    Created(Option<I>),
    /// The remote rejected the create as a duplicate. Happens when a
    /// concurrent findsert won the race; absorbed by re-reading.
    AlreadyExists,
}

/// Outcome of an idempotent delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// The resource existed and the remote delete was issued.
    Removed,
    /// The resource was already absent; no delete call was made.
    AlreadyAbsent,
    /// The resource was already in a terminal removed lifecycle state
    /// (suspended account, cancelled query); no delete call was made.
    AlreadyRetired,
}

/// One resource kind's binding to the remote control plane.
///
/// Implementations translate between canonical records and the kind's wire
/// shapes, and map remote failures through the [`crate::remote`] helpers so
/// absence and conflicts reach the engine as data rather than errors.
#[async_trait]
pub trait KindOps: Send + Sync {
    type Record: Hydrated + Clone + Send + Sync;
    type Identity: Clone + fmt::Display + Send + Sync;
    type Patch: fmt::Debug + Send + Sync;

    fn descriptor(&self) -> &'static KindDescriptor;

    /// Unique-shaped identity taken from a desired record. The primary key
    /// is not known before creation, so this is what the setter reads with.
    fn unique_identity(&self, desired: &Self::Record) -> Result<Self::Identity>;

    /// Primary-shaped identity read off a live record, for kinds that have one.
    fn primary_identity(&self, record: &Self::Record) -> Option<Self::Identity> {
        let _ = record;
        None
    }

    /// Remote read. Maps the remote's not-found signal to `None`.
    async fn fetch(&self, cx: &OpContext, id: &Self::Identity) -> Result<Option<Self::Record>>;

    /// Remote create with the full desired payload.
    async fn create(&self, cx: &OpContext, desired: &Self::Record)
    -> Result<Creation<Self::Identity>>;

    /// Patches for the mutable sub-field categories where `desired` diverges
    /// from `before`. One patch per divergent category; unchanged categories
    /// must not appear.
    fn plan_patches(&self, before: &Self::Record, desired: &Self::Record) -> Vec<Self::Patch>;

    /// Issue the single remote update call for one divergent category.
    async fn apply_patch(
        &self,
        cx: &OpContext,
        id: &Self::Identity,
        patch: &Self::Patch,
    ) -> Result<()>;

    /// Block until a freshly-issued mutation has settled remotely, polling
    /// the kind's status check where the remote is asynchronous. Kinds with
    /// synchronous semantics keep the default.
    async fn await_settled(&self, cx: &OpContext, id: &Self::Identity) -> Result<()> {
        let _ = (cx, id);
        Ok(())
    }

    /// Whether the record is already in a terminal removed lifecycle state.
    fn is_retired(&self, record: &Self::Record) -> bool {
        let _ = record;
        false
    }

    /// Remote delete. Maps the remote's "already gone" to success.
    async fn remove(
        &self,
        cx: &OpContext,
        id: &Self::Identity,
        current: &Self::Record,
    ) -> Result<()>;
}

/// Read one resource, verifying readonly completeness on every hit.
pub async fn get_one<K: KindOps>(
    ops: &K,
    cx: &OpContext,
    id: &K::Identity,
) -> Result<Option<K::Record>> {
    match ops.fetch(cx, id).await? {
        Some(record) => {
            verify_complete(ops.descriptor(), &record)?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// Idempotent create-or-return / create-or-update.
pub async fn set<K: KindOps>(
    ops: &K,
    cx: &OpContext,
    mode: SetMode,
    desired: &K::Record,
) -> Result<K::Record> {
    let kind = ops.descriptor().kind;
    let unique = ops.unique_identity(desired)?;
    let before = get_one(ops, cx, &unique).await?;

    match (before, mode) {
        (Some(before), SetMode::Findsert) => {
            tracing::debug!(kind, id = %unique, "findsert: already present, returning as-is");
            Ok(before)
        }
        (Some(before), SetMode::Upsert) => {
            let patches = ops.plan_patches(&before, desired);
            if patches.is_empty() {
                tracing::debug!(kind, id = %unique, "upsert: no divergence, no remote calls");
                return Ok(before);
            }
            let id = ops
                .primary_identity(&before)
                .unwrap_or_else(|| unique.clone());
            for patch in &patches {
                tracing::debug!(kind, id = %id, ?patch, "upsert: applying patch");
                ops.apply_patch(cx, &id, patch).await?;
            }
            ops.await_settled(cx, &id).await?;
            reread(ops, cx, &id).await
        }
        (None, _) => {
            tracing::debug!(kind, id = %unique, "absent, creating");
            let read_id = match ops.create(cx, desired).await? {
                Creation::Created(primary) => primary.unwrap_or_else(|| unique.clone()),
                Creation::AlreadyExists => {
                    // Lost a creation race; the resource exists now either way.
                    tracing::debug!(kind, id = %unique, "create raced an existing resource");
                    unique.clone()
                }
            };
            ops.await_settled(cx, &read_id).await?;
            reread(ops, cx, &read_id).await
        }
    }
}

/// Idempotent delete: read first, skip when absent or already retired,
/// tolerate the check/delete race.
pub async fn destroy<K: KindOps>(ops: &K, cx: &OpContext, id: &K::Identity) -> Result<Deletion> {
    let kind = ops.descriptor().kind;
    match get_one(ops, cx, id).await? {
        None => {
            tracing::debug!(kind, id = %id, "delete: already absent");
            Ok(Deletion::AlreadyAbsent)
        }
        Some(current) if ops.is_retired(&current) => {
            tracing::debug!(kind, id = %id, "delete: already in a removed lifecycle state");
            Ok(Deletion::AlreadyRetired)
        }
        Some(current) => {
            ops.remove(cx, id, &current).await?;
            tracing::debug!(kind, id = %id, "deleted");
            Ok(Deletion::Removed)
        }
    }
}

async fn reread<K: KindOps>(ops: &K, cx: &OpContext, id: &K::Identity) -> Result<K::Record> {
    get_one(ops, cx, id)
        .await?
        .ok_or_else(|| CoreError::ReadAfterWriteVanished {
            kind: ops.descriptor().kind,
            identity: id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{TagDiff, diff_tags};
    use crate::record::TagMap;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WIDGET: KindDescriptor = KindDescriptor {
        kind: "widget",
        primary_key: &["serial"],
        unique_key: &["name"],
        readonly: &["serial"],
        metadata: &[],
    };

    #[derive(Clone, Debug, PartialEq)]
    struct Widget {
        name: String,
        serial: Option<String>,
        color: String,
        tags: TagMap,
        retired: bool,
    }

    impl Widget {
        fn desired(name: &str, color: &str) -> Self {
            Self {
                name: name.to_string(),
                serial: None,
                color: color.to_string(),
                tags: TagMap::new(),
                retired: false,
            }
        }
    }

    impl Hydrated for Widget {
        fn field_present(&self, field: &str) -> bool {
            match field {
                "serial" => self.serial.is_some(),
                _ => false,
            }
        }
    }

    #[derive(Clone, Debug)]
    enum WidgetId {
        Serial(String),
        Name(String),
    }

    impl fmt::Display for WidgetId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                WidgetId::Serial(s) => write!(f, "{s}"),
                WidgetId::Name(n) => write!(f, "{n}"),
            }
        }
    }

    #[derive(Debug)]
    enum WidgetPatch {
        Color(String),
        Tags(TagDiff),
    }

    #[derive(Default)]
    struct MockWidgets {
        store: Mutex<HashMap<String, Widget>>,
        fetches: AtomicUsize,
        creates: AtomicUsize,
        updates: AtomicUsize,
        deletes: AtomicUsize,
        settles: AtomicUsize,
        /// Simulate a concurrent findsert winning the create race.
        conflict_on_create: bool,
        /// Simulate a remote that drops creates on the floor.
        drop_creates: bool,
        /// Simulate a remote response with the serial missing.
        omit_serial: bool,
    }

    impl MockWidgets {
        fn lookup(&self, id: &WidgetId) -> Option<Widget> {
            let store = self.store.lock().unwrap();
            match id {
                WidgetId::Name(name) => store.get(name).cloned(),
                WidgetId::Serial(serial) => store
                    .values()
                    .find(|w| w.serial.as_deref() == Some(serial))
                    .cloned(),
            }
        }

        fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }

        fn updates(&self) -> usize {
            self.updates.load(Ordering::SeqCst)
        }

        fn deletes(&self) -> usize {
            self.deletes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KindOps for MockWidgets {
        type Record = Widget;
        type Identity = WidgetId;
        type Patch = WidgetPatch;

        fn descriptor(&self) -> &'static KindDescriptor {
            &WIDGET
        }

        fn unique_identity(&self, desired: &Widget) -> Result<WidgetId> {
            Ok(WidgetId::Name(desired.name.clone()))
        }

        fn primary_identity(&self, record: &Widget) -> Option<WidgetId> {
            record.serial.clone().map(WidgetId::Serial)
        }

        async fn fetch(&self, _cx: &OpContext, id: &WidgetId) -> Result<Option<Widget>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut found = self.lookup(id);
            if self.omit_serial {
                if let Some(w) = found.as_mut() {
                    w.serial = None;
                }
            }
            Ok(found)
        }

        async fn create(&self, _cx: &OpContext, desired: &Widget) -> Result<Creation<WidgetId>> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            let serial = format!("w-{n}");
            let mut stored = desired.clone();
            stored.serial = Some(serial.clone());
            if self.conflict_on_create {
                // The racing winner's copy is what exists remotely.
                self.store
                    .lock()
                    .unwrap()
                    .insert(stored.name.clone(), stored);
                return Ok(Creation::AlreadyExists);
            }
            if !self.drop_creates {
                self.store
                    .lock()
                    .unwrap()
                    .insert(stored.name.clone(), stored);
            }
            Ok(Creation::Created(Some(WidgetId::Serial(serial))))
        }

        fn plan_patches(&self, before: &Widget, desired: &Widget) -> Vec<WidgetPatch> {
            let mut patches = Vec::new();
            if before.color != desired.color {
                patches.push(WidgetPatch::Color(desired.color.clone()));
            }
            let tags = diff_tags(&before.tags, &desired.tags);
            if !tags.is_empty() {
                patches.push(WidgetPatch::Tags(tags));
            }
            patches
        }

        async fn apply_patch(
            &self,
            _cx: &OpContext,
            id: &WidgetId,
            patch: &WidgetPatch,
        ) -> Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let widget = store
                .values_mut()
                .find(|w| match id {
                    WidgetId::Name(name) => &w.name == name,
                    WidgetId::Serial(serial) => w.serial.as_deref() == Some(serial),
                })
                .expect("patching a widget that exists");
            match patch {
                WidgetPatch::Color(color) => widget.color = color.clone(),
                WidgetPatch::Tags(diff) => {
                    for (k, v) in &diff.set {
                        widget.tags.insert(k.clone(), v.clone());
                    }
                    for k in &diff.remove {
                        widget.tags.remove(k);
                    }
                }
            }
            Ok(())
        }

        async fn await_settled(&self, _cx: &OpContext, _id: &WidgetId) -> Result<()> {
            self.settles.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_retired(&self, record: &Widget) -> bool {
            record.retired
        }

        async fn remove(&self, _cx: &OpContext, id: &WidgetId, _current: &Widget) -> Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            match id {
                WidgetId::Name(name) => {
                    store.remove(name);
                }
                WidgetId::Serial(serial) => {
                    store.retain(|_, w| w.serial.as_deref() != Some(serial));
                }
            }
            Ok(())
        }
    }

    fn cx() -> OpContext {
        OpContext::new("123456789012", "us-east-1")
    }

    #[tokio::test]
    async fn findsert_twice_creates_once_and_returns_the_same_record() {
        let mock = MockWidgets::default();
        let desired = Widget::desired("gizmo", "blue");

        let first = set(&mock, &cx(), SetMode::Findsert, &desired).await.unwrap();
        let second = set(&mock, &cx(), SetMode::Findsert, &desired).await.unwrap();

        assert_eq!(mock.creates(), 1);
        assert_eq!(first, second);
        // Fresh create settles once, then the existing record is returned as-is.
        assert_eq!(mock.settles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_populates_the_primary_key_on_the_returned_record() {
        let mock = MockWidgets::default();
        let created = set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap();
        assert!(created.serial.is_some());
    }

    #[tokio::test]
    async fn unchanged_upsert_issues_zero_update_calls() {
        let mock = MockWidgets::default();
        let desired = Widget::desired("gizmo", "blue");

        set(&mock, &cx(), SetMode::Upsert, &desired).await.unwrap();
        set(&mock, &cx(), SetMode::Upsert, &desired).await.unwrap();

        assert_eq!(mock.creates(), 1);
        assert_eq!(mock.updates(), 0);
    }

    #[tokio::test]
    async fn upsert_touches_only_divergent_categories() {
        let mock = MockWidgets::default();
        let mut desired = Widget::desired("gizmo", "blue");
        set(&mock, &cx(), SetMode::Upsert, &desired).await.unwrap();

        desired.color = "red".to_string();
        let updated = set(&mock, &cx(), SetMode::Upsert, &desired).await.unwrap();

        // One call for the color category, none for the unchanged tags.
        assert_eq!(mock.updates(), 1);
        assert_eq!(updated.color, "red");
    }

    #[tokio::test]
    async fn findsert_ignores_drift_entirely() {
        let mock = MockWidgets::default();
        set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap();

        let drifted = Widget::desired("gizmo", "red");
        let result = set(&mock, &cx(), SetMode::Findsert, &drifted).await.unwrap();

        assert_eq!(result.color, "blue");
        assert_eq!(mock.updates(), 0);
    }

    #[tokio::test]
    async fn create_conflict_race_is_absorbed_by_rereading() {
        let mock = MockWidgets {
            conflict_on_create: true,
            ..Default::default()
        };

        let record = set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap();

        assert_eq!(record.name, "gizmo");
        assert_eq!(mock.creates(), 1);
    }

    #[tokio::test]
    async fn vanished_reread_is_an_internal_consistency_error() {
        let mock = MockWidgets {
            drop_creates: true,
            ..Default::default()
        };

        let err = set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::ReadAfterWriteVanished { kind: "widget", .. }
        ));
    }

    #[tokio::test]
    async fn reader_rejects_partially_hydrated_records() {
        let mock = MockWidgets::default();
        set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap();

        let strict = MockWidgets {
            store: Mutex::new(mock.store.lock().unwrap().clone()),
            omit_serial: true,
            ..Default::default()
        };
        let err = get_one(&strict, &cx(), &WidgetId::Name("gizmo".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::IncompleteRecord { kind: "widget", ref field } if field == "serial"
        ));
    }

    #[tokio::test]
    async fn destroy_is_a_no_op_for_absent_resources() {
        let mock = MockWidgets::default();
        let outcome = destroy(&mock, &cx(), &WidgetId::Name("gone".into()))
            .await
            .unwrap();
        assert_eq!(outcome, Deletion::AlreadyAbsent);
        assert_eq!(mock.deletes(), 0);
    }

    #[tokio::test]
    async fn destroy_skips_already_retired_resources() {
        let mock = MockWidgets::default();
        let mut w = Widget::desired("gizmo", "blue");
        w.serial = Some("w-0".into());
        w.retired = true;
        mock.store.lock().unwrap().insert(w.name.clone(), w);

        let outcome = destroy(&mock, &cx(), &WidgetId::Name("gizmo".into()))
            .await
            .unwrap();
        assert_eq!(outcome, Deletion::AlreadyRetired);
        assert_eq!(mock.deletes(), 0);
    }

    #[tokio::test]
    async fn destroy_removes_then_no_ops() {
        let mock = MockWidgets::default();
        set(&mock, &cx(), SetMode::Findsert, &Widget::desired("gizmo", "blue"))
            .await
            .unwrap();

        let id = WidgetId::Name("gizmo".into());
        assert_eq!(destroy(&mock, &cx(), &id).await.unwrap(), Deletion::Removed);
        assert_eq!(
            destroy(&mock, &cx(), &id).await.unwrap(),
            Deletion::AlreadyAbsent
        );
        assert_eq!(mock.deletes(), 1);
    }
}
