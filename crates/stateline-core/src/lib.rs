//! stateline reconciliation protocol
//!
//! This crate holds the uniform mechanics every resource kind instantiates:
//! resolving ambiguous caller references into remote identities, idempotent
//! create-or-return / create-or-update against control-plane APIs with no
//! native idempotency, polling long-running operations to a terminal state,
//! and translating wire shapes into fully-hydrated canonical records.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              plan/apply orchestrator              │
//! └──────────────────┬───────────────────────────────┘
//!                    │ per-kind operation sets
//! ┌──────────────────▼───────────────────────────────┐
//! │                stateline-core                     │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │  engine: get_one / set / destroy            │  │
//! │  │  trait KindOps { fetch, create, patch, … }  │  │
//! │  └────────────────────────────────────────────┘  │
//! │  ┌──────────┐ ┌──────┐ ┌──────┐ ┌────────────┐  │
//! │  │ resolver │ │ diff │ │ poll │ │ descriptor │  │
//! │  └──────────┘ └──────┘ └──────┘ └────────────┘  │
//! └───────┬───────────┬───────────┬─────────────────┘
//!         │           │           │
//! ┌───────▼───┐ ┌─────▼─────┐ ┌───▼────────┐
//! │ iam kinds │ │ org kinds │ │ logs, fns, │ ...
//! │           │ │           │ │ tunnel     │
//! └───────────┘ └───────────┘ └────────────┘
//! ```
//!
//! The layer owns no persistent state; the remote control plane is the sole
//! source of truth. Within one `set`/`destroy` invocation the before-read
//! strictly precedes the mutation, which strictly precedes the after-read.
//! No serialization is attempted across concurrent invocations for the same
//! identity: two concurrent findserts may both attempt creation, and the
//! loser's conflict is absorbed as "already exists".

pub mod context;
pub mod descriptor;
pub mod diff;
pub mod engine;
pub mod error;
pub mod identity;
pub mod poll;
pub mod record;
pub mod remote;

// Re-exports
pub use context::OpContext;
pub use descriptor::KindDescriptor;
pub use diff::{TagDiff, diff_tags};
pub use engine::{Creation, Deletion, KindOps, SetMode, destroy, get_one, set};
pub use error::{CoreError, Result};
pub use identity::{KeyShape, Reference, resolve};
pub use poll::{PollConfig, PollStatus, TerminalStatus, poll_until_terminal};
pub use record::{Hydrated, TagMap, require, verify_complete};
pub use remote::{RemoteError, RemoteResult, absent_ok, gone_ok, wrap};
