//! Identity resource kinds
//!
//! Roles, managed policies, and role-policy attachments, each an
//! instantiation of the stateline-core reconciliation protocol against the
//! identity control plane.

pub mod attachment;
pub mod policy;
pub mod role;
pub mod wire;

// Re-exports
pub use attachment::{
    ATTACHMENT, Attachment, AttachmentApi, AttachmentIdentity, AttachmentRef, Attachments,
};
pub use policy::{POLICY, Policies, Policy, PolicyApi, PolicyIdentity, PolicyRef};
pub use role::{ROLE, Role, RoleApi, RoleIdentity, RoleRef, Roles};
pub use wire::RawTag;
