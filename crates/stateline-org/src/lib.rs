//! Organization resource kinds
//!
//! The organization singleton, member accounts (asynchronous provisioning
//! jobs), and single-sign-on objects, each an instantiation of the
//! stateline-core reconciliation protocol.

pub mod account;
pub mod organization;
pub mod sso;

// Re-exports
pub use account::{
    ACCOUNT, Account, AccountApi, AccountIdentity, AccountRef, AccountStatus, Accounts,
    CreateState,
};
pub use organization::{
    FeatureSet, ORGANIZATION, OrgIdentity, Organization, OrganizationApi, Organizations,
};
pub use sso::{
    ASSIGNMENT, Assignment, AssignmentApi, AssignmentIdentity, AssignmentRef, AssignmentState,
    Assignments, PERMISSION_SET, PermissionSet, PermissionSetApi, PermissionSetIdentity,
    PermissionSetRef, PermissionSets, PrincipalType,
};
