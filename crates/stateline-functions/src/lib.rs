//! Compute function resource kinds
//!
//! Functions (asynchronous readiness after creation), immutable published
//! versions, and traffic-splitting aliases, each an instantiation of the
//! stateline-core reconciliation protocol.

pub mod alias;
pub mod function;
pub mod version;

// Re-exports
pub use alias::{ALIAS, Alias, AliasApi, AliasIdentity, AliasRef, Aliases, RoutingMap};
pub use function::{
    EnvMap, FUNCTION, Function, FunctionApi, FunctionIdentity, FunctionRef, FunctionState,
    Functions,
};
pub use version::{
    FUNCTION_VERSION, FunctionVersion, VersionApi, VersionIdentity, VersionRef, Versions,
};
