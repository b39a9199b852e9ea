//! Execution context
//!
//! Every operation receives the target account and region plus any
//! kind-specific local cache directory explicitly, instead of reading
//! process-wide state.

use std::path::{Path, PathBuf};

/// Per-call execution context for remote operations.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Target account identifier.
    pub account: String,

    /// Target region.
    pub region: String,

    /// Directory for kind-local caches (e.g. the tunnel process registry).
    pub cache_dir: Option<PathBuf>,
}

impl OpContext {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder() {
        let cx = OpContext::new("123456789012", "us-east-1").with_cache_dir("/tmp/stateline");
        assert_eq!(cx.account, "123456789012");
        assert_eq!(cx.region, "us-east-1");
        assert_eq!(cx.cache_dir(), Some(Path::new("/tmp/stateline")));
    }
}
