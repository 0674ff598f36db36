//! Interception Layer: registers the hook contracts that couple an
//! LLM-provider call to the Context Injector (pre-request) and the Memory
//! Pipeline (post-response), without this crate ever reaching into a
//! foreign SDK's internals. Four hook contracts are supported
//! (native/subclass/transport/explicit) since Memori is provider-agnostic
//! by design.

pub mod hooks;

use crate::error::Result;
use chrono::{DateTime, Utc};
pub use hooks::{HookKind, InterceptionHook};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, error, warn};

/// Owns installed hooks and the no-double-record guard. A single registry is shared by the orchestrator across its
/// whole lifetime; `enable`/`disable` may be called repeatedly.
pub struct InterceptionRegistry {
    installed: Mutex<Vec<Box<dyn InterceptionHook>>>,
    claimed: Mutex<HashSet<String>>,
}

impl Default for InterceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptionRegistry {
    pub fn new() -> Self {
        Self { installed: Mutex::new(Vec::new()), claimed: Mutex::new(HashSet::new()) }
    }

    /// Installs each requested hook kind. A hook failing to install is
    /// logged and reported `false` in the result map; it never stops the
    /// remaining hooks from being attempted or raises out of `enable`.
    pub fn enable(&self, kinds: &[HookKind]) -> Vec<(HookKind, bool)> {
        let mut installed = self.installed.lock().unwrap();
        let mut results = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            let hook = hooks::build(kind);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook.install()));
            let ok = match outcome {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!(kind = kind.as_str(), error = %e, "interception hook failed to install");
                    false
                }
                Err(_) => {
                    error!(kind = kind.as_str(), "interception hook panicked during install, treating as failed");
                    false
                }
            };
            debug!(kind = kind.as_str(), ok, "interception hook enable attempt");
            results.push((kind, ok));
            if ok {
                installed.push(hook);
            }
        }

        results
    }

    /// Uninstalls every currently-installed hook, restoring original state.
    /// Safe to call when nothing is installed.
    pub fn disable(&self) -> Vec<(HookKind, bool)> {
        let mut installed = self.installed.lock().unwrap();
        let mut results = Vec::with_capacity(installed.len());

        for hook in installed.drain(..) {
            let kind = hook.kind();
            match hook.uninstall() {
                Ok(()) => results.push((kind, true)),
                Err(e) => {
                    warn!(kind = kind.as_str(), error = %e, "interception hook failed to uninstall cleanly");
                    results.push((kind, false));
                }
            }
        }

        self.claimed.lock().unwrap().clear();
        results
    }

    pub fn is_enabled(&self, kind: HookKind) -> bool {
        self.installed.lock().unwrap().iter().any(|h| h.kind() == kind)
    }

    pub fn enabled_kinds(&self) -> Vec<HookKind> {
        self.installed.lock().unwrap().iter().map(|h| h.kind()).collect()
    }

    /// Claims an ingestion identity for a (orchestrator, turn) pair. Returns
    /// `true` the first time an identity is seen and `false` on every
    /// subsequent call, enforcing the no-double-record invariant even when
    /// multiple hooks fire for the same turn.
    pub fn claim_ingestion(&self, identity: &str) -> bool {
        self.claimed.lock().unwrap().insert(identity.to_string())
    }

    /// Builds the fallback dedup identity when no response identity is
    /// available from the provider.
    pub fn fallback_identity(session_id: &str, timestamp: DateTime<Utc>, user_input: &str) -> String {
        let hash = blake3::hash(user_input.as_bytes());
        format!("{session_id}:{}:{}", timestamp.timestamp(), hash.to_hex())
    }
}

/// Runs `f`, swallowing both panics and errors into a logged warning so a
/// hook callback can never propagate a failure onto the caller's original
/// LLM call.
pub fn run_fail_open<T>(hook_name: &str, f: impl FnOnce() -> Result<T>) -> Option<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(Ok(v)) => Some(v),
        Ok(Err(e)) => {
            warn!(hook = hook_name, error = %e, "interception hook failed, proceeding with original call");
            None
        }
        Err(_) => {
            warn!(hook = hook_name, "interception hook panicked, proceeding with original call");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_reports_per_hook_success() {
        let registry = InterceptionRegistry::new();
        let results = registry.enable(&[HookKind::Native, HookKind::Explicit]);
        assert!(results.iter().all(|(_, ok)| *ok));
        assert!(registry.is_enabled(HookKind::Native));
        assert!(registry.is_enabled(HookKind::Explicit));
    }

    #[test]
    fn disable_clears_installed_hooks() {
        let registry = InterceptionRegistry::new();
        registry.enable(&[HookKind::Native]);
        registry.disable();
        assert!(!registry.is_enabled(HookKind::Native));
    }

    #[test]
    fn claim_ingestion_allows_exactly_one_claim_per_identity() {
        let registry = InterceptionRegistry::new();
        assert!(registry.claim_ingestion("turn-1"));
        assert!(!registry.claim_ingestion("turn-1"));
        assert!(registry.claim_ingestion("turn-2"));
    }

    #[test]
    fn fallback_identity_is_stable_for_same_inputs() {
        let ts = Utc::now();
        let a = InterceptionRegistry::fallback_identity("s1", ts, "hello");
        let b = InterceptionRegistry::fallback_identity("s1", ts, "hello");
        assert_eq!(a, b);
    }

    #[test]
    fn run_fail_open_swallows_errors() {
        let result: Option<i32> = run_fail_open("test-hook", || Err(crate::error::MemoriError::interception("boom")));
        assert!(result.is_none());
    }
}
