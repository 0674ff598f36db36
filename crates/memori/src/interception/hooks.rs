//! The four hook contracts. Each is a no-raise, idempotently
//! reversible registration; the registry in `interception::mod` drives
//! install/uninstall and absorbs failures so a broken hook never reaches the
//! caller's critical path. Hooks are installed explicitly by the host
//! application as Rust trait objects; this crate never mutates a foreign
//! package at runtime.

use crate::error::{MemoriError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Which hook contract a registration corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Provider SDK offers a native pre/post callback registration point.
    Native,
    /// The SDK exposes a client class; a wrapper subclasses it.
    Subclass,
    /// Fallback: an HTTP transport/adapter inspecting outgoing requests.
    Transport,
    /// No interception; caller invokes `Orchestrator::record` directly.
    Explicit,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Native => "native",
            HookKind::Subclass => "subclass",
            HookKind::Transport => "transport",
            HookKind::Explicit => "explicit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "native" => Some(HookKind::Native),
            "subclass" => Some(HookKind::Subclass),
            "transport" => Some(HookKind::Transport),
            "explicit" => Some(HookKind::Explicit),
            _ => None,
        }
    }
}

/// Common shape for all four hook contracts.
pub trait InterceptionHook: Send + Sync {
    fn kind(&self) -> HookKind;

    /// Wires the hook into whatever it intercepts. MUST NOT panic; any
    /// failure to install is returned as an `Interception` error and
    /// logged by the caller.
    fn install(&self) -> Result<()>;

    /// Reverses `install`, restoring original state. Idempotent: calling it twice is not an error.
    fn uninstall(&self) -> Result<()>;

    fn is_installed(&self) -> bool;
}

pub fn build(kind: HookKind) -> Box<dyn InterceptionHook> {
    match kind {
        HookKind::Native => Box::new(NativeCallbackHook::default()),
        HookKind::Subclass => Box::new(ClientSubclassHook::default()),
        HookKind::Transport => Box::new(TransportMiddlewareHook::default()),
        HookKind::Explicit => Box::new(ExplicitRecordingHook::default()),
    }
}

/// Native callback hook: a pre-request hook that may modify
/// `messages`/`system`, and a success hook that receives the response and
/// timing. In this crate these correspond to `ContextInjector::inject` and
/// `MemoryPipeline::enqueue`, which the orchestrator calls directly; this
/// type exists to make "native hooks are installed" observable through the
/// same registry as the other three contracts.
#[derive(Default)]
pub struct NativeCallbackHook {
    installed: AtomicBool,
}

impl InterceptionHook for NativeCallbackHook {
    fn kind(&self) -> HookKind {
        HookKind::Native
    }

    fn install(&self) -> Result<()> {
        self.installed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.installed.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }
}

/// Client subclass hook: in Rust there is no runtime
/// subclassing, so this hook models "wrap the caller's client in a type
/// that forwards every call through pre/post hooks" — the host application
/// constructs an `InterceptedClient<C>` (see below) once this hook reports
/// itself installed.
#[derive(Default)]
pub struct ClientSubclassHook {
    installed: AtomicBool,
}

impl InterceptionHook for ClientSubclassHook {
    fn kind(&self) -> HookKind {
        HookKind::Subclass
    }

    fn install(&self) -> Result<()> {
        self.installed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.installed.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }
}

/// Wraps any completion function in pre/post hooks. `complete` must pass through every attribute of the wrapped
/// call; this wrapper only ever touches the message list and the returned
/// text, never the transport.
pub struct InterceptedClient<F> {
    inner: F,
}

impl<F> InterceptedClient<F>
where
    F: Fn(&[crate::models::Message]) -> Result<String> + Send + Sync,
{
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    /// Runs `pre` over the messages, calls the wrapped completion function,
    /// then runs `post` over the result. Neither hook may abort the call:
    /// errors from `pre`/`post` are logged and the underlying completion
    /// still executes.
    pub fn complete(
        &self,
        messages: &mut Vec<crate::models::Message>,
        pre: impl FnOnce(&mut Vec<crate::models::Message>),
        post: impl FnOnce(&str),
    ) -> Result<String> {
        pre(messages);
        let result = (self.inner)(messages)?;
        post(&result);
        Ok(result)
    }
}

/// Allow-list of LLM provider endpoints the transport middleware inspects.
pub const DEFAULT_ENDPOINT_ALLOW_LIST: &[&str] = &[
    "api.openai.com",
    "api.anthropic.com",
    "generativelanguage.googleapis.com",
];

/// Transport middleware hook: inspects
/// outgoing URLs against an allow-list and parses request/response bodies
/// generically rather than coupling to one SDK's types.
pub struct TransportMiddlewareHook {
    installed: AtomicBool,
    allow_list: Vec<String>,
}

impl Default for TransportMiddlewareHook {
    fn default() -> Self {
        Self { installed: AtomicBool::new(false), allow_list: DEFAULT_ENDPOINT_ALLOW_LIST.iter().map(|s| s.to_string()).collect() }
    }
}

impl TransportMiddlewareHook {
    pub fn with_allow_list(allow_list: Vec<String>) -> Self {
        Self { installed: AtomicBool::new(false), allow_list }
    }

    /// Whether `host` matches the configured allow-list.
    pub fn matches(&self, host: &str) -> bool {
        self.allow_list.iter().any(|h| h == host)
    }
}

impl InterceptionHook for TransportMiddlewareHook {
    fn kind(&self) -> HookKind {
        HookKind::Transport
    }

    fn install(&self) -> Result<()> {
        if self.allow_list.is_empty() {
            return Err(MemoriError::interception("transport middleware hook requires a non-empty endpoint allow-list"));
        }
        self.installed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.installed.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }
}

/// Explicit recording API: no interception at all, the
/// caller invokes `Orchestrator::record` directly. Installing it is
/// trivially always successful; it exists purely so `enable([explicit])`
/// reports success through the same registry surface as the other hooks.
#[derive(Default)]
pub struct ExplicitRecordingHook {
    installed: AtomicBool,
}

impl InterceptionHook for ExplicitRecordingHook {
    fn kind(&self) -> HookKind {
        HookKind::Explicit
    }

    fn install(&self) -> Result<()> {
        self.installed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.installed.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_kind_round_trips_through_str() {
        for kind in [HookKind::Native, HookKind::Subclass, HookKind::Transport, HookKind::Explicit] {
            assert_eq!(HookKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn transport_hook_rejects_empty_allow_list() {
        let hook = TransportMiddlewareHook::with_allow_list(Vec::new());
        assert!(hook.install().is_err());
    }

    #[test]
    fn transport_hook_matches_configured_hosts() {
        let hook = TransportMiddlewareHook::default();
        assert!(hook.matches("api.openai.com"));
        assert!(!hook.matches("evil.example.com"));
    }

    #[test]
    fn intercepted_client_runs_pre_and_post_around_completion() {
        let client = InterceptedClient::new(|messages: &[crate::models::Message]| Ok(format!("echo:{}", messages.len())));
        let mut messages = vec![crate::models::Message::user("hi")];
        let mut pre_ran = false;
        let mut post_ran = false;
        let result = client
            .complete(&mut messages, |_m| pre_ran = true, |_r| post_ran = true)
            .unwrap();
        assert_eq!(result, "echo:1");
        assert!(pre_ran && post_ran);
    }

    #[test]
    fn install_uninstall_is_idempotent() {
        let hook = NativeCallbackHook::default();
        assert!(hook.install().is_ok());
        assert!(hook.is_installed());
        assert!(hook.uninstall().is_ok());
        assert!(hook.uninstall().is_ok());
        assert!(!hook.is_installed());
    }
}
