//! Session/Conversation Tracker: a bounded, namespace-agnostic map of
//! in-flight caller sessions used for message-history injection and
//! conscious-mode idempotency, plus a reentrancy flag guarding auto-mode
//! retrieval against recursive injection.

use crate::models::{ConversationSession, TimestampedMessage};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Tracks active sessions, bounded: total active sessions <= max_sessions
/// (oldest evicted when exceeded), sessions expire after an inactivity
/// timeout, and history length <= max_history.
pub struct SessionTracker {
    sessions: DashMap<String, Arc<RwLock<ConversationSession>>>,
    max_sessions: usize,
    session_timeout_secs: u64,
    max_history: usize,
    active_sessions: AtomicUsize,
}

impl SessionTracker {
    pub fn new(max_sessions: usize, session_timeout_secs: u64, max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
            session_timeout_secs,
            max_history,
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Returns the session, creating it if absent. Evicts the
    /// least-recently-accessed session first if this insertion would exceed
    /// `max_sessions`.
    pub fn get_or_create(&self, session_id: &str) -> Arc<RwLock<ConversationSession>> {
        if let Some(existing) = self.sessions.get(session_id) {
            existing.write().unwrap().last_accessed = Utc::now();
            return existing.clone();
        }

        self.evict_expired();
        if self.sessions.len() >= self.max_sessions {
            self.evict_oldest();
        }

        let session = Arc::new(RwLock::new(ConversationSession::new(session_id)));
        self.sessions.insert(session_id.to_string(), session.clone());
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        session
    }

    /// Drops the session entirely (namespace clear, explicit reset).
    pub fn remove(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Appends a turn, silently dropping the oldest non-system message once
    /// `max_history` is exceeded.
    pub fn record_turn(&self, session_id: &str, role: &str, content: &str) {
        let session = self.get_or_create(session_id);
        let mut guard = session.write().unwrap();
        guard.messages.push(TimestampedMessage { role: role.to_string(), content: content.to_string(), timestamp: Utc::now() });
        while guard.messages.len() > self.max_history.saturating_sub(1).max(1) {
            if let Some(pos) = guard.messages.iter().position(|m| m.role != "system") {
                guard.messages.remove(pos);
            } else {
                break;
            }
        }
    }

    /// Up to `max_history - 1` prior turns, oldest first. The current in-flight message is never included here.
    pub fn recent_history(&self, session_id: &str) -> Vec<TimestampedMessage> {
        match self.sessions.get(session_id) {
            Some(session) => session.read().unwrap().messages.clone(),
            None => Vec::new(),
        }
    }

    /// True if this session already received its one-shot conscious-mode
    /// preamble.
    pub fn has_injected_context(&self, session_id: &str) -> bool {
        self.sessions.get(session_id).map(|s| s.read().unwrap().context_injected).unwrap_or(false)
    }

    pub fn mark_context_injected(&self, session_id: &str) {
        let session = self.get_or_create(session_id);
        session.write().unwrap().context_injected = true;
    }

    /// Recursion guard for auto-ingest retrieval. Returns `false` if already set, meaning the
    /// caller must not re-enter retrieval.
    pub fn try_enter_retrieval(&self, session_id: &str) -> bool {
        let session = self.get_or_create(session_id);
        let mut guard = session.write().unwrap();
        if guard.in_context_retrieval {
            false
        } else {
            guard.in_context_retrieval = true;
            true
        }
    }

    pub fn exit_retrieval(&self, session_id: &str) {
        if let Some(session) = self.sessions.get(session_id) {
            session.write().unwrap().in_context_retrieval = false;
        }
    }

    fn evict_expired(&self) {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(self.session_timeout_secs as i64);
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().read().unwrap().last_accessed) > timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in expired {
            debug!(session_id, "evicting expired session");
            self.remove(&session_id);
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().read().unwrap().last_accessed)
            .map(|entry| entry.key().clone());
        if let Some(session_id) = oldest {
            debug!(session_id, "evicting oldest session to respect max_sessions");
            self.remove(&session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_reuses_existing_session() {
        let tracker = SessionTracker::new(10, 3600, 10);
        let a = tracker.get_or_create("s1");
        let b = tracker.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn max_sessions_evicts_oldest() {
        let tracker = SessionTracker::new(2, 3600, 10);
        tracker.get_or_create("s1");
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.get_or_create("s2");
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.get_or_create("s3");
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.recent_history("s1").is_empty());
    }

    #[test]
    fn history_trims_to_max_history() {
        let tracker = SessionTracker::new(10, 3600, 3);
        tracker.record_turn("s1", "user", "one");
        tracker.record_turn("s1", "assistant", "two");
        tracker.record_turn("s1", "user", "three");
        tracker.record_turn("s1", "assistant", "four");
        let history = tracker.recent_history("s1");
        assert!(history.len() <= 2);
        assert_eq!(history.last().unwrap().content, "four");
    }

    #[test]
    fn recursion_guard_blocks_reentry() {
        let tracker = SessionTracker::new(10, 3600, 10);
        assert!(tracker.try_enter_retrieval("s1"));
        assert!(!tracker.try_enter_retrieval("s1"));
        tracker.exit_retrieval("s1");
        assert!(tracker.try_enter_retrieval("s1"));
    }

    #[test]
    fn conscious_injection_is_one_shot() {
        let tracker = SessionTracker::new(10, 3600, 10);
        assert!(!tracker.has_injected_context("s1"));
        tracker.mark_context_injected("s1");
        assert!(tracker.has_injected_context("s1"));
    }
}
