//! Dynamic tool registry
//!
//! Holds every synthesized tool of a session together with its lifecycle
//! state and usage counters. Entries are never removed implicitly: replaced
//! and retired versions stay listed as `expired` for audit.
//!
//! Lifecycle:
//!
//! ```text
//! active <-> disabled
//!   |           |
//!   +---> expired <---+   (terminal)
//! ```
//!
//! The entry map sits behind an `RwLock`; each entry has its own `Mutex`, so
//! counter updates for different tools never contend.

use super::spec::ToolSpecification;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle status of a dynamic tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Active,
    Disabled,
    Expired,
}

impl ToolStatus {
    /// Whether moving from `self` to `to` is allowed
    pub fn can_transition_to(&self, to: ToolStatus) -> bool {
        use ToolStatus::*;
        matches!(
            (self, to),
            (Active, Active)
                | (Active, Disabled)
                | (Active, Expired)
                | (Disabled, Disabled)
                | (Disabled, Active)
                | (Disabled, Expired)
                | (Expired, Expired)
        )
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ToolStatus::Active => "active",
            ToolStatus::Disabled => "disabled",
            ToolStatus::Expired => "expired",
        })
    }
}

/// Mutable state of a registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolState {
    pub status: ToolStatus,
    pub usage_count: u64,
    pub error_count: u64,
    pub cancelled_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ToolState {
    fn new(now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            status: ToolStatus::Active,
            usage_count: 0,
            error_count: 0,
            cancelled_count: 0,
            last_used_at: None,
            last_error: None,
            registered_at: now,
            expires_at: ttl
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| now + ttl),
        }
    }

    /// Percentage of invocations that did not fail; 100 when unused
    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            return 100.0;
        }
        let successes = self.usage_count.saturating_sub(self.error_count);
        successes as f64 / self.usage_count as f64 * 100.0
    }

    fn ttl_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicToolRegistryEntry {
    pub spec: ToolSpecification,
    pub state: ToolState,
}

impl DynamicToolRegistryEntry {
    pub fn success_rate(&self) -> f64 {
        self.state.success_rate()
    }
}

/// How an invocation ended
///
/// `Cancelled` is a failed call as far as the counters go; it is also
/// tallied in `cancelled_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Success,
    Failure { message: String },
    Cancelled,
}

/// Errors raised by registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no dynamic tool named '{0}'")]
    NotFound(String),

    #[error("tool '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: ToolStatus,
        to: ToolStatus,
    },
}

/// Filter for [`DynamicToolRegistry::list`]
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<ToolStatus>,
    pub category: Option<String>,
}

impl ListFilter {
    pub fn status(status: ToolStatus) -> Self {
        Self {
            status: Some(status),
            category: None,
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            status: None,
            category: Some(category.into()),
        }
    }

    fn matches(&self, spec: &ToolSpecification, state: &ToolState) -> bool {
        self.status.is_none_or(|s| s == state.status)
            && self
                .category
                .as_deref()
                .is_none_or(|c| spec.category.as_deref() == Some(c))
    }
}

/// Aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub disabled: usize,
    pub expired: usize,
    pub total_usage: u64,
    pub total_errors: u64,
}

struct Slot {
    spec: Arc<ToolSpecification>,
    state: ToolState,
}

/// Handle for recording the outcome of one invocation
#[derive(Clone)]
pub struct EntryHandle {
    slot: Arc<Mutex<Slot>>,
}

impl EntryHandle {
    /// Update counters for a finished invocation
    pub fn record(&self, outcome: &InvocationOutcome) {
        let mut slot = self.slot.lock();
        let state = &mut slot.state;
        state.usage_count += 1;
        state.last_used_at = Some(Utc::now());
        match outcome {
            InvocationOutcome::Success => {}
            InvocationOutcome::Failure { message } => {
                state.error_count += 1;
                state.last_error = Some(message.clone());
            }
            InvocationOutcome::Cancelled => {
                state.error_count += 1;
                state.cancelled_count += 1;
                state.last_error = Some("cancelled".to_string());
            }
        }
    }
}

impl std::fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryHandle")
            .field("tool", &self.slot.lock().spec.name)
            .finish()
    }
}

/// A tool the router may invoke
#[derive(Debug, Clone)]
pub struct CallableTool {
    pub spec: Arc<ToolSpecification>,
    pub handle: EntryHandle,
}

#[derive(Default)]
struct Inner {
    slots: Vec<Arc<Mutex<Slot>>>,
    by_name: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, usize>,
}

impl Inner {
    fn latest(&self, name: &str) -> Option<&Arc<Mutex<Slot>>> {
        self.by_name
            .get(name)
            .and_then(|indices| indices.last())
            .map(|&i| &self.slots[i])
    }
}

/// Registry of synthesized tools, owned by a session
pub struct DynamicToolRegistry {
    inner: RwLock<Inner>,
    entry_ttl: Option<Duration>,
}

impl Default for DynamicToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DynamicToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DynamicToolRegistry")
            .field("entries", &inner.slots.len())
            .field("names", &inner.by_name.keys().collect::<Vec<_>>())
            .field("entry_ttl", &self.entry_ttl)
            .finish()
    }
}

impl DynamicToolRegistry {
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    /// Registry whose entries expire `ttl` after registration
    pub fn with_ttl(entry_ttl: Option<Duration>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            entry_ttl,
        }
    }

    /// Register a validated specification
    ///
    /// Any non-expired entry with the same name is expired and kept for
    /// audit. The new entry's version is at least one above every earlier
    /// version of that name. A reused id is replaced with a fresh one.
    pub fn register(&self, spec: ToolSpecification) -> Arc<ToolSpecification> {
        let now = Utc::now();
        let mut inner = self.inner.write();

        let mut spec = spec;
        let mut highest_prior = None;
        if let Some(indices) = inner.by_name.get(&spec.name) {
            for &i in indices {
                let mut slot = inner.slots[i].lock();
                highest_prior = highest_prior.max(Some(slot.spec.version));
                if slot.state.status != ToolStatus::Expired {
                    slot.state.status = ToolStatus::Expired;
                    tracing::info!(
                        tool = %slot.spec.name,
                        version = slot.spec.version,
                        "superseded dynamic tool expired"
                    );
                }
            }
        }
        if let Some(prior) = highest_prior {
            let version = spec.version.max(prior + 1);
            spec = spec.with_version(version);
        }
        if inner.by_id.contains_key(&spec.id) {
            let fresh = uuid::Uuid::new_v4().to_string();
            tracing::debug!(old = %spec.id, new = %fresh, "specification id already registered");
            spec.id = fresh;
        }

        let spec = Arc::new(spec);
        let index = inner.slots.len();
        inner.slots.push(Arc::new(Mutex::new(Slot {
            spec: spec.clone(),
            state: ToolState::new(now, self.entry_ttl),
        })));
        inner.by_name.entry(spec.name.clone()).or_default().push(index);
        inner.by_id.insert(spec.id.clone(), index);

        tracing::info!(
            tool = %spec.name,
            id = %spec.id,
            version = spec.version,
            execution_type = %spec.execution_type(),
            risk = %spec.risk_level,
            "dynamic tool registered"
        );
        spec
    }

    /// Entries in registration order
    pub fn list(&self, filter: &ListFilter) -> Vec<DynamicToolRegistryEntry> {
        let inner = self.inner.read();
        inner
            .slots
            .iter()
            .filter_map(|slot| {
                let slot = slot.lock();
                filter
                    .matches(&slot.spec, &slot.state)
                    .then(|| snapshot(&slot))
            })
            .collect()
    }

    /// Latest specification registered under `name`
    pub fn get_spec(&self, name: &str) -> Option<Arc<ToolSpecification>> {
        let inner = self.inner.read();
        inner.latest(name).map(|slot| slot.lock().spec.clone())
    }

    /// Latest entry registered under `name`
    pub fn get(&self, name: &str) -> Option<DynamicToolRegistryEntry> {
        let inner = self.inner.read();
        inner.latest(name).map(|slot| snapshot(&slot.lock()))
    }

    /// Every version registered under `name`, oldest first
    pub fn history(&self, name: &str) -> Vec<DynamicToolRegistryEntry> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| snapshot(&inner.slots[i].lock()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Change the status of the latest entry for `name`
    ///
    /// Returns the previous status.
    pub fn update_state(&self, name: &str, status: ToolStatus) -> Result<ToolStatus, RegistryError> {
        let inner = self.inner.read();
        let slot = inner
            .latest(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let mut slot = slot.lock();

        let from = slot.state.status;
        if !from.can_transition_to(status) {
            return Err(RegistryError::InvalidTransition {
                name: name.to_string(),
                from,
                to: status,
            });
        }
        slot.state.status = status;
        if from != status {
            tracing::info!(tool = name, %from, to = %status, "dynamic tool state changed");
        }
        Ok(from)
    }

    /// Resolve a name to an invocable tool
    ///
    /// Disabled, expired and TTL-elapsed entries are not callable. An entry
    /// whose TTL has elapsed is expired on the way.
    pub fn resolve_callable(&self, name: &str) -> Option<CallableTool> {
        let inner = self.inner.read();
        let slot = inner.latest(name)?;
        let mut guard = slot.lock();

        if guard.state.status == ToolStatus::Active && guard.state.ttl_elapsed(Utc::now()) {
            guard.state.status = ToolStatus::Expired;
            tracing::info!(tool = name, "dynamic tool TTL elapsed");
        }
        if guard.state.status != ToolStatus::Active {
            return None;
        }

        Some(CallableTool {
            spec: guard.spec.clone(),
            handle: EntryHandle { slot: slot.clone() },
        })
    }

    /// Record the outcome of an invocation by specification id
    pub fn record_invocation(&self, id: &str, outcome: &InvocationOutcome) -> Result<(), RegistryError> {
        let handle = {
            let inner = self.inner.read();
            let index = inner
                .by_id
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            EntryHandle {
                slot: inner.slots[*index].clone(),
            }
        };
        handle.record(outcome);
        Ok(())
    }

    /// Descriptors of the tools currently callable, for the LLM tool list
    pub fn callable_tools(&self) -> Vec<serde_json::Value> {
        let now = Utc::now();
        let inner = self.inner.read();
        let mut names: Vec<&String> = inner.by_name.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| {
                let slot = inner.latest(name)?.lock();
                (slot.state.status == ToolStatus::Active && !slot.state.ttl_elapsed(now))
                    .then(|| slot.spec.descriptor())
            })
            .collect()
    }

    /// Expire every live tool created by a session
    pub fn expire_session(&self, session_id: &str) -> usize {
        self.expire_where(|spec, _| spec.created_by.session_id.as_deref() == Some(session_id))
    }

    /// Expire every live tool created by an agent run
    pub fn expire_run(&self, run_id: &str) -> usize {
        self.expire_where(|spec, _| spec.created_by.run_id.as_deref() == Some(run_id))
    }

    /// Expire every live tool whose TTL elapsed before `now`
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        self.expire_where(|_, state| state.ttl_elapsed(now))
    }

    fn expire_where(&self, predicate: impl Fn(&ToolSpecification, &ToolState) -> bool) -> usize {
        let inner = self.inner.read();
        let mut expired = 0;
        for slot in &inner.slots {
            let mut slot = slot.lock();
            if slot.state.status != ToolStatus::Expired && predicate(&slot.spec, &slot.state) {
                slot.state.status = ToolStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(expired, "dynamic tools expired");
        }
        expired
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let count = inner.slots.len();
        *inner = Inner::default();
        tracing::debug!(count, "dynamic tool registry cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().slots.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read();
        let mut stats = RegistryStats {
            total: inner.slots.len(),
            ..Default::default()
        };
        for slot in &inner.slots {
            let slot = slot.lock();
            match slot.state.status {
                ToolStatus::Active => stats.active += 1,
                ToolStatus::Disabled => stats.disabled += 1,
                ToolStatus::Expired => stats.expired += 1,
            }
            stats.total_usage += slot.state.usage_count;
            stats.total_errors += slot.state.error_count;
        }
        stats
    }
}

fn snapshot(slot: &Slot) -> DynamicToolRegistryEntry {
    DynamicToolRegistryEntry {
        spec: (*slot.spec).clone(),
        state: slot.state.clone(),
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::dynamic::ToolSpecificationDraft;
    use serde_json::json;

    fn spec(name: &str, category: Option<&str>, session: Option<&str>) -> ToolSpecification {
        let draft: ToolSpecificationDraft = serde_json::from_value(json!({
            "name": name,
            "description": "test tool",
            "inputSchema": {"type": "object"},
            "executionType": "template",
            "templateId": "text_stats",
            "requiredCapabilities": ["none"],
            "riskLevel": "safe",
            "category": category,
            "createdBy": {"sessionId": session, "runId": "run-1"}
        }))
        .unwrap();
        draft.validate().unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = DynamicToolRegistry::new();
        let registered = registry.register(spec("counter", None, None));
        assert_eq!(registered.version, 1);

        let callable = registry.resolve_callable("counter").unwrap();
        assert_eq!(callable.spec.id, registered.id);
        assert!(registry.resolve_callable("missing").is_none());
    }

    #[test]
    fn test_replacement_expires_old_and_bumps_version() {
        let registry = DynamicToolRegistry::new();
        let first = registry.register(spec("counter", None, None));
        let second = registry.register(spec("counter", None, None));

        assert_eq!(second.version, 2);
        assert_ne!(first.id, second.id);

        let history = registry.history("counter");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state.status, ToolStatus::Expired);
        assert_eq!(history[1].state.status, ToolStatus::Active);

        // explicit higher version wins
        let third = registry.register(spec("counter", None, None).with_version(10));
        assert_eq!(third.version, 10);
        assert_eq!(registry.list(&ListFilter::status(ToolStatus::Expired)).len(), 2);
    }

    #[test]
    fn test_reused_id_gets_fresh_one() {
        let registry = DynamicToolRegistry::new();
        let original = spec("a", None, None);
        let mut clash = spec("b", None, None);
        clash.id = original.id.clone();

        let a = registry.register(original);
        let b = registry.register(clash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_state_transitions() {
        let registry = DynamicToolRegistry::new();
        registry.register(spec("t", None, None));

        assert_eq!(registry.update_state("t", ToolStatus::Disabled), Ok(ToolStatus::Active));
        assert!(registry.resolve_callable("t").is_none());
        // still listed while disabled
        assert_eq!(registry.list(&ListFilter::default()).len(), 1);

        assert_eq!(registry.update_state("t", ToolStatus::Active), Ok(ToolStatus::Disabled));
        assert!(registry.resolve_callable("t").is_some());

        assert_eq!(registry.update_state("t", ToolStatus::Expired), Ok(ToolStatus::Active));
        assert_eq!(
            registry.update_state("t", ToolStatus::Active),
            Err(RegistryError::InvalidTransition {
                name: "t".to_string(),
                from: ToolStatus::Expired,
                to: ToolStatus::Active,
            })
        );
        assert_eq!(
            registry.update_state("ghost", ToolStatus::Active),
            Err(RegistryError::NotFound("ghost".to_string()))
        );
    }

    #[test]
    fn test_counters_and_success_rate() {
        let registry = DynamicToolRegistry::new();
        let spec = registry.register(spec("t", None, None));
        assert_eq!(registry.get("t").unwrap().success_rate(), 100.0);

        let n = 8;
        let k = 3;
        for i in 0..n {
            let outcome = if i < k {
                InvocationOutcome::Failure {
                    message: format!("boom {}", i),
                }
            } else {
                InvocationOutcome::Success
            };
            registry.record_invocation(&spec.id, &outcome).unwrap();
        }

        let entry = registry.get("t").unwrap();
        assert_eq!(entry.state.usage_count, n);
        assert_eq!(entry.state.error_count, k);
        assert_eq!(entry.success_rate(), (n - k) as f64 / n as f64 * 100.0);
        assert_eq!(entry.state.last_error.as_deref(), Some("boom 2"));
        assert!(entry.state.last_used_at.is_some());

        assert_eq!(
            registry.record_invocation("nope", &InvocationOutcome::Success),
            Err(RegistryError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_cancelled_counts_as_failed_usage() {
        let registry = DynamicToolRegistry::new();
        registry.register(spec("t", None, None));
        let callable = registry.resolve_callable("t").unwrap();
        callable.handle.record(&InvocationOutcome::Success);
        callable.handle.record(&InvocationOutcome::Cancelled);

        let state = registry.get("t").unwrap().state;
        assert_eq!(state.usage_count, 2);
        assert_eq!(state.error_count, 1);
        assert_eq!(state.cancelled_count, 1);
        assert_eq!(state.last_error.as_deref(), Some("cancelled"));
        assert!((state.success_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_list_filters() {
        let registry = DynamicToolRegistry::new();
        registry.register(spec("a", Some("text"), None));
        registry.register(spec("b", Some("crypto"), None));
        registry.register(spec("c", Some("text"), None));
        registry.update_state("c", ToolStatus::Disabled).unwrap();

        let text: Vec<_> = registry
            .list(&ListFilter::category("text"))
            .into_iter()
            .map(|e| e.spec.name)
            .collect();
        assert_eq!(text, vec!["a", "c"]);

        let active_text = ListFilter {
            status: Some(ToolStatus::Active),
            category: Some("text".to_string()),
        };
        assert_eq!(registry.list(&active_text).len(), 1);
    }

    #[test]
    fn test_expire_session_and_run() {
        let registry = DynamicToolRegistry::new();
        registry.register(spec("a", None, Some("s1")));
        registry.register(spec("b", None, Some("s2")));

        assert_eq!(registry.expire_session("s1"), 1);
        assert!(registry.resolve_callable("a").is_none());
        assert!(registry.resolve_callable("b").is_some());

        assert_eq!(registry.expire_run("run-1"), 1);
        assert_eq!(registry.stats().expired, 2);
    }

    #[test]
    fn test_ttl_expiry() {
        let registry = DynamicToolRegistry::with_ttl(Some(Duration::from_secs(60)));
        registry.register(spec("a", None, None));

        assert_eq!(registry.sweep_expired(Utc::now()), 0);
        assert!(registry.get("a").unwrap().state.expires_at.is_some());

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(registry.sweep_expired(later), 1);
        assert!(registry.resolve_callable("a").is_none());
    }

    #[test]
    fn test_zero_ttl_expires_on_resolve() {
        let registry = DynamicToolRegistry::with_ttl(Some(Duration::ZERO));
        registry.register(spec("a", None, None));
        assert!(registry.resolve_callable("a").is_none());
        assert_eq!(registry.get("a").unwrap().state.status, ToolStatus::Expired);
        assert!(registry.callable_tools().is_empty());
    }

    #[test]
    fn test_callable_tools_and_stats() {
        let registry = DynamicToolRegistry::new();
        registry.register(spec("b", None, None));
        registry.register(spec("a", None, None));
        registry.register(spec("c", None, None));
        registry.update_state("c", ToolStatus::Disabled).unwrap();

        let names: Vec<_> = registry
            .callable_tools()
            .into_iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let stats = registry.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.disabled, 1);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get_spec("a").is_none());
    }

    #[test]
    fn test_concurrent_recording() {
        let registry = Arc::new(DynamicToolRegistry::new());
        let spec = registry.register(spec("t", None, None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = spec.id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.record_invocation(&id, &InvocationOutcome::Success).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get("t").unwrap().state.usage_count, 800);
    }
}
