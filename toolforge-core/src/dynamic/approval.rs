//! Confirmation of gated invocations
//!
//! When the capability gate asks for confirmation the router hands an
//! [`ApprovalRequest`] to the session's [`ApprovalHandler`] and waits,
//! racing the invocation's cancellation token.
//!
//! Built-in handlers:
//! - [`AutoApprove`] / [`AutoReject`] for headless runs and tests
//! - [`ApprovalQueue`] parks requests until another task resolves them

use crate::tools::{RiskLevel, ToolOrigin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, oneshot};
use uuid::Uuid;

/// A pending confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub origin: ToolOrigin,
    pub risk_level: RiskLevel,
    /// Why the gate asked
    pub reason: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(
        tool_name: impl Into<String>,
        origin: ToolOrigin,
        risk_level: RiskLevel,
        reason: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            origin,
            risk_level,
            reason: reason.into(),
            args,
            session_id: None,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attribution(mut self, session_id: Option<String>, run_id: Option<String>) -> Self {
        self.session_id = session_id;
        self.run_id = run_id;
        self
    }
}

/// The operator's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        ApprovalDecision::Reject {
            reason: Some(reason.into()),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approve)
    }
}

/// Obtains confirmation from the operator
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision;
}

/// Approves every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        tracing::debug!(tool = %request.tool_name, "auto-approving");
        ApprovalDecision::Approve
    }
}

/// Rejects every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoReject;

#[async_trait]
impl ApprovalHandler for AutoReject {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        tracing::debug!(tool = %request.tool_name, "auto-rejecting");
        ApprovalDecision::reject("no operator available to confirm")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("approval request not found: {0}")]
    NotFound(String),
}

struct PendingApproval {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalDecision>,
}

type PendingMap = Arc<Mutex<HashMap<String, PendingApproval>>>;

/// Removes the entry when the waiting invocation goes away
struct PendingGuard {
    pending: PendingMap,
    id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// Parks requests until [`resolve`](Self::resolve) is called
#[derive(Clone, Default)]
pub struct ApprovalQueue {
    pending: PendingMap,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalQueue")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl ApprovalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending requests, oldest first
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let mut requests: Vec<ApprovalRequest> = self
            .pending
            .lock()
            .values()
            .map(|p| p.request.clone())
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        requests
    }

    /// Wait until a request has been queued
    pub async fn requested(&self) {
        self.notify.notified().await;
    }

    /// Answer a pending request
    pub fn resolve(&self, id: &str, approve: bool) -> Result<ApprovalRequest, ApprovalError> {
        let decision = if approve {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::reject("rejected by operator")
        };
        self.respond(id, decision)
    }

    /// Answer a pending request with an explicit decision
    pub fn respond(&self, id: &str, decision: ApprovalDecision) -> Result<ApprovalRequest, ApprovalError> {
        let entry = self
            .pending
            .lock()
            .remove(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        tracing::info!(tool = %entry.request.tool_name, id, ?decision, "approval resolved");
        let _ = entry.responder.send(decision);
        Ok(entry.request)
    }

    /// Reject everything still pending
    pub fn reject_all(&self) -> usize {
        let drained: Vec<PendingApproval> = self.pending.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry
                .responder
                .send(ApprovalDecision::reject("all pending approvals rejected"));
        }
        count
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalQueue {
    async fn request_approval(&self, request: ApprovalRequest) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        let id = request.id.clone();
        tracing::info!(tool = %request.tool_name, %id, reason = %request.reason, "approval requested");

        self.pending.lock().insert(
            id.clone(),
            PendingApproval {
                request,
                responder: tx,
            },
        );
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id,
        };
        self.notify.notify_one();

        rx.await
            .unwrap_or_else(|_| ApprovalDecision::reject("approval queue closed"))
    }
}
