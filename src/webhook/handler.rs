//! Webhook ingestion: signature verification, decision-id extraction, and
//! event dispatch into the outcome tracker.
//!
//! The handler is transport-free; the HTTP listener (feature `server`) hands
//! it the raw body bytes, the signature header, and the event type. Every
//! failure maps to an error response - the listener never crashes.

use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use crate::graph::{CodeChange, EdgeType, GraphStore};
use crate::outcome::OutcomeTracker;

type HmacSha256 = Hmac<Sha256>;

/// Result returned for every webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WebhookResponse {
    fn success(outcome_id: String) -> Self {
        Self {
            status: "success".into(),
            outcome_id: Some(outcome_id),
            message: None,
        }
    }

    fn no_decision_found() -> Self {
        Self {
            status: "no_decision_found".into(),
            outcome_id: None,
            message: None,
        }
    }

    fn ignored(message: impl Into<String>) -> Self {
        Self {
            status: "ignored".into(),
            outcome_id: None,
            message: Some(message.into()),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            outcome_id: None,
            message: Some(message.into()),
        }
    }
}

/// Extraction patterns, tried in order; first match wins.
fn decision_id_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)Membria Decision:\s*(dec_[A-Za-z0-9_]+)").unwrap(),
            Regex::new(r"(?i)Decision:\s*(dec_[A-Za-z0-9_]+)").unwrap(),
            Regex::new(r"(?i)\[(dec_[A-Za-z0-9_]+)\]").unwrap(),
            Regex::new(r"(?i)(dec_[A-Za-z0-9_]+)").unwrap(),
        ]
    })
}

/// Extract a decision id from free text (commit messages, PR titles/bodies).
pub fn extract_decision_id(text: &str) -> Option<String> {
    for pattern in decision_id_patterns() {
        if let Some(captures) = pattern.captures(text) {
            return Some(captures.get(1)?.as_str().to_string());
        }
    }
    None
}

/// Handles webhooks from source-control and CI systems.
pub struct WebhookHandler {
    tracker: Arc<OutcomeTracker>,
    graph: Arc<GraphStore>,
    secret: Option<String>,
}

impl WebhookHandler {
    pub fn new(tracker: Arc<OutcomeTracker>, graph: Arc<GraphStore>, secret: Option<String>) -> Self {
        Self {
            tracker,
            graph,
            secret,
        }
    }

    /// Verify `X-Hub-Signature-256` over the exact bytes received.
    ///
    /// Missing secret: accept with a warning. Configured secret: the header
    /// must be present and match (constant-time comparison).
    pub fn verify_signature(&self, body: &[u8], signature: Option<&str>) -> bool {
        let Some(secret) = &self.secret else {
            tracing::warn!(
                target: "membria::webhook",
                "webhook secret not configured, skipping signature verification"
            );
            return true;
        };
        let Some(signature) = signature else {
            return false;
        };
        let Some(provided_hex) = signature.strip_prefix("sha256=") else {
            return false;
        };
        let Ok(provided) = hex::decode(provided_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&provided).is_ok()
    }

    /// Process one webhook delivery end to end.
    pub fn process(
        &self,
        event_type: &str,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> WebhookResponse {
        if !self.verify_signature(raw_body, signature) {
            tracing::error!(target: "membria::webhook", "invalid webhook signature");
            return WebhookResponse::error("Invalid signature");
        }

        let payload: Value = match serde_json::from_slice(raw_body) {
            Ok(value) => value,
            Err(e) => return WebhookResponse::error(format!("invalid JSON body: {}", e)),
        };

        let result = match event_type {
            "push" => self.handle_push(&payload),
            "pull_request" => self.handle_pull_request(&payload),
            "workflow_run" => self.handle_workflow_run(&payload),
            "check_run" => self.handle_check_run(&payload),
            "ci_event" | "ci_json" => self.handle_ci_event(&payload),
            other => {
                tracing::warn!(target: "membria::webhook", event_type = other, "unknown event type");
                return WebhookResponse::ignored(format!("Unknown event type: {}", other));
            }
        };

        match result {
            Ok(Some(outcome_id)) => WebhookResponse::success(outcome_id),
            Ok(None) => WebhookResponse::no_decision_found(),
            Err(e) => {
                tracing::error!(target: "membria::webhook", error = %e, "webhook processing failed");
                WebhookResponse::error(e.to_string())
            }
        }
    }

    /// Find (by decision + commit) or create the outcome for a push. First
    /// sight of a commit also records the CodeChange node and the causal
    /// `IMPLEMENTED_IN` / `RESULTED_IN` edges.
    fn outcome_for_commit(
        &self,
        decision_id: &str,
        commit_sha: &str,
        commit: &Value,
    ) -> crate::error::Result<String> {
        let short_sha: String = commit_sha.chars().take(8).collect();
        if let Some(existing) = self.graph.find_outcome_for_commit(decision_id, &short_sha)? {
            return Ok(existing.id);
        }
        let outcome = self.tracker.create_outcome(decision_id)?;

        let author = commit
            .pointer("/author/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let mut change = CodeChange::new(&short_sha, author);
        change.decision_id = Some(decision_id.to_string());
        change.files_changed = commit
            .get("modified")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        self.graph.add_code_change(&change)?;
        self.graph.create_relationship(
            EdgeType::ImplementedIn,
            "Decision",
            decision_id,
            "CodeChange",
            &change.id,
            serde_json::json!({"implemented_at": change.timestamp}),
        )?;
        self.graph.create_relationship(
            EdgeType::ResultedIn,
            "CodeChange",
            &change.id,
            "Outcome",
            &outcome.id,
            serde_json::json!({"days_to_outcome": 0}),
        )?;
        Ok(outcome.id)
    }

    fn handle_push(&self, payload: &Value) -> crate::error::Result<Option<String>> {
        let Some(commit) = payload
            .get("commits")
            .and_then(Value::as_array)
            .and_then(|commits| commits.first())
        else {
            tracing::debug!(target: "membria::webhook", "push event with no commits");
            return Ok(None);
        };
        let commit_sha = commit.get("id").and_then(Value::as_str).unwrap_or_default();
        let message = commit
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(decision_id) = extract_decision_id(message) else {
            tracing::debug!(target: "membria::webhook", commit_sha, "no decision id in commit");
            return Ok(None);
        };

        let outcome_id = self.outcome_for_commit(&decision_id, commit_sha, commit)?;
        self.tracker.record_commit(&outcome_id, commit_sha, message)?;
        Ok(Some(outcome_id))
    }

    fn handle_pull_request(&self, payload: &Value) -> crate::error::Result<Option<String>> {
        let action = payload.get("action").and_then(Value::as_str).unwrap_or("");
        let pr = payload.get("pull_request").cloned().unwrap_or(Value::Null);
        let title = pr.get("title").and_then(Value::as_str).unwrap_or("");
        let body = pr.get("body").and_then(Value::as_str).unwrap_or("");

        let Some(decision_id) = extract_decision_id(&format!("{} {}", title, body)) else {
            return Ok(None);
        };

        let outcome_id = match self.graph.find_open_outcome(&decision_id)? {
            Some(outcome) => outcome.id,
            None => self.tracker.create_outcome(&decision_id)?.id,
        };

        let pr_number = pr.get("number").and_then(Value::as_i64).unwrap_or(0);
        match action {
            "opened" => {
                let pr_url = pr.get("html_url").and_then(Value::as_str).unwrap_or("");
                let head_ref = pr
                    .pointer("/head/ref")
                    .and_then(Value::as_str)
                    .unwrap_or("HEAD");
                self.tracker
                    .record_pr_created(&outcome_id, pr_number, pr_url, head_ref)?;
            }
            "closed" => {
                let merged = pr.get("state").and_then(Value::as_str) == Some("merged")
                    || pr.get("merged").and_then(Value::as_bool) == Some(true);
                if merged {
                    self.tracker.record_pr_merged(&outcome_id, pr_number)?;
                }
            }
            _ => {}
        }
        Ok(Some(outcome_id))
    }

    fn handle_workflow_run(&self, payload: &Value) -> crate::error::Result<Option<String>> {
        let run = payload.get("workflow_run").cloned().unwrap_or(Value::Null);
        let status = run.get("status").and_then(Value::as_str).unwrap_or("");
        let conclusion = run.get("conclusion").and_then(Value::as_str).unwrap_or("");
        let message = run
            .pointer("/head_commit/message")
            .and_then(Value::as_str)
            .unwrap_or("");

        let Some(decision_id) = extract_decision_id(message) else {
            return Ok(None);
        };

        let outcome_id = match self.graph.find_open_outcome(&decision_id)? {
            Some(outcome) => outcome.id,
            None => self.tracker.create_outcome(&decision_id)?.id,
        };

        if status == "completed" {
            let passed = conclusion == "success";
            self.tracker.record_ci_result(
                &outcome_id,
                passed,
                Some(&format!("CI workflow: {}", conclusion)),
            )?;
        }
        Ok(Some(outcome_id))
    }

    fn handle_check_run(&self, payload: &Value) -> crate::error::Result<Option<String>> {
        let check = payload.get("check_run").cloned().unwrap_or(Value::Null);
        let status = check.get("status").and_then(Value::as_str).unwrap_or("");
        if status != "completed" {
            return Ok(None);
        }
        let conclusion = check.get("conclusion").and_then(Value::as_str).unwrap_or("");
        let name = check.get("name").and_then(Value::as_str).unwrap_or("");
        let summary = check
            .pointer("/output/summary")
            .and_then(Value::as_str)
            .unwrap_or("");

        let Some(decision_id) = extract_decision_id(&format!("{} {}", name, summary)) else {
            return Ok(None);
        };

        let outcome_id = match self.graph.find_open_outcome(&decision_id)? {
            Some(outcome) => outcome.id,
            None => self.tracker.create_outcome(&decision_id)?.id,
        };

        let passed = conclusion == "success";
        self.tracker.record_ci_result(
            &outcome_id,
            passed,
            Some(&format!("Check run '{}': {}", name, conclusion)),
        )?;
        Ok(Some(outcome_id))
    }

    /// Generic CI event: `{decision_id?, outcome_id?, event_type, ...}`.
    fn handle_ci_event(&self, payload: &Value) -> crate::error::Result<Option<String>> {
        let decision_id = payload.get("decision_id").and_then(Value::as_str);
        let outcome_id = payload.get("outcome_id").and_then(Value::as_str);
        let event_type = payload.get("event_type").and_then(Value::as_str).unwrap_or("");
        let passed = payload.get("passed").and_then(Value::as_bool);
        let details = payload.get("details").and_then(Value::as_str).unwrap_or("");

        let outcome_id = match (outcome_id, decision_id) {
            (Some(id), _) => {
                if self.tracker.get_outcome(id)?.is_none() {
                    tracing::warn!(target: "membria::webhook", outcome_id = id, "outcome not found");
                    return Ok(None);
                }
                id.to_string()
            }
            (None, Some(decision_id)) => self.tracker.create_outcome(decision_id)?.id,
            (None, None) => {
                tracing::debug!(target: "membria::webhook", "CI event with no decision or outcome id");
                return Ok(None);
            }
        };

        match event_type {
            "ci_complete" | "test_result" => {
                if let Some(passed) = passed {
                    self.tracker
                        .record_ci_result(&outcome_id, passed, Some(details))?;
                }
            }
            "performance" => {
                let metrics: HashMap<String, Value> = payload
                    .get("metrics")
                    .and_then(Value::as_object)
                    .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                self.tracker.record_performance(&outcome_id, metrics)?;
            }
            "incident" => {
                let severity = payload
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("medium");
                self.tracker.record_incident(&outcome_id, severity, details)?;
            }
            _ => {}
        }
        Ok(Some(outcome_id))
    }
}
