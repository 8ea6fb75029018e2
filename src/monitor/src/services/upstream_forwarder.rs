//! # Upstream Forwarder
//!
//! Pure client for escalating L2 requests to the parent Monitor. Exhaustion
//! or a non-retryable failure yields `None`, which tells ingest to fall back
//! to the local decision engine.

use cortex_common::models::{ApiResponse, DecisionRequest, IssueReport, UpstreamDecision};
use cortex_common::retry::{retry_async, RequestError, RetryPolicy};
use std::time::Duration;
use tracing::{error, info};

pub struct UpstreamForwarder {
    client: reqwest::Client,
    policy: RetryPolicy,
    /// Registration token shared across the cluster tree; sent so the
    /// parent accepts the cross-monitor request.
    shared_secret: Option<String>,
}

impl Default for UpstreamForwarder {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl UpstreamForwarder {
    pub fn new(timeout: Duration) -> Self {
        Self::with_policy(timeout, RetryPolicy::patient())
    }

    pub fn with_policy(timeout: Duration, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            policy,
            shared_secret: None,
        }
    }

    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.shared_secret = Some(secret);
        }
        self
    }

    /// POST the compact L2 request to the parent's decision endpoint with
    /// the patient retry profile.
    pub async fn forward_decision_request(
        &self,
        issue: &IssueReport,
        agent_id: &str,
        upstream_url: &str,
    ) -> Option<UpstreamDecision> {
        let url = format!(
            "{}/api/v1/decisions/request",
            upstream_url.trim_end_matches('/')
        );

        let payload = DecisionRequest {
            agent_id: agent_id.to_string(),
            issue_type: issue.kind.clone(),
            issue_description: issue.description.clone(),
            severity: issue.severity,
            proposed_action: issue.proposed_fix.clone(),
            risk_assessment: issue.risk_assessment.clone(),
            details: issue.details.clone(),
        };

        info!(
            "forwarding L2 decision request to upstream {} for agent {}, issue: {}",
            upstream_url, agent_id, issue.kind
        );

        let result = retry_async(&self.policy, || {
            let client = self.client.clone();
            let url = url.clone();
            let payload = payload.clone();
            let secret = self.shared_secret.clone();
            async move {
                let mut request = client.post(&url).json(&payload);
                if let Some(secret) = &secret {
                    request = request.header("x-registration-token", secret);
                }
                let response = request.send().await?.error_for_status()?;

                let envelope: ApiResponse<UpstreamDecision> = response
                    .json()
                    .await
                    .map_err(|err| RequestError::Malformed(err.to_string()))?;

                envelope
                    .data
                    .ok_or_else(|| RequestError::Malformed("missing decision payload".to_string()))
            }
        })
        .await;

        match result {
            Ok(decision) => {
                info!(
                    "received decision from upstream: {} - {}",
                    decision.status.as_str().to_uppercase(),
                    decision.reason
                );
                Some(decision)
            }
            Err(err) => {
                error!("error forwarding to upstream after retries: {}", err);
                None
            }
        }
    }
}
