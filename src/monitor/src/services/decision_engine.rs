//! # L2 Decision Engine
//!
//! Renders the issue into a prompt, consults the language model, and parses
//! the labeled-line verdict. Every failure mode degrades to `rejected` with
//! the cause in the reason; the engine never aborts ingest.

use cortex_common::models::{DecisionStatus, IssueReport};
use cortex_common::{IntentRecorder, IssueLevel};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::services::llm::LanguageModel;
use crate::store::{DecisionRecord, NewDecision, Store};

const DECISION_PROMPT_TEMPLATE: &str = r#"You are the decision assistant of an operations network. Analyze the
following issue and decide whether to approve the proposed remediation.

**Issue:**
- Type: {issue_type}
- Description: {issue_description}
- Severity: {severity}

**Proposed remediation:**
{proposed_action}

**Risk assessment (from the probe):**
{risk_assessment}

**Your task:**
1. Assess the severity and blast radius of the issue
2. Weigh the risk and side effects of the proposed remediation
3. Consider whether a safer alternative exists
4. Decide: APPROVE or REJECT

**Output format (exactly):**
DECISION: [APPROVE or REJECT]
REASON: [one or two short sentences]
ANALYSIS: [detailed analysis, optional]

**Principles:**
- Approve low-risk actions that plausibly resolve the issue
- Reject anything that could impact service availability or data safety
- Reject when there is not enough information to judge
- System stability and data safety come first
"#;

pub struct DecisionEngine {
    model: Arc<dyn LanguageModel>,
    store: Store,
    intents: Arc<IntentRecorder>,
}

impl DecisionEngine {
    pub fn new(model: Arc<dyn LanguageModel>, store: Store, intents: Arc<IntentRecorder>) -> Self {
        Self {
            model,
            store,
            intents,
        }
    }

    /// Decide one L2 issue and persist the decision.
    pub async fn analyze_and_decide(
        &self,
        issue: &IssueReport,
        agent_id: &str,
    ) -> Result<DecisionRecord, crate::MonitorError> {
        info!(
            "analyzing L2 issue from {}: {} - {}",
            agent_id,
            issue.kind,
            truncate(&issue.description, 50)
        );

        let prompt = render_prompt(issue);

        let (status, reason, analysis) = match self.model.complete(&prompt).await {
            Ok(output) => {
                debug!("llm response: {}", truncate(&output, 200));
                parse_llm_response(&output)
            }
            Err(err) => {
                error!("llm call failed: {}", err);
                (
                    DecisionStatus::Rejected,
                    format!("LLM analysis failed: {err}"),
                    None,
                )
            }
        };

        let decision = self
            .store
            .insert_decision(NewDecision {
                agent_id: agent_id.to_string(),
                issue_type: issue.kind.clone(),
                issue_description: issue.description.clone(),
                proposed_action: issue.proposed_fix.clone().unwrap_or_default(),
                llm_analysis: analysis.clone(),
                status,
                reason: reason.clone(),
            })
            .await?;

        info!(
            "decision made for {}/{}: {} - {}",
            agent_id,
            issue.kind,
            status.as_str().to_uppercase(),
            reason
        );

        self.intents
            .record_decision(
                agent_id,
                IssueLevel::L2,
                &issue.kind,
                &format!(
                    "LLM decision for {}: {} - {}",
                    issue.kind,
                    status.as_str().to_uppercase(),
                    reason
                ),
                status.as_str(),
                Some(&json!({
                    "issue_description": issue.description,
                    "proposed_action": issue.proposed_fix,
                    "severity": issue.severity,
                    "llm_reason": reason,
                    "llm_analysis": analysis,
                    "decision_id": decision.id,
                })),
            )
            .await;

        Ok(decision)
    }

    /// Serial batch: one LLM call at a time to stay inside provider rate
    /// limits; a failing issue is logged and skipped.
    pub async fn batch_analyze(
        &self,
        issues: &[IssueReport],
        agent_id: &str,
    ) -> Vec<DecisionRecord> {
        let mut decisions = Vec::new();

        for issue in issues {
            match self.analyze_and_decide(issue, agent_id).await {
                Ok(decision) => decisions.push(decision),
                Err(err) => {
                    error!("error analyzing issue {}: {}", issue.kind, err);
                }
            }
        }

        decisions
    }
}

fn render_prompt(issue: &IssueReport) -> String {
    DECISION_PROMPT_TEMPLATE
        .replace("{issue_type}", &issue.kind)
        .replace("{issue_description}", &issue.description)
        .replace("{severity}", issue.severity.as_str())
        .replace(
            "{proposed_action}",
            issue
                .proposed_fix
                .as_deref()
                .unwrap_or("(no remediation proposed)"),
        )
        .replace(
            "{risk_assessment}",
            issue
                .risk_assessment
                .as_deref()
                .unwrap_or("(no risk assessment provided)"),
        )
}

/// Line-oriented parse of the labeled response. Unparseable output defaults
/// to `rejected`, with the raw text preserved as the analysis.
fn parse_llm_response(output: &str) -> (DecisionStatus, String, Option<String>) {
    const FALLBACK_REASON: &str = "Could not parse LLM output";

    let mut status = DecisionStatus::Rejected;
    let mut reason = FALLBACK_REASON.to_string();
    let mut analysis = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("DECISION:") {
            let verdict = rest.trim().to_uppercase();
            if verdict.contains("APPROVE") {
                status = DecisionStatus::Approved;
            } else if verdict.contains("REJECT") {
                status = DecisionStatus::Rejected;
            }
        } else if let Some(rest) = line.strip_prefix("REASON:") {
            reason = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("ANALYSIS:") {
            analysis = Some(rest.trim().to_string());
        }
    }

    if reason == FALLBACK_REASON && !output.trim().is_empty() {
        analysis = Some(output.trim().to_string());
        reason = "See analysis".to_string();
    }

    (status, reason, analysis)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::testing::ScriptedModel;
    use chrono::Utc;
    use cortex_common::models::Severity;
    use std::collections::HashMap;

    fn issue(kind: &str, proposed_fix: Option<&str>) -> IssueReport {
        IssueReport {
            level: IssueLevel::L2,
            kind: kind.to_string(),
            description: format!("{kind} detected on host"),
            severity: Severity::Medium,
            proposed_fix: proposed_fix.map(String::from),
            risk_assessment: None,
            details: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    async fn engine(model: ScriptedModel) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(model),
            Store::open_in_memory().await.unwrap(),
            Arc::new(IntentRecorder::disabled()),
        )
    }

    #[test]
    fn parses_well_formed_approval() {
        let (status, reason, analysis) = parse_llm_response(
            "DECISION: APPROVE\nREASON: Low risk\nANALYSIS: Restarting a worker is safe",
        );
        assert_eq!(status, DecisionStatus::Approved);
        assert_eq!(reason, "Low risk");
        assert_eq!(analysis.as_deref(), Some("Restarting a worker is safe"));
    }

    #[test]
    fn parses_rejection_without_analysis() {
        let (status, reason, analysis) =
            parse_llm_response("DECISION: REJECT\nREASON: high risk of data loss");
        assert_eq!(status, DecisionStatus::Rejected);
        assert_eq!(reason, "high risk of data loss");
        assert!(analysis.is_none());
    }

    #[test]
    fn decision_match_is_by_substring() {
        let (status, _, _) =
            parse_llm_response("DECISION: I would APPROVE this action\nREASON: fine");
        assert_eq!(status, DecisionStatus::Approved);
    }

    #[test]
    fn tolerates_extra_lines_and_whitespace() {
        let (status, reason, _) = parse_llm_response(
            "Let me think about this.\n\n  DECISION: REJECT  \nsome rambling\n  REASON: unclear impact\nmore text",
        );
        assert_eq!(status, DecisionStatus::Rejected);
        assert_eq!(reason, "unclear impact");
    }

    #[test]
    fn malformed_output_defaults_to_rejected_with_raw_analysis() {
        let (status, reason, analysis) = parse_llm_response("I cannot help with that.");
        assert_eq!(status, DecisionStatus::Rejected);
        assert_eq!(reason, "See analysis");
        assert_eq!(analysis.as_deref(), Some("I cannot help with that."));
    }

    #[test]
    fn empty_output_defaults_to_rejected() {
        let (status, reason, analysis) = parse_llm_response("");
        assert_eq!(status, DecisionStatus::Rejected);
        assert_eq!(reason, "Could not parse LLM output");
        assert!(analysis.is_none());
    }

    #[tokio::test]
    async fn approval_is_persisted_with_reason() {
        let engine = engine(ScriptedModel::always("DECISION: APPROVE\nREASON: Low risk")).await;

        let decision = engine
            .analyze_and_decide(&issue("high_memory", Some("restart worker")), "agent-1")
            .await
            .unwrap();

        assert_eq!(decision.status, DecisionStatus::Approved);
        assert!(decision.reason.unwrap().contains("Low risk"));
        assert!(decision.executed_at.is_none());
        assert_eq!(decision.proposed_action, "restart worker");
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_rejection() {
        let engine = engine(ScriptedModel::new(vec![Err("connection reset".to_string())])).await;

        let decision = engine
            .analyze_and_decide(&issue("service_down", None), "agent-1")
            .await
            .unwrap();

        assert_eq!(decision.status, DecisionStatus::Rejected);
        assert!(decision.reason.unwrap().contains("LLM analysis failed"));
    }

    #[tokio::test]
    async fn batch_is_serial_and_failure_tolerant() {
        let model = ScriptedModel::new(vec![
            Ok("DECISION: APPROVE\nREASON: ok".to_string()),
            Err("rate limited".to_string()),
            Ok("DECISION: REJECT\nREASON: risky".to_string()),
        ]);
        let engine = engine(model).await;

        let issues = vec![
            issue("a", None),
            issue("b", None),
            issue("c", None),
        ];
        let decisions = engine.batch_analyze(&issues, "agent-1").await;

        // The failed call still yields a rejected decision, not a dropped one
        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[0].status, DecisionStatus::Approved);
        assert_eq!(decisions[1].status, DecisionStatus::Rejected);
        assert_eq!(decisions[2].status, DecisionStatus::Rejected);
    }

    #[tokio::test]
    async fn prompt_embeds_issue_fields() {
        let model = Arc::new(ScriptedModel::always("DECISION: APPROVE\nREASON: ok"));
        let engine = DecisionEngine::new(
            model.clone(),
            Store::open_in_memory().await.unwrap(),
            Arc::new(IntentRecorder::disabled()),
        );

        let mut subject = issue("cert_expiring", Some("renew certificate"));
        subject.risk_assessment = Some("renewal is non-disruptive".to_string());
        engine.analyze_and_decide(&subject, "agent-1").await.unwrap();

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("cert_expiring"));
        assert!(calls[0].contains("renew certificate"));
        assert!(calls[0].contains("renewal is non-disruptive"));
    }
}
