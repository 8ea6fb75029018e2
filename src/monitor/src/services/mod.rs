//! Monitor services: the decision path (LLM + upstream escalation), alert
//! aggregation, liveness sweeping, notification, and topology.

pub mod alert_aggregator;
pub mod decision_engine;
pub mod heartbeat;
pub mod llm;
pub mod notifier;
pub mod topology;
pub mod upstream_forwarder;

pub use alert_aggregator::AlertAggregator;
pub use decision_engine::DecisionEngine;
pub use heartbeat::HeartbeatChecker;
pub use llm::{AnthropicClient, LanguageModel, LlmError};
pub use notifier::Notifier;
pub use topology::TopologyService;
pub use upstream_forwarder::UpstreamForwarder;
