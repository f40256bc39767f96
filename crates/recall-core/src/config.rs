use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Tutoring engine configuration (recall.toml + RECALL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            llm: LlmConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Options recognized by the session engine (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Cap on checklist size at session start.
    #[serde(default = "default_max_target_points")]
    pub max_target_points_per_session: u32,
    /// Minimum confidence for the evaluator to accept a demonstration.
    #[serde(default = "default_evaluator_confidence_threshold")]
    pub evaluator_confidence_threshold: f64,
    /// Confidence above which the detector enters a rabbithole.
    #[serde(default = "default_rabbithole_enter_threshold")]
    pub rabbithole_enter_threshold: f64,
    /// Confidence above which the detector returns from a rabbithole.
    #[serde(default = "default_rabbithole_return_threshold")]
    pub rabbithole_return_threshold: f64,
    /// FSRS target retention used when computing due dates.
    #[serde(default = "default_desired_retention")]
    pub desired_retention: f64,
    /// Number of recent messages the evaluator considers per call.
    #[serde(default = "default_evaluator_recent_message_window")]
    pub evaluator_recent_message_window: u32,
    /// Gaps between user turns longer than this do not count toward active time.
    #[serde(default = "default_stall_threshold_ms")]
    pub stall_threshold_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_target_points_per_session: default_max_target_points(),
            evaluator_confidence_threshold: default_evaluator_confidence_threshold(),
            rabbithole_enter_threshold: default_rabbithole_enter_threshold(),
            rabbithole_return_threshold: default_rabbithole_return_threshold(),
            desired_retention: default_desired_retention(),
            evaluator_recent_message_window: default_evaluator_recent_message_window(),
            stall_threshold_ms: default_stall_threshold_ms(),
        }
    }
}

/// Timeouts applied to every LLM collaborator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_max_target_points() -> u32 {
    10
}
fn default_evaluator_confidence_threshold() -> f64 {
    0.5
}
fn default_rabbithole_enter_threshold() -> f64 {
    0.7
}
fn default_rabbithole_return_threshold() -> f64 {
    0.6
}
fn default_desired_retention() -> f64 {
    0.9
}
fn default_evaluator_recent_message_window() -> u32 {
    6
}
fn default_stall_threshold_ms() -> u64 {
    30_000
}
fn default_llm_timeout_seconds() -> u64 {
    60
}
fn default_port() -> u16 {
    8099
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}

impl RecallConfig {
    /// Load config from a TOML file with RECALL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.recall/recall.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RecallConfig = Figment::from(figment::providers::Serialized::defaults(RecallConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RECALL_").split("__"))
            .extract()
            .map_err(|e| EngineError::Internal(format!("config: {e}")))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recall/recall.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.max_target_points_per_session, 10);
        assert_eq!(cfg.evaluator_confidence_threshold, 0.5);
        assert_eq!(cfg.rabbithole_enter_threshold, 0.7);
        assert_eq!(cfg.rabbithole_return_threshold, 0.6);
        assert_eq!(cfg.desired_retention, 0.9);
        assert_eq!(cfg.evaluator_recent_message_window, 6);
        assert_eq!(cfg.stall_threshold_ms, 30_000);
    }
}
