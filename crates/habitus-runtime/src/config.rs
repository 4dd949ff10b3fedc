//! Engine-wide configuration.
//!
//! [`EngineConfig`] gathers every tunable the engine needs. All sections
//! implement [`Default`] and `#[serde(default)]`, so a partial TOML or JSON
//! document fills in the rest.

use std::fmt;
use std::path::PathBuf;

use habitus_patterns::ExtractorConfig;
use serde::{Deserialize, Serialize};

use crate::recognizer::RecognizerConfig;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Base URL of the OpenAI-compatible model server.
    pub llm_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Hard limit on one analysis call.
    pub analysis_timeout_secs: u64,
    /// How long shutdown waits for in-flight cycles before aborting them.
    pub drain_timeout_secs: u64,
    pub max_in_flight: usize,
    pub recognizer: RecognizerConfig,
    pub extractor: ExtractorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("habitus.db"),
            llm_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            api_key: None,
            analysis_timeout_secs: 30,
            drain_timeout_secs: 20,
            max_in_flight: 8,
            recognizer: RecognizerConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Recognizer settings with the analysis timeout applied.
    pub fn effective_recognizer(&self) -> RecognizerConfig {
        let mut recognizer = self.recognizer.clone();
        recognizer.analyzer.timeout_secs = self.analysis_timeout_secs;
        recognizer
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("db_path", &self.db_path)
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("analysis_timeout_secs", &self.analysis_timeout_secs)
            .field("drain_timeout_secs", &self.drain_timeout_secs)
            .field("max_in_flight", &self.max_in_flight)
            .field("recognizer", &self.recognizer)
            .field("extractor", &self.extractor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let config = EngineConfig {
            api_key: Some("sk-secret".into()),
            ..EngineConfig::default()
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"model": "qwen2.5", "recognizer": {"posture": {"mode": "production", "every_n": 5}}}"#,
        )
        .unwrap();
        assert_eq!(config.model, "qwen2.5");
        assert_eq!(config.drain_timeout_secs, 20);
        assert_eq!(config.recognizer.min_relevant_executions, 3);
        assert_eq!(config.extractor.history_limit, 1000);
    }

    #[test]
    fn analysis_timeout_reaches_the_analyzer() {
        let config = EngineConfig {
            analysis_timeout_secs: 5,
            ..EngineConfig::default()
        };
        assert_eq!(config.effective_recognizer().analyzer.timeout_secs, 5);
    }
}
