//! Model server discovery.
//!
//! Pings the configured OpenAI-compatible server and lists the models it
//! serves via `GET /v1/models`. Ollama, vLLM and hosted APIs all expose this
//! endpoint.

use serde::Deserialize;

/// A single entry of the `/v1/models` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ServedModel {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ServedModel>,
}

fn models_url(base_url: &str) -> String {
    format!("{}/v1/models", base_url.trim_end_matches('/'))
}

fn parse_models(body: &str) -> Result<Vec<ServedModel>, String> {
    serde_json::from_str::<ModelList>(body)
        .map(|list| list.data)
        .map_err(|e| format!("Failed to parse model list: {}", e))
}

/// Fetch the models served at `base_url`.
///
/// Returns `Err(reason)` when the server is offline, refuses the key or
/// answers with something other than a model list.
pub fn fetch_models(base_url: &str, api_key: &str) -> Result<Vec<ServedModel>, String> {
    let url = models_url(base_url);
    let client = reqwest::blocking::Client::new();
    let mut request = client.get(&url);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }
    let response = request
        .send()
        .map_err(|e| format!("Model server unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Model server returned HTTP {}", response.status()));
    }
    let body = response
        .text()
        .map_err(|e| format!("Failed to read model list: {}", e))?;
    parse_models(&body)
}

/// `true` when `model` is served, allowing Ollama's implicit `:latest` tag.
pub fn is_served(models: &[ServedModel], model: &str) -> bool {
    models
        .iter()
        .any(|m| m.id == model || m.id.strip_suffix(":latest") == Some(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn models_url_ignores_trailing_slash() {
        assert_eq!(models_url("http://localhost:11434/"), "http://localhost:11434/v1/models");
    }

    #[test]
    fn parses_openai_model_list() {
        let models = parse_models(
            r#"{"object": "list", "data": [{"id": "llama3:latest", "object": "model"}, {"id": "qwen2.5"}]}"#,
        )
        .expect("parse");
        assert_eq!(models.len(), 2);
        assert!(is_served(&models, "llama3"));
        assert!(is_served(&models, "qwen2.5"));
        assert!(!is_served(&models, "mistral"));
    }

    #[test]
    fn rejects_other_payloads() {
        assert!(parse_models(r#"{"models": []}"#).is_err());
    }
}
