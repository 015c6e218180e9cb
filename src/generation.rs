//! Text generation provider abstraction and implementations.
//!
//! Defines the [`TextGenerator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]**: never produces text; used when generation is not configured.
//! - **[`OpenAiGenerator`]**: calls an OpenAI-compatible chat completions API.
//! - **[`AnthropicGenerator`]**: calls the Anthropic Messages API.
//! - **[`OllamaGenerator`]**: calls a local Ollama instance's `/api/generate` endpoint.
//!
//! The pipeline is synchronous, so providers use the blocking `reqwest`
//! client. Use [`create_generator`] to build the provider named in
//! `[generation]`.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const ANTHROPIC_DEFAULT_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("text generation is disabled")]
    Disabled,
    #[error("{0} environment variable not set")]
    MissingKey(&'static str),
    #[error("generation.model required for the {0} provider")]
    MissingModel(String),
    #[error("unknown generation provider: {0}")]
    UnknownProvider(String),
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    #[error("invalid {provider} response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned no text")]
    Empty { provider: &'static str },
}

impl GenerateError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerateError::Api { status, .. } => *status == 429 || *status >= 500,
            GenerateError::Transport { .. } => true,
            _ => false,
        }
    }
}

/// A request to the generation service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Output limits passed alongside a prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraints {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Constraints {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Black-box text completion capability.
pub trait TextGenerator: Send + Sync {
    /// Provider name used in log output (`"openai"`, `"anthropic"`, `"ollama"`, `"disabled"`).
    fn name(&self) -> &str;

    fn generate(&self, prompt: &Prompt, constraints: &Constraints) -> Result<String, GenerateError>;

    /// Whether calling [`TextGenerator::generate`] can produce text at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Builds the provider configured in `[generation]`.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn TextGenerator>, GenerateError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiGenerator::new(config)?)),
        "anthropic" => Ok(Box::new(AnthropicGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => Err(GenerateError::UnknownProvider(other.to_string())),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    fn generate(&self, _prompt: &Prompt, _constraints: &Constraints) -> Result<String, GenerateError> {
        Err(GenerateError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// ============ Shared HTTP plumbing ============

struct HttpSettings {
    client: reqwest::blocking::Client,
    max_retries: u32,
}

impl HttpSettings {
    fn new(config: &GenerationConfig, provider: &'static str) -> Result<Self, GenerateError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerateError::Transport {
                provider,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }
}

/// Runs `attempt_fn` up to `max_retries + 1` times, sleeping with
/// exponential backoff between retryable failures.
fn with_retry<F>(provider: &'static str, max_retries: u32, mut attempt_fn: F) -> Result<String, GenerateError>
where
    F: FnMut() -> Result<String, GenerateError>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, delay_secs = delay.as_secs(), "retrying generation");
            std::thread::sleep(delay);
        }
        match attempt_fn() {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() => {
                tracing::debug!(provider, attempt, error = %e, "transient generation failure");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(GenerateError::Empty { provider }))
}

fn post_json(
    settings: &HttpSettings,
    provider: &'static str,
    url: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
) -> Result<serde_json::Value, GenerateError> {
    let mut request = settings
        .client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request.send().map_err(|e| GenerateError::Transport {
        provider,
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(GenerateError::Api {
            provider,
            status: status.as_u16(),
            body,
        });
    }
    response
        .json::<serde_json::Value>()
        .map_err(|e| GenerateError::InvalidResponse {
            provider,
            message: e.to_string(),
        })
}

// ============ OpenAI ============

/// Chat completions client (`POST {url}/chat/completions`).
/// Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    model: String,
    url: String,
    api_key: String,
    http: HttpSettings,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerateError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| GenerateError::MissingModel("openai".to_string()))?;
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| GenerateError::MissingKey("OPENAI_API_KEY"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            http: HttpSettings::new(config, "openai")?,
        })
    }
}

impl TextGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, prompt: &Prompt, constraints: &Constraints) -> Result<String, GenerateError> {
        let mut messages = Vec::new();
        if !prompt.system.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": prompt.system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt.user}));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": constraints.max_tokens,
            "temperature": constraints.temperature,
        });
        let endpoint = format!("{}/chat/completions", self.url);
        let auth = format!("Bearer {}", self.api_key);
        with_retry("openai", self.http.max_retries, || {
            let headers = [("Authorization", auth.as_str())];
            let json = post_json(&self.http, "openai", &endpoint, &headers, &body)?;
            parse_openai_response(&json)
        })
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String, GenerateError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| GenerateError::InvalidResponse {
            provider: "openai",
            message: "missing choices[0].message.content".to_string(),
        })?;
    non_empty("openai", content)
}

// ============ Anthropic ============

/// Messages API client (`POST {url}/v1/messages`).
/// Requires `ANTHROPIC_API_KEY`.
pub struct AnthropicGenerator {
    model: String,
    url: String,
    api_key: String,
    http: HttpSettings,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerateError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| GenerateError::MissingModel("anthropic".to_string()))?;
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| GenerateError::MissingKey("ANTHROPIC_API_KEY"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| ANTHROPIC_DEFAULT_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            http: HttpSettings::new(config, "anthropic")?,
        })
    }
}

impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn generate(&self, prompt: &Prompt, constraints: &Constraints) -> Result<String, GenerateError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": constraints.max_tokens,
            "temperature": constraints.temperature,
            "messages": [{"role": "user", "content": prompt.user}],
        });
        if !prompt.system.is_empty() {
            body["system"] = serde_json::Value::String(prompt.system.clone());
        }
        let endpoint = format!("{}/v1/messages", self.url);
        let headers = [
            ("x-api-key", self.api_key.as_str()),
            ("anthropic-version", ANTHROPIC_VERSION),
        ];
        with_retry("anthropic", self.http.max_retries, || {
            let json = post_json(&self.http, "anthropic", &endpoint, &headers, &body)?;
            parse_anthropic_response(&json)
        })
    }
}

/// Takes the first `text` block of `content`.
fn parse_anthropic_response(json: &serde_json::Value) -> Result<String, GenerateError> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b.get("type").and_then(|t| t.as_str()).unwrap_or("text") == "text")
        })
        .and_then(|b| b.get("text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| GenerateError::InvalidResponse {
            provider: "anthropic",
            message: "missing content[0].text".to_string(),
        })?;
    non_empty("anthropic", content)
}

// ============ Ollama ============

/// Local Ollama client (`POST {url}/api/generate`, non-streaming).
pub struct OllamaGenerator {
    model: String,
    url: String,
    http: HttpSettings,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerateError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| GenerateError::MissingModel("ollama".to_string()))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            http: HttpSettings::new(config, "ollama")?,
        })
    }
}

impl TextGenerator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    fn generate(&self, prompt: &Prompt, constraints: &Constraints) -> Result<String, GenerateError> {
        let body = serde_json::json!({
            "model": self.model,
            "system": prompt.system,
            "prompt": prompt.user,
            "stream": false,
            "options": {
                "temperature": constraints.temperature,
                "num_predict": constraints.max_tokens,
            },
        });
        let endpoint = format!("{}/api/generate", self.url);
        with_retry("ollama", self.http.max_retries, || {
            let json = post_json(&self.http, "ollama", &endpoint, &[], &body).map_err(|e| match e {
                GenerateError::Transport { message, .. } => GenerateError::Transport {
                    provider: "ollama",
                    message: format!("is Ollama running at {}? {}", self.url, message),
                },
                other => other,
            })?;
            parse_ollama_response(&json)
        })
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String, GenerateError> {
    let content = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| GenerateError::InvalidResponse {
            provider: "ollama",
            message: "missing response field".to_string(),
        })?;
    non_empty("ollama", content)
}

fn non_empty(provider: &'static str, text: &str) -> Result<String, GenerateError> {
    let text = text.trim();
    if text.is_empty() {
        Err(GenerateError::Empty { provider })
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn disabled_generator_never_produces_text() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.name(), "disabled");
        assert!(!generator.is_enabled());
        let err = generator
            .generate(&Prompt::default(), &Constraints::from_config(&GenerationConfig::default()))
            .unwrap_err();
        assert!(matches!(err, GenerateError::Disabled));
    }

    #[test]
    fn parses_openai_chat_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "  Atoms are small.\n"}}]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "Atoms are small.");
        assert!(parse_openai_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn parses_anthropic_messages_response() {
        let json = serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Covalent bonds share electrons.\n"}],
            "stop_reason": "end_turn"
        });
        assert_eq!(
            parse_anthropic_response(&json).unwrap(),
            "Covalent bonds share electrons."
        );
        assert!(matches!(
            parse_anthropic_response(&serde_json::json!({"content": []})),
            Err(GenerateError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn anthropic_requires_a_model() {
        let config = GenerationConfig {
            provider: "anthropic".to_string(),
            model: None,
            ..GenerationConfig::default()
        };
        assert!(matches!(
            create_generator(&config),
            Err(GenerateError::MissingModel(_))
        ));
    }

    #[test]
    fn parses_ollama_response() {
        let json = serde_json::json!({"model": "llama3", "response": "Text", "done": true});
        assert_eq!(parse_ollama_response(&json).unwrap(), "Text");
        let empty = serde_json::json!({"response": "   "});
        assert!(matches!(
            parse_ollama_response(&empty),
            Err(GenerateError::Empty { .. })
        ));
    }

    #[test]
    fn client_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result = with_retry("openai", 3, || {
            calls.set(calls.get() + 1);
            Err(GenerateError::Api {
                provider: "openai",
                status: 401,
                body: "bad key".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_errors_exhaust_retries() {
        let calls = Cell::new(0);
        let result = with_retry("ollama", 1, || {
            calls.set(calls.get() + 1);
            Err(GenerateError::Api {
                provider: "ollama",
                status: 503,
                body: String::new(),
            })
        });
        assert!(matches!(result, Err(GenerateError::Api { status: 503, .. })));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unreachable_ollama_is_a_transport_error() {
        let config = GenerationConfig {
            provider: "ollama".to_string(),
            model: Some("llama3".to_string()),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 2,
            ..GenerationConfig::default()
        };
        let generator = create_generator(&config).unwrap();
        let err = generator
            .generate(
                &Prompt {
                    system: String::new(),
                    user: "hello".to_string(),
                },
                &Constraints::from_config(&config),
            )
            .unwrap_err();
        assert!(matches!(err, GenerateError::Transport { .. }));
    }
}
