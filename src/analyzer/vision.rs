//! Vision API calls for defect description across the supported providers.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::image_prep::image_media_type;
use super::prompts::{build_analysis_prompt, SYSTEM_PROMPT};
use super::types::{AiAnalysis, DescribeRequest};
use super::{AnalyzerError, DefectDescriber};
use crate::config::{resolve_api_key, AiConfig, Provider};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const CLAUDE_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_VERSION: &str = "2023-06-01";

/// Caption placed before the reference image when two images are sent.
const REFERENCE_CAPTION: &str = "This is the reference image for comparison:";

/// HTTP client for a hosted vision-language model.
#[derive(Debug, Clone)]
pub struct VisionClient {
    provider: Provider,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl VisionClient {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, AnalyzerError> {
        Ok(Self {
            provider: config.provider,
            model: config.model_name().to_string(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            client: build_api_client(config.timeout_secs)?,
        })
    }

    /// Build a client for the configured provider, looking the key up in the
    /// environment and then the system keychain.
    pub fn from_config(config: &AiConfig) -> Result<Self, AnalyzerError> {
        let api_key = resolve_api_key(config.provider)?;
        Self::new(config, api_key)
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_openai(&self, request: &DescribeRequest) -> Result<String, AnalyzerError> {
        let body = build_openai_body(&self.model, self.max_tokens, self.temperature, request);
        let response = self
            .client
            .post(OPENAI_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let body_text = handle_api_response(response, "openai").await?;
        let resp_json = parse_wrapper(&body_text, "openai")?;
        extract_openai_content(&resp_json)
    }

    async fn call_claude(&self, request: &DescribeRequest) -> Result<String, AnalyzerError> {
        let body = build_claude_body(&self.model, self.max_tokens, self.temperature, request);
        let response = self
            .client
            .post(CLAUDE_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", CLAUDE_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let body_text = handle_api_response(response, "claude").await?;
        let resp_json = parse_wrapper(&body_text, "claude")?;
        extract_claude_text(&resp_json)
    }

    fn request_error(&self, e: reqwest::Error) -> AnalyzerError {
        let err = if e.is_timeout() {
            AnalyzerError::Timeout {
                provider: self.provider.as_str(),
                secs: self.timeout_secs,
            }
        } else {
            AnalyzerError::Request {
                provider: self.provider.as_str(),
                message: e.to_string(),
            }
        };
        error!("{}", err);
        err
    }
}

impl DefectDescriber for VisionClient {
    async fn describe(&self, request: &DescribeRequest) -> Result<AiAnalysis, AnalyzerError> {
        info!(
            "Requesting {} analysis from '{}' model '{}'",
            request.analysis_type.as_str(),
            self.provider.as_str(),
            self.model
        );

        let text = match self.provider {
            Provider::OpenAi => self.call_openai(request).await?,
            Provider::Claude => self.call_claude(request).await?,
        };

        let analysis = parse_analysis_response(&text);
        info!(
            "AI analysis: quality={}, defects={}, confidence={:.2}",
            analysis.overall_quality.as_str(),
            analysis.defects_found.len(),
            analysis.confidence_score
        );
        Ok(analysis)
    }
}

/// Turn the model's reply into an [`AiAnalysis`].
///
/// The reply may be wrapped in a markdown fence or surrounded by prose; the
/// outermost `{...}` is taken. Replies without parseable JSON become a
/// `needs_review` answer carrying the raw text.
pub fn parse_analysis_response(text: &str) -> AiAnalysis {
    let cleaned = strip_markdown_json(text);
    let json_slice = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => {
            warn!("No JSON object in AI response, using text fallback");
            return AiAnalysis::needs_review(text);
        }
    };

    match serde_json::from_str::<AiAnalysis>(json_slice) {
        Ok(analysis) => analysis,
        Err(e) => {
            warn!("Failed to parse JSON response ({}), using text fallback", e);
            AiAnalysis::needs_review(text)
        }
    }
}

/// Strip markdown code fences from an LLM response if present.
fn strip_markdown_json(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let after_open = match trimmed.find('\n') {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        };
        let cleaned = after_open.trim_end();
        match cleaned.strip_suffix("```") {
            Some(inner) => inner.trim().to_string(),
            None => cleaned.to_string(),
        }
    } else {
        trimmed.to_string()
    }
}

fn data_uri(base64: &str) -> String {
    format!("data:{};base64,{}", image_media_type(), base64)
}

fn build_openai_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    request: &DescribeRequest,
) -> Value {
    let prompt = build_analysis_prompt(request.analysis_type, request.context.as_deref());
    let mut content = vec![
        json!({"type": "text", "text": prompt}),
        json!({"type": "image_url", "image_url": {"url": data_uri(&request.image_base64)}}),
    ];
    if let Some(reference) = &request.reference_base64 {
        content.push(json!({"type": "text", "text": REFERENCE_CAPTION}));
        content.push(json!({"type": "image_url", "image_url": {"url": data_uri(reference)}}));
    }

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": content}
        ]
    })
}

fn build_claude_body(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    request: &DescribeRequest,
) -> Value {
    let image_block = |data: &str| {
        json!({
            "type": "image",
            "source": {"type": "base64", "media_type": image_media_type(), "data": data}
        })
    };

    let prompt = build_analysis_prompt(request.analysis_type, request.context.as_deref());
    let mut content = vec![image_block(&request.image_base64)];
    if let Some(reference) = &request.reference_base64 {
        content.push(json!({"type": "text", "text": REFERENCE_CAPTION}));
        content.push(image_block(reference));
    }
    content.push(json!({"type": "text", "text": prompt}));

    json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "system": SYSTEM_PROMPT,
        "messages": [
            {"role": "user", "content": content}
        ]
    })
}

/// `{ "choices": [{"message": {"content": "..."}}] }`
fn extract_openai_content(resp: &Value) -> Result<String, AnalyzerError> {
    resp["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let err = AnalyzerError::MissingContent("openai");
            error!("{}", err);
            err
        })
}

/// `{ "content": [{"type": "text", "text": "..."}] }`
fn extract_claude_text(resp: &Value) -> Result<String, AnalyzerError> {
    resp["content"]
        .as_array()
        .and_then(|blocks| {
            blocks
                .iter()
                .find(|b| b["type"] == "text")
                .and_then(|b| b["text"].as_str())
        })
        .map(|s| s.to_string())
        .ok_or_else(|| {
            let err = AnalyzerError::MissingContent("claude");
            error!("{}", err);
            err
        })
}

fn parse_wrapper(body: &str, provider: &'static str) -> Result<Value, AnalyzerError> {
    serde_json::from_str(body).map_err(|e| {
        let err = AnalyzerError::Wrapper {
            provider,
            message: e.to_string(),
        };
        error!("{}", err);
        err
    })
}

/// Build a reqwest client with the configured timeout for LLM API calls.
fn build_api_client(timeout_secs: u64) -> Result<reqwest::Client, AnalyzerError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AnalyzerError::Client(e.to_string()))
}

/// Check the status and read the body text.
async fn handle_api_response(
    response: reqwest::Response,
    provider: &'static str,
) -> Result<String, AnalyzerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        let err = AnalyzerError::Status {
            provider,
            status: status.as_u16(),
            body: truncate(&body, 1024),
        };
        error!("{}", err);
        return Err(err);
    }
    response.text().await.map_err(|e| AnalyzerError::Request {
        provider,
        message: format!("failed to read response body: {}", e),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
