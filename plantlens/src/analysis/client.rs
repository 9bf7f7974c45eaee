//! Client for the external image-understanding service.
//!
//! The service is any OpenAI-compatible `chat/completions` endpoint that accepts image content
//! parts. The image travels inline as a base64 data URL next to the text prompt, and the free
//! text of the first choice is handed back to the caller for [`parse`](super::parse).

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::config::VisionConfig;

/// Longest slice of an upstream error body that is logged or returned.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// An uploaded image, encoded once for both the upstream call and the history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub content_type: String,
    pub base64: String,
}

impl EncodedImage {
    pub fn encode(content_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            content_type: content_type.into(),
            base64: STANDARD.encode(bytes),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.base64)
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        STANDARD.decode(&self.base64).context("stored image is not valid base64")
    }
}

/// Sends an image to an image-understanding model and returns its free-text description.
#[async_trait]
pub trait AnalyzeImage: Send + Sync {
    async fn analyze(&self, image: &EncodedImage) -> anyhow::Result<String>;
}

/// [`AnalyzeImage`] over an OpenAI-compatible chat completions API.
pub struct VisionClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    prompt: String,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> anyhow::Result<Self> {
        crate::install_crypto_provider();

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create vision HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            prompt: config.prompt.clone(),
        })
    }

    fn request_body(&self, image: &EncodedImage) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.prompt },
                        { "type": "image_url", "image_url": { "url": image.data_url() } }
                    ]
                }
            ]
        })
    }
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut short: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        short.push_str("...");
        short
    }
}

#[async_trait]
impl AnalyzeImage for VisionClient {
    #[instrument(skip_all, fields(model = %self.model, content_type = %image.content_type, image_len = image.base64.len()), err)]
    async fn analyze(&self, image: &EncodedImage) -> anyhow::Result<String> {
        let url = ensure_slash(&self.base_url)
            .join("chat/completions")
            .map_err(|e| anyhow!("Failed to construct chat completions URL: {}", e))?;
        debug!("Sending image for analysis to {}", url);

        let mut request = self.client.post(url.clone()).json(&self.request_body(image));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.context("Vision API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = truncate(&response.text().await.unwrap_or_default());
            tracing::error!(%status, %url, "Vision API returned an error");
            tracing::debug!("Vision API error body: {}", body);
            return Err(anyhow!("Vision API error: {} - {}", status, body));
        }

        let body_text = response.text().await.context("Failed to read vision API response")?;
        let body: Value = serde_json::from_str(&body_text).map_err(|e| {
            tracing::error!("Failed to parse vision API response as JSON: {}", e);
            anyhow!("error decoding vision API response: {}", e)
        })?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("Vision API response has no message content: {}", truncate(&body_text)))?;

        debug!(chars = content.len(), "Received analysis text");
        Ok(content.to_string())
    }
}

/// Canned [`AnalyzeImage`] for tests: replies with fixed text, or always fails.
#[cfg(test)]
pub struct StaticAnalyzer {
    reply: Result<String, String>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl StaticAnalyzer {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            calls: Default::default(),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(message.into()),
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl AnalyzeImage for StaticAnalyzer {
    async fn analyze(&self, _image: &EncodedImage) -> anyhow::Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.reply.clone().map_err(|message| anyhow!(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vision_config(base_url: &str, api_key: Option<&str>) -> VisionConfig {
        VisionConfig {
            base_url: Url::parse(base_url).unwrap(),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }
            ]
        })
    }

    #[test]
    fn test_encoded_image() {
        let image = EncodedImage::encode("image/png", b"hello");
        assert_eq!(image.base64, "aGVsbG8=");
        assert_eq!(image.data_url(), "data:image/png;base64,aGVsbG8=");
        assert_eq!(image.decode().unwrap(), b"hello");
    }

    #[test]
    fn test_ensure_slash() {
        let url = Url::parse("https://api.openai.com/v1").unwrap();
        assert_eq!(ensure_slash(&url).join("chat/completions").unwrap().as_str(), "https://api.openai.com/v1/chat/completions");

        let url = Url::parse("https://api.openai.com/v1/").unwrap();
        assert_eq!(ensure_slash(&url).as_str(), "https://api.openai.com/v1/");
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS + 10);
        let short = truncate(&body);
        assert_eq!(short.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(short.ends_with("..."));
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn test_analyze_sends_prompt_and_image() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Plant name\nAloe Vera")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = vision_config(&format!("{}/v1", mock_server.uri()), Some("sk-test"));
        let client = VisionClient::new(&config).unwrap();
        let text = client.analyze(&EncodedImage::encode("image/png", b"hello")).await.unwrap();
        assert_eq!(text, "Plant name\nAloe Vera");

        let requests = mock_server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], config.model.as_str());
        assert_eq!(body["max_tokens"], 500);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], config.prompt.as_str());
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,aGVsbG8=");
    }

    #[tokio::test]
    async fn test_analyze_without_api_key_sends_no_auth_header() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&mock_server)
            .await;

        let client = VisionClient::new(&vision_config(&mock_server.uri(), None)).unwrap();
        client.analyze(&EncodedImage::encode("image/jpeg", b"img")).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_analyze_upstream_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = VisionClient::new(&vision_config(&mock_server.uri(), Some("bad"))).unwrap();
        let err = client.analyze(&EncodedImage::encode("image/jpeg", b"img")).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("401"), "{message}");
        assert!(message.contains("invalid api key"), "{message}");
    }

    #[tokio::test]
    async fn test_analyze_missing_content() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let client = VisionClient::new(&vision_config(&mock_server.uri(), None)).unwrap();
        let err = client.analyze(&EncodedImage::encode("image/jpeg", b"img")).await.unwrap_err();
        assert!(err.to_string().contains("no message content"));
    }

    #[tokio::test]
    async fn test_analyze_invalid_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&mock_server)
            .await;

        let client = VisionClient::new(&vision_config(&mock_server.uri(), None)).unwrap();
        let err = client.analyze(&EncodedImage::encode("image/jpeg", b"img")).await.unwrap_err();
        assert!(err.to_string().contains("error decoding"));
    }

    #[tokio::test]
    async fn test_analyze_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("late")).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let mut config = vision_config(&mock_server.uri(), None);
        config.timeout = Duration::from_millis(100);
        let client = VisionClient::new(&config).unwrap();
        assert!(client.analyze(&EncodedImage::encode("image/jpeg", b"img")).await.is_err());
    }

    #[tokio::test]
    async fn test_static_analyzer() {
        let analyzer = StaticAnalyzer::new("Plant name\nFern");
        let image = EncodedImage::encode("image/jpeg", b"img");
        assert_eq!(analyzer.analyze(&image).await.unwrap(), "Plant name\nFern");

        let failing = StaticAnalyzer::failing("boom");
        assert_eq!(failing.analyze(&image).await.unwrap_err().to_string(), "boom");
        assert_eq!(analyzer.calls(), 1);
        assert_eq!(failing.calls(), 1);
    }
}
