//! Page parsing: one page image + one instruction → one model answer.
//!
//! [`PageParser`] is the seam between the batch coordinator and the remote
//! model. Two implementations ship with the crate:
//!
//! * [`VisionClient`]: talks to an OpenAI-compatible `chat/completions`
//!   endpoint directly: bearer credential, fixed model id, one user message
//!   carrying the page as an inline `data:image/png;base64,…` URI followed by
//!   the instruction text.
//! * [`ProviderParser`]: delegates to any `edgequake_llm::LLMProvider`
//!   (OpenAI, Anthropic, Gemini, Ollama, …).
//!
//! Requests are stateless: nothing from one page is ever sent with another.
//! Parsers never retry. Every failure comes back as a [`ParseError`] and the
//! coordinator records its text verbatim.

use crate::config::BatchConfig;
use crate::document::{Page, PageKind};
use crate::error::{ParseError, SliceError};
use crate::output::ParseResult;
use crate::pipeline::encode;
use crate::prompts::{image_instruction, page_instruction};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sends one page to a vision model.
#[async_trait]
pub trait PageParser: Send + Sync {
    /// Extract content from `page` following `instruction`.
    ///
    /// `timeout` bounds the network call. The page number is prompt context
    /// only.
    async fn parse_page(
        &self,
        page: &Page,
        instruction: &str,
        timeout: Duration,
    ) -> Result<String, ParseError>;

    /// [`parse_page`](Self::parse_page) collapsed into a [`ParseResult`].
    async fn parse(&self, page: &Page, instruction: &str, timeout: Duration) -> ParseResult {
        match self.parse_page(page, instruction, timeout).await {
            Ok(text) => ParseResult::Success(text),
            Err(e) => ParseResult::Failure(e.to_string()),
        }
    }
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&BatchConfig> for SamplingParams {
    fn from(c: &BatchConfig) -> Self {
        Self {
            max_tokens: c.max_tokens,
            temperature: c.temperature,
            top_p: c.top_p,
        }
    }
}

// ── OpenAI-compatible wire format ────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    max_tokens: usize,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Instruction text with the context sentence matching the page's origin.
fn request_text(page: &Page, instruction: &str) -> String {
    match page.kind {
        PageKind::Document => page_instruction(page.number, instruction),
        PageKind::Image => image_instruction(page.number, instruction),
    }
}

fn build_request<'a>(
    model: &'a str,
    page: &Page,
    instruction: &str,
    params: &SamplingParams,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![RequestMessage {
            role: "user",
            content: vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: encode::data_uri(page.media_type, &page.image),
                    },
                },
                ContentPart::Text {
                    text: request_text(page, instruction),
                },
            ],
        }],
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
    }
}

/// Pull the first choice's text out of a chat-completion body.
fn extract_content(body: &str) -> Result<String, ParseError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ParseError::MalformedResponse(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    Ok(content)
}

fn endpoint_url(base_url: &str) -> String {
    let base = base_url.trim();
    if base.ends_with('/') {
        format!("{}chat/completions", base)
    } else {
        format!("{}/chat/completions", base)
    }
}

fn map_transport(e: reqwest::Error) -> ParseError {
    if e.is_timeout() {
        ParseError::Timeout
    } else {
        ParseError::Transport(e.to_string())
    }
}

// ── VisionClient ─────────────────────────────────────────────────────────

/// Direct client for an OpenAI-compatible vision endpoint.
///
/// One pooled `reqwest::Client` is shared by all pages; the timeout is set
/// per request, and no request state survives between calls.
#[derive(Clone)]
pub struct VisionClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    params: SamplingParams,
}

impl fmt::Debug for VisionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

impl VisionClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        params: SamplingParams,
    ) -> Result<Self, SliceError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SliceError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: endpoint_url(base_url),
            model: model.into(),
            api_key: api_key.into(),
            params,
        })
    }

    /// Build from the endpoint fields of a [`BatchConfig`]. Fails without an API key.
    pub fn from_config(config: &BatchConfig) -> Result<Self, SliceError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| SliceError::InvalidConfig("API key is not set".into()))?;
        Self::new(&config.base_url, &config.model, api_key, SamplingParams::from(config))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PageParser for VisionClient {
    async fn parse_page(
        &self,
        page: &Page,
        instruction: &str,
        timeout: Duration,
    ) -> Result<String, ParseError> {
        let start = Instant::now();
        let body = build_request(&self.model, page, instruction, &self.params);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport)?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ParseError::Auth {
                status: status.as_u16(),
                body: text,
            });
        }
        if !status.is_success() {
            return Err(ParseError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let content = extract_content(&text)?;
        debug!(
            "Page {}: {} chars in {:?}",
            page.number,
            content.len(),
            start.elapsed()
        );
        Ok(content)
    }
}

// ── ProviderParser ───────────────────────────────────────────────────────

/// Adapter running pages through an edgequake-llm provider.
pub struct ProviderParser {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl ProviderParser {
    pub fn new(provider: Arc<dyn LLMProvider>, params: SamplingParams) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(params.temperature),
                max_tokens: Some(params.max_tokens),
                ..Default::default()
            },
        }
    }

    /// Instantiate a named provider (`openai`, `anthropic`, `gemini`, `ollama`, …).
    ///
    /// The provider reads its own credential from the environment
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, …).
    pub fn from_name(name: &str, model: &str, params: SamplingParams) -> Result<Self, SliceError> {
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            SliceError::InvalidConfig(format!("LLM provider '{}' is not configured: {}", name, e))
        })?;
        Ok(Self::new(provider, params))
    }
}

#[async_trait]
impl PageParser for ProviderParser {
    async fn parse_page(
        &self,
        page: &Page,
        instruction: &str,
        timeout: Duration,
    ) -> Result<String, ParseError> {
        let image = ImageData::new(encode::to_base64(&page.image), page.media_type);
        let text = request_text(page, instruction);
        let messages = vec![ChatMessage::user_with_images(text.as_str(), vec![image])];

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| ParseError::Timeout)?
            .map_err(|e| ParseError::Provider(format!("{}", e)))?;

        if response.content.trim().is_empty() {
            return Err(ParseError::EmptyResponse);
        }
        Ok(response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// What the canned server saw: request head and body.
    struct Captured {
        head: String,
        body: Vec<u8>,
    }

    /// Accept one connection on an ephemeral port, wait `delay`, answer with
    /// `status` and `body`. Returns the base URL to point a client at.
    async fn serve_once(
        status: u16,
        body: &'static str,
        delay: Duration,
    ) -> (String, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let (head_end, body_len) = loop {
                let n = sock.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending a full request");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                    let len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    break (end + 4, len);
                }
            };
            while buf.len() < head_end + body_len {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\n\
Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(response.as_bytes()).await;
            let _ = sock.shutdown().await;

            Captured {
                head: String::from_utf8_lossy(&buf[..head_end]).into_owned(),
                body: buf[head_end..].to_vec(),
            }
        });
        (format!("http://{addr}/v1"), handle)
    }

    async fn call(base: &str, timeout: Duration) -> Result<String, ParseError> {
        let client = VisionClient::new(base, "vision-pro", "sk-test", params()).unwrap();
        client.parse_page(&page(), "Summarise.", timeout).await
    }

    const OK_BODY: &str = r#"{"choices":[{"message":{"role":"assistant","content":"page text"}}]}"#;

    fn page() -> Page {
        Page::from_png(2, vec![1u8, 2, 3], 10, 10, 200)
    }

    fn params() -> SamplingParams {
        SamplingParams {
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    #[test]
    fn request_puts_image_before_instruction() {
        let req = build_request("model-x", &page(), "Summarise.", &params());
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "model-x");
        assert_eq!(json["max_tokens"], 4096);
        let content = &json["messages"][0]["content"];
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(content[1]["type"], "text");
        assert_eq!(
            content[1]["text"],
            "This is page 2 of the document. Summarise."
        );
        assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn extract_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "hello");
    }

    #[test]
    fn extract_rejects_empty_and_malformed() {
        assert_eq!(
            extract_content(r#"{"choices":[]}"#),
            Err(ParseError::EmptyResponse)
        );
        assert_eq!(
            extract_content(r#"{"choices":[{"message":{"content":"   "}}]}"#),
            Err(ParseError::EmptyResponse)
        );
        assert!(matches!(
            extract_content("<html>bad gateway</html>"),
            Err(ParseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn endpoint_url_joins_with_single_slash() {
        assert_eq!(
            endpoint_url("https://api.example.com/v3"),
            "https://api.example.com/v3/chat/completions"
        );
        assert_eq!(
            endpoint_url("https://api.example.com/v3/"),
            "https://api.example.com/v3/chat/completions"
        );
    }

    #[test]
    fn vision_client_requires_api_key() {
        let config = BatchConfig::default();
        assert!(matches!(
            VisionClient::from_config(&config),
            Err(SliceError::InvalidConfig(_))
        ));

        let config = BatchConfig::builder().api_key("sk-test").build().unwrap();
        let client = VisionClient::from_config(&config).unwrap();
        assert!(client.url().ends_with("/chat/completions"));
        assert!(!format!("{client:?}").contains("sk-test"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_failure() {
        // Port 9 (discard) on localhost is closed on any sane test machine.
        let client = VisionClient::new("http://127.0.0.1:9", "m", "k", params()).unwrap();
        let result = client
            .parse(&page(), "Summarise.", Duration::from_secs(5))
            .await;
        match result {
            ParseResult::Failure(reason) => assert!(!reason.is_empty()),
            ParseResult::Success(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn image_pages_are_introduced_as_images() {
        let img = Page::from_image(4, vec![1u8, 2, 3], "image/jpeg", 10, 10);
        let req = build_request("m", &img, "Describe.", &params());
        let json = serde_json::to_value(&req).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["image_url"]["url"], "data:image/jpeg;base64,AQID");
        assert_eq!(content[1]["text"], "This is image 4. Describe.");
    }

    #[tokio::test]
    async fn success_sends_bearer_key_and_a_single_user_message() {
        let (base, server) = serve_once(200, OK_BODY, Duration::ZERO).await;
        let text = call(&base, Duration::from_secs(5)).await.unwrap();
        assert_eq!(text, "page text");

        let seen = server.await.unwrap();
        let head = seen.head.to_ascii_lowercase();
        assert!(head.starts_with("post /v1/chat/completions "), "got {head}");
        assert!(head.contains("authorization: bearer sk-test"), "got {head}");

        let body: serde_json::Value = serde_json::from_slice(&seen.body).unwrap();
        assert_eq!(body["model"], "vision-pro");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "image_url");
        assert_eq!(
            messages[0]["content"][1]["text"],
            "This is page 2 of the document. Summarise."
        );
    }

    #[tokio::test]
    async fn unauthorized_and_forbidden_map_to_auth() {
        for status in [401u16, 403] {
            let body = r#"{"error":"bad key"}"#;
            let (base, _server) = serve_once(status, body, Duration::ZERO).await;
            match call(&base, Duration::from_secs(5)).await {
                Err(ParseError::Auth { status: s, body }) => {
                    assert_eq!(s, status);
                    assert!(body.contains("bad key"));
                }
                other => panic!("HTTP {status}: expected Auth, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn server_error_maps_to_http() {
        let (base, _server) = serve_once(500, "overloaded", Duration::ZERO).await;
        assert_eq!(
            call(&base, Duration::from_secs(5)).await,
            Err(ParseError::Http {
                status: 500,
                body: "overloaded".into()
            })
        );
    }

    #[tokio::test]
    async fn non_json_success_is_malformed() {
        let (base, _server) = serve_once(200, "<html>gateway</html>", Duration::ZERO).await;
        assert!(matches!(
            call(&base, Duration::from_secs(5)).await,
            Err(ParseError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn blank_content_is_empty_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  \n "}}]}"#;
        let (base, _server) = serve_once(200, body, Duration::ZERO).await;
        assert_eq!(
            call(&base, Duration::from_secs(5)).await,
            Err(ParseError::EmptyResponse)
        );
    }

    #[tokio::test]
    async fn slow_server_fails_with_bare_timeout_reason() {
        let (base, server) = serve_once(200, OK_BODY, Duration::from_secs(3)).await;
        let client = VisionClient::new(&base, "vision-pro", "sk-test", params()).unwrap();
        let result = client
            .parse(&page(), "Summarise.", Duration::from_millis(200))
            .await;
        assert_eq!(result, ParseResult::Failure("timeout".into()));
        server.abort();
    }
}
