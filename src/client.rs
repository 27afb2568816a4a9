use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;
use utf8path::Path;

use crate::client_logger::ClientLogger;
use crate::device::DeviceIdentity;
use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::sse::{EventStream, map_body_errors};
use crate::types::{
    ApiCaseStudyDetail, CaseStudy, ChatMessage, MessageCreateParams, Session,
    SessionCreateParams, SessionState,
};

/// Server used when neither configuration nor environment names one.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable that overrides [`DEFAULT_API_URL`].
pub const API_URL_ENV: &str = "CASEBREAKER_API_URL";

const API_PREFIX: &str = "api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// What the configured timeout bounds for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    /// The whole exchange, body included.
    Request,
    /// Only the wait for the response headers; the body may stream for as
    /// long as the server keeps it open.
    Headers,
}

/////////////////////////////////////////// ClientConfig ///////////////////////////////////////////

/// Connection settings for [`CaseBreaker`].
///
/// Every field has a default, so a YAML file need only name what it changes:
///
/// ```yaml
/// base_url: https://casebreaker.example.edu
/// timeout_ms: 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server root; `/api/v1/` is appended unless already present.
    pub base_url: String,
    /// Per-request timeout, in milliseconds.  For `send_message` it bounds
    /// only the wait for the reply stream to open.
    pub timeout_ms: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    /// Defaults, with the base URL taken from `CASEBREAKER_API_URL` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = env::var(API_URL_ENV)
            && !url.trim().is_empty()
        {
            config.base_url = url;
        }
        config
    }

    /// Load a configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_str())
            .map_err(|e| Error::io(format!("Failed to read {}", path.as_str()), e))?;
        serde_yaml::from_str(&text).map_err(|e| {
            Error::serialization(
                format!("Failed to parse {}: {}", path.as_str(), e),
                Some(Box::new(e)),
            )
        })
    }

    /// Set the server root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the total number of attempts per request.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the pause between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// Resolve the versioned API root, always ending in `/`.
    pub fn api_base(&self) -> Result<Url> {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        let root = if trimmed.ends_with(API_PREFIX) {
            format!("{trimmed}/")
        } else {
            format!("{trimmed}/{API_PREFIX}/")
        };
        Url::parse(&root)
            .map_err(|e| Error::url(format!("Invalid base URL {:?}: {}", self.base_url, e), Some(e)))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

//////////////////////////////////////////// CaseBreaker ////////////////////////////////////////////

/// Client for the CaseBreaker tutoring API.
#[derive(Clone)]
pub struct CaseBreaker {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
    logger: Option<Arc<dyn ClientLogger>>,
}

impl CaseBreaker {
    /// Create a new client.
    ///
    /// The server is read from the CASEBREAKER_API_URL environment variable,
    /// falling back to [`DEFAULT_API_URL`].
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::from_env())
    }

    /// Create a new client with custom settings.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = ReqwestClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {}", e),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url: config.api_base()?,
            timeout,
            retry: config.retry_policy(),
            logger: None,
        })
    }

    /// Attach a logger that observes every request and stream event.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The versioned API root requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The retry policy applied to every request.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Create a session for `case_study_id` on behalf of `device_id`.
    ///
    /// Not idempotent: every call creates a new session.
    pub async fn create_session(&self, case_study_id: i64, device_id: &str) -> Result<Session> {
        let url = self.endpoint(&["sessions"])?;
        let body = to_json(&SessionCreateParams::new(case_study_id, device_id))?;
        let session: Session = self
            .request_json("create_session", Method::POST, &url, Some(&body))
            .await?;
        debug!(
            session_id = session.id,
            case_study_id, "created tutoring session"
        );
        Ok(session)
    }

    /// Create a session, resolving the device identifier from `identity`.
    pub async fn start_session(
        &self,
        case_study_id: i64,
        identity: &DeviceIdentity,
    ) -> Result<Session> {
        let device_id = identity.device_id()?;
        self.create_session(case_study_id, device_id).await
    }

    /// List the sessions previously created by `device_id`.
    pub async fn list_sessions(&self, device_id: &str) -> Result<Vec<Session>> {
        let mut url = self.endpoint(&["sessions"])?;
        url.query_pairs_mut().append_pair("device_id", device_id);
        self.request_json("list_sessions", Method::GET, &url, None)
            .await
    }

    /// Fetch a session together with its completed checkpoints.
    pub async fn get_session(&self, session_id: i64) -> Result<SessionState> {
        let url = self.endpoint(&["sessions", &session_id.to_string()])?;
        self.request_json("get_session", Method::GET, &url, None)
            .await
    }

    /// Fetch the full message history of a session, oldest first.
    pub async fn get_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        let url = self.endpoint(&["sessions", &session_id.to_string(), "messages"])?;
        let messages: Vec<ChatMessage> = self
            .request_json("get_messages", Method::GET, &url, None)
            .await?;
        if let Some(logger) = &self.logger {
            logger.log_messages(session_id, &messages);
        }
        Ok(messages)
    }

    /// Send a user message and return the assistant's reply as a live stream.
    ///
    /// Retries cover opening the stream only; once bytes flow, a failure is
    /// reported through the stream itself.
    pub async fn send_message(
        &self,
        session_id: i64,
        content: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<EventStream> {
        let url = self.endpoint(&["sessions", &session_id.to_string(), "messages"])?;
        let body = to_json(&MessageCreateParams::new(
            content,
            checkpoint_id.map(String::from),
        ))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );

        let (url_ref, body_ref, headers_ref) = (&url, &body, &headers);
        let response = self
            .retry
            .run("send_message", move || {
                self.execute(
                    Method::POST,
                    url_ref,
                    Some(body_ref),
                    headers_ref.clone(),
                    Deadline::Headers,
                )
            })
            .await?;

        let events = EventStream::new(map_body_errors(response.bytes_stream()));
        Ok(match self.logger.clone() {
            Some(logger) => EventStream::from_events(events.inspect(move |event| {
                if let Ok(event) = event {
                    logger.log_stream_event(session_id, event);
                }
            })),
            None => events,
        })
    }

    /// Explicitly mark a checkpoint complete.
    pub async fn complete_checkpoint(&self, session_id: i64, checkpoint_id: &str) -> Result<()> {
        let url = self.endpoint(&[
            "sessions",
            &session_id.to_string(),
            "checkpoints",
            checkpoint_id,
            "complete",
        ])?;
        let url_ref = &url;
        self.retry
            .run("complete_checkpoint", move || async move {
                self.execute(Method::POST, url_ref, None, HeaderMap::new(), Deadline::Request)
                    .await
                    .map(drop)
            })
            .await
    }

    /// Fetch a case study, normalized for display.
    pub async fn get_case_study(&self, case_study_id: i64) -> Result<CaseStudy> {
        let url = self.endpoint(&["case-studies", &case_study_id.to_string()])?;
        let detail: ApiCaseStudyDetail = self
            .request_json("get_case_study", Method::GET, &url, None)
            .await?;
        Ok(detail.into())
    }

    /// Resolve path segments against the API root, escaping each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::url(format!("{} cannot be a base URL", self.base_url), None))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue a JSON request under the retry policy and decode the reply.
    async fn request_json<T: DeserializeOwned>(
        &self,
        what: &str,
        method: Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<T> {
        self.retry
            .run(what, move || {
                let method = method.clone();
                async move {
                    let response = self
                        .execute(method, url, body, HeaderMap::new(), Deadline::Request)
                        .await?;
                    response.json::<T>().await.map_err(|e| {
                        Error::serialization(
                            format!("Failed to parse response: {}", e),
                            Some(Box::new(e)),
                        )
                    })
                }
            })
            .await
    }

    /// Issue one attempt of a request and check its status.
    async fn execute(
        &self,
        method: Method,
        url: &Url,
        body: Option<&Value>,
        extra_headers: HeaderMap,
        deadline: Deadline,
    ) -> Result<Response> {
        if let Some(logger) = &self.logger {
            logger.log_request(method.as_str(), url.as_str(), body);
        }
        debug!(method = %method, url = %url, "sending request");
        CLIENT_REQUESTS.click();
        let start = Instant::now();

        let mut request = self
            .client
            .request(method, url.clone())
            .headers(self.default_headers())
            .headers(extra_headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        let result = match deadline {
            Deadline::Request => request.timeout(self.timeout).send().await,
            Deadline::Headers => match tokio::time::timeout(self.timeout, request.send()).await {
                Ok(result) => result,
                Err(_) => {
                    CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
                    CLIENT_REQUEST_ERRORS.click();
                    return Err(Error::timeout(
                        "Timed out waiting for the reply stream to open",
                        Some(self.timeout.as_secs_f64()),
                    ));
                }
            },
        };
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            self.map_send_error(e)
        })?;
        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }
        Ok(response)
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {}", e),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
        }
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();
        let resource = response.url().path().to_string();

        #[derive(Deserialize)]
        struct ErrorResponse {
            detail: Option<Value>,
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {}", e),
                    Some(Box::new(e)),
                );
            }
        };

        let message = match serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.detail)
        {
            Some(Value::String(detail)) => detail,
            Some(Value::Null) | None => format!("HTTP error! status: {}", status_code),
            Some(detail) => detail.to_string(),
        };

        match status_code {
            404 => Error::not_found(message, Some(resource)),
            _ => Error::api(status_code, message),
        }
    }
}

impl std::fmt::Debug for CaseBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseBreaker")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        Error::serialization(
            format!("Failed to encode request: {}", e),
            Some(Box::new(e)),
        )
    })
}

//////////////////////////////////////////// ChatBackend ////////////////////////////////////////////

/// The operations the chat controller needs from a server.
///
/// [`CaseBreaker`] is the production implementation; tests substitute
/// scripted backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Fetch a session and its completed checkpoints.
    async fn get_session(&self, session_id: i64) -> Result<SessionState>;

    /// Fetch a session's history.
    async fn get_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>>;

    /// Send a user message, returning the reply stream.
    async fn send_message(
        &self,
        session_id: i64,
        content: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<EventStream>;

    /// Explicitly mark a checkpoint complete.
    async fn complete_checkpoint(&self, session_id: i64, checkpoint_id: &str) -> Result<()>;

    /// Fetch a case study.
    async fn get_case_study(&self, case_study_id: i64) -> Result<CaseStudy>;
}

#[async_trait]
impl ChatBackend for CaseBreaker {
    async fn get_session(&self, session_id: i64) -> Result<SessionState> {
        CaseBreaker::get_session(self, session_id).await
    }

    async fn get_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        CaseBreaker::get_messages(self, session_id).await
    }

    async fn send_message(
        &self,
        session_id: i64,
        content: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<EventStream> {
        CaseBreaker::send_message(self, session_id, content, checkpoint_id).await
    }

    async fn complete_checkpoint(&self, session_id: i64, checkpoint_id: &str) -> Result<()> {
        CaseBreaker::complete_checkpoint(self, session_id, checkpoint_id).await
    }

    async fn get_case_study(&self, case_study_id: i64) -> Result<CaseStudy> {
        CaseBreaker::get_case_study(self, case_study_id).await
    }
}

#[async_trait]
impl<B: ChatBackend + ?Sized> ChatBackend for Arc<B> {
    async fn get_session(&self, session_id: i64) -> Result<SessionState> {
        (**self).get_session(session_id).await
    }

    async fn get_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        (**self).get_messages(session_id).await
    }

    async fn send_message(
        &self,
        session_id: i64,
        content: &str,
        checkpoint_id: Option<&str>,
    ) -> Result<EventStream> {
        (**self)
            .send_message(session_id, content, checkpoint_id)
            .await
    }

    async fn complete_checkpoint(&self, session_id: i64, checkpoint_id: &str) -> Result<()> {
        (**self)
            .complete_checkpoint(session_id, checkpoint_id)
            .await
    }

    async fn get_case_study(&self, case_study_id: i64) -> Result<CaseStudy> {
        (**self).get_case_study(case_study_id).await
    }
}
