use std::time::Duration;

use cadence_core::{ActionKind, ActionType, HttpMethod, WebhookConfig};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::HandlerError;
use crate::handler::{ActionHandler, ActionInvocation};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the outbound body signature when a signing secret is set.
pub const SIGNATURE_HEADER: &str = "X-Cadence-Signature";

/// Performs `webhook` actions by calling the configured HTTP endpoint.
///
/// The request body is the action's `body` when set, otherwise a JSON
/// envelope with the run identifiers, recipients and context.
pub struct HttpWebhookHandler {
    client: Client,
    timeout: Duration,
    signing_secret: Option<String>,
}

impl HttpWebhookHandler {
    /// Create a handler with a fresh client bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, HandlerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandlerError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, timeout))
    }

    /// Create a handler around a shared client.
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            signing_secret: None,
        }
    }

    /// Sign every request body with HMAC-SHA256 under `secret`.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    fn build_body(config: &WebhookConfig, invocation: &ActionInvocation) -> Value {
        config.body.clone().unwrap_or_else(|| {
            json!({
                "runId": invocation.run_id,
                "workflowId": invocation.workflow_id,
                "actionId": invocation.action_id,
                "recipients": invocation.recipients,
                "context": invocation.context,
            })
        })
    }

    fn compute_hmac(secret: &str, body: &[u8]) -> Result<String, HandlerError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| HandlerError::Configuration(format!("invalid HMAC key: {e}")))?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_request(&self, config: &WebhookConfig) -> reqwest::RequestBuilder {
        match config.method {
            HttpMethod::Get => self.client.get(&config.url),
            HttpMethod::Post => self.client.post(&config.url),
            HttpMethod::Put => self.client.put(&config.url),
            HttpMethod::Patch => self.client.patch(&config.url),
            HttpMethod::Delete => self.client.delete(&config.url),
        }
    }

    fn map_send_error(&self, err: &reqwest::Error) -> HandlerError {
        if err.is_timeout() {
            warn!("webhook request timed out");
            HandlerError::Timeout(self.timeout)
        } else {
            HandlerError::Connection(err.to_string())
        }
    }
}

/// Classify a non-success HTTP status.
fn status_error(status: u16, body: &str) -> HandlerError {
    match status {
        429 => HandlerError::RateLimited,
        500..=599 => HandlerError::Connection(format!("HTTP {status}: {body}")),
        _ => HandlerError::Rejected(format!("HTTP {status}: {body}")),
    }
}

impl ActionHandler for HttpWebhookHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Webhook
    }

    #[instrument(skip(self, invocation), fields(action.id = %invocation.action_id, run.id = %invocation.run_id))]
    async fn execute(&self, invocation: &ActionInvocation) -> Result<Value, HandlerError> {
        let ActionKind::Webhook(config) = &invocation.kind else {
            return Err(HandlerError::Configuration(format!(
                "webhook handler cannot perform {}",
                invocation.action_type()
            )));
        };
        invocation.kind.validate()?;

        let body = Self::build_body(config, invocation);
        let body_bytes = serde_json::to_vec(&body)?;

        debug!(method = config.method.as_str(), url = %config.url, "dispatching webhook");

        let mut request = self
            .build_request(config)
            .header("Content-Type", "application/json")
            .body(body_bytes.clone());
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }
        if let Some(secret) = &self.signing_secret {
            let signature = Self::compute_hmac(secret, &body_bytes)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={signature}"));
        }

        let response = request.send().await.map_err(|e| self.map_send_error(&e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.map_send_error(&e))?;

        if !(200..300).contains(&status) {
            warn!(status, "webhook endpoint returned failure status");
            return Err(status_error(status, &text));
        }

        let response_body: Value =
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()));
        Ok(json!({
            "statusCode": status,
            "body": response_body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cadence_core::ResolvedRecipients;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    /// A minimal HTTP server that answers one request with a canned response.
    struct MockEndpoint {
        listener: tokio::net::TcpListener,
        url: String,
    }

    impl MockEndpoint {
        async fn start() -> Self {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("failed to bind mock server");
            let port = listener.local_addr().unwrap().port();
            Self {
                listener,
                url: format!("http://127.0.0.1:{port}/hook"),
            }
        }

        /// Answer one request and return its raw bytes.
        async fn respond_once(self, status_code: u16, body: &'static str) -> String {
            let (mut stream, _) = self.listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16384];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);

            let response = format!(
                "HTTP/1.1 {status_code} OK\r\n\
                 Content-Type: application/json\r\n\
                 Content-Length: {}\r\n\
                 Connection: close\r\n\
                 \r\n\
                 {body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    fn invocation(url: &str, body: Option<Value>) -> ActionInvocation {
        let mut headers = BTreeMap::new();
        headers.insert("X-Agency".to_owned(), "north".to_owned());
        ActionInvocation {
            run_id: "run-7".into(),
            workflow_id: "wf-hook".into(),
            action_id: "action-2".into(),
            kind: ActionKind::Webhook(WebhookConfig {
                url: url.to_owned(),
                method: HttpMethod::Post,
                headers,
                body,
            }),
            recipients: ResolvedRecipients::default(),
            context: json!({"policyId": "p-1"}),
        }
    }

    fn handler() -> HttpWebhookHandler {
        HttpWebhookHandler::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn posts_envelope_and_returns_response() {
        let server = MockEndpoint::start().await;
        let inv = invocation(&server.url, None);
        let server_task = tokio::spawn(server.respond_once(200, r#"{"received":true}"#));

        let result = handler().execute(&inv).await.expect("should succeed");
        let request = server_task.await.unwrap();

        assert_eq!(result["statusCode"], 200);
        assert_eq!(result["body"]["received"], true);
        assert!(request.starts_with("POST /hook"));
        assert!(request.to_lowercase().contains("x-agency: north"));
        assert!(request.contains(r#""policyId":"p-1""#));
    }

    #[tokio::test]
    async fn signs_body_when_secret_configured() {
        let server = MockEndpoint::start().await;
        let inv = invocation(&server.url, Some(json!({"ping": 1})));
        let server_task = tokio::spawn(server.respond_once(204, ""));

        let handler = handler().with_signing_secret("s3cret");
        handler.execute(&inv).await.expect("should succeed");
        let request = server_task.await.unwrap();

        let expected = HttpWebhookHandler::compute_hmac("s3cret", br#"{"ping":1}"#).unwrap();
        assert!(request.contains(&format!("sha256={expected}")));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockEndpoint::start().await;
        let inv = invocation(&server.url, None);
        let server_task = tokio::spawn(server.respond_once(503, r#"{"error":"down"}"#));

        let err = handler().execute(&inv).await.unwrap_err();
        server_task.await.unwrap();
        assert!(matches!(err, HandlerError::Connection(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockEndpoint::start().await;
        let inv = invocation(&server.url, None);
        let server_task = tokio::spawn(server.respond_once(422, r#"{"error":"bad"}"#));

        let err = handler().execute(&inv).await.unwrap_err();
        server_task.await.unwrap();
        assert!(matches!(err, HandlerError::Rejected(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn invalid_url_is_configuration_error() {
        let inv = invocation("ftp://example.com", None);
        let err = handler().execute(&inv).await.unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
    }

    #[test]
    fn status_classification() {
        assert!(matches!(status_error(429, ""), HandlerError::RateLimited));
        assert!(status_error(502, "").is_retryable());
        assert!(!status_error(404, "").is_retryable());
    }
}
