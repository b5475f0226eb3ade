//! Outbound HTTP tool.
//!
//! Every hop goes through the [`EgressGuard`] first. The connection is then
//! pinned to the addresses the guard checked, so a second DNS answer cannot
//! swap in a private address. Redirects are never followed by the client; each
//! `Location` is validated as a fresh URL before the next hop.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Method, redirect};
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use url::Url;

use corvid_guard::EgressGuard;

use crate::error::Result;
use crate::tool::{ParamExt, ParamType, Tool, ToolContext, ToolParameter, ToolResult};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the HTTP tool.
#[derive(Debug, Clone)]
pub struct HttpToolConfig {
    /// Hard ceiling on a request, whatever the caller asks for.
    pub timeout_ceiling: Duration,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    /// Response bodies are cut off after this many bytes.
    pub max_response_bytes: usize,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    pub user_agent: String,
}

impl Default for HttpToolConfig {
    fn default() -> Self {
        Self {
            timeout_ceiling: Duration::from_secs(30),
            max_redirects: 5,
            max_response_bytes: 1024 * 1024,
            verify_tls: true,
            user_agent: concat!("Corvid/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Request Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Tool for calling external HTTP APIs behind the egress guard.
#[derive(Debug, Clone)]
pub struct HttpRequestTool {
    guard: EgressGuard,
    config: HttpToolConfig,
    /// Replaces the per-hop pinned client; lets tests reach a local server.
    #[cfg(test)]
    fixed_client: Option<Client>,
}

impl HttpRequestTool {
    pub fn new(guard: EgressGuard, config: HttpToolConfig) -> Self {
        if !config.verify_tls {
            tracing::warn!("TLS certificate verification is DISABLED for the http_request tool");
        }
        Self {
            guard,
            config,
            #[cfg(test)]
            fixed_client: None,
        }
    }

    #[cfg(test)]
    fn with_fixed_client(mut self, client: Client) -> Self {
        self.fixed_client = Some(client);
        self
    }

    /// Client for one hop, connecting only to the checked addresses.
    fn client_for(&self, url: &Url, addrs: &[SocketAddr], timeout: Duration) -> Result<Client> {
        #[cfg(test)]
        if let Some(client) = &self.fixed_client {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .redirect(redirect::Policy::none())
            .no_proxy()
            .timeout(timeout)
            .user_agent(&self.config.user_agent)
            .danger_accept_invalid_certs(!self.config.verify_tls);
        if let Some(url::Host::Domain(host)) = url.host() {
            builder = builder.resolve_to_addrs(host, addrs);
        }
        builder
            .build()
            .map_err(|e| crate::error::AgentError::tool(format!("Failed to build HTTP client: {e}")))
    }

    fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs).min(self.config.timeout_ceiling),
            _ => self.config.timeout_ceiling,
        }
    }

    /// Read at most `max_response_bytes` of the body.
    async fn read_body(&self, response: reqwest::Response) -> std::result::Result<(Vec<u8>, bool), String> {
        let limit = self.config.max_response_bytes;
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("Failed to read response body: {e}"))?;
            let room = limit.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                return Ok((body, true));
            }
            body.extend_from_slice(&chunk);
        }
        Ok((body, false))
    }
}

fn parse_method(raw: &str) -> Option<Method> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        "HEAD" => Some(Method::HEAD),
        _ => None,
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request to an external API. Private, loopback and cloud metadata \
         addresses are blocked, and redirects are re-checked before they are followed. \
         Returns the status code, content type and response body."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("url", ParamType::String, "The http(s) URL to call"),
            ToolParameter::optional(
                "method",
                ParamType::String,
                "GET, POST, PUT, PATCH, DELETE or HEAD",
            )
            .with_default(json!("GET")),
            ToolParameter::optional(
                "headers",
                ParamType::Object,
                "Request headers as name/value pairs",
            ),
            ToolParameter::optional(
                "body",
                ParamType::String,
                "Request body; JSON text is sent as application/json",
            ),
            ToolParameter::optional(
                "timeout_secs",
                ParamType::Integer,
                "Request timeout in seconds, capped by the server",
            ),
        ]
    }

    fn timeout(&self) -> Duration {
        self.config.timeout_ceiling + Duration::from_secs(5)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Ok(ToolResult::error("Operation cancelled"));
        }

        let raw_url = params.required_str("url")?;
        let method_name = params.optional_str("method").unwrap_or("GET");
        let Some(mut method) = parse_method(method_name) else {
            return Ok(ToolResult::error(format!(
                "Unsupported HTTP method: {method_name}"
            )));
        };
        let headers = params.get("headers").and_then(Value::as_object).cloned();
        let mut body = params.optional_str("body").map(str::to_string);
        let timeout = self.effective_timeout(params.get("timeout_secs").and_then(Value::as_u64));
        let deadline = Instant::now() + timeout;

        let mut current = raw_url.to_string();
        let mut hops = 0usize;

        loop {
            let (url, addrs) = match self.guard.check(&current).await {
                Ok(checked) => checked,
                Err(e) if hops == 0 => return Ok(ToolResult::error(e.to_string())),
                Err(e) => {
                    return Ok(ToolResult::error(format!(
                        "Redirect to {current} blocked: {e}"
                    )));
                }
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ToolResult::error(format!(
                    "Request timed out after {}s",
                    timeout.as_secs()
                )));
            }
            let client = match self.client_for(&url, &addrs, remaining) {
                Ok(client) => client,
                Err(e) => return Ok(ToolResult::error(e.to_string())),
            };

            let mut request = client.request(method.clone(), url.clone());
            if let Some(headers) = &headers {
                for (name, value) in headers {
                    if let Some(value) = value.as_str() {
                        request = request.header(name.as_str(), value);
                    }
                }
            }
            if let Some(text) = &body {
                if serde_json::from_str::<Value>(text).is_ok() {
                    request = request.header("content-type", "application/json");
                }
                request = request.body(text.clone());
            }

            tracing::debug!(run_id = %ctx.run_id, url = %url, method = %method, hops, "HTTP request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Ok(ToolResult::error(format!(
                        "Request timed out after {}s",
                        timeout.as_secs()
                    )));
                }
                Err(e) => return Ok(ToolResult::error(format!("Request failed: {e}"))),
            };

            let status = response.status();
            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Ok(ToolResult::error(format!(
                        "Redirect ({}) without a Location header",
                        status.as_u16()
                    )));
                };
                hops += 1;
                if hops > self.config.max_redirects {
                    return Ok(ToolResult::error(format!(
                        "Too many redirects (limit {})",
                        self.config.max_redirects
                    )));
                }
                let next = match url.join(location) {
                    Ok(next) => next,
                    Err(e) => {
                        return Ok(ToolResult::error(format!(
                            "Invalid redirect location '{location}': {e}"
                        )));
                    }
                };
                // 303 always, and 301/302 after a POST, continue as GET
                if status == reqwest::StatusCode::SEE_OTHER
                    || (method == Method::POST && status.as_u16() <= 302)
                {
                    method = Method::GET;
                    body = None;
                }
                tracing::debug!(run_id = %ctx.run_id, from = %url, to = %next, "Following redirect");
                current = next.to_string();
                continue;
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            let (bytes, truncated) = match self.read_body(response).await {
                Ok(read) => read,
                Err(e) => return Ok(ToolResult::error(e)),
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let body_value = if content_type.contains("json") && !truncated {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            } else {
                Value::String(text)
            };

            let mut out = Map::new();
            out.insert("url".to_string(), json!(url.as_str()));
            out.insert("status".to_string(), json!(status.as_u16()));
            out.insert("ok".to_string(), json!(status.is_success()));
            out.insert("content_type".to_string(), json!(content_type));
            out.insert("body".to_string(), body_value);
            if truncated {
                out.insert("truncated".to_string(), json!(true));
            }
            if hops > 0 {
                out.insert("redirects".to_string(), json!(hops));
            }
            return Ok(ToolResult::json(Value::Object(out)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_guard::StaticResolver;
    use std::net::IpAddr;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PUBLIC_IP: &str = "93.184.216.34";

    /// Tool whose guard sees `api.test` as a public host, while the client
    /// actually connects to the mock server.
    fn tool_for(server: &MockServer) -> HttpRequestTool {
        let ip: IpAddr = PUBLIC_IP.parse().unwrap();
        let guard = EgressGuard::new()
            .with_resolver(Arc::new(StaticResolver::new().with_host("api.test", vec![ip])));
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .no_proxy()
            .resolve("api.test", *server.address())
            .build()
            .unwrap();
        HttpRequestTool::new(guard, HttpToolConfig::default()).with_fixed_client(client)
    }

    fn url(server: &MockServer, p: &str) -> String {
        format!("http://api.test:{}{}", server.address().port(), p)
    }

    #[tokio::test]
    async fn test_get_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": 7})))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({"url": url(&server, "/data")}), &ToolContext::default())
            .await
            .unwrap();
        let value = result.to_value();
        assert_eq!(value["success"], true);
        assert_eq!(value["status"], 200);
        assert_eq!(value["body"]["value"], 7);
    }

    #[tokio::test]
    async fn test_blocks_metadata_address() {
        let tool = HttpRequestTool::new(EgressGuard::new(), HttpToolConfig::default());
        let result = tool
            .execute(
                json!({"url": "http://169.254.169.254/latest/meta-data"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.error_message().unwrap().contains("Unsafe URL"));
    }

    #[tokio::test]
    async fn test_redirect_to_blocked_address_is_not_followed() {
        let server = MockServer::start().await;
        Mock::given(path("/start"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://169.254.169.254/latest/meta-data"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({"url": url(&server, "/start")}), &ToolContext::default())
            .await
            .unwrap();
        let message = result.error_message().unwrap();
        assert!(message.starts_with("Redirect to http://169.254.169.254"));
    }

    #[tokio::test]
    async fn test_allowed_redirect_is_followed() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved here"))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({"url": url(&server, "/old")}), &ToolContext::default())
            .await
            .unwrap();
        let value = result.to_value();
        assert_eq!(value["body"], "moved here");
        assert_eq!(value["redirects"], 1);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop"))
            .mount(&server)
            .await;

        let result = tool_for(&server)
            .execute(json!({"url": url(&server, "/loop")}), &ToolContext::default())
            .await
            .unwrap();
        assert!(result.error_message().unwrap().contains("Too many redirects"));
    }

    #[tokio::test]
    async fn test_body_is_capped() {
        let server = MockServer::start().await;
        Mock::given(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let mut tool = tool_for(&server);
        tool.config.max_response_bytes = 10;
        let result = tool
            .execute(json!({"url": url(&server, "/big")}), &ToolContext::default())
            .await
            .unwrap();
        let value = result.to_value();
        assert_eq!(value["body"], "xxxxxxxxxx");
        assert_eq!(value["truncated"], true);
    }

    #[test]
    fn test_requested_timeout_is_capped() {
        let tool = HttpRequestTool::new(EgressGuard::new(), HttpToolConfig::default());
        assert_eq!(tool.effective_timeout(Some(600)), Duration::from_secs(30));
        assert_eq!(tool.effective_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(tool.effective_timeout(None), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let tool = HttpRequestTool::new(EgressGuard::new(), HttpToolConfig::default());
        let result = tool
            .execute(
                json!({"url": "https://example.com", "method": "TRACE"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.error_message(), Some("Unsupported HTTP method: TRACE"));
    }
}
