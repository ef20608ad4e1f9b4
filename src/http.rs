//! HTTP conversation service.
//!
//! Each request is its own session: select a conversation, render its
//! response, hand it to hyper, then run the conversation's after-script.

use crate::config::{HttpServiceConfig, ResponseSpec};
use crate::conversation::{CompiledConversation, ConversationTable};
use crate::error::{ConfigError, RenderError};
use crate::matcher::{decode_path, InboundRequest};
use crate::script::ScriptRunner;
use crate::session::{Direction, Session, SessionCounter, SessionLog};
use crate::template::{TemplateEngine, TemplateVars};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

/// Set to anything but empty, `0` or `false` to skip response delays.
pub const DISABLE_DELAY_ENV: &str = "MOCKDEV_DISABLE_DELAY";

const TEAPOT: &str = "I'm not a teapot";

/// A fully built response, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    /// Locally generated plain-text response.
    pub fn plain(status: u16, message: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: Bytes::from(format!("{message}\n")),
        }
    }

    /// First value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match builder.body(Full::new(self.body)) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "unable to build response");
                let mut fallback = Response::new(Full::new(Bytes::from_static(
                    b"while building response\n",
                )));
                *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            }
        }
    }
}

/// An after-script waiting for its response to be handed off.
#[derive(Debug)]
pub struct PendingScript {
    conversation: String,
    lines: Vec<String>,
    env: Vec<(String, String)>,
    runner: ScriptRunner,
}

impl PendingScript {
    pub async fn run(self) {
        info!(conversation = %self.conversation, "Executing after-script");
        trace!(env = ?self.env, "after-script env");
        if let Err(e) = self.runner.run(&self.lines, &self.env).await {
            error!(conversation = %self.conversation, error = %e, "after-script aborted");
        }
    }
}

/// Result of handling one request.
#[derive(Debug)]
pub struct Exchange {
    pub session_id: u64,
    /// The conversation that answered, if any
    pub conversation: Option<String>,
    pub response: MockResponse,
    pub after_script: Option<PendingScript>,
}

impl Exchange {
    fn local(session_id: u64, conversation: Option<String>, response: MockResponse) -> Self {
        Self {
            session_id,
            conversation,
            response,
            after_script: None,
        }
    }
}

/// One HTTP listener with its conversation table.
pub struct HttpService {
    name: String,
    bind_addr: String,
    table: ConversationTable,
    engine: TemplateEngine,
    runner: ScriptRunner,
    sessions: Arc<SessionCounter>,
    session_log: SessionLog,
    delay_enabled: bool,
}

impl HttpService {
    /// Load and compile the service's conversations.
    pub fn from_config(config: &HttpServiceConfig) -> Result<Self, ConfigError> {
        let table = ConversationTable::compile(config.load_conversations())?;
        let delay_enabled = !delay_disabled(std::env::var(DISABLE_DELAY_ENV).ok().as_deref());
        if !delay_enabled {
            info!(service = %config.name, "response delays disabled by {}", DISABLE_DELAY_ENV);
        }

        Ok(Self {
            name: config.name.clone(),
            bind_addr: config.bind_addr.clone(),
            table,
            engine: TemplateEngine::new(),
            runner: ScriptRunner::new(config.script_timeout_ms.map(Duration::from_millis)),
            sessions: Arc::new(SessionCounter::new()),
            session_log: SessionLog::from(&config.session_logging),
            delay_enabled,
        })
    }

    pub fn with_delay_disabled(mut self) -> Self {
        self.delay_enabled = false;
        self
    }

    /// Draw session ids from `sessions` instead of a private counter.
    pub fn with_session_counter(mut self, sessions: Arc<SessionCounter>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn table(&self) -> &ConversationTable {
        &self.table
    }

    /// Run the match pipeline and build the response for `request`.
    pub async fn handle(&self, request: InboundRequest) -> Exchange {
        let mut session = Session::new(self.sessions.next());

        if let Err(e) = self.session_log.open(session.id).await {
            error!(service = %self.name, session = session.id, error = %e, "unable to initialize session log");
            return Exchange::local(
                session.id,
                None,
                MockResponse::plain(418, &format!("while initializing session logging: {e}")),
            );
        }

        trace!(session = session.id, method = %request.method, path = %request.path, query = %request.raw_query, "Request");
        trace!(session = session.id, body = %request.body_text(), "Request body");

        let conversation = match self.table.select(&request, &mut session.scores) {
            Ok(selection) => selection.conversation(),
            Err(e) => {
                warn!(
                    service = %self.name,
                    session = session.id,
                    path = %request.path,
                    body = %request.body_text(),
                    error = %e,
                    "No matches after conversation-filter"
                );
                return Exchange::local(session.id, None, MockResponse::plain(418, TEAPOT));
            }
        };

        if let Err(e) = self
            .session_log
            .record(session.id, Direction::Received, &request.body)
            .await
        {
            warn!(session = session.id, error = %e, "unable to log request body");
        }

        let name = conversation.name().to_string();
        match self.render(conversation, &request).await {
            Ok((response, vars)) => {
                if let Err(e) = self
                    .session_log
                    .record(session.id, Direction::Sent, &response.body)
                    .await
                {
                    warn!(session = session.id, error = %e, "unable to log response body");
                }
                info!(
                    service = %self.name,
                    session = session.id,
                    conversation = %name,
                    path = %request.path,
                    status = response.status,
                    "Served response from conversation '{}:{}'",
                    conversation.spec.match_order,
                    name
                );

                let after = &conversation.spec.after_script;
                let after_script = (!after.is_empty()).then(|| PendingScript {
                    conversation: name.clone(),
                    lines: after.clone(),
                    env: vars.script_env(),
                    runner: self.runner.clone(),
                });

                Exchange {
                    session_id: session.id,
                    conversation: Some(name),
                    response,
                    after_script,
                }
            }
            Err(e) => {
                error!(
                    service = %self.name,
                    session = session.id,
                    conversation = %name,
                    path = %request.path,
                    error = %e,
                    "unable to render response"
                );
                Exchange::local(
                    session.id,
                    Some(name),
                    MockResponse::plain(500, &format!("while rendering response: {e}")),
                )
            }
        }
    }

    async fn render(
        &self,
        conversation: &CompiledConversation,
        request: &InboundRequest,
    ) -> Result<(MockResponse, TemplateVars), RenderError> {
        let spec = &conversation.spec.response;

        let mut vars = TemplateVars::base(&self.bind_addr);
        for (prefix, groups) in conversation.matchers.captures(request) {
            for (i, group) in groups.iter().enumerate() {
                debug!("{}{}={}", prefix, i, group);
            }
            vars.bind_captures(prefix, &groups);
        }
        trace!(vars = ?vars, "template variables");

        if !spec.script.is_empty() {
            let raw = self.runner.run(&spec.script, &vars.script_env()).await?;
            return Ok((parse_raw_response(&raw)?, vars));
        }

        let template = load_body(spec).await?;

        let mut headers = Vec::with_capacity(spec.headers.len() + 1);
        for header in &spec.headers {
            let (name, value) = self.engine.render_header(header, &vars)?;
            headers.push(checked_header(name, value)?);
        }
        headers.push(("X-Powered-By".to_string(), "mockdev".to_string()));
        let body = self.engine.render(&template, &vars)?;

        if let Some(delay) = spec.delay.as_ref().filter(|_| self.delay_enabled) {
            let delay_ms = delay.calculate();
            if delay_ms > 0 {
                debug!(conversation = %conversation.name(), delay_ms, "Applying delay");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Ok((
            MockResponse {
                status: spec.status_code,
                headers,
                body: Bytes::from(body),
            },
            vars,
        ))
    }

    async fn respond(&self, request: Request<Incoming>) -> Response<Full<Bytes>> {
        let inbound = match inbound_request(request).await {
            Ok(inbound) => inbound,
            Err(e) => {
                error!(service = %self.name, error = %e, "unable to read request body");
                return MockResponse::plain(418, &format!("while reading request body: {e}"))
                    .into_hyper();
            }
        };

        let exchange = self.handle(inbound).await;
        if let Some(script) = exchange.after_script {
            tokio::spawn(script.run());
        }
        exchange.response.into_hyper()
    }

    /// Serve connections from `listener` until it fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(service = %self.name, error = %e, "accept failed");
                    continue;
                }
            };
            debug!(service = %self.name, %peer, "connection");
            let io = TokioIo::new(stream);
            let service = Arc::clone(&self);

            tokio::spawn(async move {
                let handler = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { Ok::<_, Infallible>(service.respond(req).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                    debug!("connection error: {}", e);
                }
            });
        }
    }

    /// Bind `bind-addr` and serve.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(
            service = %self.name,
            conversations = self.table.len(),
            "HTTP service listening on {}",
            listener.local_addr()?
        );
        self.serve(listener).await
    }
}

/// Whether the delay toggle's value disables delays.
fn delay_disabled(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None | Some("") | Some("0") => false,
        Some(v) => !v.eq_ignore_ascii_case("false"),
    }
}

async fn inbound_request(request: Request<Incoming>) -> Result<InboundRequest, hyper::Error> {
    let (parts, body) = request.into_parts();
    let body = body.collect().await?.to_bytes();

    let mut inbound = InboundRequest::new(
        parts.method.as_str(),
        &decode_path(parts.uri.path()),
        parts.uri.query().unwrap_or(""),
    );
    for (name, value) in parts.headers.iter() {
        inbound = inbound.with_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }
    Ok(inbound.with_body(body))
}

async fn load_body(spec: &ResponseSpec) -> Result<String, RenderError> {
    match &spec.body_file {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| RenderError::BodyFile {
                    path: path.clone(),
                    source,
                })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Ok(spec.body.clone().unwrap_or_default()),
    }
}

fn checked_header(name: String, value: String) -> Result<(String, String), RenderError> {
    if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(&value).is_err() {
        return Err(RenderError::InvalidHeader(format!("{name}: {value}")));
    }
    Ok((name, value))
}

/// Parse a complete HTTP/1.x response as written by a raw-response script.
pub fn parse_raw_response(raw: &[u8]) -> Result<MockResponse, RenderError> {
    let (head, body) = split_head(raw);
    let head = std::str::from_utf8(head)
        .map_err(|_| RenderError::RawResponse("head is not valid UTF-8".to_string()))?;

    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));
    let status_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| RenderError::RawResponse("empty response".to_string()))?;

    let mut parts = status_line.split_whitespace();
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/1.") => code
            .parse::<u16>()
            .ok()
            .filter(|c| (100..=599).contains(c)),
        _ => None,
    }
    .ok_or_else(|| RenderError::RawResponse(format!("invalid status line '{status_line}'")))?;

    let mut headers = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RenderError::RawResponse(format!("invalid header line '{line}'")))?;
        headers.push(checked_header(name.trim().to_string(), value.trim().to_string())?);
    }

    Ok(MockResponse {
        status,
        headers,
        body: Bytes::copy_from_slice(body),
    })
}

/// Split at the first blank line, accepting CRLF or bare LF.
fn split_head(raw: &[u8]) -> (&[u8], &[u8]) {
    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(raw, b"\n\n").map(|i| (i, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, len)) => (&raw[..at], &raw[at + len..]),
        None => (raw, &[]),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConversation, SessionLogging};
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(conversations: &str) -> HttpServiceConfig {
        let conversations: Vec<HttpConversation> = serde_yaml::from_str(conversations).unwrap();
        HttpServiceConfig {
            name: "test".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            conversation_files: Vec::new(),
            conversations,
            session_logging: SessionLogging::default(),
            script_timeout_ms: Some(5_000),
        }
    }

    fn service(conversations: &str) -> HttpService {
        HttpService::from_config(&config(conversations)).unwrap()
    }

    const ECHO: &str = r#"
- name: echo
  request:
    url-matcher:
      path: ^/echo$
  response:
    body: Hello {{.p0}}
"#;

    #[tokio::test]
    async fn test_echo_renders_path_capture() {
        let service = service(ECHO);
        let exchange = service.handle(InboundRequest::new("GET", "/echo", "")).await;

        assert_eq!(exchange.conversation.as_deref(), Some("echo"));
        assert_eq!(exchange.response.status, 200);
        assert_eq!(exchange.response.body, Bytes::from("Hello /echo"));
        assert_eq!(exchange.response.header("x-powered-by"), Some("mockdev"));
        assert!(exchange.after_script.is_none());
    }

    #[tokio::test]
    async fn test_no_match_is_teapot() {
        let service = service(ECHO);
        let exchange = service.handle(InboundRequest::new("GET", "/other", "")).await;

        assert_eq!(exchange.conversation, None);
        assert_eq!(exchange.response.status, 418);
        assert_eq!(exchange.response.body, Bytes::from("I'm not a teapot\n"));
    }

    #[tokio::test]
    async fn test_session_ids_increase() {
        let service = service(ECHO);
        let first = service.handle(InboundRequest::new("GET", "/echo", "")).await;
        let second = service.handle(InboundRequest::new("GET", "/nope", "")).await;
        assert_eq!(first.session_id + 1, second.session_id);
    }

    #[tokio::test]
    async fn test_headers_status_and_query_captures() {
        let service = service(
            r#"
- name: item
  request:
    method-matcher: ^PUT$
    url-matcher:
      path: ^/items/(\d+)$
      query: mode=(fast|slow)
  response:
    status-code: 202
    headers:
      - "X-Item: {{.p1}}"
      - "Location: /items/{{p1}}?{{q0}}"
    body: "{{upper b0}}"
"#,
        );
        let request = InboundRequest::new("PUT", "/items/17", "mode=fast").with_body("ignored");
        let exchange = service.handle(request).await;

        assert_eq!(exchange.response.status, 202);
        assert_eq!(exchange.response.header("X-Item"), Some("17"));
        assert_eq!(exchange.response.header("Location"), Some("/items/17?mode=fast"));
        assert_eq!(exchange.response.body, Bytes::new());
    }

    #[tokio::test]
    async fn test_body_capture() {
        let service = service(
            r#"
- name: login
  request:
    body-matcher: user=(\w+)
  response:
    body: "welcome {{.b1}}"
"#,
        );
        let request = InboundRequest::new("POST", "/login", "").with_body("user=alice&pw=x");
        let exchange = service.handle(request).await;
        assert_eq!(exchange.response.body, Bytes::from("welcome alice"));
    }

    #[tokio::test]
    async fn test_body_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("status.json");
        std::fs::write(&file, r#"{"path": "{{p0}}"}"#).unwrap();

        let service = service(&format!(
            "- name: file\n  response:\n    body-file: {}\n",
            file.display()
        ));
        let exchange = service.handle(InboundRequest::new("GET", "/s", "")).await;
        assert_eq!(exchange.response.body, Bytes::from(r#"{"path": ""}"#));
    }

    #[tokio::test]
    async fn test_missing_body_file_is_server_error() {
        let service = service(
            r#"
- name: gone
  response:
    body-file: /nonexistent/mockdev/body.txt
"#,
        );
        let exchange = service.handle(InboundRequest::new("GET", "/", "")).await;
        assert_eq!(exchange.conversation.as_deref(), Some("gone"));
        assert_eq!(exchange.response.status, 500);
        assert!(exchange.response.header("X-Powered-By").is_none());
    }

    #[tokio::test]
    async fn test_bad_template_is_server_error() {
        let service = service(
            r#"
- name: broken
  response:
    body: "{{#if p0}}never closed"
"#,
        );
        let exchange = service.handle(InboundRequest::new("GET", "/", "")).await;
        assert_eq!(exchange.response.status, 500);
    }

    #[tokio::test]
    async fn test_raw_script_response() {
        let service = service(
            r#"
- name: raw
  request:
    url-matcher:
      path: ^/raw/(\w+)$
  response:
    body: not used
    script:
      - "printf 'HTTP/1.1 201 Created\r\nX-Raw: %s\r\n\r\n' \"$p1\""
      - "printf 'raw body'"
"#,
        );
        let exchange = service.handle(InboundRequest::new("GET", "/raw/abc", "")).await;

        assert_eq!(exchange.response.status, 201);
        assert_eq!(exchange.response.header("X-Raw"), Some("abc"));
        assert!(exchange.response.header("X-Powered-By").is_none());
        assert_eq!(exchange.response.body, Bytes::from("raw body"));
    }

    #[tokio::test]
    async fn test_failing_raw_script_is_server_error() {
        let service = service(
            r#"
- name: raw
  response:
    script:
      - "exit 1"
"#,
        );
        let exchange = service.handle(InboundRequest::new("GET", "/", "")).await;
        assert_eq!(exchange.response.status, 500);
    }

    #[tokio::test]
    async fn test_after_script_gets_captures() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("after.txt");
        let service = service(&format!(
            r#"
- name: hook
  request:
    url-matcher:
      path: ^/hook/(\w+)$
  after-script:
    - printf '%s' "$p1" > {}
"#,
            out.display()
        ));

        let exchange = service.handle(InboundRequest::new("GET", "/hook/reboot", "")).await;
        assert_eq!(exchange.response.status, 200);
        exchange.after_script.unwrap().run().await;
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "reboot");
    }

    #[tokio::test]
    async fn test_delay() {
        let yaml = r#"
- name: slow
  response:
    delay:
      min: 60
      max: 60
"#;
        let slow = service(yaml);
        if slow.delay_enabled {
            let started = std::time::Instant::now();
            slow.handle(InboundRequest::new("GET", "/", "")).await;
            assert!(started.elapsed() >= Duration::from_millis(60));
        }

        let fast = service(yaml).with_delay_disabled();
        let started = std::time::Instant::now();
        fast.handle(InboundRequest::new("GET", "/", "")).await;
        assert!(started.elapsed() < Duration::from_millis(60));
    }

    #[test]
    fn test_delay_toggle_values() {
        assert!(!delay_disabled(None));
        assert!(!delay_disabled(Some("")));
        assert!(!delay_disabled(Some("0")));
        assert!(!delay_disabled(Some("FALSE")));
        assert!(delay_disabled(Some("1")));
        assert!(delay_disabled(Some("yes")));
    }

    fn logging_config(location: &Path) -> HttpServiceConfig {
        let mut cfg = config(ECHO);
        cfg.session_logging = SessionLogging {
            log_received: true,
            log_sent: true,
            location: location.to_path_buf(),
        };
        cfg
    }

    #[tokio::test]
    async fn test_session_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let service = HttpService::from_config(&logging_config(dir.path())).unwrap();

        let exchange = service
            .handle(InboundRequest::new("POST", "/echo", "").with_body("payload"))
            .await;

        let transcript =
            std::fs::read_to_string(dir.path().join(format!("sess_{:04}.log", exchange.session_id)))
                .unwrap();
        assert!(transcript.starts_with("# session 1, "));
        assert!(transcript.contains("\nr: payload\n"));
        assert!(transcript.ends_with("s: Hello /echo\n"));
    }

    #[tokio::test]
    async fn test_session_log_failure_is_teapot() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let service = HttpService::from_config(&logging_config(&blocker.join("sub"))).unwrap();
        let exchange = service.handle(InboundRequest::new("GET", "/echo", "")).await;

        assert_eq!(exchange.response.status, 418);
        assert!(String::from_utf8_lossy(&exchange.response.body)
            .starts_with("while initializing session logging"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = HttpService::from_config(&config("- name: a\n- name: a\n"));
        assert!(matches!(result, Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_parse_raw_response_lf_only() {
        let response = parse_raw_response(b"HTTP/1.0 404 Not Found\nX-A: 1\n\nmissing\n").unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.header("x-a"), Some("1"));
        assert_eq!(response.body, Bytes::from("missing\n"));
    }

    #[test]
    fn test_parse_raw_response_without_body() {
        let response = parse_raw_response(b"HTTP/1.1 204 No Content\r\n").unwrap();
        assert_eq!(response.status, 204);
        assert!(response.headers.is_empty());
        assert!(response.body.is_empty());
    }

    #[test]
    fn test_parse_raw_response_rejects_garbage() {
        assert!(matches!(
            parse_raw_response(b"hello world\n\nbody"),
            Err(RenderError::RawResponse(_))
        ));
        assert!(matches!(
            parse_raw_response(b""),
            Err(RenderError::RawResponse(_))
        ));
        assert!(matches!(
            parse_raw_response(b"HTTP/1.1 200 OK\r\nno-colon\r\n\r\n"),
            Err(RenderError::RawResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let service = Arc::new(service(ECHO));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(service.serve(listener));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /echo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw).to_lowercase();

        assert!(text.starts_with("http/1.1 200 ok\r\n"));
        assert!(text.contains("x-powered-by: mockdev\r\n"));
        assert!(text.ends_with("\r\n\r\nhello /echo"));
    }

    #[tokio::test]
    async fn test_encoded_path_is_decoded_before_matching() {
        let service = Arc::new(service(
            r#"
- name: document
  request:
    url-matcher:
      path: ^/files/(my doc)$
  response:
    body: "{{p1}}"
"#,
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(service.serve(listener));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /files/my%20doc HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nmy doc"));
    }
}
