//! Record a live HTTP exchange as a conversation.
//!
//! The request is sent as given and the answer is captured verbatim. The
//! resulting conversation matches exactly that request: every matcher is an
//! anchored, escaped literal.

use crate::config::{HttpConversation, RequestSpec, ResponseSpec, UrlMatcherSpec};
use crate::error::RecordError;
use crate::matcher::{canonical_header_name, decode_path, parse_query_string};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Response headers the transport produces on its own.
const TRANSPORT_HEADERS: &[&str] = &["connection", "content-length", "date", "transfer-encoding"];

/// The request to record.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub url: String,
    pub method: String,
    /// `Name: value` entries
    pub headers: Vec<String>,
    pub data: Option<String>,
}

impl RecordRequest {
    pub fn get(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            headers: Vec::new(),
            data: None,
        }
    }
}

/// Send `request` and turn the exchange into a conversation.
pub async fn record(request: &RecordRequest) -> Result<HttpConversation, RecordError> {
    let uri: Uri = request.url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
        RecordError::Url {
            url: request.url.clone(),
            reason: e.to_string(),
        }
    })?;
    if uri.scheme_str() != Some("http") {
        return Err(RecordError::Url {
            url: request.url.clone(),
            reason: "only http:// URLs can be recorded".to_string(),
        });
    }

    let method = request.method.to_uppercase();
    let mut builder = Request::builder().method(method.as_str()).uri(uri.clone());
    let mut header_matchers = Vec::with_capacity(request.headers.len());
    for header in &request.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| RecordError::Header(header.clone()))?;
        let (name, value) = (name.trim(), value.trim());
        builder = builder.header(name, value);
        header_matchers.push(format!(
            "{}: {}",
            canonical_header_name(name),
            literal(value)
        ));
    }
    let data = request.data.clone().unwrap_or_default();
    let outgoing = builder.body(Full::new(Bytes::from(data.clone())))?;

    info!(method = %method, url = %uri, "Recording");
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let response = client.request(outgoing).await?;
    let status = response.status().as_u16();

    let mut headers = Vec::new();
    for name in response.headers().keys() {
        if TRANSPORT_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Some(value) = response.headers().get(name) {
            headers.push(format!(
                "{}: {}",
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
    }
    let body = response.into_body().collect().await?.to_bytes();
    debug!(status, bytes = body.len(), "Recorded response");

    Ok(HttpConversation {
        name: format!("recorded-{:08x}", rand::random::<u32>()),
        match_order: 0,
        break_on: Default::default(),
        request: RequestSpec {
            method_matcher: Some(literal(&method)),
            url_matcher: UrlMatcherSpec {
                path: Some(literal(&decode_path(uri.path()))),
                query: uri
                    .query()
                    .filter(|q| !q.is_empty())
                    .map(query_expression),
                query_loose_match: false,
            },
            header_match_type: Default::default(),
            header_matchers,
            body_matcher: (!data.is_empty()).then(|| literal(&data)),
        },
        response: ResponseSpec {
            status_code: status,
            headers,
            body: (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned()),
            ..Default::default()
        },
        after_script: Vec::new(),
    })
}

/// Anchored regex matching exactly `value`.
fn literal(value: &str) -> String {
    format!("^{}$", regex::escape(value))
}

/// `name=^value$` for every decoded parameter, in name order. A literal `&`
/// would split the expression, so it is written as `\x26`.
fn query_expression(raw_query: &str) -> String {
    parse_query_string(raw_query)
        .into_iter()
        .collect::<BTreeMap<_, _>>()
        .iter()
        .map(|(name, value)| format!("{}={}", name, literal(value).replace('&', r"\x26")))
        .collect::<Vec<_>>()
        .join("&")
}

/// Write `conversations` as a conversation file. An existing file is only
/// replaced when `overwrite` is set.
pub fn write_conversation_file(
    path: &Path,
    conversations: &[HttpConversation],
    overwrite: bool,
) -> Result<(), RecordError> {
    let yaml = serde_yaml::to_string(conversations)?;
    let io_error = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(overwrite)
        .truncate(overwrite)
        .create_new(!overwrite)
        .open(path)
        .map_err(io_error)?;
    file.write_all(yaml.as_bytes()).map_err(io_error)?;
    info!(path = %path.display(), conversations = conversations.len(), "Conversation file written");
    Ok(())
}
