//! Request matching logic.
//!
//! A [`ValueMatcher`] holds named regexes and checks a name→value mapping
//! against them. Each request criterion (method, URL, headers, body) maps
//! its request field onto such a mapping and reports whether it matched and
//! how much the match weighs for tie-breaking.

use crate::config::{HeaderMatchType, RequestSpec};
use crate::error::ConfigError;
use bytes::Bytes;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Name → value mapping extracted from a request field.
pub type Values = HashMap<String, String>;

/// How a [`ValueMatcher`] treats names on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Patterns whose name is absent from the values are skipped.
    IfPresent,
    /// Every value needs a pattern, and must match it.
    All,
    /// Every pattern needs a value, extra values are ignored.
    ContainedIn,
}

/// Compiled name → regex set.
#[derive(Debug, Clone, Default)]
pub struct ValueMatcher {
    patterns: BTreeMap<String, Regex>,
}

impl ValueMatcher {
    /// Compile every pattern, failing on the first one that is not a valid
    /// regex or whose name was already given.
    pub fn compile<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut patterns = BTreeMap::new();
        for (name, pattern) in pairs {
            let name = name.into();
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                name: name.clone(),
                pattern: pattern.to_string(),
                source,
            })?;
            if patterns.contains_key(&name) {
                return Err(ConfigError::DuplicateMatcher(name));
            }
            patterns.insert(name, regex);
        }
        Ok(Self { patterns })
    }

    pub fn match_if_present(&self, values: &Values) -> bool {
        if values.is_empty() && !self.patterns.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .all(|(name, regex)| values.get(name).map_or(true, |v| regex.is_match(v)))
    }

    pub fn match_all(&self, values: &Values) -> bool {
        if values.is_empty() && !self.patterns.is_empty() {
            return false;
        }
        values.iter().all(|(name, value)| {
            self.patterns
                .get(name)
                .is_some_and(|regex| regex.is_match(value))
        })
    }

    pub fn contained_in(&self, values: &Values) -> bool {
        self.patterns
            .iter()
            .all(|(name, regex)| values.get(name).is_some_and(|v| regex.is_match(v)))
    }

    pub fn matches(&self, policy: MatchPolicy, values: &Values) -> bool {
        match policy {
            MatchPolicy::IfPresent => self.match_if_present(values),
            MatchPolicy::All => self.match_all(values),
            MatchPolicy::ContainedIn => self.contained_in(values),
        }
    }

    /// Number of compiled patterns, used as scoring weight.
    pub fn matcher_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn pattern(&self, name: &str) -> Option<&Regex> {
        self.patterns.get(name)
    }
}

/// Parse `name=regex&name=regex` into its pairs.
pub fn parse_query_expression(expr: &str) -> Result<Vec<(String, String)>, ConfigError> {
    expr.split('&')
        .map(|segment| {
            segment
                .split_once('=')
                .map(|(name, pattern)| (name.to_string(), pattern.to_string()))
                .ok_or_else(|| ConfigError::InvalidExpression(expr.to_string()))
        })
        .collect()
}

/// Parse `Name: regex` into a canonical header name and its pattern.
pub fn parse_header_expression(expr: &str) -> Result<(String, String), ConfigError> {
    let (name, pattern) = expr
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidExpression(expr.to_string()))?;
    Ok((
        canonical_header_name(name.trim()),
        pattern.trim().to_string(),
    ))
}

/// `content-TYPE` → `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        upper = ch == '-';
    }
    out
}

/// Parse a query string into key-value pairs. The first value of a
/// repeated key wins.
pub fn parse_query_string(query: &str) -> Values {
    let mut params = Values::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').unwrap_or((part, ""));
        params
            .entry(query_decode(key))
            .or_insert_with(|| query_decode(value));
    }

    params
}

/// Percent-decode a request path. Paths that do not decode to UTF-8 are
/// kept as sent.
pub fn decode_path(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

fn query_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// The parts of an inbound request the matchers look at.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub raw_query: String,
    pub body: Bytes,
    body_text: String,
    headers: Values,
    query: Values,
}

impl InboundRequest {
    pub fn new(method: &str, path: &str, raw_query: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            raw_query: raw_query.to_string(),
            query: parse_query_string(raw_query),
            ..Default::default()
        }
    }

    /// Add a header; only the first value of a repeated name is kept.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(canonical_header_name(name))
            .or_insert_with(|| value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.body_text = String::from_utf8_lossy(&self.body).into_owned();
        self
    }

    /// Canonical header name → first value.
    pub fn headers(&self) -> &Values {
        &self.headers
    }

    /// Decoded query name → first value.
    pub fn query(&self) -> &Values {
        &self.query
    }

    pub fn body_text(&self) -> &str {
        &self.body_text
    }
}

/// The request dimensions a conversation can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Method,
    Url,
    Headers,
    Body,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Criterion::Method => "method",
            Criterion::Url => "url",
            Criterion::Headers => "headers",
            Criterion::Body => "body",
        };
        f.write_str(name)
    }
}

/// Result of one criterion against one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriterionOutcome {
    pub matched: bool,
    pub score: u32,
}

impl CriterionOutcome {
    /// No matcher configured: counts as a match, weighs nothing.
    pub const VACUOUS: Self = Self {
        matched: true,
        score: 0,
    };

    fn weighted(matched: bool, weight: usize) -> Self {
        Self {
            matched,
            score: if matched {
                u32::try_from(weight).unwrap_or(u32::MAX)
            } else {
                0
            },
        }
    }
}

/// One regex over one request field, expressed as a single-key mapping.
#[derive(Debug, Clone)]
pub struct FieldCriterion {
    key: &'static str,
    matcher: ValueMatcher,
}

impl FieldCriterion {
    fn compile(key: &'static str, pattern: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            key,
            matcher: ValueMatcher::compile([(key, pattern)])?,
        })
    }

    pub fn evaluate(&self, value: &str) -> CriterionOutcome {
        let values = Values::from([(self.key.to_string(), value.to_string())]);
        CriterionOutcome::weighted(self.matcher.contained_in(&values), 1)
    }

    /// Capture groups of the pattern against `value`, group 0 first.
    pub fn captures(&self, value: &str) -> Option<Vec<String>> {
        self.matcher
            .pattern(self.key)
            .and_then(|regex| capture_groups(regex, value))
    }
}

/// Regex over the raw request body bytes.
#[derive(Debug, Clone)]
pub struct BodyCriterion {
    regex: regex::bytes::Regex,
}

impl BodyCriterion {
    fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let regex =
            regex::bytes::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                name: "body".to_string(),
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self { regex })
    }

    pub fn evaluate(&self, body: &[u8]) -> CriterionOutcome {
        CriterionOutcome::weighted(self.regex.is_match(body), 1)
    }

    /// Capture groups as text; bytes that are not UTF-8 are replaced.
    pub fn captures(&self, body: &[u8]) -> Option<Vec<String>> {
        self.regex.captures(body).map(|caps| {
            caps.iter()
                .map(|m| {
                    m.map_or_else(String::new, |m| {
                        String::from_utf8_lossy(m.as_bytes()).into_owned()
                    })
                })
                .collect()
        })
    }
}

/// Query parameters, strict or loose.
#[derive(Debug, Clone)]
pub struct QueryCriterion {
    matcher: ValueMatcher,
    policy: MatchPolicy,
    /// The whole expression as one regex over the raw query, for captures
    raw: Option<Regex>,
}

impl QueryCriterion {
    fn compile(expr: &str, loose: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            matcher: ValueMatcher::compile(parse_query_expression(expr)?)?,
            policy: if loose {
                MatchPolicy::ContainedIn
            } else {
                MatchPolicy::All
            },
            raw: Regex::new(expr).ok(),
        })
    }

    /// Weighs the number of parameter patterns.
    pub fn evaluate(&self, request: &InboundRequest) -> CriterionOutcome {
        CriterionOutcome::weighted(
            self.matcher.matches(self.policy, request.query()),
            self.matcher.matcher_count(),
        )
    }

    pub fn matcher_count(&self) -> usize {
        self.matcher.matcher_count()
    }

    pub fn captures(&self, raw_query: &str) -> Option<Vec<String>> {
        self.raw
            .as_ref()
            .and_then(|regex| capture_groups(regex, raw_query))
    }
}

/// Header matchers under one [`HeaderMatchType`].
#[derive(Debug, Clone)]
pub struct HeaderCriterion {
    matcher: ValueMatcher,
    policy: MatchPolicy,
}

impl HeaderCriterion {
    fn compile(exprs: &[String], match_type: HeaderMatchType) -> Result<Self, ConfigError> {
        let pairs = exprs
            .iter()
            .map(|e| parse_header_expression(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            matcher: ValueMatcher::compile(pairs)?,
            policy: match match_type {
                HeaderMatchType::IfPresent => MatchPolicy::IfPresent,
                HeaderMatchType::Contains => MatchPolicy::ContainedIn,
            },
        })
    }

    pub fn evaluate(&self, request: &InboundRequest) -> CriterionOutcome {
        CriterionOutcome::weighted(self.matcher.matches(self.policy, request.headers()), 1)
    }
}

/// All compiled criteria of one conversation.
#[derive(Debug, Clone, Default)]
pub struct RequestMatchers {
    method: Option<FieldCriterion>,
    path: Option<FieldCriterion>,
    query: Option<QueryCriterion>,
    headers: Option<HeaderCriterion>,
    body: Option<BodyCriterion>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl RequestMatchers {
    pub fn compile(spec: &RequestSpec) -> Result<Self, ConfigError> {
        let url = &spec.url_matcher;
        Ok(Self {
            method: non_empty(&spec.method_matcher)
                .map(|p| FieldCriterion::compile("method", p))
                .transpose()?,
            path: non_empty(&url.path)
                .map(|p| FieldCriterion::compile("path", p))
                .transpose()?,
            query: non_empty(&url.query)
                .map(|q| QueryCriterion::compile(q, url.query_loose_match))
                .transpose()?,
            headers: if spec.header_matchers.is_empty() {
                None
            } else {
                Some(HeaderCriterion::compile(
                    &spec.header_matchers,
                    spec.header_match_type,
                )?)
            },
            body: non_empty(&spec.body_matcher)
                .map(BodyCriterion::compile)
                .transpose()?,
        })
    }

    pub fn evaluate_method(&self, request: &InboundRequest) -> CriterionOutcome {
        self.method
            .as_ref()
            .map_or(CriterionOutcome::VACUOUS, |m| m.evaluate(&request.method))
    }

    /// Path and query together; the score adds up whichever part matched.
    pub fn evaluate_url(&self, request: &InboundRequest) -> CriterionOutcome {
        let path = self
            .path
            .as_ref()
            .map_or(CriterionOutcome::VACUOUS, |p| p.evaluate(&request.path));
        let query = self
            .query
            .as_ref()
            .map_or(CriterionOutcome::VACUOUS, |q| q.evaluate(request));
        CriterionOutcome {
            matched: path.matched && query.matched,
            score: path.score + query.score,
        }
    }

    pub fn evaluate_headers(&self, request: &InboundRequest) -> CriterionOutcome {
        self.headers
            .as_ref()
            .map_or(CriterionOutcome::VACUOUS, |h| h.evaluate(request))
    }

    pub fn evaluate_body(&self, request: &InboundRequest) -> CriterionOutcome {
        self.body
            .as_ref()
            .map_or(CriterionOutcome::VACUOUS, |b| b.evaluate(&request.body))
    }

    /// Every criterion, in pipeline order.
    pub fn evaluate(&self, request: &InboundRequest) -> [(Criterion, CriterionOutcome); 4] {
        [
            (Criterion::Method, self.evaluate_method(request)),
            (Criterion::Url, self.evaluate_url(request)),
            (Criterion::Headers, self.evaluate_headers(request)),
            (Criterion::Body, self.evaluate_body(request)),
        ]
    }

    /// Capture groups keyed by template prefix: `p` (path), `q` (raw query), `b` (body).
    pub fn captures(&self, request: &InboundRequest) -> Vec<(&'static str, Vec<String>)> {
        let mut groups = Vec::new();
        if let Some(found) = self.path.as_ref().and_then(|p| p.captures(&request.path)) {
            groups.push(("p", found));
        }
        if let Some(found) = self
            .query
            .as_ref()
            .and_then(|q| q.captures(&request.raw_query))
        {
            groups.push(("q", found));
        }
        if let Some(found) = self.body.as_ref().and_then(|b| b.captures(&request.body)) {
            groups.push(("b", found));
        }
        groups
    }
}

/// Group 0 is the whole match; unmatched optional groups become empty strings.
fn capture_groups(regex: &Regex, haystack: &str) -> Option<Vec<String>> {
    regex.captures(haystack).map(|caps| {
        caps.iter()
            .map(|m| m.map_or_else(String::new, |m| m.as_str().to_string()))
            .collect()
    })
}
