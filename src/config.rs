//! Configuration for the mock daemon.
//!
//! Defines the daemon file (one list of services per protocol) and the
//! conversation files the services pull their rules from.

use crate::error::ConfigError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info};

/// Main configuration: every service the daemon runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_loglevel")]
    pub loglevel: String,

    /// HTTP services
    #[serde(default)]
    pub http: Vec<HttpServiceConfig>,

    /// Line-oriented (SSH style) services
    #[serde(default)]
    pub ssh: Vec<SshServiceConfig>,

    /// SNMP snapshot tables
    #[serde(default)]
    pub snmp: Vec<SnmpServiceConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            loglevel: default_loglevel(),
            http: Vec::new(),
            ssh: Vec::new(),
            snmp: Vec::new(),
        }
    }
}

fn default_loglevel() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from a YAML file. Relative paths inside it are
    /// resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&content, base).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration text as if it was read from a file in `base`.
    pub fn from_yaml(yaml: &str, base: &Path) -> Result<Self, serde_yaml::Error> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for service in &mut self.http {
            service.conversation_files = make_files_absolute(base, &service.conversation_files);
            for conversation in &mut service.conversations {
                conversation.resolve_body_file(base);
            }
        }
        for service in &mut self.ssh {
            service.host_key_files = make_files_absolute(base, &service.host_key_files);
            service.conversation_files = make_files_absolute(base, &service.conversation_files);
            for conversation in &mut service.conversations {
                conversation.resolve_body_file(base);
            }
        }
        for service in &mut self.snmp {
            service.snapshot_files = make_files_absolute(base, &service.snapshot_files);
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn make_absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn make_files_absolute(base: &Path, files: &[PathBuf]) -> Vec<PathBuf> {
    files.iter().map(|f| make_absolute(base, f)).collect()
}

/// A rule type that can live in a conversation file.
pub trait Conversational: DeserializeOwned + Clone {
    fn name(&self) -> &str;
    fn match_order(&self) -> i32;
    /// Make a relative `body-file` absolute against the declaring file's directory.
    fn resolve_body_file(&mut self, base: &Path);
}

/// Decode one conversation file (a YAML array of rules).
pub fn load_conversation_file<C: Conversational>(path: &Path) -> Result<Vec<C>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut conversations: Vec<C> =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for conversation in &mut conversations {
        conversation.resolve_body_file(base);
    }
    Ok(conversations)
}

/// Inline conversations followed by those from every readable file, sorted
/// by `match-order`. Files that fail to load are logged and skipped.
pub fn collect_conversations<C: Conversational>(inline: &[C], files: &[PathBuf]) -> Vec<C> {
    let mut conversations = inline.to_vec();
    for file in files {
        match load_conversation_file::<C>(file) {
            Ok(loaded) => conversations.extend(loaded),
            Err(e) => error!(error = %e, "Skipping conversation file"),
        }
    }
    conversations.sort_by_key(|c| c.match_order());
    for c in &conversations {
        info!("loaded conversation[{}]: {}", c.match_order(), c.name());
    }
    conversations
}

/// Where and what to write for session transcripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SessionLogging {
    #[serde(default)]
    pub log_received: bool,

    #[serde(default)]
    pub log_sent: bool,

    #[serde(default)]
    pub location: PathBuf,
}

/// One HTTP listener and its conversation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpServiceConfig {
    pub name: String,

    pub bind_addr: String,

    #[serde(default)]
    pub conversation_files: Vec<PathBuf>,

    #[serde(default)]
    pub conversations: Vec<HttpConversation>,

    #[serde(default)]
    pub session_logging: SessionLogging,

    /// Upper bound for each script line (unbounded when absent)
    #[serde(default)]
    pub script_timeout_ms: Option<u64>,
}

impl HttpServiceConfig {
    pub fn load_conversations(&self) -> Vec<HttpConversation> {
        collect_conversations(&self.conversations, &self.conversation_files)
    }
}

/// One line-oriented listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SshServiceConfig {
    pub name: String,

    pub bind_addr: String,

    /// `ssh` (default) or `tcp` for the bare REPL
    #[serde(default)]
    pub transport: LineTransport,

    /// Host private keys in OpenSSH or PEM form
    #[serde(default)]
    pub host_keys: Vec<String>,

    #[serde(default)]
    pub host_key_files: Vec<PathBuf>,

    /// Login name → credentials; nobody can log in when empty
    #[serde(default)]
    pub users: BTreeMap<String, Credentials>,

    #[serde(default)]
    pub conversation_files: Vec<PathBuf>,

    #[serde(default)]
    pub conversations: Vec<SshConversation>,

    #[serde(default = "default_prompt")]
    pub default_prompt: String,

    #[serde(default)]
    pub motd: String,

    #[serde(default)]
    pub session_logging: SessionLogging,
}

/// How a line service is exposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineTransport {
    /// SSH with host keys and per-user authentication
    #[default]
    Ssh,
    /// Plain TCP, no encryption or authentication
    Tcp,
}

/// One SSH login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Credentials {
    #[serde(default)]
    pub password: String,

    /// One `authorized_keys` line, e.g. `ssh-ed25519 AAAA... user@host`
    #[serde(default)]
    pub authorized_key: String,
}

fn default_prompt() -> String {
    "> ".to_string()
}

impl SshServiceConfig {
    pub fn load_conversations(&self) -> Vec<SshConversation> {
        collect_conversations(&self.conversations, &self.conversation_files)
    }
}

/// SNMP snapshot sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnmpServiceConfig {
    pub name: String,

    pub bind_addr: String,

    #[serde(default)]
    pub snapshot_files: Vec<PathBuf>,

    /// Extra snapshot lines, applied after the files
    #[serde(default)]
    pub oids: Vec<String>,

    #[serde(default = "default_read_community")]
    pub community_ro: String,

    #[serde(default = "default_write_community")]
    pub community_rw: String,
}

fn default_read_community() -> String {
    "public".to_string()
}

fn default_write_community() -> String {
    "private".to_string()
}

/// When a conversation short-circuits the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum BreakOn {
    #[default]
    None,
    /// Served as soon as all criteria match
    Match,
    /// Served as soon as any criterion fails
    NoMatch,
}

impl FromStr for BreakOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(BreakOn::None),
            "match" => Ok(BreakOn::Match),
            "no-match" => Ok(BreakOn::NoMatch),
            other => Err(format!(
                "unknown break-on '{other}', expected match or no-match"
            )),
        }
    }
}

impl TryFrom<String> for BreakOn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A declared HTTP rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpConversation {
    /// Unique within the table; used as the score key
    pub name: String,

    #[serde(default)]
    pub match_order: i32,

    #[serde(default)]
    pub break_on: BreakOn,

    #[serde(default)]
    pub request: RequestSpec,

    #[serde(default)]
    pub response: ResponseSpec,

    /// Shell lines run after the response has been handed to the transport
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after_script: Vec<String>,
}

impl HttpConversation {
    /// Validate the parts of a conversation that are not patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidConversation {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        if self.response.body.is_some() && self.response.body_file.is_some() {
            return Err(invalid("body and body-file are mutually exclusive"));
        }
        if !(100..=599).contains(&self.response.status_code) {
            return Err(invalid(&format!(
                "invalid status code {}",
                self.response.status_code
            )));
        }
        if let Some(delay) = &self.response.delay {
            if delay.max != 0 && delay.max < delay.min {
                return Err(invalid("delay max is below min"));
            }
        }
        Ok(())
    }
}

impl Conversational for HttpConversation {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_order(&self) -> i32 {
        self.match_order
    }

    fn resolve_body_file(&mut self, base: &Path) {
        if let Some(file) = &self.response.body_file {
            self.response.body_file = Some(make_absolute(base, file));
        }
    }
}

/// Request criteria. Absent or empty matchers accept anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RequestSpec {
    /// Regex over the HTTP method
    #[serde(default)]
    pub method_matcher: Option<String>,

    #[serde(default)]
    pub url_matcher: UrlMatcherSpec,

    #[serde(default)]
    pub header_match_type: HeaderMatchType,

    /// `Name: regex` entries
    #[serde(default)]
    pub header_matchers: Vec<String>,

    /// Regex over the request body
    #[serde(default)]
    pub body_matcher: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UrlMatcherSpec {
    /// Regex over the URL path
    #[serde(default)]
    pub path: Option<String>,

    /// `name=regex&name=regex` over the query parameters
    #[serde(default)]
    pub query: Option<String>,

    /// Accept extra query parameters the matcher does not name
    #[serde(default)]
    pub query_loose_match: bool,
}

/// How header matchers treat the request's headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", try_from = "String")]
pub enum HeaderMatchType {
    /// Only headers present in the request are checked
    #[default]
    IfPresent,
    /// Every matcher's header must be present and match
    Contains,
}

impl FromStr for HeaderMatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "if-present" => Ok(HeaderMatchType::IfPresent),
            "contains" => Ok(HeaderMatchType::Contains),
            other => Err(format!(
                "unknown header-match-type '{other}', expected if-present or contains"
            )),
        }
    }
}

impl TryFrom<String> for HeaderMatchType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ResponseSpec {
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// `Name: value` templates
    #[serde(default)]
    pub headers: Vec<String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,

    /// Shell lines whose stdout is served verbatim as a raw HTTP response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DelaySpec>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status_code: default_status(),
            headers: Vec::new(),
            body: None,
            body_file: None,
            script: Vec::new(),
            delay: None,
        }
    }
}

fn default_status() -> u16 {
    200
}

/// Latency simulation, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelaySpec {
    #[serde(default)]
    pub min: u64,

    #[serde(default)]
    pub max: u64,
}

impl DelaySpec {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.max > self.min {
            use rand::Rng;
            let mut rng = rand::thread_rng();
            return rng.gen_range(self.min..=self.max);
        }
        self.min
    }
}

/// A declared line rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SshConversation {
    pub name: String,

    #[serde(default)]
    pub match_order: i32,

    /// Regex over the trimmed input line
    pub request_matcher: String,

    #[serde(default)]
    pub response: LineResponseSpec,
}

impl Conversational for SshConversation {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_order(&self) -> i32 {
        self.match_order
    }

    fn resolve_body_file(&mut self, base: &Path) {
        if let Some(file) = &self.response.body_file {
            self.response.body_file = Some(make_absolute(base, file));
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LineResponseSpec {
    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub body_file: Option<PathBuf>,

    /// Prompt to show after this response (default prompt when absent)
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub terminate_connection: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daemon_config() {
        let yaml = r#"
loglevel: debug
http:
  - name: web
    bind-addr: 127.0.0.1:8080
    conversation-files: [convs/web.yaml]
    session-logging:
      log-received: true
      location: /tmp/sessions
    conversations:
      - name: echo
        match-order: 2
        request:
          method-matcher: ^GET$
          url-matcher:
            path: ^/echo$
        response:
          status-code: 201
          headers: ["Content-Type: text/plain"]
          body: "Hello {{.p0}}"
ssh:
  - name: switch
    bind-addr: 127.0.0.1:2222
    motd: Welcome
    host-key-files: [keys/host_ed25519]
    users:
      admin:
        password: secret
    conversations:
      - name: help
        request-matcher: ^help$
        response:
          body: commands
          prompt: "switch# "
snmp:
  - name: agent
    bind-addr: 127.0.0.1:1161
    snapshot-files: [walk.snap]
"#;
        let config = DaemonConfig::from_yaml(yaml, Path::new("/etc/mockdev")).unwrap();
        assert_eq!(config.loglevel, "debug");
        assert_eq!(config.http.len(), 1);

        let web = &config.http[0];
        assert_eq!(
            web.conversation_files,
            vec![PathBuf::from("/etc/mockdev/convs/web.yaml")]
        );
        assert!(web.session_logging.log_received);
        assert!(!web.session_logging.log_sent);

        let echo = &web.conversations[0];
        assert_eq!(echo.match_order, 2);
        assert_eq!(echo.break_on, BreakOn::None);
        assert_eq!(echo.response.status_code, 201);
        assert_eq!(echo.request.url_matcher.path.as_deref(), Some("^/echo$"));
        assert_eq!(echo.request.header_match_type, HeaderMatchType::IfPresent);

        assert_eq!(config.ssh[0].default_prompt, "> ");
        assert_eq!(config.ssh[0].transport, LineTransport::Ssh);
        assert_eq!(
            config.ssh[0].host_key_files,
            vec![PathBuf::from("/etc/mockdev/keys/host_ed25519")]
        );
        assert_eq!(config.ssh[0].users["admin"].password, "secret");
        assert!(config.ssh[0].users["admin"].authorized_key.is_empty());
        assert_eq!(
            config.ssh[0].conversations[0].response.prompt.as_deref(),
            Some("switch# ")
        );
        assert_eq!(
            config.snmp[0].snapshot_files,
            vec![PathBuf::from("/etc/mockdev/walk.snap")]
        );
        assert_eq!(config.snmp[0].community_ro, "public");
    }

    #[test]
    fn test_parse_break_on_and_header_type() {
        let yaml = r#"
- name: maintenance
  break-on: match
  request:
    header-match-type: contains
    header-matchers: ["X-Mode: ^maint$"]
- name: guard
  break-on: no-match
- name: plain
  break-on: ""
"#;
        let convs: Vec<HttpConversation> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(convs[0].break_on, BreakOn::Match);
        assert_eq!(convs[0].request.header_match_type, HeaderMatchType::Contains);
        assert_eq!(convs[1].break_on, BreakOn::NoMatch);
        assert_eq!(convs[2].break_on, BreakOn::None);
        assert_eq!(convs[2].response.status_code, 200);
    }

    #[test]
    fn test_break_on_and_header_type_ignore_case() {
        let yaml = r#"
- name: maintenance
  break-on: Match
  request:
    header-match-type: Contains
- name: guard
  break-on: NO-MATCH
  request:
    header-match-type: If-Present
"#;
        let convs: Vec<HttpConversation> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(convs[0].break_on, BreakOn::Match);
        assert_eq!(convs[0].request.header_match_type, HeaderMatchType::Contains);
        assert_eq!(convs[1].break_on, BreakOn::NoMatch);
        assert_eq!(convs[1].request.header_match_type, HeaderMatchType::IfPresent);

        let unknown = "- name: x\n  break-on: sometimes\n";
        assert!(serde_yaml::from_str::<Vec<HttpConversation>>(unknown).is_err());
        assert_eq!(serde_yaml::to_string(&BreakOn::NoMatch).unwrap().trim(), "no-match");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
- name: typo
  respones:
    body: nope
"#;
        assert!(serde_yaml::from_str::<Vec<HttpConversation>>(yaml).is_err());
    }

    #[test]
    fn test_validate_body_and_body_file() {
        let mut conv: HttpConversation = serde_yaml::from_str("name: both").unwrap();
        assert!(conv.validate().is_ok());

        conv.response.body = Some("inline".to_string());
        conv.response.body_file = Some(PathBuf::from("/tmp/body.txt"));
        assert!(matches!(
            conv.validate(),
            Err(ConfigError::InvalidConversation { .. })
        ));
    }

    #[test]
    fn test_validate_status_and_delay() {
        let mut conv: HttpConversation = serde_yaml::from_str("name: status").unwrap();
        conv.response.status_code = 42;
        assert!(conv.validate().is_err());

        conv.response.status_code = 200;
        conv.response.delay = Some(DelaySpec { min: 50, max: 10 });
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_delay_calculation() {
        let fixed = DelaySpec { min: 100, max: 100 };
        assert_eq!(fixed.calculate(), 100);

        let min_only = DelaySpec { min: 30, max: 0 };
        assert_eq!(min_only.calculate(), 30);

        let range = DelaySpec { min: 50, max: 150 };
        let delay = range.calculate();
        assert!((50..=150).contains(&delay));
    }

    #[test]
    fn test_conversation_files_resolve_and_sort() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extra.yaml");
        std::fs::write(
            &file,
            r#"
- name: from-file
  match-order: 1
  response:
    body-file: bodies/answer.txt
"#,
        )
        .unwrap();

        let inline: Vec<HttpConversation> = serde_yaml::from_str(
            r#"
- name: late
  match-order: 5
- name: early
  match-order: 0
"#,
        )
        .unwrap();

        let missing = dir.path().join("missing.yaml");
        let convs = collect_conversations(&inline, &[file, missing]);
        let names: Vec<_> = convs.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["early", "from-file", "late"]);
        assert_eq!(
            convs[1].response.body_file.as_deref(),
            Some(dir.path().join("bodies/answer.txt").as_path())
        );
    }

    #[test]
    fn test_load_bad_conversation_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.yaml");
        std::fs::write(&file, "name: [not, a, list").unwrap();
        assert!(matches!(
            load_conversation_file::<SshConversation>(&file),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn test_make_absolute() {
        assert_eq!(
            make_absolute(Path::new("/a"), Path::new("/b/c")),
            PathBuf::from("/b/c")
        );
        assert_eq!(
            make_absolute(Path::new("/a"), Path::new("b/c")),
            PathBuf::from("/a/b/c")
        );
    }

    #[test]
    fn test_bundled_config_compiles() {
        let yaml = include_str!("../config/default-config.yaml");
        let config = DaemonConfig::from_yaml(yaml, Path::new("/srv/mockdev")).unwrap();
        assert_eq!(config.http.len(), 1);
        assert_eq!(config.ssh.len(), 1);
        assert_eq!(config.snmp.len(), 1);
        assert_eq!(
            config.http[0].session_logging.location,
            PathBuf::from("sessions/web-ui")
        );

        let table =
            crate::conversation::ConversationTable::compile(config.http[0].load_conversations())
                .unwrap();
        assert_eq!(table.iter().next().map(|c| c.name()), Some("maintenance"));
        assert!(crate::ssh::LineConversationTable::compile(config.ssh[0].load_conversations()).is_ok());
        assert!(crate::snmp::SnapshotTable::load(&config.snmp[0]).is_ok());
    }
}
