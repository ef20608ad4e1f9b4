//! Line-oriented conversation service.
//!
//! A character-echo REPL in the style of a device shell: every input line
//! is answered by the first conversation whose pattern matches it. The
//! REPL runs over any async byte stream. The daemon serves it inside SSH
//! shell channels, or on bare TCP when `transport: tcp` is configured.

use crate::config::{Credentials, LineTransport, SshConversation, SshServiceConfig};
use crate::error::ConfigError;
use crate::session::{Direction, SessionCounter, SessionLog};
use async_trait::async_trait;
use regex::Regex;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

const CRLF: &[u8] = b"\r\n";

/// Written when no conversation matches a line.
pub const UNRECOGNIZED: &[u8] = b"I'm not a teapot\r\n";

/// A line rule with its pattern compiled and body loaded.
#[derive(Debug, Clone)]
pub struct LineConversation {
    pub name: String,
    pub matcher: Regex,
    pub body: String,
    pub prompt: Option<String>,
    pub terminate: bool,
}

impl LineConversation {
    fn compile(spec: SshConversation) -> Result<Self, ConfigError> {
        let response = spec.response;
        if response.body.is_some() && response.body_file.is_some() {
            return Err(ConfigError::InvalidConversation {
                name: spec.name,
                reason: "body and body-file are mutually exclusive".to_string(),
            });
        }

        let matcher =
            Regex::new(&spec.request_matcher).map_err(|source| ConfigError::InvalidPattern {
                name: spec.name.clone(),
                pattern: spec.request_matcher.clone(),
                source,
            })?;

        let body = match response.body_file {
            Some(path) => std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::Io { path, source })?,
            None => response.body.unwrap_or_default(),
        };

        Ok(Self {
            name: spec.name,
            matcher,
            body,
            prompt: response.prompt.filter(|p| !p.is_empty()),
            terminate: response.terminate_connection,
        })
    }
}

/// Ordered line rules. First match wins; there is no scoring.
#[derive(Debug, Clone, Default)]
pub struct LineConversationTable {
    conversations: Vec<LineConversation>,
}

impl LineConversationTable {
    pub fn compile(mut specs: Vec<SshConversation>) -> Result<Self, ConfigError> {
        specs.sort_by_key(|c| c.match_order);
        let mut seen = HashSet::new();
        let mut conversations = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::DuplicateName(spec.name));
            }
            conversations.push(LineConversation::compile(spec)?);
        }
        Ok(Self { conversations })
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// First conversation matching the trimmed `line`.
    pub fn find(&self, line: &str) -> Option<&LineConversation> {
        let key = line.trim();
        self.conversations.iter().find(|c| c.matcher.is_match(key))
    }
}

/// Logins accepted by the SSH transport.
#[derive(Debug, Clone, Default)]
pub struct UserTable {
    users: HashMap<String, Login>,
}

#[derive(Debug, Clone, Default)]
struct Login {
    password: Option<String>,
    /// Base64 wire form of the authorized key
    key: Option<String>,
}

impl UserTable {
    /// Keys that do not parse are logged and leave the user with password
    /// login only.
    pub fn from_config(users: &BTreeMap<String, Credentials>) -> Self {
        let users = users
            .iter()
            .map(|(name, credentials)| {
                let key = match authorized_key_blob(&credentials.authorized_key) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(user = %name, error = %e, "unable to parse authorized key");
                        None
                    }
                };
                let login = Login {
                    password: Some(credentials.password.clone()).filter(|p| !p.is_empty()),
                    key,
                };
                (name.clone(), login)
            })
            .collect();
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn check_password(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .and_then(|login| login.password.as_deref())
            .is_some_and(|expected| expected == password)
    }

    pub fn check_key(&self, user: &str, key: &PublicKey) -> bool {
        self.users
            .get(user)
            .and_then(|login| login.key.as_deref())
            .is_some_and(|expected| expected == key.public_key_base64())
    }
}

/// Key blob of an `authorized_keys` line (`type base64 [comment]`, or the
/// bare base64 part). `None` for an empty line.
fn authorized_key_blob(line: &str) -> Result<Option<String>, russh_keys::Error> {
    let mut fields = line.split_whitespace();
    let blob = match (fields.next(), fields.next()) {
        (None, _) => return Ok(None),
        (Some(only), None) => only,
        (Some(_), Some(blob)) => blob,
    };
    let key = russh_keys::parse_public_key_base64(blob)?;
    Ok(Some(key.public_key_base64()))
}

/// Host keys from `host-key-files` then `host-keys`. Unreadable keys are
/// skipped; with none left an ed25519 key is generated for this run.
fn load_host_keys(config: &SshServiceConfig) -> Vec<KeyPair> {
    let mut keys = Vec::new();
    for file in &config.host_key_files {
        info!(service = %config.name, file = %file.display(), "loading key-file");
        match std::fs::read_to_string(file) {
            Ok(text) => match russh_keys::decode_secret_key(&text, None) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(service = %config.name, error = %e, "while loading key-file"),
            },
            Err(e) => warn!(service = %config.name, error = %e, "while loading key-file"),
        }
    }
    for text in &config.host_keys {
        match russh_keys::decode_secret_key(text, None) {
            Ok(key) => keys.push(key),
            Err(e) => warn!(service = %config.name, error = %e, "while loading key"),
        }
    }

    if keys.is_empty() {
        let generated: Option<KeyPair> = KeyPair::generate_ed25519().into();
        match generated {
            Some(key) => {
                info!(service = %config.name, "no host key configured, using a generated ed25519 key");
                keys.push(key);
            }
            None => error!(service = %config.name, "unable to generate a host key"),
        }
    }
    keys
}

fn ssh_config(keys: Vec<KeyPair>) -> server::Config {
    server::Config {
        keys,
        methods: MethodSet::PASSWORD | MethodSet::PUBLICKEY,
        auth_rejection_time: Duration::from_millis(250),
        ..Default::default()
    }
}

/// One line-oriented listener.
pub struct LineService {
    name: String,
    bind_addr: String,
    table: LineConversationTable,
    default_prompt: String,
    motd: String,
    sessions: Arc<SessionCounter>,
    session_log: SessionLog,
    users: UserTable,
    /// Set for the SSH transport
    ssh: Option<Arc<server::Config>>,
}

impl LineService {
    pub fn from_config(config: &SshServiceConfig) -> Result<Self, ConfigError> {
        let table = LineConversationTable::compile(config.load_conversations())?;
        let users = UserTable::from_config(&config.users);
        let ssh = match config.transport {
            LineTransport::Ssh => {
                if users.is_empty() {
                    warn!(service = %config.name, "no users configured, every login will be refused");
                }
                Some(Arc::new(ssh_config(load_host_keys(config))))
            }
            LineTransport::Tcp => None,
        };

        Ok(Self {
            name: config.name.clone(),
            bind_addr: config.bind_addr.clone(),
            table,
            default_prompt: config.default_prompt.clone(),
            motd: config.motd.clone(),
            sessions: Arc::new(SessionCounter::new()),
            session_log: SessionLog::from(&config.session_logging),
            users,
            ssh,
        })
    }

    /// Draw session ids from `sessions` instead of a private counter.
    pub fn with_session_counter(mut self, sessions: Arc<SessionCounter>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &LineConversationTable {
        &self.table
    }

    pub fn transport(&self) -> LineTransport {
        if self.ssh.is_some() {
            LineTransport::Ssh
        } else {
            LineTransport::Tcp
        }
    }

    /// Run the REPL until the peer disconnects or a conversation ends it.
    pub async fn handle_connection<S>(&self, stream: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let id = self.sessions.next();
        self.session_log.open(id).await?;
        debug!(service = %self.name, session = id, "session started");

        let mut stream = BufReader::new(stream);
        let mut greeting = self.motd.clone().into_bytes();
        greeting.extend_from_slice(CRLF);
        self.send(&mut stream, id, &greeting).await?;
        stream.write_all(self.default_prompt.as_bytes()).await?;

        let mut skip_lf = false;
        loop {
            let Some(line) = read_line(&mut stream, &mut skip_lf).await? else {
                debug!(service = %self.name, session = id, "connection closed by peer");
                return Ok(());
            };
            let line = line.trim();
            debug!(session = id, "Got a full line: {}", line);
            self.session_log
                .record(id, Direction::Received, line.as_bytes())
                .await?;

            match self.table.find(line) {
                None => {
                    warn!(service = %self.name, session = id, line = %line, "no conversation matched");
                    self.send(&mut stream, id, UNRECOGNIZED).await?;
                    stream.write_all(self.default_prompt.as_bytes()).await?;
                }
                Some(conversation) => {
                    debug!(session = id, conversation = %conversation.name, "matched conversation");
                    if !conversation.body.is_empty() {
                        trace!(body = %conversation.body, "body");
                        let mut body = conversation.body.clone().into_bytes();
                        body.extend_from_slice(CRLF);
                        self.send(&mut stream, id, &body).await?;
                    }
                    if conversation.terminate {
                        info!(service = %self.name, session = id, conversation = %conversation.name, "connection terminated by conversation");
                        stream.flush().await?;
                        return Ok(());
                    }
                    let prompt = conversation.prompt.as_deref().unwrap_or(&self.default_prompt);
                    stream.write_all(prompt.as_bytes()).await?;
                }
            }
            stream.flush().await?;
        }
    }

    async fn send<W>(&self, stream: &mut W, id: u64, data: &[u8]) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(data).await?;
        self.session_log.record(id, Direction::Sent, data).await
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
            let service = Arc::clone(&self);
            match &self.ssh {
                Some(config) => {
                    tokio::spawn(service.serve_ssh(Arc::clone(config), stream, peer));
                }
                None => {
                    tokio::spawn(async move {
                        if let Err(e) = service.handle_connection(stream).await {
                            error!(service = %service.name, %peer, error = %e, "session ended with error");
                        }
                    });
                }
            }
        }
    }

    async fn serve_ssh(
        self: Arc<Self>,
        config: Arc<server::Config>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let name = self.name.clone();
        let handler = SshConnection {
            service: self,
            peer,
            channels: HashMap::new(),
        };
        let running = match server::run_stream(config, stream, handler).await {
            Ok(running) => running,
            Err(e) => {
                warn!(service = %name, %peer, error = %e, "SSH handshake failed");
                return;
            }
        };
        if let Err(e) = running.await {
            debug!(service = %name, %peer, error = %e, "SSH connection closed");
        }
    }

    /// Bind `bind-addr` and serve.
    pub async fn run(self: Arc<Self>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        info!(
            service = %self.name,
            conversations = self.table.len(),
            transport = ?self.transport(),
            "line service listening on {}",
            listener.local_addr()?
        );
        self.serve(listener).await
    }
}

/// Per-connection SSH state: authentication, then one REPL per shell channel.
struct SshConnection {
    service: Arc<LineService>,
    peer: SocketAddr,
    /// Opened session channels waiting for their shell request
    channels: HashMap<ChannelId, Channel<Msg>>,
}

#[async_trait]
impl server::Handler for SshConnection {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.service.users.check_password(user, password) {
            info!(service = %self.service.name, "user {} authenticated using password", user);
            return Ok(Auth::Accept);
        }
        info!(service = %self.service.name, "password authentication failed for {}@{}", user, self.peer);
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if self.service.users.check_key(user, key) {
            info!(service = %self.service.name, "user {} authenticated using public key", user);
            return Ok(Auth::Accept);
        }
        info!(service = %self.service.name, "public-key authentication failed for {}@{}", user, self.peer);
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(open) = self.channels.remove(&channel) else {
            session.channel_failure(channel);
            return Ok(());
        };
        session.channel_success(channel);

        let service = Arc::clone(&self.service);
        let handle = session.handle();
        let peer = self.peer;
        tokio::spawn(async move {
            if let Err(e) = service.handle_connection(Box::pin(open.into_stream())).await {
                error!(service = %service.name, %peer, error = %e, "session ended with error");
            }
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        Ok(())
    }
}

/// Read one line, echoing each byte. CR or LF ends the line and is echoed
/// as CRLF; an LF directly after a CR terminator is dropped. `None` on EOF.
async fn read_line<S>(stream: &mut S, skip_lf: &mut bool) -> std::io::Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = match stream.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let after_cr = std::mem::take(skip_lf);
        match byte {
            b'\n' if after_cr => continue,
            b'\r' | b'\n' => {
                *skip_lf = byte == b'\r';
                stream.write_all(CRLF).await?;
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            _ => {
                stream.write_all(&[byte]).await?;
                stream.flush().await?;
                line.push(byte);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionLogging;
    use std::path::Path;
    use tokio::io::duplex;

    const ROUTER: &str = r#"
- name: help
  request-matcher: ^help$
  response:
    body: "available: show, exit"
    prompt: "router# "
- name: exit
  match-order: 5
  request-matcher: ^exit$
  response:
    body: bye
    terminate-connection: true
- name: anything-show
  request-matcher: show
  response:
    body: nothing to show
"#;

    fn config(location: Option<&Path>) -> SshServiceConfig {
        let conversations: Vec<SshConversation> = serde_yaml::from_str(ROUTER).unwrap();
        let session_logging = match location {
            Some(dir) => SessionLogging {
                log_received: true,
                log_sent: true,
                location: dir.to_path_buf(),
            },
            None => SessionLogging::default(),
        };
        SshServiceConfig {
            name: "router".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            transport: LineTransport::Tcp,
            host_keys: Vec::new(),
            host_key_files: Vec::new(),
            users: BTreeMap::new(),
            conversation_files: Vec::new(),
            conversations,
            default_prompt: "> ".to_string(),
            motd: "Welcome".to_string(),
            session_logging,
        }
    }

    fn service() -> LineService {
        LineService::from_config(&config(None)).unwrap()
    }

    #[test]
    fn test_first_match_wins_in_order() {
        let service = service();
        let table = service.table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.find("  help \t").unwrap().name, "help");
        assert_eq!(table.find("show run").unwrap().name, "anything-show");
        assert_eq!(table.find("exit").unwrap().name, "exit");
        assert!(table.find("xyz").is_none());
    }

    #[test]
    fn test_bad_pattern() {
        let specs: Vec<SshConversation> =
            serde_yaml::from_str("- name: bad\n  request-matcher: \"(\"\n").unwrap();
        assert!(matches!(
            LineConversationTable::compile(specs),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_body_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("version.txt");
        std::fs::write(&file, "v1.2.3").unwrap();
        let specs: Vec<SshConversation> = serde_yaml::from_str(&format!(
            "- name: version\n  request-matcher: ^version$\n  response:\n    body-file: {}\n",
            file.display()
        ))
        .unwrap();

        let table = LineConversationTable::compile(specs).unwrap();
        assert_eq!(table.find("version").unwrap().body, "v1.2.3");
    }

    #[tokio::test]
    async fn test_exact_transcript() {
        let mock = tokio_test::io::Builder::new()
            .write(b"Welcome\r\n> ")
            .read(b"help\r\nxyz\n")
            .write(b"help\r\n")
            .write(b"available: show, exit\r\n")
            .write(b"router# ")
            .write(b"xyz\r\n")
            .write(b"I'm not a teapot\r\n")
            .write(b"> ")
            .build();

        service().handle_connection(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_connection() {
        let mock = tokio_test::io::Builder::new()
            .write(b"Welcome\r\n> ")
            .read(b"exit\r")
            .write(b"exit\r\n")
            .write(b"bye\r\n")
            .build();

        service().handle_connection(mock).await.unwrap();
    }

    #[tokio::test]
    async fn test_repl_over_duplex_with_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let service = LineService::from_config(&config(Some(dir.path()))).unwrap();
        let (client, server) = duplex(1024);

        let session = tokio::spawn(async move { service.handle_connection(server).await });

        let (mut reader, mut writer) = tokio::io::split(client);
        writer.write_all(b"help\r\nexit\r\n").await.unwrap();
        let mut output = Vec::new();
        reader.read_to_end(&mut output).await.unwrap();
        session.await.unwrap().unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Welcome\r\n> help\r\navailable: show, exit\r\nrouter# exit\r\nbye\r\n"
        );

        let transcript = std::fs::read_to_string(dir.path().join("sess_0001.log")).unwrap();
        let lines: Vec<&str> = transcript.lines().collect();
        assert!(lines[0].starts_with("# session 1, "));
        assert!(transcript.contains("r: help\n"));
        assert!(transcript.contains("s: bye\r\n"));
    }

    #[tokio::test]
    async fn test_shared_counter() {
        let counter = Arc::new(SessionCounter::new());
        counter.next();
        let service = service().with_session_counter(Arc::clone(&counter));

        let mock = tokio_test::io::Builder::new().write(b"Welcome\r\n> ").build();
        service.handle_connection(mock).await.unwrap();
        assert_eq!(counter.next(), 3);
    }

    const HOST_KEY: &str = include_str!("../fixtures/host_ed25519");
    const OPERATOR_KEY: &str = include_str!("../fixtures/operator_ed25519");
    const OPERATOR_PUB: &str = include_str!("../fixtures/operator_ed25519.pub");
    const HOST_PUB_BLOB: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAICNmYvYwIxgJjWKa8qmHfnOe6E5lBZ/2Rr8mzUt55/84";

    fn users() -> BTreeMap<String, Credentials> {
        BTreeMap::from([
            (
                "admin".to_string(),
                Credentials {
                    password: "secret".to_string(),
                    authorized_key: String::new(),
                },
            ),
            (
                "operator".to_string(),
                Credentials {
                    password: String::new(),
                    authorized_key: OPERATOR_PUB.trim().to_string(),
                },
            ),
            (
                "broken".to_string(),
                Credentials {
                    password: "pw".to_string(),
                    authorized_key: "ssh-ed25519 not-base64".to_string(),
                },
            ),
        ])
    }

    #[test]
    fn test_user_table() {
        let table = UserTable::from_config(&users());
        assert_eq!(table.len(), 3);

        assert!(table.check_password("admin", "secret"));
        assert!(!table.check_password("admin", "Secret"));
        assert!(!table.check_password("nobody", "secret"));
        assert!(!table.check_password("operator", ""));
        assert!(table.check_password("broken", "pw"));

        let operator_blob = OPERATOR_PUB.split_whitespace().nth(1).unwrap();
        let operator = russh_keys::parse_public_key_base64(operator_blob).unwrap();
        let host = russh_keys::parse_public_key_base64(HOST_PUB_BLOB).unwrap();
        assert!(table.check_key("operator", &operator));
        assert!(!table.check_key("operator", &host));
        assert!(!table.check_key("admin", &operator));
        assert!(!table.check_key("broken", &operator));
    }

    #[test]
    fn test_authorized_key_blob() {
        assert_eq!(authorized_key_blob("  ").unwrap(), None);
        let with_comment = authorized_key_blob(OPERATOR_PUB).unwrap();
        let bare = authorized_key_blob(OPERATOR_PUB.split_whitespace().nth(1).unwrap()).unwrap();
        assert!(with_comment.is_some());
        assert_eq!(with_comment, bare);
        assert!(authorized_key_blob("ssh-ed25519 !!!").is_err());
    }

    fn ssh_service_config() -> SshServiceConfig {
        let mut config = config(None);
        config.transport = LineTransport::Ssh;
        config.host_keys = vec![HOST_KEY.to_string()];
        config.users = users();
        config
    }

    #[test]
    fn test_transport_selection() {
        assert_eq!(service().transport(), LineTransport::Tcp);
        let ssh = LineService::from_config(&ssh_service_config()).unwrap();
        assert_eq!(ssh.transport(), LineTransport::Ssh);
    }

    struct AcceptAnyHostKey;

    #[async_trait]
    impl russh::client::Handler for AcceptAnyHostKey {
        type Error = russh::Error;

        async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
            Ok(true)
        }
    }

    async fn ssh_server() -> SocketAddr {
        let service = Arc::new(LineService::from_config(&ssh_service_config()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(service.serve(listener));
        addr
    }

    async fn ssh_client(addr: SocketAddr) -> russh::client::Handle<AcceptAnyHostKey> {
        let config = Arc::new(russh::client::Config::default());
        russh::client::connect(config, addr, AcceptAnyHostKey)
            .await
            .unwrap()
    }

    /// Open a shell, type `input` and collect everything until the server
    /// closes the channel.
    async fn shell_transcript(
        client: &russh::client::Handle<AcceptAnyHostKey>,
        input: &[u8],
    ) -> String {
        let mut channel = client.channel_open_session().await.unwrap();
        channel.request_shell(true).await.unwrap();
        let mut stream = channel.into_stream();
        stream.write_all(input).await.unwrap();

        let mut output = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut output))
            .await
            .unwrap()
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn test_ssh_password_login_runs_repl() {
        let addr = ssh_server().await;
        let mut client = ssh_client(addr).await;
        assert!(!client.authenticate_password("admin", "wrong").await.unwrap());
        assert!(client.authenticate_password("admin", "secret").await.unwrap());

        let transcript = shell_transcript(&client, b"help\rxyz\rexit\r").await;
        assert_eq!(
            transcript,
            "Welcome\r\n> help\r\navailable: show, exit\r\nrouter# xyz\r\nI'm not a teapot\r\n> exit\r\nbye\r\n"
        );
    }

    #[tokio::test]
    async fn test_ssh_public_key_login() {
        let addr = ssh_server().await;
        let key = Arc::new(russh_keys::decode_secret_key(OPERATOR_KEY, None).unwrap());

        let mut client = ssh_client(addr).await;
        assert!(!client
            .authenticate_publickey("admin", Arc::clone(&key))
            .await
            .unwrap());
        assert!(client.authenticate_publickey("operator", key).await.unwrap());

        let transcript = shell_transcript(&client, b"exit\r").await;
        assert_eq!(transcript, "Welcome\r\n> exit\r\nbye\r\n");
    }
}
