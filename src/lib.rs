//! mockdev: device emulation for integration tests
//!
//! Serves canned conversations that stand in for the HTTP interfaces and
//! SSH shells of network devices, and builds SNMP OID tables from snapshot
//! files.
//!
//! # Features
//!
//! - **Conversation Matching**: Match by method, path, query, headers and body
//! - **Scoring**: The most specific matching conversation answers
//! - **Break Rules**: Short-circuit matching on match or on mismatch
//! - **Dynamic Templates**: Capture groups, environment and time in responses
//! - **Scripts**: Raw responses from shell scripts, after-response hooks
//! - **Latency Simulation**: Fixed or random delays
//! - **Session Transcripts**: Per-session logs of received and sent data
//! - **SSH Shells**: Line conversations behind password or public-key login
//! - **Recording**: Capture a live HTTP exchange as a conversation file
//!
//! # Example Configuration
//!
//! ```yaml
//! http:
//!   - name: web-ui
//!     bind-addr: 127.0.0.1:8080
//!     conversations:
//!       - name: echo
//!         request:
//!           url-matcher:
//!             path: ^/echo$
//!         response:
//!           body: "Hello {{.p0}}"
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod http;
pub mod matcher;
pub mod record;
pub mod script;
pub mod session;
pub mod snmp;
pub mod ssh;
pub mod template;

pub use config::DaemonConfig;
pub use http::HttpService;
pub use snmp::SnapshotTable;
pub use ssh::LineService;
