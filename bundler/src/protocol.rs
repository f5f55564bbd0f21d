//! Host message protocol.
//!
//! The bundler talks to its embedder through JSON-compatible messages. The
//! transport itself (parent frame, websocket, stdio) is the embedder's
//! concern; this module only defines the shapes and the in-process event
//! sink outbound messages flow through.
//!
//! The `compilatonError` field keeps its historical spelling: existing
//! consumers match on it.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Level of a console record, by its method name. `log` counts as info.
    pub fn for_method(method: &str) -> Self {
        match method {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warning,
            "debug" | "trace" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Initializing,
    InstallingDependencies,
    Transpiling,
    Evaluating,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingModule {
    pub path: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    Compile {
        modules: IndexMap<String, IncomingModule>,
        template: String,
        #[serde(default)]
        has_file_resolver: bool,
        #[serde(default)]
        log_level: Option<LogLevel>,
    },
    Refresh,
    Evaluate {
        command: String,
    },
    #[serde(rename_all = "camelCase")]
    FsResponse {
        request_id: u64,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(default)]
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorAction {
    pub action: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    pub payload: ActionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
    pub method: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranspiledSource {
    pub is_entry: bool,
    pub file_name: String,
    pub compiled_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranspiledModule {
    pub source: TranspiledSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerState {
    pub transpiled_modules: IndexMap<String, TranspiledModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    Initialized,
    #[serde(rename_all = "camelCase")]
    Start {
        first_load: bool,
    },
    Status {
        status: Status,
    },
    State {
        state: BundlerState,
    },
    Done {
        #[serde(rename = "compilatonError")]
        compilaton_error: bool,
    },
    Success,
    Action(ErrorAction),
    Console {
        #[serde(skip_serializing_if = "Option::is_none")]
        log: Option<ConsoleRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    Resize {
        height: u32,
    },
    Refresh,
}

/// On-disk bundle format served over the static HTTP boundary: the file
/// map, the entry path, and optionally the template to compile under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFile {
    pub files: IndexMap<String, BundleFileEntry>,
    pub entry: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFileEntry {
    pub code: String,
}

/// Fan-out sink for outbound messages. Every subscriber gets the
/// `initialized` handshake first, then a copy of each emitted message.
#[derive(Clone, Default)]
pub struct EventSink {
    senders: Arc<Mutex<Vec<mpsc::UnboundedSender<OutboundMessage>>>>,
}

impl EventSink {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(OutboundMessage::Initialized);
        self.senders.lock().push(tx);
        rx
    }

    pub fn emit(&self, message: OutboundMessage) {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(message.clone()).is_ok());
    }
}
