// # JSON Lines Node Event Source
//
// This crate provides a NodeEventSource that reads typed node events, one
// JSON object per line, from any async reader.
//
// ## Purpose
//
// Decouples the domain manager from a specific cluster API. Anything that
// can print node events as JSON can drive it:
// - A cluster watcher piped into stdin
// - A recorded event file for replays and dry runs
//
// ## Line Format
//
// ```text
// {"type":"added","node":{"name":"n1","labels":{...},"annotations":{...}}}
// {"type":"updated","node":{"name":"n1","labels":{...},"annotations":{...},"addresses":["10.0.0.1"]}}
// {"type":"removed","name":"n1"}
// ```
//
// Blank lines and lines starting with `#` are ignored. Malformed lines,
// including bytes that are not UTF-8, are logged and skipped. Only an I/O
// error from the reader ends the stream.
//
// ## Gate Filter
//
// Added/Updated snapshots that do not carry the management gate label are
// delivered as `Removed`, so a node losing the label has its claims retired.

use domainmanager_core::config::EngineConfig;
use domainmanager_core::traits::{NodeEvent, NodeEventSource};
use domainmanager_core::{Error, Result};

use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::{Stream, StreamExt};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Management gate: label and value a node must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFilter {
    /// Label key
    pub label: String,
    /// Required value
    pub value: String,
}

impl GateFilter {
    /// Create a gate filter
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Gate configured in the engine settings
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(config.gate_label.clone(), config.gate_value.clone())
    }

    /// Apply the gate to one event
    pub fn apply(&self, event: NodeEvent) -> NodeEvent {
        match event {
            NodeEvent::Added { node } | NodeEvent::Updated { node }
                if !node.is_managed(&self.label, &self.value) =>
            {
                tracing::debug!(node = %node.name, gate = %self.label, "Node not managed, treating as removed");
                NodeEvent::Removed { name: node.name }
            }
            other => other,
        }
    }
}

/// NodeEventSource over newline-delimited JSON
pub struct JsonLinesSource {
    /// Reader, taken by the first watch() call
    reader: Mutex<Option<BoxedReader>>,

    /// Management gate
    gate: GateFilter,
}

impl JsonLinesSource {
    /// Create a source over any async reader
    pub fn new<R>(reader: R, gate: GateFilter) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            gate,
        }
    }

    /// Create a source reading from stdin
    pub fn stdin(gate: GateFilter) -> Self {
        Self::new(tokio::io::stdin(), gate)
    }

    /// Create a source reading from a file
    pub async fn open(path: impl AsRef<Path>, gate: GateFilter) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::config(format!("Failed to open events file {}: {}", path.display(), e))
        })?;
        Ok(Self::new(file, gate))
    }
}

/// Decode one raw line; `None` for blank, comment or malformed lines
fn decode_line(raw: &[u8]) -> Option<NodeEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping node event line that is not valid UTF-8");
            return None;
        }
    };
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    match serde_json::from_str::<NodeEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed node event line");
            None
        }
    }
}

impl NodeEventSource for JsonLinesSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = NodeEvent> + Send + 'static>> {
        let reader = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(reader) = reader else {
            tracing::warn!("JSON lines source already consumed, returning empty stream");
            return Box::pin(tokio_stream::empty());
        };

        tracing::info!(gate = %self.gate.label, "Starting JSON lines node event stream");

        let gate = self.gate.clone();
        let lines = SplitStream::new(BufReader::new(reader).split(b'\n'));

        let events = lines
            .take_while(|line| match line {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read node events, ending stream");
                    false
                }
            })
            .filter_map(move |line| {
                line.ok()
                    .as_deref()
                    .and_then(decode_line)
                    .map(|event| gate.apply(event))
            });

        Box::pin(events)
    }
}
