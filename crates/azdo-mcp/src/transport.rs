//! Transport layer for MCP JSON-RPC communication.
//!
//! MCP uses newline-delimited JSON over stdin/stdout. Reads happen on the
//! server loop; the write side is a cloneable handle so background tasks
//! (the test-watch sink) can push notifications between responses.

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Message that can be received from the client.
#[derive(Debug)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

/// Cloneable handle for writing JSON-RPC messages.
///
/// Each message is written as a single line and flushed under the lock,
/// so concurrent writers never interleave partial lines.
#[derive(Clone)]
pub struct TransportWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl TransportWriter {
    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write a JSON-RPC response to the transport.
    pub fn send_response(&self, response: &JsonRpcResponse) -> io::Result<()> {
        let json = serde_json::to_string(response).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )
        })?;

        tracing::debug!("Sending: {}", json);
        self.write_line(&json)
    }

    /// Write a JSON-RPC notification to the transport.
    pub fn send_notification(&self, notification: &JsonRpcNotification) -> io::Result<()> {
        let json = serde_json::to_string(notification).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )
        })?;

        tracing::debug!("Sending notification: {}", json);
        self.write_line(&json)
    }

    fn write_line(&self, json: &str) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "transport writer poisoned"))?;
        writeln!(writer, "{}", json)?;
        writer.flush()
    }
}

/// Transport for reading/writing JSON-RPC messages.
pub struct StdioTransport {
    reader: Box<dyn BufRead + Send>,
    writer: TransportWriter,
}

impl StdioTransport {
    /// Create a transport using stdin/stdout.
    pub fn stdio() -> Self {
        Self {
            reader: Box::new(io::BufReader::new(io::stdin())),
            writer: TransportWriter::new(Box::new(io::stdout())),
        }
    }

    /// Create a transport with custom reader/writer (for testing).
    #[cfg(test)]
    pub fn new(reader: Box<dyn BufRead + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader,
            writer: TransportWriter::new(writer),
        }
    }

    /// Get a write handle that can outlive the read loop.
    pub fn writer(&self) -> TransportWriter {
        self.writer.clone()
    }

    /// Read a single JSON-RPC message from the transport.
    ///
    /// Blank lines are skipped; `None` means EOF.
    pub fn read_message(&mut self) -> io::Result<Option<IncomingMessage>> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None); // EOF
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            tracing::debug!("Received: {}", line);

            // Try to parse as request first (has id field)
            if let Ok(request) = serde_json::from_str::<JsonRpcRequest>(line) {
                return Ok(Some(IncomingMessage::Request(request)));
            }

            // Try as notification (no id field)
            if let Ok(notification) = serde_json::from_str::<JsonRpcNotification>(line) {
                return Ok(Some(IncomingMessage::Notification(notification)));
            }

            tracing::warn!("Failed to parse message: {}", line);
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid JSON-RPC message: {}", line),
            ));
        }
    }
}
