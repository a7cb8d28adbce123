//! MCP over stdio: JSON-RPC 2.0, one message per line or `Content-Length`
//! framed. Requests are handled concurrently; replies are written by a single
//! writer task in the framing the peer used.

use std::io;
use std::sync::Arc;

use metabase_core::{ErrorCode, ErrorEnvelope};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::dispatch::Dispatcher;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "metabase-mcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-delimited JSON.
    Line,
    ContentLength,
}

/// One raw message as read from the transport. `payload` is `Err` when the
/// frame itself was unreadable, e.g. a bad `Content-Length` header; the
/// stream stays usable and only that message fails.
#[derive(Debug)]
pub struct Frame {
    pub payload: Result<Vec<u8>, String>,
    pub framing: Framing,
}

#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    session_id: String,
}

impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Runs until the reader reaches EOF and every in-flight request has
    /// been answered.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(
            session_id = %self.session_id,
            tools = self.dispatcher.list_descriptors().len(),
            "MCP server listening on stdio"
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<(Value, Framing)>();
        let writer_task = tokio::spawn(async move {
            while let Some((message, framing)) = rx.recv().await {
                write_message(&mut writer, &message, framing).await?;
            }
            Ok::<(), io::Error>(())
        });

        let mut in_flight = JoinSet::new();
        let mut read_error = None;
        loop {
            let frame = match read_message(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read MCP message");
                    read_error = Some(format!("Failed to read MCP message: {e}"));
                    break;
                }
            };

            let server = self.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                let parsed = frame
                    .payload
                    .and_then(|body| {
                        serde_json::from_slice::<Value>(&body).map_err(|e| format!("Invalid JSON: {e}"))
                    });
                let response = match parsed {
                    Ok(incoming) => server.handle_incoming_message(incoming).await,
                    Err(reason) => Some(error_response(Value::Null, RpcError::parse_error(reason))),
                };
                if let Some(response) = response {
                    let _ = tx.send((response, frame.framing));
                }
            });
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "MCP request task failed");
            }
        }
        drop(tx);

        writer_task
            .await
            .map_err(|e| format!("MCP writer task failed: {e}"))?
            .map_err(|e| format!("Failed to write MCP response: {e}"))?;
        if let Some(e) = read_error {
            return Err(e);
        }
        tracing::info!(session_id = %self.session_id, "MCP client disconnected");
        Ok(())
    }

    /// A batch is answered with an array of the individual responses, or not
    /// at all when it held only notifications.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Option<Value> {
        let Value::Array(batch) = incoming else {
            return self.handle_single_message(incoming).await;
        };
        if batch.is_empty() {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            ));
        }
        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_single_message(item).await {
                responses.push(response);
            }
        }
        (!responses.is_empty()).then_some(Value::Array(responses))
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A response to something we never sent.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                tracing::debug!(method, "Ignoring MCP notification");
                None
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Tools operate on the configured Metabase instance. Use search_content or the list_* tools to find ids before calling get, update or execute tools."
        })
    }

    fn tools_list_payload(&self) -> Value {
        json!({ "tools": self.dispatcher.list_descriptors() })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        tracing::debug!(session_id = %self.session_id, tool = name, "tools/call");
        match self.dispatcher.invoke(name, args).await {
            Ok(envelope) => serde_json::to_value(envelope)
                .map_err(|e| RpcError::internal(format!("Failed to encode tool result: {e}"))),
            Err(envelope) => Err(RpcError::from_envelope(envelope)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        let code = match envelope.code {
            ErrorCode::UnknownCapability => -32601,
            ErrorCode::InvalidArguments => -32602,
            _ => -32603,
        };
        Self {
            code,
            message: envelope.message.clone(),
            data: serde_json::to_value(&envelope).ok(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Reads the next message. Blank lines between messages are skipped; a first
/// line starting with `Content-Length:` switches to header framing for that
/// message. Bytes are passed through undecoded, so invalid UTF-8 surfaces as
/// a JSON parse error for that message only. `None` at a clean EOF.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let first = loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_ascii();
        if !trimmed.is_empty() {
            break trimmed.to_vec();
        }
    };

    let mut length = match content_length(&first) {
        None => {
            return Ok(Some(Frame {
                payload: Ok(first),
                framing: Framing::Line,
            }));
        }
        Some(length) => length,
    };

    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }
        let line = line.trim_ascii();
        if line.is_empty() {
            break;
        }
        if let Some(declared) = content_length(line) {
            length = declared;
        }
    }

    let length = match length {
        Ok(length) => length,
        Err(reason) => {
            return Ok(Some(Frame {
                payload: Err(reason),
                framing: Framing::ContentLength,
            }));
        }
    };
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame {
        payload: Ok(body),
        framing: Framing::ContentLength,
    }))
}

/// `None` when the line is not a `Content-Length` header.
fn content_length(line: &[u8]) -> Option<Result<usize, String>> {
    let line = String::from_utf8_lossy(line);
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-length") {
        return None;
    }
    Some(
        value
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("Invalid Content-Length header: '{}'", value.trim())),
    )
}

pub async fn write_message<W>(writer: &mut W, value: &Value, framing: Framing) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
    }
    writer.flush().await
}
