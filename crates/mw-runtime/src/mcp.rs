//! Tool providers that speak the Model Context Protocol over streamable HTTP.

use anyhow::{anyhow, Context, Result};
use mw_core::MW_MCP_CONFIG;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tools::{ToolDescriptor, ToolProvider};

const JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// `{"mcpServers": {name: {url, headers}}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers")]
    pub servers: BTreeMap<String, McpServerEntry>,
}

impl McpServersConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).context("MCP config is not valid JSON")?;
        let schema = mw_schemas::cached_schema(mw_schemas::MCP_SERVERS_SCHEMA_V1)?;
        mw_schemas::validate_with(schema, &value)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read MCP config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid MCP config {}", path.display()))
    }

    /// Config named by `MW_MCP_CONFIG`, if set.
    pub fn from_env() -> Result<Option<Self>> {
        match mw_core::optional_string_env(MW_MCP_CONFIG)? {
            Some(path) => Ok(Some(Self::load(Path::new(&path))?)),
            None => Ok(None),
        }
    }

    pub fn providers(&self) -> Result<Vec<Arc<dyn ToolProvider>>> {
        self.servers
            .iter()
            .map(|(name, entry)| {
                let provider = HttpMcpProvider::new(name, entry)?;
                Ok(Arc::new(provider) as Arc<dyn ToolProvider>)
            })
            .collect()
    }
}

/// One MCP server reached over HTTP. Initializes lazily on first use.
pub struct HttpMcpProvider {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    client: HttpClient,
    session: Mutex<McpSession>,
    next_id: AtomicU64,
}

#[derive(Debug, Default)]
struct McpSession {
    initialized: bool,
    session_id: Option<String>,
}

impl HttpMcpProvider {
    pub fn new(name: &str, entry: &McpServerEntry) -> Result<Self> {
        let url = entry.url.trim().to_string();
        if url.is_empty() {
            return Err(anyhow!("MCP server {} has an empty url", name));
        }
        let client = HttpClient::builder()
            .timeout(Duration::from_millis(
                entry.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            url,
            headers: entry.headers.clone(),
            client,
            session: Mutex::new(McpSession::default()),
            next_id: AtomicU64::new(1),
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .session_id
            .clone()
    }

    fn post(&self, request: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(request);
        for (key, value) in &self.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        let response = builder.send().map_err(|err| {
            anyhow!(
                "MCP server {} {} transport error: {}",
                self.name,
                request.method,
                err
            )
        })?;

        let status = response.status();
        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .session_id = Some(session_id.to_string());
        }
        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!(
                "MCP server {} {} failed: status={} body={}",
                self.name,
                request.method,
                status.as_u16(),
                body.replace('\n', " ")
            ));
        }
        if request.id.is_none() || body.trim().is_empty() {
            return Ok(None);
        }

        let payload = if is_sse {
            sse_payload(&body, request.id.as_ref()).ok_or_else(|| {
                anyhow!(
                    "MCP server {} {} sent no JSON-RPC response in its event stream",
                    self.name,
                    request.method
                )
            })?
        } else {
            serde_json::from_str(&body)?
        };
        Ok(Some(payload))
    }

    fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: Some(params),
            id: Some(json!(self.next_id.fetch_add(1, Ordering::SeqCst))),
        };
        let response = self
            .post(&request)?
            .ok_or_else(|| anyhow!("MCP server {} sent an empty reply to {}", self.name, method))?;
        if let Some(error) = response.error {
            return Err(anyhow!(
                "MCP server {} {} error {}: {}",
                self.name,
                method,
                error.code,
                error.message
            ));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .initialized
        {
            return Ok(());
        }
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "mw", "version": env!("CARGO_PKG_VERSION")}
            }),
        )?;
        self.post(&JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "notifications/initialized".to_string(),
            params: None,
            id: None,
        })?;
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .initialized = true;
        tracing::debug!(server = %self.name, "MCP session initialized");
        Ok(())
    }
}

impl ToolProvider for HttpMcpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match cursor.as_ref() {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page = self.rpc("tools/list", params)?;
            let listed = page
                .get("tools")
                .and_then(|t| t.as_array())
                .ok_or_else(|| anyhow!("MCP server {} tools/list has no tools array", self.name))?;
            for tool in listed {
                let Some(name) = tool.get("name").and_then(|n| n.as_str()) else {
                    tracing::warn!(server = %self.name, "skipping unnamed tool");
                    continue;
                };
                let description = tool
                    .get("description")
                    .and_then(|d| d.as_str())
                    .map(str::to_string);
                let schema = tool.get("inputSchema").cloned().unwrap_or(Value::Null);
                tools.push(ToolDescriptor::from_input_schema(name, description, &schema));
            }
            cursor = page
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }
        Ok(tools)
    }

    fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        self.ensure_initialized()?;
        self.rpc(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }
}

/// First `data:` event in an SSE body that answers `id`.
fn sse_payload(body: &str, id: Option<&Value>) -> Option<JsonRpcResponse> {
    let mut data = String::new();
    let mut events = Vec::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            events.push(std::mem::take(&mut data));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }
    events
        .iter()
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(event).ok())
        .find(|response| id.map_or(true, |id| &response.id == id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use tiny_http::{Header, Response, Server};

    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        session: Option<String>,
        auth: Option<String>,
    }

    /// Minimal MCP server: assigns a session on initialize, lists two tools
    /// over SSE, echoes tool calls as HTML text.
    fn serve_mcp(expected_requests: usize) -> (String, thread::JoinHandle<Vec<Seen>>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = Server::from_listener(listener, None).expect("server");
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for _ in 0..expected_requests {
                let mut request = match server.recv() {
                    Ok(request) => request,
                    Err(_) => break,
                };
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let rpc: JsonRpcRequest = serde_json::from_str(&body).expect("rpc body");
                let header = |name: &'static str| {
                    request
                        .headers()
                        .iter()
                        .find(|h| h.field.equiv(name))
                        .map(|h| h.value.to_string())
                };
                seen.push(Seen {
                    method: rpc.method.clone(),
                    session: header(SESSION_HEADER),
                    auth: header("Authorization"),
                });
                let id = rpc.id.clone().unwrap_or(Value::Null);
                let json_header =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).expect("h");
                let response = match rpc.method.as_str() {
                    "initialize" => Response::from_string(
                        json!({"jsonrpc": "2.0", "id": id, "result": {"capabilities": {"tools": {}}}})
                            .to_string(),
                    )
                    .with_header(json_header)
                    .with_header(
                        Header::from_bytes(SESSION_HEADER.as_bytes(), &b"session-42"[..])
                            .expect("h"),
                    ),
                    "notifications/initialized" => Response::from_string("").with_status_code(202),
                    "tools/list" => {
                        let payload = json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                            {"name": "Email-Send", "description": "Send mail",
                             "inputSchema": {"type": "object", "properties": {"to": {"type": "string"}}, "required": ["to"]}},
                            {"name": "Email-Read", "inputSchema": {"type": "object"}}
                        ]}});
                        Response::from_string(format!("event: message\ndata: {}\n\n", payload))
                            .with_header(
                                Header::from_bytes(
                                    &b"Content-Type"[..],
                                    &b"text/event-stream"[..],
                                )
                                .expect("h"),
                            )
                    }
                    "tools/call" => Response::from_string(
                        json!({"jsonrpc": "2.0", "id": id, "result": {"content": [
                            {"type": "text", "text": "<!DOCTYPE html><p>sent</p>"}
                        ]}})
                        .to_string(),
                    )
                    .with_header(json_header),
                    _ => Response::from_string(
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "no"}})
                            .to_string(),
                    )
                    .with_header(json_header),
                };
                let _ = request.respond(response);
            }
            seen
        });
        (format!("http://{}/mcp", addr), handle)
    }

    #[test]
    fn provider_lists_and_calls_tools_within_one_session() {
        let (url, handle) = serve_mcp(4);
        let entry = McpServerEntry {
            url,
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer t0k".to_string())]),
            timeout_ms: Some(5_000),
        };
        let provider = HttpMcpProvider::new("mail", &entry).expect("provider");

        let tools = provider.list_tools().expect("tools");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "Email-Send");
        assert!(tools[0].parameters["to"].required);

        let result = provider
            .call_tool("Email-Send", &json!({"to": "kevin@example.com"}))
            .expect("call");
        assert_eq!(result["content"][0]["text"], "<!DOCTYPE html><p>sent</p>");

        let seen = handle.join().expect("server");
        let methods: Vec<&str> = seen.iter().map(|s| s.method.as_str()).collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
        );
        assert_eq!(seen[0].session, None);
        assert_eq!(seen[3].session.as_deref(), Some("session-42"));
        assert!(seen.iter().all(|s| s.auth.as_deref() == Some("Bearer t0k")));
    }

    #[test]
    fn config_requires_urls() {
        let config = McpServersConfig::parse(
            r#"{"mcpServers": {"mail": {"url": "http://localhost:9000/mcp", "headers": {"X-Key": "k"}}}}"#,
        )
        .expect("config");
        assert_eq!(config.servers["mail"].headers["X-Key"], "k");
        assert_eq!(config.providers().expect("providers").len(), 1);

        assert!(McpServersConfig::parse(r#"{"mcpServers": {"mail": {"headers": {}}}}"#).is_err());
        assert!(McpServersConfig::parse("not json").is_err());
    }

    #[test]
    fn sse_payload_matches_the_request_id() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{}}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":8,\"result\":{\"tools\":[]}}\n\n";
        let response = sse_payload(body, Some(&json!(8))).expect("event");
        assert_eq!(response.id, json!(8));
        assert!(sse_payload(body, Some(&json!(9))).is_none());
    }
}
