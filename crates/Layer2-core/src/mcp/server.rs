//! MCP Server - stdio 위에서 도구를 제공하는 서버 쪽 구현
//!
//! 줄 단위 JSON-RPC 메시지를 읽고, 요청마다 별도 태스크에서 처리한 뒤
//! 하나의 writer 채널로 응답을 직렬화한다. stdout에는 프로토콜 메시지만 쓴다.

use super::transport::{JsonRpcError, JsonRpcMessage, JsonRpcResponse};
use super::types::{McpTool, McpToolResult, MCP_PROTOCOL_VERSION};
use async_trait::async_trait;
use pokedex_foundation::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// [`McpServer`]가 제공하는 도구들
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// 광고할 도구 정의
    fn tools(&self) -> Vec<McpTool>;

    /// 도구 실행
    ///
    /// `Err(ToolNotFound)`, `Err(InvalidInput)`은 JSON-RPC 에러가 되고
    /// 나머지 에러는 `isError` 도구 결과가 된다.
    async fn call(&self, name: &str, arguments: Value) -> Result<McpToolResult>;
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP 서버
pub struct McpServer {
    name: String,
    version: String,
    provider: Arc<dyn ToolProvider>,
}

impl McpServer {
    pub fn new(name: impl Into<String>, provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            provider,
        }
    }

    /// 수신 메시지 하나 처리 (notification은 응답 없음)
    pub async fn handle(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        let Some(id) = message.id.clone() else {
            debug!("MCP notification: {}", message.method);
            return None;
        };

        if message.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request("invalid jsonrpc version"),
            ));
        }

        let response = match message.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.provider.tools() })),
            "tools/call" => self.handle_tools_call(id, message.params).await,
            other => JsonRpcResponse::failure(id, JsonRpcError::method_not_found(other)),
        };

        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolsCallParams = match serde_json::from_value(params.unwrap_or(Value::Null)) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::failure(
                    id,
                    JsonRpcError::invalid_params(format!("invalid tools/call params: {}", e)),
                );
            }
        };

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        debug!(tool = %params.name, "tools/call");

        match self.provider.call(&params.name, arguments).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string())),
            },
            Err(Error::ToolNotFound(name)) => JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_params(format!("Unknown tool: {}", name)),
            ),
            Err(Error::InvalidInput(msg)) => {
                JsonRpcResponse::failure(id, JsonRpcError::invalid_params(msg))
            }
            Err(e) => {
                warn!(tool = %params.name, "Tool execution failed: {}", e);
                let body = json!({ "error": e.to_string() });
                match serde_json::to_value(McpToolResult::json(&body, true)) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => {
                        JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string()))
                    }
                }
            }
        }
    }

    /// reader EOF까지 서비스한 뒤 진행 중인 요청을 마저 처리
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

        let mut writer = writer;
        let writer_task = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;

                if let Err(e) = written {
                    error!("Failed to write MCP response: {}", e);
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        let mut in_flight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: JsonRpcMessage = match serde_json::from_str(line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Unparseable MCP message: {}", e);
                    let response = JsonRpcResponse::failure(
                        Value::Null,
                        JsonRpcError::parse_error(format!("parse error: {}", e)),
                    );
                    send_response(&out_tx, &response).await;
                    continue;
                }
            };

            let server = Arc::clone(&self);
            let out_tx = out_tx.clone();
            in_flight.spawn(async move {
                if let Some(response) = server.handle(message).await {
                    send_response(&out_tx, &response).await;
                }
            });

            // 끝난 요청 태스크 정리
            while in_flight.try_join_next().is_some() {}
        }

        debug!("MCP input closed, draining {} in-flight requests", in_flight.len());
        while in_flight.join_next().await.is_some() {}

        drop(out_tx);
        if let Err(e) = writer_task.await {
            error!("MCP writer task failed: {}", e);
        }

        info!("MCP server '{}' stopped", self.name);
        Ok(())
    }

    /// 프로세스 자신의 stdin/stdout으로 서비스
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server '{}' on stdio", self.name);
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

async fn send_response(out_tx: &mpsc::Sender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if out_tx.send(line).await.is_err() {
                debug!("MCP writer closed, dropping response");
            }
        }
        Err(e) => error!("Failed to encode MCP response: {}", e),
    }
}
