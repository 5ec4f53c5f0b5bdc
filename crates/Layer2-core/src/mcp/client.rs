//! MCP Client - MCP 서버 클라이언트
//!
//! 도구 프로세스와의 핸드셰이크, 도구 목록 조회, 도구 호출을 담당한다.
//! 재연결은 하지 않는다. 연결 수명 관리는 [`SessionSupervisor`](super::SessionSupervisor)의 몫이다.

use super::transport::{McpTransport, StdioTransport};
use super::types::{McpServerConfig, McpTool, McpToolCall, McpToolResult, MCP_PROTOCOL_VERSION};
use pokedex_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// MCP 클라이언트 정보
#[derive(Debug, Clone, Serialize)]
struct ClientInfo {
    name: String,
    version: String,
}

/// MCP 서버 정보
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Initialize 응답
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    server_info: ServerInfo,
    #[serde(default)]
    capabilities: Value,
}

/// MCP 클라이언트
pub struct McpClient {
    /// 서버 이름
    name: String,

    /// 전송 계층
    transport: Arc<dyn McpTransport>,

    /// 사용 가능한 도구들
    tools: RwLock<Vec<McpTool>>,

    /// 핸드셰이크로 받은 서버 정보
    server_info: RwLock<Option<ServerInfo>>,
}

impl McpClient {
    /// 프로세스를 띄우고 transport 연결 (핸드셰이크 전)
    pub async fn spawn(config: &McpServerConfig) -> Result<Self> {
        let transport = StdioTransport::spawn(config).await?;
        Ok(Self::with_transport(&config.name, Arc::new(transport)))
    }

    /// 이미 열린 transport로 클라이언트 생성
    pub fn with_transport(name: impl Into<String>, transport: Arc<dyn McpTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            tools: RwLock::new(Vec::new()),
            server_info: RwLock::new(None),
        }
    }

    /// 서버 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 연결 상태
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().await.clone()
    }

    /// MCP initialize 핸드셰이크
    pub async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": ClientInfo {
                name: "pokedex".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            "capabilities": {}
        });

        let result = self.transport.request("initialize", Some(params)).await?;

        let init_result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::Transport(format!("Invalid initialize response: {}", e)))?;

        if init_result.protocol_version != MCP_PROTOCOL_VERSION {
            warn!(
                "MCP server '{}' negotiated protocol {} (client speaks {})",
                self.name, init_result.protocol_version, MCP_PROTOCOL_VERSION
            );
        }

        debug!(
            "MCP server '{}' v{} initialized (capabilities: {})",
            init_result.server_info.name, init_result.server_info.version, init_result.capabilities
        );

        *self.server_info.write().await = Some(init_result.server_info);

        // initialized 알림 전송
        self.transport
            .notify("notifications/initialized", None)
            .await?;

        let tool_count = self.refresh_tools().await?.len();
        info!(
            "Connected to MCP server '{}' with {} tools",
            self.name, tool_count
        );

        Ok(())
    }

    /// 도구 목록 새로고침
    pub async fn refresh_tools(&self) -> Result<Vec<McpTool>> {
        let result = self.transport.request("tools/list", None).await?;

        #[derive(Deserialize)]
        struct ToolsListResult {
            tools: Vec<McpTool>,
        }

        let tools_result: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| Error::Transport(format!("Invalid tools/list response: {}", e)))?;

        debug!(
            "Refreshed {} tools from MCP server '{}'",
            tools_result.tools.len(),
            self.name
        );

        *self.tools.write().await = tools_result.tools.clone();
        Ok(tools_result.tools)
    }

    /// 마지막으로 받은 도구 목록
    pub async fn tools(&self) -> Vec<McpTool> {
        self.tools.read().await.clone()
    }

    /// 도구 호출
    pub async fn call_tool(&self, call: &McpToolCall) -> Result<McpToolResult> {
        debug!(
            "Calling MCP tool: {} with args: {}",
            call.name, call.arguments
        );

        let params = json!({
            "name": call.name,
            "arguments": call.arguments
        });

        let result = self.transport.request("tools/call", Some(params)).await?;

        let tool_result: McpToolResult = serde_json::from_value(result).map_err(|e| {
            Error::tool_execution(&call.name, format!("Invalid tools/call response: {}", e))
        })?;

        if tool_result.is_error {
            debug!(
                "MCP tool '{}' returned error: {:?}",
                call.name,
                tool_result.text()
            );
        }

        Ok(tool_result)
    }

    /// 연결 종료
    pub async fn disconnect(&self) -> Result<()> {
        self.transport.close().await?;
        self.tools.write().await.clear();

        info!("Disconnected from MCP server: {}", self.name);
        Ok(())
    }
}
