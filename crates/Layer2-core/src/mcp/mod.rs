//! MCP - Model Context Protocol 연동
//!
//! 도구 프로세스와 stdio로 통신한다. 같은 바이너리가 양쪽을 모두 맡는다.
//!
//! ## 구성
//! - `transport` - 줄 단위 JSON-RPC 전송 계층 (요청 id 다중화)
//! - `client` - 핸드셰이크, 도구 목록, 도구 호출
//! - `supervisor` - 재연결하는 장기 세션 (호출자용 `call_tool`)
//! - `server` - 도구 프로세스 쪽 서버 루프
//!
//! ## 참고
//! - https://modelcontextprotocol.io/

mod client;
mod server;
mod supervisor;
mod transport;
mod types;

pub use client::{McpClient, ServerInfo};
pub use server::{McpServer, ToolProvider};
pub use supervisor::{
    ReconnectPolicy, SessionConnector, SessionPhase, SessionStatus, SessionSupervisor,
    StdioConnector, SupervisorConfig, ToolSession,
};
pub use transport::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpTransport, StdioTransport,
};
pub use types::{McpContent, McpServerConfig, McpTool, McpToolCall, McpToolResult, MCP_PROTOCOL_VERSION};
