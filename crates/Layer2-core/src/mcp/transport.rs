//! MCP Transport - 전송 계층 구현
//!
//! 도구 프로세스와의 통신을 위한 전송 계층
//! - Stdio: 자식 프로세스와 stdin/stdout 통신 (줄 단위 JSON-RPC)
//!
//! 하나의 스트림에서 여러 요청을 id로 다중화한다. 스트림이 끊기면
//! 대기 중인 모든 요청이 즉시 실패한다.

use super::types::McpServerConfig;
use async_trait::async_trait;
use pokedex_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// JSON-RPC 2.0 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 수신 메시지 (요청 또는 알림)
///
/// 서버 쪽에서 사용한다. `id`가 없으면 알림이다.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 응답
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC 에러
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::with_code(-32700, msg)
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::with_code(-32600, msg)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::with_code(-32601, format!("Method not found: {}", method))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::with_code(-32602, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::with_code(-32603, msg)
    }

    fn with_code(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            data: None,
        }
    }
}

/// JSON-RPC 알림 (응답 없음)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// MCP 전송 계층 trait
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// 요청 전송 및 응답 수신
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value>;

    /// 알림 전송 (응답 없음)
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()>;

    /// 연결 종료
    async fn close(&self) -> Result<()>;

    /// 연결 상태 확인
    fn is_connected(&self) -> bool;
}

type PendingMap = Arc<RwLock<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Stdio Transport - 프로세스 기반 통신
pub struct StdioTransport {
    /// 요청 ID 카운터
    request_id: AtomicU64,

    /// 자식 프로세스 (in-process 파이프면 None)
    child: Mutex<Option<Child>>,

    /// stdin 쓰기
    stdin_tx: mpsc::Sender<String>,

    /// 대기 중인 요청들 (id -> response sender)
    pending_requests: PendingMap,

    /// 연결 상태
    connected: Arc<AtomicBool>,

    /// 요청 타임아웃
    request_timeout: Duration,

    /// reader / writer / stderr 태스크
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// 새 stdio transport 생성 및 프로세스 시작
    pub async fn spawn(config: &McpServerConfig) -> Result<Self> {
        info!(
            "Spawning MCP process: {} {:?}",
            config.command, config.args
        );

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::Transport(format!(
                "Failed to spawn MCP process '{}': {}",
                config.command, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("Failed to capture stdout".to_string()))?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "MCP stderr: {}", line);
                }
            })
        });

        let transport = Self::from_io(stdout, stdin, config.request_timeout);
        *transport.child.lock().await = Some(child);
        if let Some(task) = stderr_task {
            transport.track(task);
        }

        Ok(transport)
    }

    /// 임의의 읽기/쓰기 스트림 위에 transport 구성
    pub fn from_io<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        // 요청 전송용 채널
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);

        let pending_requests: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let pending_for_writer = Arc::clone(&pending_requests);
        let pending_for_reader = Arc::clone(&pending_requests);

        let connected = Arc::new(AtomicBool::new(true));
        let connected_for_writer = Arc::clone(&connected);
        let connected_for_reader = Arc::clone(&connected);

        // stdin writer task
        let mut stdin_writer = writer;
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                let written = async {
                    stdin_writer.write_all(msg.as_bytes()).await?;
                    stdin_writer.flush().await
                }
                .await;

                if let Err(e) = written {
                    error!("Failed to write to MCP stdin: {}", e);
                    connected_for_writer.store(false, Ordering::SeqCst);
                    pending_for_writer.write().await.clear();
                    break;
                }
            }
        });

        // stdout reader task
        let mut reader = BufReader::new(reader).lines();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        debug!("MCP stdout: {}", line);

                        // JSON-RPC 응답 파싱
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(response) => {
                                if let Some(id) = response.id.as_ref().and_then(Value::as_u64) {
                                    let mut pending = pending_for_reader.write().await;
                                    if let Some(sender) = pending.remove(&id) {
                                        let _ = sender.send(response);
                                    }
                                }
                            }
                            Err(e) => {
                                debug!("Non-JSON-RPC line or parse error: {}", e);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("MCP stdout read error: {}", e);
                        break;
                    }
                }
            }

            connected_for_reader.store(false, Ordering::SeqCst);
            // 대기 중인 요청의 sender를 버려서 즉시 실패시킨다
            pending_for_reader.write().await.clear();
            info!("MCP stdout reader finished");
        });

        Self {
            request_id: AtomicU64::new(1),
            child: Mutex::new(None),
            stdin_tx,
            pending_requests,
            connected,
            request_timeout,
            tasks: std::sync::Mutex::new(vec![writer_task, reader_task]),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    /// 다음 요청 ID 생성
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_line(&self, msg: String) -> Result<()> {
        self.stdin_tx
            .send(format!("{}\n", msg))
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                Error::Transport(format!("Failed to send message: {}", e))
            })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::Transport("MCP transport not connected".to_string()));
        }

        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);

        // 응답 수신 채널 생성
        let (tx, rx) = oneshot::channel();
        self.pending_requests.write().await.insert(id, tx);

        let msg = serde_json::to_string(&request)?;
        debug!("Sending MCP request: {}", msg);

        if let Err(e) = self.send_line(msg).await {
            self.pending_requests.write().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Transport(format!(
                    "MCP response channel closed while waiting for '{}'",
                    method
                )));
            }
            Err(_) => {
                self.pending_requests.write().await.remove(&id);
                return Err(Error::Timeout(format!(
                    "MCP request '{}' timed out after {:?}",
                    method, self.request_timeout
                )));
            }
        };

        // 에러 확인
        if let Some(error) = response.error {
            return Err(Error::mcp(error.code, error.message));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("MCP transport not connected".to_string()));
        }

        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };

        let msg = serde_json::to_string(&notification)?;
        self.send_line(msg).await
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.pending_requests.write().await.clear();

        // 프로세스 종료
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("MCP process already gone: {}", e);
            }
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[test]
    fn test_json_rpc_request() {
        let request =
            JsonRpcRequest::new(1, "test/method", Some(serde_json::json!({"key": "value"})));
        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.id, 1);
        assert_eq!(request.method, "test/method");
    }

    #[test]
    fn test_json_rpc_error() {
        let error = JsonRpcError::parse_error("bad json");
        assert_eq!(error.code, -32700);

        let error = JsonRpcError::method_not_found("resources/list");
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("resources/list"));
    }

    #[test]
    fn test_notification_detection() {
        let msg: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(msg.is_notification());
    }

    /// Echo peer: answers every request with its own params
    fn echo_peer(io: tokio::io::DuplexStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(io);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let msg: JsonRpcMessage = serde_json::from_str(&line).unwrap();
                let Some(id) = msg.id else { continue };
                let response = if msg.method == "fail" {
                    JsonRpcResponse::failure(id, JsonRpcError::invalid_params("nope"))
                } else {
                    JsonRpcResponse::success(id, msg.params.unwrap_or(Value::Null))
                };
                let line = format!("{}\n", serde_json::to_string(&response).unwrap());
                write.write_all(line.as_bytes()).await.unwrap();
            }
        })
    }

    fn transport_pair(timeout: Duration) -> (StdioTransport, JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        (StdioTransport::from_io(read, write, timeout), echo_peer(server))
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (transport, _peer) = transport_pair(Duration::from_secs(5));

        let result = transport
            .request("echo", Some(json!({"name": "ditto"})))
            .await
            .unwrap();
        assert_eq!(result["name"], "ditto");

        let err = transport.request("fail", None).await.unwrap_err();
        assert!(matches!(err, Error::Mcp { code: -32602, .. }));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn test_peer_exit_fails_pending_and_disconnects() {
        let (client, server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        let transport = StdioTransport::from_io(read, write, Duration::from_secs(30));

        // peer reads one line then hangs up without answering
        let peer = tokio::spawn(async move {
            let mut lines = BufReader::new(server).lines();
            let _ = lines.next_line().await;
        });

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(err.poisons_session(), "unexpected error: {err}");
        peer.await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.request("tools/list", None).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client, _server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        let transport = StdioTransport::from_io(read, write, Duration::from_millis(50));

        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_close_marks_disconnected() {
        let (transport, _peer) = transport_pair(Duration::from_secs(5));
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        assert!(transport.notify("notifications/initialized", None).await.is_err());
    }
}
