//! Session Supervisor - 도구 프로세스와의 장기 세션 관리
//!
//! 하나의 백그라운드 태스크가 transport의 수명을 소유한다.
//!
//! ```text
//! Disconnected ─▶ Connecting ─▶ Initializing ─▶ Ready ─(probe 실패)─▶ Degraded
//!      ▲               │              │           │                     │
//!      └───────────────┴──────────────┴───────────┴─────────────────────┘
//! ```
//!
//! - 연결/핸드셰이크 실패: 재연결 정책에 따른 지연 후 재시도 (무한 반복)
//! - Ready 상태에서 probe 실패 또는 호출 중 transport 에러: 세션 무효화 후 즉시 재연결
//! - 호출자는 Ready가 될 때까지 제한된 시간 동안 기다린다
//! - 종료 시 supervisor 태스크를 취소하고 끝날 때까지 기다린 뒤 transport를 해제한다

use super::client::McpClient;
use super::types::{McpServerConfig, McpTool, McpToolCall, McpToolResult};
use async_trait::async_trait;
use pokedex_foundation::{Error, ReconnectSettings, Result, SessionSettings};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 프로브 주기 하한 (`interval_at`은 0 주기에서 패닉)
const MIN_PROBE_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Seams
// ============================================================================

/// 도구 프로세스와 수립된 채널
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Capability 협상
    async fn initialize(&self) -> Result<()>;

    /// 가벼운 liveness 확인
    async fn probe(&self) -> Result<()>;

    async fn list_tools(&self) -> Result<Vec<McpTool>>;

    async fn call_tool(&self, call: &McpToolCall) -> Result<McpToolResult>;

    /// 채널 해제 (실패하지 않음)
    async fn close(&self);
}

/// 도구 프로세스로 새 채널 연결
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>>;
}

#[async_trait]
impl ToolSession for McpClient {
    async fn initialize(&self) -> Result<()> {
        McpClient::initialize(self).await
    }

    async fn probe(&self) -> Result<()> {
        self.refresh_tools().await.map(|_| ())
    }

    async fn list_tools(&self) -> Result<Vec<McpTool>> {
        self.refresh_tools().await
    }

    async fn call_tool(&self, call: &McpToolCall) -> Result<McpToolResult> {
        McpClient::call_tool(self, call).await
    }

    async fn close(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Error disconnecting MCP server '{}': {}", self.name(), e);
        }
    }
}

/// 도구 프로세스를 띄우고 stdio로 MCP 통신
pub struct StdioConnector {
    config: McpServerConfig,
}

impl StdioConnector {
    pub fn new(config: McpServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionConnector for StdioConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>> {
        let client = McpClient::spawn(&self.config).await?;
        Ok(Arc::new(client))
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// 재연결 지연 정책
///
/// `multiplier == 1.0`이면 고정 딜레이, 더 크면 연속 실패마다
/// `max_delay`까지 증가한다.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: false,
        }
    }

    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            delay: Duration::from_millis(settings.delay_ms),
            multiplier: settings.backoff_multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
        }
    }

    /// `attempt`번째 연속 실패 후 재시도 딜레이 (1부터)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64).max(0.0) as u64;

        let ms = if self.jitter && capped_ms > 1 {
            rand::thread_rng().gen_range(capped_ms / 2..=capped_ms)
        } else {
            capped_ms
        };

        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Ready 상태 liveness 프로브 주기
    pub probe_interval: Duration,
    /// Ready가 아닐 때 호출자가 기다리는 최대 시간
    pub ready_wait: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl SupervisorConfig {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            probe_interval: settings.probe_interval(),
            ready_wait: settings.ready_wait(),
            reconnect: ReconnectPolicy::from_settings(&settings.reconnect),
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Initializing,
    Ready,
    /// 프로브 실패, 세션 해제 직전
    Degraded,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

/// 공유 세션 상태 (`ready`이면 `transport.is_some()`)
struct SessionState {
    transport: Option<Arc<dyn ToolSession>>,
    ready: bool,
    /// 새 전송 계층이 붙을 때마다 증가
    generation: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            transport: None,
            ready: false,
            generation: 0,
        }
    }

    fn attach(&mut self, session: Arc<dyn ToolSession>) -> u64 {
        self.generation += 1;
        self.transport = Some(session);
        self.ready = false;
        self.generation
    }

    fn mark_ready(&mut self, generation: u64) -> bool {
        if self.generation != generation || self.transport.is_none() {
            return false;
        }
        self.ready = true;
        true
    }

    fn release(&mut self) -> Option<Arc<dyn ToolSession>> {
        self.ready = false;
        self.transport.take()
    }

    fn ready_session(&self) -> Option<(u64, Arc<dyn ToolSession>)> {
        match (&self.transport, self.ready) {
            (Some(session), true) => Some((self.generation, Arc::clone(session))),
            _ => None,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.ready && self.generation == generation
    }
}

/// 상태 보고용 스냅샷
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub generation: u64,
    pub supervisor_running: bool,
    pub supervisors_spawned: u64,
    pub connect_attempts: u64,
}

// ============================================================================
// Supervisor
// ============================================================================

/// 세션 supervisor
///
/// `Arc<SessionSupervisor>`로 공유하고 모든 호출은
/// [`call_tool`](Self::call_tool)을 거친다. 백그라운드 태스크는
/// [`shutdown`](Self::shutdown) 전까지 `Arc` 복제본을 쥔다.
pub struct SessionSupervisor {
    connector: Arc<dyn SessionConnector>,
    config: SupervisorConfig,
    state: RwLock<SessionState>,
    phase_tx: watch::Sender<SessionPhase>,
    cancel: CancellationToken,
    /// 두 번째 supervisor 태스크 방지
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
    supervisors_spawned: AtomicU64,
    connect_attempts: AtomicU64,
}

impl SessionSupervisor {
    pub fn new(connector: Arc<dyn SessionConnector>, config: SupervisorConfig) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(SessionPhase::Disconnected);
        Arc::new(Self {
            connector,
            config,
            state: RwLock::new(SessionState::new()),
            phase_tx,
            cancel: CancellationToken::new(),
            task: std::sync::Mutex::new(None),
            supervisors_spawned: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
        })
    }

    /// 설정된 도구 프로세스용 stdio supervisor
    pub fn stdio(server: McpServerConfig, config: SupervisorConfig) -> Arc<Self> {
        Self::new(Arc::new(StdioConnector::new(server)), config)
    }

    /// 실행 중인 태스크가 없으면 supervisor 태스크 시작
    ///
    /// 실제로 띄운 호출만 `true`를 반환한다.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(async move { this.run().await }));
        self.supervisors_spawned.fetch_add(1, Ordering::SeqCst);
        info!("Started MCP session supervisor");
        true
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    pub async fn status(&self) -> SessionStatus {
        let generation = self.state.read().await.generation;
        let supervisor_running = self
            .task
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false);

        SessionStatus {
            phase: self.phase(),
            generation,
            supervisor_running,
            supervisors_spawned: self.supervisors_spawned.load(Ordering::SeqCst),
            connect_attempts: self.connect_attempts.load(Ordering::SeqCst),
        }
    }

    // ========================================================================
    // Caller surface
    // ========================================================================

    /// 이름으로 원격 도구 호출
    ///
    /// `arguments`는 JSON 객체여야 한다 (인자 없으면 null).
    pub async fn call_tool(self: &Arc<Self>, name: &str, arguments: Value) -> Result<McpToolResult> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(Error::InvalidInput(format!(
                    "Tool arguments must be an object, got {}",
                    other
                )));
            }
        };

        let call = McpToolCall::new(name, arguments);
        self.with_session(|session| async move { session.call_tool(&call).await })
            .await
    }

    /// 원격 도구 목록
    pub async fn list_tools(self: &Arc<Self>) -> Result<Vec<McpTool>> {
        self.with_session(|session| async move { session.list_tools().await })
            .await
    }

    async fn with_session<T, F, Fut>(self: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn ToolSession>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_started();

        let (generation, session) = self.wait_ready().await?;

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = op(session) => result,
        };

        if let Err(e) = &result {
            if e.poisons_session() {
                self.invalidate(generation, &e.to_string()).await;
            }
        }

        result
    }

    /// Ready 세션을 최대 `ready_wait` 동안 대기
    async fn wait_ready(&self) -> Result<(u64, Arc<dyn ToolSession>)> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut phase_rx = self.phase_tx.subscribe();
        let wait = async {
            loop {
                if let Some(ready) = self.state.read().await.ready_session() {
                    return Ok(ready);
                }
                if phase_rx.changed().await.is_err() {
                    return Err(Error::SessionUnavailable(
                        "Session supervisor is gone".to_string(),
                    ));
                }
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            waited = tokio::time::timeout(self.config.ready_wait, wait) => match waited {
                Ok(result) => result,
                Err(_) => Err(Error::SessionUnavailable(format!(
                    "Could not connect to MCP server within {:?} (phase: {})",
                    self.config.ready_wait,
                    self.phase()
                ))),
            },
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// supervisor 취소, 종료 대기 후 전송 계층 해제
    pub async fn shutdown(&self) {
        info!("Shutting down MCP session supervisor");
        self.cancel.cancel();

        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Session supervisor task failed: {}", e);
                }
            }
        }

        self.release_transport().await;
        info!("MCP session terminated");
    }

    // ========================================================================
    // Supervisor loop
    // ========================================================================

    async fn run(self: Arc<Self>) {
        let mut failures: u32 = 0;

        while !self.cancel.is_cancelled() {
            let established = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(generation) => {
                    failures = 0;
                    self.monitor(generation).await;
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    self.release_transport().await;

                    let delay = self.config.reconnect.delay_for(failures);
                    warn!(
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to connect to MCP server: {}",
                        e
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.release_transport().await;
        debug!("Session supervisor loop exited");
    }

    /// Disconnected → Connecting → Initializing → Ready
    async fn establish(&self) -> Result<u64> {
        self.phase_tx.send_replace(SessionPhase::Connecting);
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, "Connecting to MCP server...");

        let session = self.connector.connect().await?;

        let generation = {
            let mut state = self.state.write().await;
            let generation = state.attach(Arc::clone(&session));
            self.phase_tx.send_replace(SessionPhase::Initializing);
            generation
        };

        session.initialize().await?;

        {
            let mut state = self.state.write().await;
            if !state.mark_ready(generation) {
                return Err(Error::Transport(
                    "Session was released during the handshake".to_string(),
                ));
            }
            self.phase_tx.send_replace(SessionPhase::Ready);
        }

        info!(generation, "MCP connection initialized successfully");
        Ok(generation)
    }

    /// 프로브 실패, 호출자 무효화, 종료 전까지 Ready 유지
    async fn monitor(&self, generation: u64) {
        // 구독 후 확인: establish와 구독 사이의 invalidate를 놓치지 않는다
        let mut phase_rx = self.phase_tx.subscribe();
        if !self.state.read().await.is_current(generation) {
            debug!(generation, "Session released before monitoring, reconnecting");
            return;
        }

        let period = self.config.probe_interval.max(MIN_PROBE_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = phase_rx.changed() => {
                    if changed.is_err() || !self.state.read().await.is_current(generation) {
                        debug!(generation, "Session no longer current, reconnecting");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    let session = match self.state.read().await.ready_session() {
                        Some((current, session)) if current == generation => session,
                        _ => return,
                    };

                    let probe = tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        probe = session.probe() => probe,
                    };

                    match probe {
                        Ok(()) => debug!(generation, "MCP liveness probe ok"),
                        Err(e) => {
                            error!(generation, "MCP connection error: {}", e);
                            self.degrade(generation).await;
                            self.invalidate(generation, &e.to_string()).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn degrade(&self, generation: u64) {
        let mut state = self.state.write().await;
        if state.generation == generation && state.ready {
            state.ready = false;
            self.phase_tx.send_replace(SessionPhase::Degraded);
        }
    }

    /// 아직 같은 세대면 세션 해제
    async fn invalidate(&self, generation: u64, reason: &str) -> bool {
        let released = {
            let mut state = self.state.write().await;
            if state.generation != generation || state.transport.is_none() {
                return false;
            }
            let released = state.release();
            self.phase_tx.send_replace(SessionPhase::Disconnected);
            released
        };

        warn!(generation, "MCP session invalidated: {}", reason);
        if let Some(session) = released {
            session.close().await;
        }
        true
    }

    async fn release_transport(&self) {
        let released = {
            let mut state = self.state.write().await;
            let released = state.release();
            self.phase_tx.send_replace(SessionPhase::Disconnected);
            released
        };

        if let Some(session) = released {
            session.close().await;
        }
    }
}
