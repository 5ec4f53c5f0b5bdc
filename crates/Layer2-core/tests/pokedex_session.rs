//! 세션 통합 테스트
//!
//! caller → SessionSupervisor → McpServer → PokemonCache → in-memory SQLite,
//! 프로세스 대신 `tokio::io::duplex` 파이프로 연결한다.
//!
//! `cargo test -p pokedex-core --test pokedex_session`

use async_trait::async_trait;
use pokedex_core::mcp::{McpServer, StdioTransport};
use pokedex_core::{
    Error, Health, McpClient, PokedexService, PokedexTools, PokemonCache, ReconnectPolicy,
    Result, ServiceReply, SessionConnector, SessionPhase, SessionSupervisor, SupervisorConfig,
    ToolProvider, ToolSession, UpstreamFetcher,
};
use pokedex_foundation::{RecordStore, Storage};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Upstream double: knows ditto only
struct DittoOnly {
    calls: AtomicUsize,
}

#[async_trait]
impl UpstreamFetcher for DittoOnly {
    async fn fetch(&self, path: &str) -> Option<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (path == "pokemon/ditto").then(|| {
            json!({
                "id": 132,
                "name": "ditto",
                "height": 3,
                "weight": 40,
                "types": [{"type": {"name": "normal"}}],
                "abilities": [{"ability": {"name": "limber"}}],
                "stats": [{"base_stat": 48, "stat": {"name": "hp"}}],
                "sprites": {"front_default": "https://img/132.png"}
            })
        })
    }
}

/// Connects each session to a fresh in-process tool server
struct DuplexConnector {
    provider: Arc<dyn ToolProvider>,
    servers: Mutex<Vec<JoinHandle<Result<()>>>>,
}

impl DuplexConnector {
    fn connects(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    /// Simulate the tool process dying
    fn kill_current(&self) {
        if let Some(server) = self.servers.lock().unwrap().last() {
            server.abort();
        }
    }
}

#[async_trait]
impl SessionConnector for DuplexConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let (server_read, server_write) = tokio::io::split(server_io);
        let server = Arc::new(McpServer::new("pokeapi", Arc::clone(&self.provider)));
        let handle = tokio::spawn(server.serve(server_read, server_write));
        self.servers.lock().unwrap().push(handle);

        let (client_read, client_write) = tokio::io::split(client_io);
        let transport = StdioTransport::from_io(client_read, client_write, Duration::from_secs(5));
        Ok(Arc::new(McpClient::with_transport("pokeapi", Arc::new(transport))))
    }
}

/// Always fails to spawn
struct DeadConnector;

#[async_trait]
impl SessionConnector for DeadConnector {
    async fn connect(&self) -> Result<Arc<dyn ToolSession>> {
        Err(Error::Transport("No such file or directory (os error 2)".to_string()))
    }
}

struct Harness {
    storage: Storage,
    upstream: Arc<DittoOnly>,
    connector: Arc<DuplexConnector>,
    session: Arc<SessionSupervisor>,
    service: PokedexService,
}

fn config() -> SupervisorConfig {
    SupervisorConfig {
        // probes stay out of the way; failures surface through calls
        probe_interval: Duration::from_secs(3600),
        ready_wait: Duration::from_secs(5),
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(20)),
    }
}

fn harness() -> Harness {
    let storage = Storage::in_memory().unwrap();
    let upstream = Arc::new(DittoOnly {
        calls: AtomicUsize::new(0),
    });
    let fetcher: Arc<dyn UpstreamFetcher> = upstream.clone();
    let cache = PokemonCache::new(Arc::new(storage.clone()), Arc::clone(&fetcher));
    let tools = PokedexTools::new(Arc::new(cache), fetcher);

    let connector = Arc::new(DuplexConnector {
        provider: Arc::new(tools),
        servers: Mutex::new(Vec::new()),
    });
    let session = SessionSupervisor::new(connector.clone(), config());
    let service = PokedexService::new(Arc::clone(&session));

    Harness {
        storage,
        upstream,
        connector,
        session,
        service,
    }
}

#[tokio::test]
async fn test_lookup_is_cached_across_calls() {
    let h = harness();

    let first = h.service.pokemon("Ditto").await;
    let data = first.data().expect("ditto lookup failed");
    assert_eq!(data["types"], json!(["normal"]));
    assert_eq!(data["height"], 0.3);

    let second = h.service.pokemon("ditto").await;
    assert_eq!(first, second);
    assert_eq!(h.upstream.calls.load(Ordering::SeqCst), 1);

    let record = h.storage.find_by_key("ditto").await.unwrap().unwrap();
    assert_eq!(record.source_id, 132);

    let cached = h.service.cached().await;
    assert_eq!(cached.data().unwrap()["count"], 1);

    h.session.shutdown().await;
}

#[tokio::test]
async fn test_not_found_keeps_session_healthy() {
    let h = harness();

    let reply = h.service.pokemon("missingno").await;
    assert_eq!(reply, ServiceReply::Error("Pokemon not found".to_string()));

    let reply = h.service.by_type("shadow", 5).await;
    assert_eq!(reply, ServiceReply::Error("Type not found".to_string()));

    assert_eq!(h.session.phase(), SessionPhase::Ready);
    assert_eq!(h.connector.connects(), 1);

    h.session.shutdown().await;
}

#[tokio::test]
async fn test_session_heals_after_tool_process_dies() {
    let h = harness();
    assert!(!h.service.pokemon("ditto").await.is_error());

    h.connector.kill_current();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // the broken session fails this call and is released
    let err = h
        .session
        .call_tool("list_cached_pokemon", json!({}))
        .await
        .unwrap_err();
    assert!(err.poisons_session(), "unexpected error: {err}");

    // the next call waits for the reconnect and succeeds
    let healed = h.service.pokemon("ditto").await;
    assert_eq!(healed.data().unwrap()["name"], "ditto");
    assert_eq!(h.connector.connects(), 2);

    // the store outlives the tool process
    assert_eq!(h.upstream.calls.load(Ordering::SeqCst), 1);

    h.session.shutdown().await;
}

#[tokio::test]
async fn test_status() {
    let h = harness();

    let status = h.service.status().await;
    assert_eq!(status.mcp_server, Health::Operational);
    assert!(status.tools.contains(&"get_basic_pokemon_data".to_string()));
    assert_eq!(status.tools.len(), 5);
    assert!(status.is_healthy());

    h.session.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_tool_process() {
    let session = SessionSupervisor::new(
        Arc::new(DeadConnector),
        SupervisorConfig {
            ready_wait: Duration::from_millis(100),
            ..config()
        },
    );
    let service = PokedexService::new(Arc::clone(&session));

    let reply = service.pokemon("ditto").await;
    match reply {
        ServiceReply::Error(message) => assert!(message.contains("Session unavailable")),
        other => panic!("expected an error reply, got {:?}", other),
    }

    let status = service.status().await;
    assert_eq!(status.mcp_server, Health::Unreachable);
    assert!(status.tools.is_empty());

    session.shutdown().await;
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(!session.status().await.supervisor_running);
}
