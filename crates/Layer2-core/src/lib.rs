//! pokedex-core: Pokedex 핵심 런타임
//!
//! Layer2 - 세션, 도구 서버, 캐시 데이터 경로
//!
//! # 주요 모듈
//!
//! - `mcp`: MCP 전송 계층, 클라이언트, Session Supervisor, 도구 서버
//! - `pokedex`: Upstream Fetcher, 데이터 투영, Cache-Aside Data Path, 도구 카탈로그
//! - `service`: 호출자용 facade (`PokedexService`)
//!
//! # 사용 예시
//!
//! ```ignore
//! use pokedex_core::{McpServerConfig, PokedexService, SessionSupervisor, SupervisorConfig};
//!
//! // 도구 프로세스에 대한 감독 세션
//! let server = McpServerConfig::stdio("pokeapi", "pokedex").arg("serve");
//! let session = SessionSupervisor::stdio(server, SupervisorConfig::default());
//!
//! let service = PokedexService::new(session.clone());
//! let reply = service.pokemon("ditto").await;
//!
//! session.shutdown().await;
//! ```

pub mod mcp;
pub mod pokedex;
pub mod service;

// Re-exports: MCP
pub use mcp::{
    McpClient, McpServer, McpServerConfig, McpTool, McpToolCall, McpToolResult, ReconnectPolicy,
    SessionConnector, SessionPhase, SessionStatus, SessionSupervisor, StdioConnector,
    StdioTransport, SupervisorConfig, ToolProvider, ToolSession,
};

// Re-exports: Pokedex
pub use pokedex::{
    normalize_key, CachedListing, PokeApiClient, PokedexTools, PokemonCache, PokemonData,
    UpstreamFetcher,
};

// Re-exports: Service
pub use service::{Health, PokedexService, ServiceReply, ServiceStatus};

// Re-exports: Foundation
pub use pokedex_foundation::{Error, PokedexConfig, Result};
