//! # pokedex-foundation
//!
//! Pokedex 기반 계층:
//! - Error: 공통 에러 타입 (`Error`, `Result`)
//! - Config: 통합 설정 (PokedexConfig - store, upstream, cache, session)
//! - Storage: SQLite Record Store (캐시 레코드), JsonStore (설정 파일)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Caller (CLI / service facade)                          │
//! │          │  CallTool(name, args)                        │
//! │          ▼                                              │
//! │  Session Supervisor ──stdio──▶ Tool Process             │
//! │                                   │                     │
//! │                         Cache-Aside Data Path           │
//! │                          │                 │            │
//! │                          ▼                 ▼            │
//! │                  Record Store (SQLite)  Upstream API    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    CacheSettings, PokedexConfig, ReconnectSettings, SessionSettings, UpstreamSettings,
    CONFIG_FILE, ENV_DATABASE_URL, ENV_POKEAPI_BASE_URL,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    // SQLite (캐시 레코드)
    CachedRecord,
    DatabaseLocation,
    // JSON (설정)
    JsonStore,
    RecordStore,
    Storage,
    DEFAULT_TTL_DAYS,
};
