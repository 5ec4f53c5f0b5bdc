//! Config - 통합 설정 관리
//!
//! - `pokedex.rs` - PokedexConfig (store, upstream, cache, session 섹션)

mod pokedex;

pub use pokedex::{
    CacheSettings, PokedexConfig, ReconnectSettings, SessionSettings, UpstreamSettings,
    CONFIG_FILE, ENV_DATABASE_URL, ENV_POKEAPI_BASE_URL,
};
