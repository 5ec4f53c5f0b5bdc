//! Pokedex - 캐시 기반 데이터 경로와 도구 카탈로그
//!
//! - `fetcher` - Upstream Fetcher (PokeAPI, reqwest 기반)
//! - `projection` - upstream 문서 → 저장/응답 형태
//! - `cache` - Cache-Aside Data Path (`get_or_refresh` 진입점)
//! - `tools` - MCP 도구 카탈로그 (`ToolProvider` 구현)

mod cache;
mod fetcher;
mod projection;
mod tools;

pub use cache::{normalize_key, CachedEntry, CachedListing, PokemonCache};
pub use fetcher::{pokemon_path, type_path, PokeApiClient, UpstreamFetcher};
pub use projection::{
    cry_url, cry_url_backup, ComparisonEntry, PokemonData, SearchSummary, SpritePair, TypeListing,
    TypeMember,
};
pub use tools::{
    PokedexTools, COMPARE_POKEMON, GET_BASIC_POKEMON_DATA, GET_POKEMON_BY_TYPE,
    LIST_CACHED_POKEMON, SEARCH_POKEMON,
};
