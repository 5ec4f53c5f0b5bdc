//! Pokedex 도구 카탈로그 - 도구 프로세스가 제공하는 MCP 도구들

use super::cache::{normalize_key, PokemonCache};
use super::fetcher::{pokemon_path, type_path, PokeApiClient, UpstreamFetcher};
use super::projection::{ComparisonEntry, SearchSummary, TypeListing};
use crate::mcp::{McpTool, McpToolResult, ToolProvider};
use async_trait::async_trait;
use pokedex_foundation::{Error, PokedexConfig, Result, Storage};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const GET_BASIC_POKEMON_DATA: &str = "get_basic_pokemon_data";
pub const LIST_CACHED_POKEMON: &str = "list_cached_pokemon";
pub const SEARCH_POKEMON: &str = "search_pokemon";
pub const GET_POKEMON_BY_TYPE: &str = "get_pokemon_by_type";
pub const COMPARE_POKEMON: &str = "compare_pokemon";

const DEFAULT_TYPE_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct PokemonNameArgs {
    pokemon_name: String,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TypeArgs {
    type_name: String,
    #[serde(default = "default_type_limit")]
    limit: usize,
}

fn default_type_limit() -> usize {
    DEFAULT_TYPE_LIMIT
}

#[derive(Debug, Deserialize)]
struct CompareArgs {
    pokemon1: String,
    pokemon2: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| Error::InvalidInput(format!("{}: {}", tool, e)))
}

fn not_found(message: &str) -> McpToolResult {
    McpToolResult::json(&json!({ "error": message }), true)
}

fn ok_json<T: serde::Serialize>(value: &T) -> Result<McpToolResult> {
    Ok(McpToolResult::json(&serde_json::to_value(value)?, false))
}

/// 캐시와 upstream API 기반 도구 카탈로그
pub struct PokedexTools {
    cache: Arc<PokemonCache>,
    fetcher: Arc<dyn UpstreamFetcher>,
}

impl PokedexTools {
    pub fn new(cache: Arc<PokemonCache>, fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self { cache, fetcher }
    }

    /// 설정으로 Store를 열고 upstream 클라이언트 생성
    ///
    /// 데이터베이스 URL이 없으면 실패한다.
    pub fn from_config(config: &PokedexConfig) -> Result<Self> {
        let url = config.require_database_url()?;
        let storage = Storage::connect(url)?;
        let fetcher: Arc<dyn UpstreamFetcher> = Arc::new(PokeApiClient::new(&config.upstream)?);

        info!(
            "Pokedex tools ready (upstream: {}, ttl: {} days)",
            config.upstream.base_url, config.cache.ttl_days
        );

        let cache = PokemonCache::with_ttl(Arc::new(storage), Arc::clone(&fetcher), config.cache.ttl());
        Ok(Self::new(Arc::new(cache), fetcher))
    }

    pub fn cache(&self) -> &Arc<PokemonCache> {
        &self.cache
    }

    async fn get_basic_pokemon_data(&self, args: PokemonNameArgs) -> Result<McpToolResult> {
        match self.cache.get_or_refresh(&args.pokemon_name).await {
            Ok(data) => ok_json(&data),
            Err(Error::NotFound(_)) => Ok(not_found("Pokemon not found")),
            Err(e) => Err(e),
        }
    }

    async fn list_cached_pokemon(&self) -> Result<McpToolResult> {
        match self.cache.list_cached().await {
            Ok(listing) => ok_json(&listing),
            Err(e) => {
                warn!("Error listing cached Pokemon: {}", e);
                Ok(McpToolResult::json(
                    &json!({ "error": e.to_string(), "count": 0, "pokemon": [] }),
                    true,
                ))
            }
        }
    }

    async fn search_pokemon(&self, args: SearchArgs) -> Result<McpToolResult> {
        let summary = self
            .fetch_pokemon(&args.name)
            .await
            .and_then(|raw| SearchSummary::project(&raw));

        match summary {
            Some(summary) => ok_json(&summary),
            None => Ok(not_found("Pokemon not found")),
        }
    }

    async fn get_pokemon_by_type(&self, args: TypeArgs) -> Result<McpToolResult> {
        let raw = match type_path(&normalize_key(&args.type_name)) {
            Some(path) => self.fetcher.fetch(&path).await,
            None => None,
        };
        match raw {
            Some(raw) => ok_json(&TypeListing::project(&args.type_name, &raw, args.limit)),
            None => Ok(not_found("Type not found")),
        }
    }

    /// 캐시를 거치지 않는 upstream 조회
    async fn fetch_pokemon(&self, name: &str) -> Option<Value> {
        let path = pokemon_path(&normalize_key(name))?;
        self.fetcher.fetch(&path).await
    }

    async fn compare_pokemon(&self, args: CompareArgs) -> Result<McpToolResult> {
        let (a, b) = futures::future::join(
            self.fetch_pokemon(&args.pokemon1),
            self.fetch_pokemon(&args.pokemon2),
        )
        .await;
        let entries = (
            a.as_ref().and_then(ComparisonEntry::project),
            b.as_ref().and_then(ComparisonEntry::project),
        );

        match entries {
            (Some(a), Some(b)) => ok_json(&json!({ "pokemon": [a, b] })),
            _ => Ok(not_found("One or both Pokemon not found")),
        }
    }
}

#[async_trait]
impl ToolProvider for PokedexTools {
    fn tools(&self) -> Vec<McpTool> {
        vec![
            McpTool {
                name: GET_BASIC_POKEMON_DATA.to_string(),
                description: Some(
                    "Get basic data for a pokemon by name, served from the local cache when fresh."
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "pokemon_name": {"type": "string", "description": "The name of the pokemon"}
                    },
                    "required": ["pokemon_name"]
                }),
            },
            McpTool {
                name: LIST_CACHED_POKEMON.to_string(),
                description: Some("Get a list of all Pokemon data stored in the cache.".to_string()),
                input_schema: json!({"type": "object", "properties": {}}),
            },
            McpTool {
                name: SEARCH_POKEMON.to_string(),
                description: Some("Search for a Pokemon by name or id.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }),
            },
            McpTool {
                name: GET_POKEMON_BY_TYPE.to_string(),
                description: Some("Get Pokemon of a specific type.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "type_name": {"type": "string"},
                        "limit": {"type": "integer", "default": DEFAULT_TYPE_LIMIT, "minimum": 0}
                    },
                    "required": ["type_name"]
                }),
            },
            McpTool {
                name: COMPARE_POKEMON.to_string(),
                description: Some("Compare two Pokemon side by side.".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "pokemon1": {"type": "string"},
                        "pokemon2": {"type": "string"}
                    },
                    "required": ["pokemon1", "pokemon2"]
                }),
            },
        ]
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        match name {
            GET_BASIC_POKEMON_DATA => {
                self.get_basic_pokemon_data(parse_args(name, arguments)?).await
            }
            LIST_CACHED_POKEMON => self.list_cached_pokemon().await,
            SEARCH_POKEMON => self.search_pokemon(parse_args(name, arguments)?).await,
            GET_POKEMON_BY_TYPE => self.get_pokemon_by_type(parse_args(name, arguments)?).await,
            COMPARE_POKEMON => self.compare_pokemon(parse_args(name, arguments)?).await,
            other => Err(Error::ToolNotFound(other.to_string())),
        }
    }
}
