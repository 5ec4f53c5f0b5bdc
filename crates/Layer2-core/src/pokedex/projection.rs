//! 데이터 투영
//!
//! upstream 원본 문서를 저장/반환 형태로 바꾸는 순수 함수들.
//! 누락되거나 타입이 맞지 않는 필드는 패닉하지 않고
//! 빈 컬렉션이나 `None`이 된다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const CRY_HOST: &str = "https://play.pokemonshowdown.com/audio/cries";
const CRY_BACKUP_HOST: &str = "https://projectpokemon.org/images/normal-sprite/cries";

/// 정지 스프라이트 (출력 키, upstream 키)
const SPRITE_VARIANTS: [(&str, &str); 8] = [
    ("default", "front_default"),
    ("shiny", "front_shiny"),
    ("female", "front_female"),
    ("shiny_female", "front_shiny_female"),
    ("back_default", "back_default"),
    ("back_shiny", "back_shiny"),
    ("back_female", "back_female"),
    ("back_shiny_female", "back_shiny_female"),
];

/// 애니메이션 스프라이트 (출력 키, upstream 키)
const ANIMATED_VARIANTS: [(&str, &str); 8] = [
    ("animated_front", "front_default"),
    ("animated_front_shiny", "front_shiny"),
    ("animated_front_female", "front_female"),
    ("animated_front_shiny_female", "front_shiny_female"),
    ("animated_back", "back_default"),
    ("animated_back_shiny", "back_shiny"),
    ("animated_back_female", "back_female"),
    ("animated_back_shiny_female", "back_shiny_female"),
];

const ANIMATED_POINTER: &str = "/sprites/versions/generation-v/black-white/animated";

/// Record Store에 보관하는 정규화 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PokemonData {
    pub id: i64,
    pub name: String,
    /// 미터
    pub height: f64,
    /// 킬로그램
    pub weight: f64,
    pub types: Vec<String>,
    pub abilities: Vec<String>,
    pub base_stats: BTreeMap<String, i64>,
    pub sprites: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated_sprites: Option<BTreeMap<String, String>>,
    pub default_sprite: Option<String>,
    pub cry_url: String,
    pub cry_url_backup: String,
}

impl PokemonData {
    /// `pokemon/{name}` 원본 문서 투영
    ///
    /// 숫자 `id`나 문자열 `name`이 없으면 `None`.
    pub fn project(raw: &Value) -> Option<Self> {
        let id = raw.get("id")?.as_i64()?;
        let name = raw.get("name")?.as_str()?.to_string();
        let sprites = raw.get("sprites").unwrap_or(&Value::Null);

        Some(Self {
            id,
            height: decimetric(raw, "height"),
            weight: decimetric(raw, "weight"),
            types: nested_names(raw, "types", "type"),
            abilities: nested_names(raw, "abilities", "ability"),
            base_stats: base_stats(raw),
            sprites: pick_urls(sprites, &SPRITE_VARIANTS),
            animated_sprites: animated_sprites(raw),
            default_sprite: string_at(sprites, "front_default"),
            cry_url: cry_url(&name),
            cry_url_backup: cry_url_backup(id),
            name,
        })
    }
}

/// Showdown 울음소리 (소문자 이름 기준)
pub fn cry_url(name: &str) -> String {
    format!("{}/{}.mp3", CRY_HOST, name.to_lowercase())
}

/// Project Pokemon 울음소리 (id 기준)
pub fn cry_url_backup(id: i64) -> String {
    format!("{}/{}.ogg", CRY_BACKUP_HOST, id)
}

/// 앞/뒤 정지 스프라이트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpritePair {
    pub front: Option<String>,
    pub back: Option<String>,
}

/// 실시간 조회 결과 (`search_pokemon`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub id: i64,
    pub name: String,
    pub types: Vec<String>,
    pub height: f64,
    pub weight: f64,
    pub abilities: Vec<String>,
    pub stats: BTreeMap<String, i64>,
    pub sprites: SpritePair,
}

impl SearchSummary {
    pub fn project(raw: &Value) -> Option<Self> {
        let sprites = raw.get("sprites").unwrap_or(&Value::Null);
        Some(Self {
            id: raw.get("id")?.as_i64()?,
            name: raw.get("name")?.as_str()?.to_string(),
            types: nested_names(raw, "types", "type"),
            height: decimetric(raw, "height"),
            weight: decimetric(raw, "weight"),
            abilities: nested_names(raw, "abilities", "ability"),
            stats: base_stats(raw),
            sprites: SpritePair {
                front: string_at(sprites, "front_default"),
                back: string_at(sprites, "back_default"),
            },
        })
    }
}

/// `compare_pokemon` 한쪽 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub id: i64,
    pub name: String,
    pub types: Vec<String>,
    pub height: f64,
    pub weight: f64,
    pub base_experience: Option<i64>,
    pub stats: BTreeMap<String, i64>,
}

impl ComparisonEntry {
    pub fn project(raw: &Value) -> Option<Self> {
        Some(Self {
            id: raw.get("id")?.as_i64()?,
            name: raw.get("name")?.as_str()?.to_string(),
            types: nested_names(raw, "types", "type"),
            height: decimetric(raw, "height"),
            weight: decimetric(raw, "weight"),
            base_experience: raw.get("base_experience").and_then(Value::as_i64),
            stats: base_stats(raw),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMember {
    pub id: i64,
    pub name: String,
}

/// `get_pokemon_by_type` 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeListing {
    #[serde(rename = "type")]
    pub type_name: String,
    pub pokemon: Vec<TypeMember>,
    pub count: usize,
}

impl TypeListing {
    /// `type/{name}` 원본 문서의 앞 `limit`개 (upstream 순서)
    pub fn project(type_name: &str, raw: &Value, limit: usize) -> Self {
        let pokemon: Vec<TypeMember> = raw
            .get("pokemon")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let pokemon = entry.get("pokemon")?;
                        Some(TypeMember {
                            id: id_from_resource_url(pokemon.get("url")?.as_str()?)?,
                            name: pokemon.get("name")?.as_str()?.to_string(),
                        })
                    })
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            type_name: type_name.to_string(),
            count: pokemon.len(),
            pokemon,
        }
    }
}

// ============================================================================
// Field helpers
// ============================================================================

/// 데시미터/헥토그램 → 미터/킬로그램
fn decimetric(raw: &Value, field: &str) -> f64 {
    raw.get(field).and_then(Value::as_f64).unwrap_or(0.0) / 10.0
}

/// `[{outer: {name}}]` → 이름 목록 (순서 유지)
fn nested_names(raw: &Value, list: &str, inner: &str) -> Vec<String> {
    raw.get(list)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(inner)?.get("name")?.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn base_stats(raw: &Value) -> BTreeMap<String, i64> {
    raw.get("stats")
        .and_then(Value::as_array)
        .map(|stats| {
            stats
                .iter()
                .filter_map(|stat| {
                    let name = stat.get("stat")?.get("name")?.as_str()?;
                    let value = stat.get("base_stat")?.as_i64()?;
                    Some((name.to_string(), value))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn pick_urls(source: &Value, variants: &[(&str, &str)]) -> BTreeMap<String, String> {
    variants
        .iter()
        .filter_map(|(out, key)| string_at(source, key).map(|url| (out.to_string(), url)))
        .collect()
}

fn animated_sprites(raw: &Value) -> Option<BTreeMap<String, String>> {
    let animated = raw.pointer(ANIMATED_POINTER)?;
    let sprites = pick_urls(animated, &ANIMATED_VARIANTS);
    if sprites.is_empty() {
        None
    } else {
        Some(sprites)
    }
}

/// `https://pokeapi.co/api/v2/pokemon/25/` → 25
fn id_from_resource_url(url: &str) -> Option<i64> {
    url.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}
