//! Pokedex Config - 통합 설정
//!
//! 기본값 → 글로벌 설정 → 프로젝트 설정 → 환경 변수 순서로 병합

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// 설정 파일명
pub const CONFIG_FILE: &str = "config.json";

/// Record Store 연결 문자열 환경 변수
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Upstream API 루트 재정의 환경 변수
pub const ENV_POKEAPI_BASE_URL: &str = "POKEAPI_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";

/// 캐시 신선도 상한 (일)
const MAX_TTL_DAYS: i64 = 36_500;

// ============================================================================
// Pokedex Config (통합)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PokedexConfig {
    /// Record Store 연결 문자열
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    pub upstream: UpstreamSettings,

    pub cache: CacheSettings,

    pub session: SessionSettings,
}

impl Default for PokedexConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            upstream: UpstreamSettings::default(),
            cache: CacheSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl PokedexConfig {
    // ========================================================================
    // Load
    // ========================================================================

    /// 글로벌 + 프로젝트 + 환경 변수 병합 로드
    pub fn load() -> Result<Self> {
        let mut layers = Vec::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(layer) = global.load_optional::<Value>(CONFIG_FILE)? {
                layers.push(layer);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(layer) = project.load_optional::<Value>(CONFIG_FILE)? {
                layers.push(layer);
            }
        }

        let mut config = Self::from_layers(layers)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 지정한 파일 하나를 기본값 위에 적용한 뒤 환경 변수 적용
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let layer: Value = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        let mut config = Self::from_layers(vec![layer])?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 부분 JSON 문서들을 기본값 위에 병합 (뒤 레이어 우선)
    pub fn from_layers(layers: Vec<Value>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;
        for layer in layers {
            merge_json(&mut merged, layer);
        }
        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    ///
    /// 0초 주기나 범위 밖 TTL은 런타임 패닉 대신 로드 시점에 거부한다.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("session.probeIntervalSecs", self.session.probe_interval_secs),
            ("session.requestTimeoutSecs", self.session.request_timeout_secs),
            ("upstream.timeoutSecs", self.upstream.timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be at least 1", name)));
            }
        }

        if !(1..=MAX_TTL_DAYS).contains(&self.cache.ttl_days) {
            return Err(Error::Config(format!(
                "cache.ttlDays must be between 1 and {}, got {}",
                MAX_TTL_DAYS, self.cache.ttl_days
            )));
        }

        let multiplier = self.session.reconnect.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config(format!(
                "session.reconnect.backoffMultiplier must be a finite value >= 1.0, got {}",
                multiplier
            )));
        }

        Ok(())
    }

    /// 환경 변수 재정의 적용 (조회 함수 주입)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL).filter(|v| !v.trim().is_empty()) {
            self.database_url = Some(url);
        }
        if let Some(base) = lookup(ENV_POKEAPI_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.upstream.base_url = base;
        }
    }

    /// Store 연결 문자열 (없으면 Store 사용자에게 치명적)
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "{} is not set; the record store cannot be opened",
                ENV_DATABASE_URL
            ))
        })
    }
}

/// 객체는 재귀 병합, 나머지 값은 통째로 교체
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// 외부 데이터 API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            user_agent: format!("pokedex/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// 신선도 기간 (일)
    pub ttl_days: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_days: crate::storage::DEFAULT_TTL_DAYS,
        }
    }
}

impl CacheSettings {
    /// 범위 밖 값은 `1..=MAX_TTL_DAYS`로 잘라낸다
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days.clamp(1, MAX_TTL_DAYS))
    }
}

/// 도구 프로세스 감독 세션
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// 도구 프로세스 실행 파일 (`None`이면 현재 바이너리)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    pub args: Vec<String>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Ready 상태 liveness 프로브 주기
    pub probe_interval_secs: u64,

    /// 호출자가 Ready를 기다리는 최대 시간
    pub ready_wait_secs: u64,

    /// 요청별 응답 타임아웃
    pub request_timeout_secs: u64,

    pub reconnect: ReconnectSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command: None,
            args: vec!["serve".to_string()],
            env: HashMap::new(),
            probe_interval_secs: 10,
            ready_wait_secs: 10,
            request_timeout_secs: 30,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl SessionSettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_secs(self.ready_wait_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// 재연결 설정
///
/// 배수 `1.0`이면 고정 딜레이
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    pub delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_ms: 5000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30000,
            jitter: false,
        }
    }
}
