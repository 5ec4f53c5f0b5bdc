//! Cache-Aside Data Path
//!
//! ```text
//! get_or_refresh(name)
//!   ├─ fresh record     → payload (no upstream call)
//!   ├─ stale record     → fetch → update in place
//!   └─ no record        → fetch → insert
//! ```
//!
//! not-found 조회는 Store를 건드리지 않는다. Store 쓰기가 실패해도
//! 가져온 데이터는 반환한다. 같은 키의 동시 miss는 키별 슬롯에서
//! 직렬화되고, 대기자는 Store를 다시 읽는다.

use super::fetcher::{pokemon_path, UpstreamFetcher};
use super::projection::PokemonData;
use chrono::{DateTime, Utc};
use pokedex_foundation::{CachedRecord, Error, RecordStore, Result, DEFAULT_TTL_DAYS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 앞뒤 공백 제거, 소문자화, 내부 공백은 `-`로 치환
pub fn normalize_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

/// `list_cached_pokemon` 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub id: i64,
    pub name: String,
    pub last_updated: DateTime<Utc>,
    pub is_expired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedListing {
    pub count: usize,
    pub pokemon: Vec<CachedEntry>,
}

enum Lookup {
    Fresh(PokemonData),
    Stale(CachedRecord),
    Missing,
}

/// [`RecordStore`]와 [`UpstreamFetcher`] 위의 read-through 캐시
pub struct PokemonCache {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn UpstreamFetcher>,
    ttl: chrono::Duration,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PokemonCache {
    pub fn new(store: Arc<dyn RecordStore>, fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        Self::with_ttl(store, fetcher, chrono::Duration::days(DEFAULT_TTL_DAYS))
    }

    pub fn with_ttl(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn UpstreamFetcher>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            ttl,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Store에서 제공, 없거나 stale이면 upstream에서 갱신
    pub async fn get_or_refresh(&self, name: &str) -> Result<PokemonData> {
        let key = normalize_key(name);
        if key.is_empty() {
            return Err(Error::InvalidInput("Pokemon name must not be empty".to_string()));
        }

        if let Lookup::Fresh(data) = self.lookup(&key).await {
            debug!(key = %key, "Cache hit");
            return Ok(data);
        }

        let slot = self.slot(&key).await;
        let result = {
            let _guard = slot.lock().await;
            match self.lookup(&key).await {
                Lookup::Fresh(data) => {
                    debug!(key = %key, "Refreshed by a concurrent caller");
                    Ok(data)
                }
                Lookup::Stale(record) => self.refresh(&key, Some(record)).await,
                Lookup::Missing => self.refresh(&key, None).await,
            }
        };
        self.release(&key, slot).await;

        result
    }

    /// Store의 모든 레코드와 신선도
    pub async fn list_cached(&self) -> Result<CachedListing> {
        let now = Utc::now();
        let pokemon: Vec<CachedEntry> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|record| CachedEntry {
                is_expired: record.is_expired_at(now, self.ttl),
                id: record.source_id,
                name: record.key,
                last_updated: record.last_updated,
            })
            .collect();

        Ok(CachedListing {
            count: pokemon.len(),
            pokemon,
        })
    }

    async fn lookup(&self, key: &str) -> Lookup {
        let record = match self.store.find_by_key(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(key = %key, "No cached data found");
                return Lookup::Missing;
            }
            Err(e) => {
                warn!(key = %key, "Error retrieving from cache: {}", e);
                return Lookup::Missing;
            }
        };

        if record.is_expired_at(Utc::now(), self.ttl) {
            info!(key = %key, "Cached data is expired, refreshing");
            return Lookup::Stale(record);
        }

        match serde_json::from_value::<PokemonData>(record.payload.clone()) {
            Ok(data) => Lookup::Fresh(data),
            Err(e) => {
                warn!(key = %key, "Cached payload is unreadable, refreshing: {}", e);
                Lookup::Stale(record)
            }
        }
    }

    /// 조회, 투영 후 삽입 또는 갱신 (Store 실패는 로그만 남김)
    async fn refresh(&self, key: &str, existing: Option<CachedRecord>) -> Result<PokemonData> {
        let not_found = || Error::NotFound(format!("Pokemon not found: {}", key));

        let path = pokemon_path(key).ok_or_else(not_found)?;
        let raw = self.fetcher.fetch(&path).await.ok_or_else(not_found)?;
        let data = match PokemonData::project(&raw) {
            Some(data) => data,
            None => {
                warn!(key = %key, "Upstream document has no id/name");
                return Err(not_found());
            }
        };

        let payload = match serde_json::to_value(&data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, "Could not encode payload: {}", e);
                return Ok(data);
            }
        };

        let written = match existing {
            Some(mut record) => {
                record.source_id = data.id;
                record.payload = payload;
                record.last_updated = Utc::now();
                self.store.update(&record).await
            }
            None => self
                .store
                .insert(&CachedRecord::new(data.id, key, payload))
                .await
                .map(|_| ()),
        };

        match written {
            Ok(()) => info!(key = %key, "Successfully cached data"),
            Err(e) => warn!(key = %key, "Error caching Pokemon data: {}", e),
        }

        Ok(data)
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// 아무도 쥐거나 기다리지 않으면 슬롯 제거
    async fn release(&self, key: &str, slot: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // map + ours
        if Arc::strong_count(&slot) <= 2 {
            in_flight.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pokedex_foundation::Storage;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Upstream double serving canned documents by path
    struct CannedFetcher {
        documents: std::sync::Mutex<HashMap<String, Value>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CannedFetcher {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                documents: std::sync::Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn serve(&self, key: &str, id: i64, type_name: &str) {
            self.documents.lock().unwrap().insert(
                pokemon_path(key).unwrap(),
                json!({
                    "id": id,
                    "name": key,
                    "height": 3,
                    "weight": 40,
                    "types": [{"type": {"name": type_name}}],
                    "abilities": [],
                    "stats": [],
                    "sprites": {"front_default": format!("https://img/{}.png", id)}
                }),
            );
        }

        fn forget(&self, key: &str) {
            self.documents
                .lock()
                .unwrap()
                .remove(&pokemon_path(key).unwrap());
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UpstreamFetcher for CannedFetcher {
        async fn fetch(&self, path: &str) -> Option<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.documents.lock().unwrap().get(path).cloned()
        }
    }

    /// Store whose writes always fail
    struct ReadOnlyStore;

    #[async_trait]
    impl RecordStore for ReadOnlyStore {
        async fn find_by_key(&self, _key: &str) -> Result<Option<CachedRecord>> {
            Ok(None)
        }

        async fn insert(&self, _record: &CachedRecord) -> Result<CachedRecord> {
            Err(Error::Storage("attempt to write a readonly database".to_string()))
        }

        async fn update(&self, _record: &CachedRecord) -> Result<()> {
            Err(Error::Storage("attempt to write a readonly database".to_string()))
        }

        async fn list_all(&self) -> Result<Vec<CachedRecord>> {
            Err(Error::Storage("no such table: pokemon_cache".to_string()))
        }
    }

    fn setup() -> (Storage, Arc<CannedFetcher>, PokemonCache) {
        let storage = Storage::in_memory().unwrap();
        let fetcher = CannedFetcher::new();
        let cache = PokemonCache::new(Arc::new(storage.clone()), fetcher.clone());
        (storage, fetcher, cache)
    }

    async fn seed_stale(storage: &Storage, key: &str, id: i64) -> CachedRecord {
        let mut record = CachedRecord::new(id, key, json!({"id": id, "name": key, "old": true}));
        record.last_updated = Utc::now() - chrono::Duration::days(8);
        storage.insert(&record).await.unwrap();
        // re-read: the store keeps millisecond precision
        storage.find_by_key(key).await.unwrap().unwrap()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Pika Chu"), "pika-chu");
        assert_eq!(normalize_key("pika-chu"), "pika-chu");
        assert_eq!(normalize_key("  Mr Mime "), "mr-mime");
        assert_eq!(normalize_key("DITTO"), "ditto");
        assert_eq!(normalize_key("   "), "");
    }

    #[tokio::test]
    async fn test_fresh_reads_fetch_once() {
        let (storage, fetcher, cache) = setup();
        fetcher.serve("ditto", 132, "normal");

        let first = cache.get_or_refresh("ditto").await.unwrap();
        assert_eq!(first.types, vec!["normal"]);
        assert_eq!(fetcher.calls(), 1);
        assert!(storage.find_by_key("ditto").await.unwrap().is_some());

        let second = cache.get_or_refresh("ditto").await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_key_normalization_shares_record() {
        let (storage, fetcher, cache) = setup();
        fetcher.serve("pika-chu", 25, "electric");

        cache.get_or_refresh("Pika Chu").await.unwrap();
        cache.get_or_refresh("pika-chu").await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(storage.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_record_is_refreshed_in_place() {
        let (storage, fetcher, cache) = setup();
        let stale = seed_stale(&storage, "ditto", 132).await;
        fetcher.serve("ditto", 132, "normal");

        let data = cache.get_or_refresh("ditto").await.unwrap();
        assert_eq!(data.types, vec!["normal"]);
        assert_eq!(fetcher.calls(), 1);

        let stored = storage.find_by_key("ditto").await.unwrap().unwrap();
        assert_eq!(stored.id, stale.id);
        assert!(stored.last_updated > stale.last_updated);
        assert!(Utc::now() - stored.last_updated < chrono::Duration::minutes(1));
        assert!(stored.payload.get("old").is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_preserves_stale_record() {
        let (storage, fetcher, cache) = setup();
        let stale = seed_stale(&storage, "ditto", 132).await;

        let err = cache.get_or_refresh("ditto").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(fetcher.calls(), 1);

        let stored = storage.find_by_key("ditto").await.unwrap().unwrap();
        assert_eq!(stored, stale);
    }

    #[tokio::test]
    async fn test_not_found_writes_nothing() {
        let (storage, fetcher, cache) = setup();
        fetcher.serve("ditto", 132, "normal");
        cache.get_or_refresh("ditto").await.unwrap();

        // upstream drops the entry; the fresh record keeps serving
        fetcher.forget("ditto");
        assert!(cache.get_or_refresh("ditto").await.is_ok());

        assert!(matches!(
            cache.get_or_refresh("missingno").await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(storage.list_all().await.unwrap().len(), 1);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_still_returns_data() {
        let fetcher = CannedFetcher::new();
        fetcher.serve("ditto", 132, "normal");
        let cache = PokemonCache::new(Arc::new(ReadOnlyStore), fetcher.clone());

        let data = cache.get_or_refresh("ditto").await.unwrap();
        assert_eq!(data.id, 132);

        assert!(cache.list_cached().await.is_err());
    }

    #[tokio::test]
    async fn test_unreadable_payload_is_refetched() {
        let (storage, fetcher, cache) = setup();
        storage
            .insert(&CachedRecord::new(132, "ditto", json!("garbage")))
            .await
            .unwrap();
        fetcher.serve("ditto", 132, "normal");

        let data = cache.get_or_refresh("ditto").await.unwrap();
        assert_eq!(data.name, "ditto");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_fetch_once() {
        let storage = Storage::in_memory().unwrap();
        let fetcher = CannedFetcher::with_delay(Duration::from_millis(50));
        fetcher.serve("ditto", 132, "normal");
        let cache = Arc::new(PokemonCache::new(Arc::new(storage.clone()), fetcher.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_refresh("Ditto").await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().id, 132);
        }

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(storage.list_all().await.unwrap().len(), 1);
        assert!(cache.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_cached() {
        let (storage, fetcher, cache) = setup();
        seed_stale(&storage, "mew", 151).await;
        fetcher.serve("ditto", 132, "normal");
        cache.get_or_refresh("ditto").await.unwrap();

        let listing = cache.list_cached().await.unwrap();
        assert_eq!(listing.count, 2);

        let by_name: HashMap<_, _> = listing
            .pokemon
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();
        assert!(!by_name["ditto"].is_expired);
        assert!(by_name["mew"].is_expired);
        assert_eq!(by_name["mew"].id, 151);
    }

    #[tokio::test]
    async fn test_dot_names_are_not_fetched() {
        let (storage, fetcher, cache) = setup();

        for name in [".", ".."] {
            assert!(matches!(
                cache.get_or_refresh(name).await,
                Err(Error::NotFound(_))
            ));
        }
        assert_eq!(fetcher.calls(), 0);
        assert!(storage.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let (_, fetcher, cache) = setup();
        assert!(matches!(
            cache.get_or_refresh("  ").await,
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(fetcher.calls(), 0);
    }
}
