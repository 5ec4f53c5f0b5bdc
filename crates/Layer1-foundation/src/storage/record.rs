//! Record Store 계약
//!
//! 정규화된 키마다 문서 하나와 마지막 기록 시각을 보관한다.
//! 신선도 판단은 [`CachedRecord::is_expired_at`]까지만 제공하고,
//! 오래된 레코드의 처리는 호출자가 정한다.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 이보다 오래된 레코드는 stale
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// 캐시된 upstream 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    /// 행 id (삽입 전에는 `None`)
    pub id: Option<i64>,
    /// Upstream 숫자 식별자 (참고용)
    pub source_id: i64,
    /// 정규화된 조회 키 (Store 전체에서 유일)
    pub key: String,
    /// 정규화된 문서 (항상 통째로 기록)
    pub payload: Value,
    pub last_updated: DateTime<Utc>,
}

impl CachedRecord {
    pub fn new(source_id: i64, key: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            source_id,
            key: key.into(),
            payload,
            last_updated: Utc::now(),
        }
    }

    /// 마지막 기록 후 `ttl`을 초과하면 stale
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_updated > ttl
    }
}

/// 신선도 타임스탬프를 가진 영속 키/값 저장소
///
/// `insert`는 키가 이미 있으면 실패하고, `update`는 기존 행의
/// payload와 타임스탬프만 교체한다 (id 유지).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_by_key(&self, key: &str) -> Result<Option<CachedRecord>>;

    /// 새 레코드 삽입 (할당된 id 포함해 반환)
    async fn insert(&self, record: &CachedRecord) -> Result<CachedRecord>;

    async fn update(&self, record: &CachedRecord) -> Result<()>;

    async fn list_all(&self) -> Result<Vec<CachedRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_window() {
        let now = Utc::now();
        let ttl = Duration::days(7);
        let mut record = CachedRecord::new(132, "ditto", json!({"name": "ditto"}));

        record.last_updated = now - Duration::days(8);
        assert!(record.is_expired_at(now, ttl));

        record.last_updated = now - Duration::days(6);
        assert!(!record.is_expired_at(now, ttl));

        // exactly on the boundary is still fresh
        record.last_updated = now - ttl;
        assert!(!record.is_expired_at(now, ttl));
    }

    #[test]
    fn test_new_record_is_fresh() {
        let record = CachedRecord::new(25, "pikachu", json!({}));
        assert!(record.id.is_none());
        assert!(!record.is_expired_at(Utc::now(), Duration::days(DEFAULT_TTL_DAYS)));
    }
}
