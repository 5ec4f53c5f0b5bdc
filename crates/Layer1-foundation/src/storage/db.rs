//! SQLite Storage - upstream 캐시 레코드
//!
//! 캐시 데이터 저장:
//! - pokemon_cache: 정규화된 이름 → 정규화된 문서 (JSON) + 마지막 갱신 시각
//!
//! 설정 데이터는 JSON (storage/json/)에서 관리
//!
//! ## Migration System
//!
//! 스키마 버전 관리. 열 때 마이그레이션 자동 실행.
//! - Version 1: 초기 스키마 (pokemon_cache)
//! - Version 2: 타임스탬프 없이 문서가 교체되면 `last_updated` 갱신

use super::record::{CachedRecord, RecordStore};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// 현재 스키마 버전
const CURRENT_SCHEMA_VERSION: i32 = 2;

const SELECT_COLUMNS: &str = "id, pokemon_id, pokemon_name, data, last_updated";

/// 연결 문자열이 가리키는 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseLocation {
    /// 연결 문자열 파싱
    ///
    /// `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>`, 일반 경로 지원
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::Config("Database URL is empty".to_string()));
        }

        if url == "sqlite::memory:" || url == ":memory:" {
            return Ok(Self::Memory);
        }

        let path = if let Some(rest) = url.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = url.strip_prefix("sqlite:") {
            rest
        } else if url.contains("://") {
            let scheme = url.split("://").next().unwrap_or_default();
            return Err(Error::Config(format!(
                "Unsupported database backend '{}' (only sqlite is available)",
                scheme
            )));
        } else {
            url
        };

        if path.is_empty() {
            return Err(Error::Config(format!("Database URL '{}' has no path", url)));
        }

        Ok(Self::File(PathBuf::from(path)))
    }
}

/// 캐시 레코드 Storage 서비스
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// 연결 문자열로 Storage 열기
    pub fn connect(url: &str) -> Result<Self> {
        match DatabaseLocation::parse(url)? {
            DatabaseLocation::Memory => Self::in_memory(),
            DatabaseLocation::File(path) => Self::open(&path),
        }
    }

    /// 데이터베이스 파일 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Opened record store at {}", path.display());
        Self::from_connection(conn)
    }

    /// 인메모리 Storage 생성 (테스트용)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        storage.initialize_schema()?;
        storage.run_migrations()?;

        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// 현재 스키마 버전 조회
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// 기본 스키마 초기화 (기본 테이블)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Cached upstream documents
            CREATE TABLE IF NOT EXISTS pokemon_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pokemon_id INTEGER NOT NULL,
                pokemon_name TEXT NOT NULL UNIQUE,
                data TEXT NOT NULL,
                last_updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_pokemon_cache_pokemon_id
                ON pokemon_cache(pokemon_id);

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// 대기 중인 마이그레이션 실행
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.lock()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// 버전 2 마이그레이션: 문서 교체 시 `last_updated` 갱신
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS trg_pokemon_cache_touch
            AFTER UPDATE OF data ON pokemon_cache
            WHEN NEW.last_updated = OLD.last_updated
            BEGIN
                UPDATE pokemon_cache
                SET last_updated = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                WHERE id = NEW.id;
            END;
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to apply migration v2: {}", e)))
    }

    /// blocking 풀에서 연결에 대해 클로저 실행
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Internal("Lock poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| Error::Internal(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for Storage {
    async fn find_by_key(&self, key: &str) -> Result<Option<CachedRecord>> {
        let key = key.to_string();
        self.blocking(move |conn| find_record(conn, &key)).await
    }

    async fn insert(&self, record: &CachedRecord) -> Result<CachedRecord> {
        let record = record.clone();
        self.blocking(move |conn| insert_record(conn, &record)).await
    }

    async fn update(&self, record: &CachedRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |conn| update_record(conn, &record)).await
    }

    async fn list_all(&self) -> Result<Vec<CachedRecord>> {
        self.blocking(list_records).await
    }
}

// ============================================================================
// Queries
// ============================================================================

fn find_record(conn: &Connection, key: &str) -> Result<Option<CachedRecord>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM pokemon_cache WHERE pokemon_name = ?1",
            SELECT_COLUMNS
        ),
        params![key],
        row_to_record,
    )
    .optional()
    .map_err(|e| Error::Storage(format!("Failed to get record '{}': {}", key, e)))
}

fn insert_record(conn: &Connection, record: &CachedRecord) -> Result<CachedRecord> {
    let data = serde_json::to_string(&record.payload)?;

    conn.execute(
        r#"
        INSERT INTO pokemon_cache (pokemon_id, pokemon_name, data, last_updated)
        VALUES (?1, ?2, ?3, ?4)
        "#,
        params![
            record.source_id,
            record.key,
            data,
            format_timestamp(&record.last_updated),
        ],
    )
    .map_err(|e| Error::Storage(format!("Failed to insert record '{}': {}", record.key, e)))?;

    let mut inserted = record.clone();
    inserted.id = Some(conn.last_insert_rowid());
    Ok(inserted)
}

fn update_record(conn: &Connection, record: &CachedRecord) -> Result<()> {
    let id = record.id.ok_or_else(|| {
        Error::InvalidInput(format!("Record '{}' has no id to update", record.key))
    })?;
    let data = serde_json::to_string(&record.payload)?;

    let changed = conn
        .execute(
            r#"
            UPDATE pokemon_cache SET
                pokemon_id = ?2,
                data = ?3,
                last_updated = ?4
            WHERE id = ?1
            "#,
            params![
                id,
                record.source_id,
                data,
                format_timestamp(&record.last_updated),
            ],
        )
        .map_err(|e| Error::Storage(format!("Failed to update record '{}': {}", record.key, e)))?;

    if changed == 0 {
        return Err(Error::Storage(format!(
            "No cached record with id {} ('{}')",
            id, record.key
        )));
    }

    Ok(())
}

fn list_records(conn: &Connection) -> Result<Vec<CachedRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM pokemon_cache ORDER BY pokemon_name ASC",
            SELECT_COLUMNS
        ))
        .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

    let records = stmt
        .query_map([], row_to_record)
        .map_err(|e| Error::Storage(format!("Failed to query records: {}", e)))?
        .filter_map(|r| match r {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping unreadable cache row: {}", e);
                None
            }
        })
        .collect();

    Ok(records)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CachedRecord> {
    let data: String = row.get(3)?;
    let payload = serde_json::from_str(&data)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let last_updated: String = row.get(4)?;
    let last_updated = parse_timestamp(&last_updated)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(CachedRecord {
        id: Some(row.get(0)?),
        source_id: row.get(1)?,
        key: row.get(2)?,
        payload,
        last_updated,
    })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
