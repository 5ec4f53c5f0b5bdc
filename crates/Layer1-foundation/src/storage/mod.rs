//! Pokedex 저장소 모듈
//!
//! - `db`: SQLite - Pokemon 캐시 레코드
//! - `record`: Record Store 계약 (`RecordStore` trait)
//! - `json`: JSON - 설정 파일 저장/로드

mod db;
mod json;
mod record;

// SQLite Storage (캐시 레코드)
pub use db::{DatabaseLocation, Storage};

// Record Store 계약
pub use record::{CachedRecord, RecordStore, DEFAULT_TTL_DAYS};

// JSON Storage (범용)
pub use json::JsonStore;
