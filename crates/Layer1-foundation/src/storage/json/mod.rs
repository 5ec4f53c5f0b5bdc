//! JSON 파일 저장 (설정 파일용)

mod store;

pub use store::JsonStore;
