//! Pokedex 에러 타입
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

/// Pokedex 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 세션 / MCP 관련
    // ========================================================================
    /// 제한 시간 안에 세션이 Ready가 되지 않음
    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    /// 도구 프로세스와의 공유 채널이 호출 도중 끊김
    #[error("Transport error: {0}")]
    Transport(String),

    /// 도구 프로세스가 JSON-RPC 에러 객체로 응답
    #[error("MCP error {code}: {message}")]
    Mcp { code: i32, message: String },

    // ========================================================================
    // Tool 관련
    // ========================================================================
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool} - {message}")]
    ToolExecution { tool: String, message: String },

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 공유 채널을 더 이상 신뢰할 수 없는 실패인지 확인
    ///
    /// 타임아웃된 요청은 다중화된 스트림에 응답 없는 id를 남기므로
    /// broken pipe와 같이 취급한다.
    pub fn poisons_session(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Timeout(_))
    }

    /// MCP 에러 생성 헬퍼
    pub fn mcp(code: i32, message: impl Into<String>) -> Self {
        Error::Mcp {
            code,
            message: message.into(),
        }
    }

    /// Tool 실행 에러 생성 헬퍼
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_poison_session() {
        assert!(Error::Transport("broken pipe".into()).poisons_session());
        assert!(Error::Timeout("tools/call".into()).poisons_session());
        assert!(!Error::mcp(-32601, "unknown tool").poisons_session());
        assert!(!Error::NotFound("missingno".into()).poisons_session());
    }

    #[test]
    fn test_display() {
        let err = Error::mcp(-32602, "invalid params");
        assert_eq!(err.to_string(), "MCP error -32602: invalid params");
    }
}
