//! MCP Types - MCP 관련 타입 정의

use pokedex_foundation::SessionSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// MCP 프로토콜 버전
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP 서버에서 제공하는 도구 정보
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    /// 도구 이름
    pub name: String,

    /// 도구 설명
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// 입력 스키마 (JSON Schema)
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// MCP 도구 호출
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCall {
    /// 도구 이름
    pub name: String,

    /// 인자
    #[serde(default)]
    pub arguments: Value,
}

impl McpToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// MCP 도구 실행 결과
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolResult {
    /// 실패 여부
    #[serde(rename = "isError", default)]
    pub is_error: bool,

    /// 결과 콘텐츠
    pub content: Vec<McpContent>,
}

/// MCP 콘텐츠
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    /// 텍스트 콘텐츠
    Text { text: String },

    /// 이미지 콘텐츠
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// 리소스 참조
    Resource {
        uri: String,
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl McpToolResult {
    /// 성공 결과 생성
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![McpContent::Text { text: text.into() }],
        }
    }

    /// 오류 결과 생성
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![McpContent::Text { text: text.into() }],
        }
    }

    /// JSON 문서를 텍스트 콘텐츠로 감싼 결과
    pub fn json(value: &Value, is_error: bool) -> Self {
        Self {
            is_error,
            content: vec![McpContent::Text {
                text: value.to_string(),
            }],
        }
    }

    /// 텍스트 결과 추출
    pub fn text(&self) -> Option<&str> {
        self.content.iter().find_map(|content| match content {
            McpContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// 첫 텍스트 블록을 JSON으로 파싱 (일반 텍스트는 문자열 값으로 감쌈)
    pub fn json_body(&self) -> Value {
        match self.text() {
            Some(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
            }
            None => Value::Null,
        }
    }
}

/// MCP 서버 (도구 프로세스) 실행 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// 서버 이름
    pub name: String,

    /// 실행 명령어
    pub command: String,

    /// 인자
    #[serde(default)]
    pub args: Vec<String>,

    /// 환경 변수
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// 요청 타임아웃
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl McpServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            request_timeout: default_request_timeout(),
        }
    }

    /// session 섹션으로 생성 (명령이 없으면 `default_command`)
    pub fn from_settings(settings: &SessionSettings, default_command: impl Into<String>) -> Self {
        Self {
            name: "pokeapi".to_string(),
            command: settings
                .command
                .clone()
                .unwrap_or_else(|| default_command.into()),
            args: settings.args.clone(),
            env: settings.env.clone(),
            request_timeout: settings.request_timeout(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mcp_tool_result() {
        let result = McpToolResult::success("Hello");
        assert!(!result.is_error);
        assert_eq!(result.text(), Some("Hello"));
        assert_eq!(result.json_body(), json!("Hello"));

        let error = McpToolResult::json(&json!({"error": "Pokemon not found"}), true);
        assert!(error.is_error);
        assert_eq!(error.json_body()["error"], "Pokemon not found");
    }

    #[test]
    fn test_tool_result_wire_format() {
        let wire = json!({
            "content": [{"type": "text", "text": "{\"id\":132}"}],
            "isError": false
        });
        let result: McpToolResult = serde_json::from_value(wire).unwrap();
        assert_eq!(result.json_body()["id"], 132);

        let encoded = serde_json::to_value(McpToolResult::error("boom")).unwrap();
        assert_eq!(encoded["isError"], true);
        assert_eq!(encoded["content"][0]["type"], "text");
    }

    #[test]
    fn test_server_config_from_settings() {
        let settings = SessionSettings::default();
        let config = McpServerConfig::from_settings(&settings, "/usr/bin/pokedex");
        assert_eq!(config.command, "/usr/bin/pokedex");
        assert_eq!(config.args, vec!["serve".to_string()]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
