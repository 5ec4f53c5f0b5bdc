//! Pokedex Service - 호출자용 facade
//!
//! 모든 호출은 주입된 [`SessionSupervisor`]를 거친다. 결과는 `{"data": ...}`
//! 또는 `{"error": "..."}` 문서로 돌려준다.

use crate::mcp::{SessionPhase, SessionSupervisor};
use crate::pokedex::{
    COMPARE_POKEMON, GET_BASIC_POKEMON_DATA, GET_POKEMON_BY_TYPE, LIST_CACHED_POKEMON,
    SEARCH_POKEMON,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

/// `{"data": ...}` 또는 `{"error": "..."}` 응답
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceReply {
    Data(Value),
    Error(String),
}

impl ServiceReply {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Operational,
    Unreachable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub web_service: Health,
    pub mcp_server: Health,
    pub tools: Vec<String>,
    pub session: SessionPhase,
}

impl ServiceStatus {
    /// 양쪽 모두 응답하는지 확인
    pub fn is_healthy(&self) -> bool {
        self.mcp_server == Health::Operational
    }
}

pub struct PokedexService {
    session: Arc<SessionSupervisor>,
}

impl PokedexService {
    pub fn new(session: Arc<SessionSupervisor>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionSupervisor> {
        &self.session
    }

    /// 캐시 기반 조회
    pub async fn pokemon(&self, name: &str) -> ServiceReply {
        self.call(GET_BASIC_POKEMON_DATA, json!({ "pokemon_name": name }))
            .await
    }

    /// 캐시를 거치지 않는 실시간 조회
    pub async fn search(&self, name: &str) -> ServiceReply {
        self.call(SEARCH_POKEMON, json!({ "name": name })).await
    }

    pub async fn cached(&self) -> ServiceReply {
        self.call(LIST_CACHED_POKEMON, json!({})).await
    }

    pub async fn by_type(&self, type_name: &str, limit: usize) -> ServiceReply {
        self.call(
            GET_POKEMON_BY_TYPE,
            json!({ "type_name": type_name, "limit": limit }),
        )
        .await
    }

    pub async fn compare(&self, first: &str, second: &str) -> ServiceReply {
        self.call(
            COMPARE_POKEMON,
            json!({ "pokemon1": first, "pokemon2": second }),
        )
        .await
    }

    pub async fn status(&self) -> ServiceStatus {
        let (mcp_server, tools) = match self.session.list_tools().await {
            Ok(tools) => (
                Health::Operational,
                tools.into_iter().map(|tool| tool.name).collect(),
            ),
            Err(e) => {
                error!("Error checking MCP status: {}", e);
                (Health::Unreachable, Vec::new())
            }
        };

        ServiceStatus {
            web_service: Health::Operational,
            mcp_server,
            tools,
            session: self.session.phase(),
        }
    }

    async fn call(&self, tool: &str, arguments: Value) -> ServiceReply {
        match self.session.call_tool(tool, arguments).await {
            Ok(result) => {
                let body = result.json_body();
                if !result.is_error {
                    return ServiceReply::Data(body);
                }
                let message = match body.get("error").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => result.text().unwrap_or("Tool failed").to_string(),
                };
                ServiceReply::Error(message)
            }
            Err(e) => {
                warn!(tool, "Tool call failed: {}", e);
                ServiceReply::Error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shape() {
        let data = serde_json::to_value(ServiceReply::Data(json!({"id": 132}))).unwrap();
        assert_eq!(data, json!({"data": {"id": 132}}));

        let error = serde_json::to_value(ServiceReply::Error("Pokemon not found".into())).unwrap();
        assert_eq!(error, json!({"error": "Pokemon not found"}));
    }

    #[test]
    fn test_status_shape() {
        let status = ServiceStatus {
            web_service: Health::Operational,
            mcp_server: Health::Unreachable,
            tools: vec![],
            session: SessionPhase::Connecting,
        };
        let encoded = serde_json::to_value(&status).unwrap();
        assert_eq!(encoded["mcp_server"], "unreachable");
        assert_eq!(encoded["session"], "connecting");
        assert!(!status.is_healthy());
    }
}
