//! 명령 실행기

use anyhow::Context;
use pokedex_core::{
    McpServer, McpServerConfig, PokedexService, PokedexTools, SessionSupervisor, SupervisorConfig,
};
use pokedex_foundation::{PokedexConfig, ENV_DATABASE_URL, ENV_POKEAPI_BASE_URL};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// 호출자 요청 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Lookup(String),
    Search(String),
    Cached,
    Type { type_name: String, limit: usize },
    Compare { first: String, second: String },
    Status,
}

/// stdin이 닫힐 때까지 도구 프로세스로 실행
pub async fn serve(config: &PokedexConfig) -> pokedex_foundation::Result<()> {
    let tools = PokedexTools::from_config(config)?;
    let server = Arc::new(McpServer::new("pokeapi", Arc::new(tools)));
    server.serve_stdio().await
}

/// 도구 프로세스 실행 설정 (기본 `pokedex serve`)
pub fn server_config(config: &PokedexConfig) -> McpServerConfig {
    let program = std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| "pokedex".to_string());

    let mut server = McpServerConfig::from_settings(&config.session, program);

    // the child resolves its own config; pass through what this process resolved
    if let Some(url) = &config.database_url {
        server
            .env
            .entry(ENV_DATABASE_URL.to_string())
            .or_insert_with(|| url.clone());
    }
    server
        .env
        .entry(ENV_POKEAPI_BASE_URL.to_string())
        .or_insert_with(|| config.upstream.base_url.clone());

    server
}

/// 도구 프로세스 감독 세션 (첫 사용 전까지 띄우지 않음)
pub fn open_session(config: &PokedexConfig) -> Arc<SessionSupervisor> {
    let server = server_config(config);
    info!("Tool process: {} {:?}", server.command, server.args);
    SessionSupervisor::stdio(server, SupervisorConfig::from_settings(&config.session))
}

/// 요청 실행 (출력할 문서, 성공 여부)
pub async fn execute(service: &PokedexService, request: Request) -> (Value, bool) {
    let reply = match request {
        Request::Lookup(name) => service.pokemon(&name).await,
        Request::Search(name) => service.search(&name).await,
        Request::Cached => service.cached().await,
        Request::Type { type_name, limit } => service.by_type(&type_name, limit).await,
        Request::Compare { first, second } => service.compare(&first, &second).await,
        Request::Status => {
            let status = service.status().await;
            let healthy = status.is_healthy();
            return (to_document(&status), healthy);
        }
    };

    let ok = !reply.is_error();
    (to_document(&reply), ok)
}

fn to_document<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }))
}

pub fn render(document: &Value) -> String {
    serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string())
}

/// 세션 열기, 요청 하나 실행, 세션 종료
pub async fn run_once(config: &PokedexConfig, request: Request) -> anyhow::Result<()> {
    let session = open_session(config);
    let service = PokedexService::new(Arc::clone(&session));

    let outcome = tokio::select! {
        outcome = execute(&service, request) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    session.shutdown().await;

    let (document, ok) = outcome.context("Interrupted")?;
    println!("{}", render(&document));

    if !ok {
        anyhow::bail!("request failed");
    }
    Ok(())
}
