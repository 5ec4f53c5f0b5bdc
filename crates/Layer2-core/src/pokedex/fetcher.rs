//! Upstream Fetcher - PokeAPI HTTP 클라이언트
//!
//! 모든 실패 (네트워크, non-2xx, 깨진 본문)는 `None`으로 합쳐진다.
//! 호출자는 `None`을 not-found로 취급한다.

use async_trait::async_trait;
use pokedex_foundation::{Error, Result, UpstreamSettings};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// 외부 데이터 소스
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// base URL 기준 `path` GET
    async fn fetch(&self, path: &str) -> Option<Value>;
}

/// `pokemon/{key}`, 조회할 수 없는 이름이면 `None`
pub fn pokemon_path(key: &str) -> Option<String> {
    path_segment(key).map(|segment| format!("pokemon/{}", segment))
}

/// `type/{name}`, 조회할 수 없는 이름이면 `None`
pub fn type_path(type_name: &str) -> Option<String> {
    path_segment(type_name).map(|segment| format!("type/{}", segment))
}

/// 이름 하나를 경로 세그먼트 하나로 인코딩 (`/`, `?`, `#` 포함)
///
/// `.`과 `..`은 인코딩해도 URL 파서가 점 세그먼트로 해석하므로 거부한다.
fn path_segment(raw: &str) -> Option<String> {
    match raw {
        "" | "." | ".." => None,
        _ => Some(urlencoding::encode(raw).into_owned()),
    }
}

/// PokeAPI 클라이언트
pub struct PokeApiClient {
    client: Client,
    base_url: String,
}

impl PokeApiClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl UpstreamFetcher for PokeApiClient {
    async fn fetch(&self, path: &str) -> Option<Value> {
        let url = self.url_for(path);
        debug!("Fetching {}", url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Upstream request to {} failed: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!("Upstream {} answered {}", url, status.as_u16());
            return None;
        }

        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Upstream {} returned an unreadable body: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP server answering every connection with the same response
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    fn client(base_url: String) -> PokeApiClient {
        PokeApiClient::new(&UpstreamSettings {
            base_url,
            ..UpstreamSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_for() {
        let client = client("https://pokeapi.co/api/v2/".to_string());
        assert_eq!(client.base_url(), "https://pokeapi.co/api/v2");
        assert_eq!(
            client.url_for(&pokemon_path("ditto").unwrap()),
            "https://pokeapi.co/api/v2/pokemon/ditto"
        );
        assert_eq!(
            client.url_for("/type/fire"),
            "https://pokeapi.co/api/v2/type/fire"
        );
    }

    #[test]
    fn test_paths_are_single_segments() {
        assert_eq!(pokemon_path("mr-mime").unwrap(), "pokemon/mr-mime");
        assert_eq!(type_path("fire").unwrap(), "type/fire");
        assert_eq!(
            pokemon_path("../type/fire").unwrap(),
            "pokemon/..%2Ftype%2Ffire"
        );
        assert_eq!(pokemon_path("ditto?x=1#y").unwrap(), "pokemon/ditto%3Fx%3D1%23y");

        for raw in ["", ".", ".."] {
            assert!(pokemon_path(raw).is_none(), "accepted {:?}", raw);
            assert!(type_path(raw).is_none(), "accepted {:?}", raw);
        }
    }

    #[tokio::test]
    async fn test_escaped_name_stays_under_pokemon() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let request_line = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            request.lines().next().unwrap_or_default().to_string()
        });

        let path = pokemon_path("../type/fire").unwrap();
        assert!(client(base).fetch(&path).await.is_none());

        let request_line = request_line.await.unwrap();
        assert_eq!(request_line, "GET /pokemon/..%2Ftype%2Ffire HTTP/1.1");
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let base = serve_once("200 OK", r#"{"id":132,"name":"ditto"}"#).await;
        let body = client(base).fetch("pokemon/ditto").await.unwrap();
        assert_eq!(body["name"], "ditto");
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_none() {
        let base = serve_once("404 Not Found", "Not Found").await;
        assert!(client(base).fetch("pokemon/missingno").await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_bad_body_is_none() {
        let base = serve_once("200 OK", "<html>").await;
        assert!(client(base).fetch("pokemon/ditto").await.is_none());
    }
}
