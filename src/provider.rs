//! Upstream provider integrations.
//!
//! Every deployment so far has paired one search API with one download API,
//! and the only thing that changes between them is endpoints, parameter
//! names and how the media reaches the browser. `ProviderProfile` captures
//! those differences as data; `HttpProvider` executes any profile.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
    error::ProviderError,
    models::{MediaFormat, SearchResult},
    normalize::{normalize_search_payload, resolve_media_link},
    relay::{ensure_success, reason_phrase},
};

const KUROMI_BASE: &str = "https://kuromi-system-tech.onrender.com/api";
const NEXFUTURE_BASE: &str = "https://api.nexfuture.com.br/api/downloads/youtube";

/// Which request parameter a provider needs to locate the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Title,
    Url,
    Id,
}

impl IdentifierKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "title" => Some(Self::Title),
            "url" => Some(Self::Url),
            "id" => Some(Self::Id),
            _ => None,
        }
    }

    pub fn param_name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Url => "url",
            Self::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The endpoint itself answers with the media bytes.
    Direct,
    /// The endpoint answers with a JSON descriptor pointing at the media.
    ResolveThenRelay,
    /// The browser is sent to the endpoint and downloads from there.
    Redirect,
}

impl Delivery {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(Self::Direct),
            "resolve" | "resolve-then-relay" => Some(Self::ResolveThenRelay),
            "redirect" => Some(Self::Redirect),
            _ => None,
        }
    }
}

/// Final instruction for the download handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadPlan {
    Relay { url: Url },
    Redirect { url: Url },
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn identifier_kind(&self) -> IdentifierKind;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError>;

    async fn resolve_download(
        &self,
        identifier: &str,
        format: MediaFormat,
    ) -> Result<DownloadPlan, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct SearchEndpoint {
    pub url: String,
    pub query_param: String,
}

#[derive(Debug, Clone)]
pub struct DownloadRoute {
    pub url: String,
    pub param: String,
    pub delivery: Delivery,
}

#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub name: String,
    pub search: SearchEndpoint,
    pub identifier: IdentifierKind,
    pub audio: DownloadRoute,
    pub video: DownloadRoute,
}

impl ProviderProfile {
    /// Kuromi search, NexFuture downloads keyed by the watch URL.
    pub fn nexfuture() -> Self {
        Self {
            name: "nexfuture".to_string(),
            search: kuromi_search(),
            identifier: IdentifierKind::Url,
            audio: DownloadRoute {
                url: format!("{NEXFUTURE_BASE}/mp3/v3"),
                param: "url".to_string(),
                delivery: Delivery::ResolveThenRelay,
            },
            video: DownloadRoute {
                url: format!("{NEXFUTURE_BASE}/mp4"),
                param: "url".to_string(),
                delivery: Delivery::Direct,
            },
        }
    }

    /// Kuromi for everything; downloads are keyed by title and redirected.
    pub fn kuromi() -> Self {
        Self {
            name: "kuromi".to_string(),
            search: kuromi_search(),
            identifier: IdentifierKind::Title,
            audio: DownloadRoute {
                url: format!("{KUROMI_BASE}/play"),
                param: "name".to_string(),
                delivery: Delivery::Redirect,
            },
            video: DownloadRoute {
                url: format!("{KUROMI_BASE}/ytmp4"),
                param: "name".to_string(),
                delivery: Delivery::Redirect,
            },
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "nexfuture" => Some(Self::nexfuture()),
            "kuromi" => Some(Self::kuromi()),
            _ => None,
        }
    }

    pub fn route(&self, format: MediaFormat) -> &DownloadRoute {
        match format {
            MediaFormat::Mp3 => &self.audio,
            MediaFormat::Mp4 => &self.video,
        }
    }

    /// Parses every configured endpoint so a typo fails at startup instead of
    /// on the first request.
    pub fn validate(&self) -> Result<(), ProviderError> {
        for endpoint in [&self.search.url, &self.audio.url, &self.video.url] {
            build_endpoint_url(endpoint, &[])?;
        }
        Ok(())
    }
}

fn kuromi_search() -> SearchEndpoint {
    SearchEndpoint {
        url: format!("{KUROMI_BASE}/pesquisayt"),
        query_param: "query".to_string(),
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Direct => "direct",
            Self::ResolveThenRelay => "resolve-then-relay",
            Self::Redirect => "redirect",
        };
        f.write_str(label)
    }
}

pub struct HttpProvider {
    profile: ProviderProfile,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(profile: ProviderProfile, client: reqwest::Client) -> Self {
        Self { profile, client }
    }

    async fn fetch_descriptor(&self, url: Url) -> Result<Value, ProviderError> {
        let response = self.client.get(url).send().await?;
        let response = ensure_success(response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|error| ProviderError::InvalidPayload(error.to_string()))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn identifier_kind(&self) -> IdentifierKind {
        self.profile.identifier
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let endpoint = &self.profile.search;
        let url = build_endpoint_url(&endpoint.url, &[(endpoint.query_param.as_str(), query)])?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::UpstreamStatus {
                status: status.as_u16(),
                detail: reason_phrase(&response),
            });
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|error| ProviderError::InvalidPayload(error.to_string()))?;
        debug!("Resposta da API de busca: {payload}");

        Ok(normalize_search_payload(&payload))
    }

    async fn resolve_download(
        &self,
        identifier: &str,
        format: MediaFormat,
    ) -> Result<DownloadPlan, ProviderError> {
        let route = self.profile.route(format);
        let url = build_endpoint_url(&route.url, &[(route.param.as_str(), identifier)])?;
        debug!("Rota de download {} ({}) -> {}", format.label(), route.delivery, url);

        match route.delivery {
            Delivery::Direct => Ok(DownloadPlan::Relay { url }),
            Delivery::Redirect => Ok(DownloadPlan::Redirect { url }),
            Delivery::ResolveThenRelay => {
                info!("Buscando link de download {} para: {identifier}", format.label());
                let descriptor = self.fetch_descriptor(url).await?;
                let link = resolve_media_link(&descriptor).ok_or(ProviderError::LinkNotFound)?;
                let url = Url::parse(&link).map_err(|source| ProviderError::InvalidEndpoint {
                    endpoint: link.clone(),
                    source,
                })?;
                Ok(DownloadPlan::Relay { url })
            }
        }
    }
}

/// Appends URL-encoded query pairs, keeping any query the endpoint already has.
pub fn build_endpoint_url(endpoint: &str, pairs: &[(&str, &str)]) -> Result<Url, ProviderError> {
    let mut url = Url::parse(endpoint).map_err(|source| ProviderError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })?;

    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViewCount;
    use mockito::Matcher;
    use serde_json::json;

    fn profile_for(server_url: &str, audio: Delivery, video: Delivery) -> ProviderProfile {
        ProviderProfile {
            name: "test".to_string(),
            search: SearchEndpoint {
                url: format!("{server_url}/api/pesquisayt"),
                query_param: "query".to_string(),
            },
            identifier: IdentifierKind::Url,
            audio: DownloadRoute {
                url: format!("{server_url}/mp3"),
                param: "url".to_string(),
                delivery: audio,
            },
            video: DownloadRoute {
                url: format!("{server_url}/mp4"),
                param: "url".to_string(),
                delivery: video,
            },
        }
    }

    fn provider_for(server_url: &str, audio: Delivery, video: Delivery) -> HttpProvider {
        HttpProvider::new(
            profile_for(server_url, audio, video),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn search_encodes_query_and_normalizes_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/pesquisayt")
            .match_query(Matcher::UrlEncoded("query".into(), "test song".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "formattedVideos": [
                        { "title": "A", "título": "B", "link": "http://x", "duration": "3:45" }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::Direct, Delivery::Direct);
        let results = provider.search("test song").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "A");
        assert_eq!(results[0].url, "http://x");
        assert_eq!(results[0].duration, "3:45");
        assert_eq!(results[0].channel, "Desconhecido");
        assert_eq!(results[0].views, ViewCount::Count(0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn search_reports_upstream_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/pesquisayt")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::Direct, Delivery::Direct);
        let error = provider.search("anything").await.unwrap_err();

        assert_eq!(error.to_string(), "Erro HTTP 503: Service Unavailable");
    }

    #[tokio::test]
    async fn search_reports_the_reason_phrase_the_upstream_sent() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 429 Quota Exhausted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let provider = provider_for(&format!("http://{addr}"), Delivery::Direct, Delivery::Direct);
        let error = provider.search("anything").await.unwrap_err();

        assert_eq!(error.to_string(), "Erro HTTP 429: Quota Exhausted");
    }

    #[tokio::test]
    async fn search_with_empty_collection_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/pesquisayt")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"formattedVideos":[]}"#)
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::Direct, Delivery::Direct);
        assert!(provider.search("nada").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_rejects_non_json_payloads() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/pesquisayt")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::Direct, Delivery::Direct);
        let error = provider.search("x").await.unwrap_err();
        assert!(matches!(error, ProviderError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn direct_and_redirect_routes_need_no_upstream_call() {
        let server = mockito::Server::new_async().await;
        let provider = provider_for(&server.url(), Delivery::Redirect, Delivery::Direct);
        let watch = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

        let audio = provider.resolve_download(watch, MediaFormat::Mp3).await.unwrap();
        let video = provider.resolve_download(watch, MediaFormat::Mp4).await.unwrap();

        match audio {
            DownloadPlan::Redirect { url } => {
                assert_eq!(url.path(), "/mp3");
                assert_eq!(
                    url.query_pairs().find(|(key, _)| key == "url").unwrap().1,
                    watch
                );
            }
            other => panic!("expected redirect, got {other:?}"),
        }
        assert!(matches!(video, DownloadPlan::Relay { url } if url.path() == "/mp4"));
    }

    #[tokio::test]
    async fn descriptor_link_becomes_the_relay_target() {
        let mut server = mockito::Server::new_async().await;
        let media_link = format!("{}/files/song.mp3", server.url());
        let descriptor = server
            .mock("GET", "/mp3")
            .match_query(Matcher::UrlEncoded(
                "url".into(),
                "https://youtu.be/dQw4w9WgXcQ".into(),
            ))
            .with_status(200)
            .with_body(json!({ "resultado": { "downloadLink": media_link.as_str() } }).to_string())
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::ResolveThenRelay, Delivery::Direct);
        let plan = provider
            .resolve_download("https://youtu.be/dQw4w9WgXcQ", MediaFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(
            plan,
            DownloadPlan::Relay {
                url: Url::parse(&media_link).unwrap()
            }
        );
        descriptor.assert_async().await;
    }

    #[tokio::test]
    async fn descriptor_without_link_is_link_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mp3")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":true,"message":"processing"}"#)
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::ResolveThenRelay, Delivery::Direct);
        let error = provider
            .resolve_download("https://youtu.be/dQw4w9WgXcQ", MediaFormat::Mp3)
            .await
            .unwrap_err();
        assert!(matches!(error, ProviderError::LinkNotFound));
    }

    #[tokio::test]
    async fn descriptor_failure_carries_upstream_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/mp3")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("internal upstream failure")
            .create_async()
            .await;

        let provider = provider_for(&server.url(), Delivery::ResolveThenRelay, Delivery::Direct);
        let error = provider
            .resolve_download("https://youtu.be/dQw4w9WgXcQ", MediaFormat::Mp3)
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Erro HTTP 500: internal upstream failure");
    }

    #[test]
    fn endpoint_url_keeps_existing_query() {
        let url = build_endpoint_url(
            "https://api.example/play?apikey=k",
            &[("name", "Música & Letra")],
        )
        .unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("apikey".to_string(), "k".to_string()),
                ("name".to_string(), "Música & Letra".to_string()),
            ]
        );
    }

    #[test]
    fn presets_are_valid_and_selectable() {
        for name in ["nexfuture", "kuromi", " Kuromi "] {
            let profile = ProviderProfile::by_name(name).unwrap();
            profile.validate().unwrap();
        }
        assert!(ProviderProfile::by_name("unknown").is_none());

        let nexfuture = ProviderProfile::nexfuture();
        assert_eq!(nexfuture.identifier, IdentifierKind::Url);
        assert_eq!(nexfuture.route(MediaFormat::Mp3).delivery, Delivery::ResolveThenRelay);
        assert_eq!(nexfuture.route(MediaFormat::Mp4).delivery, Delivery::Direct);

        let kuromi = ProviderProfile::kuromi();
        assert_eq!(kuromi.identifier, IdentifierKind::Title);
        assert_eq!(kuromi.route(MediaFormat::Mp4).delivery, Delivery::Redirect);
    }

    #[test]
    fn identifier_and_delivery_names_parse() {
        assert_eq!(IdentifierKind::parse("ID"), Some(IdentifierKind::Id));
        assert_eq!(IdentifierKind::parse("title"), Some(IdentifierKind::Title));
        assert_eq!(IdentifierKind::parse("slug"), None);
        assert_eq!(Delivery::parse("resolve"), Some(Delivery::ResolveThenRelay));
        assert_eq!(Delivery::parse(" Redirect "), Some(Delivery::Redirect));
        assert_eq!(Delivery::parse("stream"), None);
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let mut profile = ProviderProfile::nexfuture();
        profile.video.url = "not a url".to_string();
        assert!(matches!(
            profile.validate(),
            Err(ProviderError::InvalidEndpoint { .. })
        ));
    }
}
