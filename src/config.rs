use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::http::{HeaderValue, Method, header::CONTENT_DISPOSITION};
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::ApiError,
    provider::{Delivery, IdentifierKind, ProviderProfile},
};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_PROVIDER_PROFILE: &str = "nexfuture";
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 15;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub public_dir: PathBuf,
    pub allowed_origins: Option<HashSet<String>>,
    pub profile: ProviderProfile,
    pub connect_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        Ok(Self {
            bind_addr: resolve_bind_addr(),
            public_dir: env_string("PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
            allowed_origins: read_allowed_origins()?,
            profile: resolve_provider_profile()?,
            connect_timeout: Duration::from_secs(
                read_u64_env("UPSTREAM_CONNECT_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            ),
        })
    }

    pub fn build_http_client(&self) -> Result<reqwest::Client, ApiError> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ApiError::internal(format!("Não foi possível criar o cliente HTTP: {error}")))
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_headers(Any)
            .expose_headers([CONTENT_DISPOSITION]);

        let Some(origins) = &self.allowed_origins else {
            return layer.allow_origin(Any);
        };

        let allowed_origins = Arc::new(origins.clone());
        layer.allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }))
    }
}

fn resolve_provider_profile() -> Result<ProviderProfile, ApiError> {
    let name = env_string("PROVIDER_PROFILE").unwrap_or_else(|| DEFAULT_PROVIDER_PROFILE.to_string());
    let mut profile = ProviderProfile::by_name(&name).ok_or_else(|| {
        ApiError::internal(format!(
            "PROVIDER_PROFILE desconhecido: {name}. Use nexfuture ou kuromi."
        ))
    })?;

    if let Some(url) = env_string("SEARCH_API_URL") {
        profile.search.url = url;
    }
    if let Some(url) = env_string("AUDIO_API_URL") {
        profile.audio.url = url;
    }
    if let Some(url) = env_string("VIDEO_API_URL") {
        profile.video.url = url;
    }
    if let Some(param) = env_string("DOWNLOAD_PARAM") {
        profile.audio.param = param.clone();
        profile.video.param = param;
    }
    if let Some(value) = env_string("DOWNLOAD_IDENTIFIER") {
        profile.identifier = IdentifierKind::parse(&value).ok_or_else(|| {
            ApiError::internal(format!(
                "DOWNLOAD_IDENTIFIER inválido: {value}. Use title, url ou id."
            ))
        })?;
    }
    if let Some(delivery) = read_delivery_env("AUDIO_DELIVERY")? {
        profile.audio.delivery = delivery;
    }
    if let Some(delivery) = read_delivery_env("VIDEO_DELIVERY")? {
        profile.video.delivery = delivery;
    }

    profile
        .validate()
        .map_err(|error| ApiError::internal(format!("Configuração de provedor inválida: {error}")))?;

    info!(
        "Perfil de provedor '{}' carregado (identificador: {})",
        profile.name,
        profile.identifier.param_name()
    );
    Ok(profile)
}

fn read_delivery_env(name: &str) -> Result<Option<Delivery>, ApiError> {
    env_string(name)
        .map(|value| {
            Delivery::parse(&value).ok_or_else(|| {
                ApiError::internal(format!(
                    "{name} inválido: {value}. Use direct, resolve ou redirect."
                ))
            })
        })
        .transpose()
}

fn read_allowed_origins() -> Result<Option<HashSet<String>>, ApiError> {
    let configured = env_string("ALLOWED_ORIGINS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS não configurado. Qualquer origem será aceita.");
        return Ok(None);
    }

    let normalized = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Origem inválida em ALLOWED_ORIGINS: {origin}. Use valores como https://dominio.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;

    info!(
        "CORS allow-list carregada com {} origem(ns): {:?}",
        normalized.len(),
        normalized
    );
    Ok(Some(normalized))
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = env_string("APP_ADDR") {
        return configured;
    }

    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
    {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
