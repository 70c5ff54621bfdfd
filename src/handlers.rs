use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::{
    config::non_empty,
    error::ApiError,
    models::{DownloadParams, MediaFormat, SearchParams, SearchResponse},
    normalize::{extract_video_id, is_video_id, watch_url},
    provider::{DownloadPlan, IdentifierKind, Provider},
    relay::{download_filename, redirect_to, relay_media},
};

const NO_RESULTS_MESSAGE: &str = "Nenhum resultado encontrado para a sua busca.";

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn Provider>,
    pub http_client: reqwest::Client,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params
        .query
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("Parâmetro \"query\" é obrigatório para a busca."))?;

    let results = state.provider.search(query).await.map_err(|error| {
        warn!("Erro na busca de músicas para {:?}: {error}", query);
        ApiError::internal(format!("Falha na busca: {error}"))
    })?;

    if results.is_empty() {
        info!("Busca {:?} sem resultados", query);
        return Ok(Json(SearchResponse {
            results,
            message: Some(NO_RESULTS_MESSAGE.to_string()),
        }));
    }

    info!("Busca {:?} retornou {} resultado(s)", query, results.len());
    Ok(Json(SearchResponse {
        results,
        message: None,
    }))
}

pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let format = params
        .format
        .as_deref()
        .and_then(MediaFormat::parse)
        .ok_or_else(|| {
            ApiError::bad_request("Parâmetro \"format\" inválido. Deve ser \"mp3\" ou \"mp4\".")
        })?;

    let kind = state.provider.identifier_kind();
    let identifier = resolve_identifier(kind, &params).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Parâmetro \"{}\" é obrigatório para o provedor de download atual.",
            kind.param_name()
        ))
    })?;

    let filename = download_filename(params.title.as_deref().and_then(non_empty), format);
    let span = info_span!(
        "download",
        request_id = %Uuid::new_v4(),
        format = %format,
        provider = state.provider.name()
    );

    deliver(&state, &identifier, format, &filename)
        .instrument(span)
        .await
}

async fn deliver(
    state: &AppState,
    identifier: &str,
    format: MediaFormat,
    filename: &str,
) -> Result<Response, ApiError> {
    let plan = state
        .provider
        .resolve_download(identifier, format)
        .await
        .map_err(|error| {
            warn!("Erro resolvendo download {}: {error}", format.label());
            ApiError::delivery_failed(format, &error)
        })?;

    match plan {
        DownloadPlan::Redirect { url } => Ok(redirect_to(&url)),
        DownloadPlan::Relay { url } => relay_media(&state.http_client, &url, format, filename)
            .await
            .map_err(|error| {
                warn!("Erro no download {}: {error}", format.label());
                ApiError::delivery_failed(format, &error)
            }),
    }
}

/// Picks the value the active provider keys downloads on. URL and ID are
/// interchangeable for YouTube, so either one satisfies the other.
fn resolve_identifier(kind: IdentifierKind, params: &DownloadParams) -> Option<String> {
    let title = params.title.as_deref().and_then(non_empty);
    let url = params.url.as_deref().and_then(non_empty);
    let id = params.id.as_deref().and_then(non_empty);

    match kind {
        IdentifierKind::Title => title.map(ToString::to_string),
        IdentifierKind::Url => url
            .map(ToString::to_string)
            .or_else(|| id.filter(|id| is_video_id(id)).map(watch_url)),
        IdentifierKind::Id => id
            .map(ToString::to_string)
            .or_else(|| url.and_then(extract_video_id)),
    }
}
