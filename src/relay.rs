use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Redirect, Response},
};
use futures::TryStreamExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::ProviderError, models::MediaFormat};

const FALLBACK_FILENAME_STEM: &str = "download";
const ERROR_DETAIL_LIMIT: usize = 150;
const ERROR_BODY_READ_LIMIT: usize = ERROR_DETAIL_LIMIT * 4;

/// Fetches `media_url` and streams its body to the caller untouched.
///
/// Upstream failures are only reported while nothing has been sent yet. Once
/// the response is handed to axum, a broken upstream stream just ends the
/// download and gets logged.
pub async fn relay_media(
    client: &reqwest::Client,
    media_url: &Url,
    format: MediaFormat,
    filename: &str,
) -> Result<Response, ProviderError> {
    info!("Iniciando proxy {} de {}", format.label(), media_url);
    let upstream = client.get(media_url.clone()).send().await?;
    let upstream = ensure_success(upstream).await?;

    let status = upstream.status();
    let content_length = upstream.content_length();
    debug!(
        "Proxy {} status={} content-length={:?}",
        format.label(),
        status,
        content_length
    );

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    if let Some(length) = content_length
        && let Ok(value) = HeaderValue::from_str(&length.to_string())
    {
        headers.insert(CONTENT_LENGTH, value);
    }
    headers.insert(CONTENT_DISPOSITION, build_content_disposition(filename));

    let label = format.label();
    let stream = upstream.bytes_stream().inspect_err(move |error| {
        warn!("Stream {label} interrompido após envio dos cabeçalhos: {error}");
    });

    Ok((status, headers, Body::from_stream(stream)).into_response())
}

pub fn redirect_to(target: &Url) -> Response {
    info!("Redirecionando download para {target}");
    Redirect::to(target.as_str()).into_response()
}

/// Turns a non-2xx upstream response into an error carrying a short excerpt
/// of the upstream body. Only the first few hundred bytes are read.
pub async fn ensure_success(
    mut response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut collected = Vec::new();
    while collected.len() < ERROR_BODY_READ_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
            _ => break,
        }
    }

    let body = String::from_utf8_lossy(&collected);
    let excerpt: String = body.trim().chars().take(ERROR_DETAIL_LIMIT).collect();
    let detail = if excerpt.is_empty() {
        reason_phrase(&response)
    } else {
        excerpt
    };

    Err(ProviderError::UpstreamStatus {
        status: status.as_u16(),
        detail,
    })
}

/// The reason phrase the upstream actually sent, falling back to the
/// canonical one for its status code.
pub fn reason_phrase(response: &reqwest::Response) -> String {
    if let Some(reason) = response.extensions().get::<hyper::ext::ReasonPhrase>() {
        return String::from_utf8_lossy(reason.as_bytes()).into_owned();
    }

    response
        .status()
        .canonical_reason()
        .unwrap_or("sem detalhes")
        .to_string()
}

pub fn download_filename(title: Option<&str>, format: MediaFormat) -> String {
    format!(
        "{}.{}",
        sanitize_filename_stem(title.unwrap_or_default()),
        format.extension()
    )
}

/// Replaces everything outside `[A-Za-z0-9 _-]` with `_` and collapses
/// whitespace runs into a single `_`.
pub fn sanitize_filename_stem(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());
    let mut in_whitespace = false;

    for character in value.chars() {
        if character.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }

        in_whitespace = false;
        if character.is_ascii_alphanumeric() || matches!(character, '-' | '_') {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    if sanitized.is_empty() {
        FALLBACK_FILENAME_STEM.to_string()
    } else {
        sanitized
    }
}

fn build_content_disposition(filename: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
