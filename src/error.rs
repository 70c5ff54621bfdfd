use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::models::MediaFormat;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Download failures always carry the requested format so the user knows
    /// which button failed.
    pub fn delivery_failed(format: MediaFormat, error: &ProviderError) -> Self {
        let label = format.label();
        match error {
            ProviderError::LinkNotFound => Self::internal(format!(
                "Link de download do {label} não encontrado na resposta da API."
            )),
            other => Self::internal(format!("Falha ao gerar o {label}: {other}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Everything that can go wrong while talking to an upstream provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("falha de rede ao contatar o provedor: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Erro HTTP {status}: {detail}")]
    UpstreamStatus { status: u16, detail: String },

    #[error("resposta inválida do provedor: {0}")]
    InvalidPayload(String),

    #[error("link de download não encontrado na resposta da API")]
    LinkNotFound,

    #[error("endpoint de provedor inválido {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}
