//! API error handling
//!
//! Author: hephaex@gmail.com

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ewa_core::EwaError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    #[schema(example = "MODEL_LOAD_FAILED")]
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Client sent something unusable
    BadRequest { code: &'static str, message: String },
    /// An upstream page or model provider failed
    Upstream { code: &'static str, message: String },
    Internal { code: &'static str, message: String },
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: "BAD_REQUEST",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            AppError::BadRequest { code, message } => ApiError::new(code, message),
            AppError::Upstream { code, message } => {
                ApiError::new(code, "Upstream service failed").with_details(message)
            }
            AppError::Internal { code, message } => {
                ApiError::new(code, "Internal server error").with_details(message)
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<EwaError> for AppError {
    fn from(err: EwaError) -> Self {
        let message = err.to_string();
        match err {
            EwaError::Input(_) => AppError::BadRequest {
                code: "INVALID_INPUT",
                message,
            },
            EwaError::Fetch { .. } => AppError::Upstream {
                code: "FETCH_FAILED",
                message,
            },
            EwaError::ModelLoad { .. } => AppError::Upstream {
                code: "MODEL_LOAD_FAILED",
                message,
            },
            EwaError::Inference { .. } | EwaError::LanguageDetection(_) => AppError::Upstream {
                code: "INFERENCE_FAILED",
                message,
            },
            EwaError::Configuration(_) => AppError::Internal {
                code: "CONFIGURATION_ERROR",
                message,
            },
            EwaError::Other(_) => AppError::Internal {
                code: "INTERNAL_ERROR",
                message,
            },
        }
    }
}
