//! Error boundary for the gateway
//!
//! Every failure in the request pipeline ends up as a [`GatewayError`] and is
//! turned into an HTTP response in exactly one place, [`IntoResponse`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

/// Message returned for every 500 response
pub const GENERIC_ERROR_MESSAGE: &str = "There was an error processing your request";

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The caller's request is malformed or rejected by policy. Message and
    /// data are echoed back.
    #[error("{message}")]
    User {
        message: String,
        data: Option<Value>,
    },
    /// A dependency of the gateway failed. Data is logged, never echoed.
    #[error("{message}")]
    Application {
        message: String,
        data: Option<Value>,
    },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
            data: None,
        }
    }

    pub fn user_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::User {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
            data: None,
        }
    }

    pub fn application_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::Application {
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::User { .. } => StatusCode::BAD_REQUEST,
            Self::Application { .. } | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label used for request outcome metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user_error",
            Self::Application { .. } => "application_error",
            Self::Unexpected(_) => "unexpected_error",
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::User { data, .. } | Self::Application { data, .. } => data.as_ref(),
            Self::Unexpected(_) => None,
        }
    }
}

/// JSON body of every error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorBody {
    fn generic() -> Self {
        Self {
            error: GENERIC_ERROR_MESSAGE.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::User { message, data } => {
                info!(error = %message, "Rejected request");
                ErrorBody {
                    error: message,
                    data,
                }
            }
            Self::Application { message, data } => {
                match &data {
                    Some(data) => error!(error = %message, data = %data, "Application error"),
                    None => error!(error = %message, "Application error"),
                }
                ErrorBody::generic()
            }
            Self::Unexpected(err) => {
                error!(error = ?err, "Unexpected error");
                ErrorBody::generic()
            }
        };

        (status, Json(body)).into_response()
    }
}
