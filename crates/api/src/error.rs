//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Checkout workflow error.
    Checkout(CheckoutError),
}

impl ApiError {
    /// HTTP status and machine code for the error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not-found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid-request"),
            ApiError::Checkout(err) => (checkout_status(err), err.code()),
        }
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::LockNotAcquired { .. } | CheckoutError::PaymentAlreadyExists(_) => {
            StatusCode::CONFLICT
        }
        CheckoutError::ProductNotFound(_)
        | CheckoutError::OptionNotFound { .. }
        | CheckoutError::OrderNotFound(_)
        | CheckoutError::OrderSheetNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::InsufficientStock { .. } | CheckoutError::InsufficientBalance { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CheckoutError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CheckoutError::LockInterrupted { .. }
        | CheckoutError::Serialization(_)
        | CheckoutError::Lock(_)
        | CheckoutError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
            ApiError::Checkout(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, code, "internal server error");
        }

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BuyerId, Money, OrderId, ProductId};
    use lock::LockError;

    #[test]
    fn test_checkout_errors_map_to_statuses() {
        let cases = [
            (
                CheckoutError::from(LockError::NotAcquired {
                    name: "payment-order:1".to_string(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                CheckoutError::ProductNotFound(ProductId::new(1)),
                StatusCode::NOT_FOUND,
            ),
            (
                CheckoutError::InsufficientBalance {
                    buyer_id: BuyerId::new(1),
                    requested: Money::new(10),
                    available: Money::new(5),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                CheckoutError::PaymentAlreadyExists(OrderId::new()),
                StatusCode::CONFLICT,
            ),
            (
                CheckoutError::InvalidRequest("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CheckoutError::from(store::StoreError::Unavailable("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let code = err.code();
            let api = ApiError::from(err);
            assert_eq!(api.status_and_code(), (status, code));
        }
    }
}
