//! Caller identity, as asserted by the upstream auth layer.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallerId(pub Uuid);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .ok_or_else(|| AppError::unauthorized("missing caller identity"))?;

        match Uuid::parse_str(raw) {
            Ok(id) if !id.is_nil() => Ok(CallerId(id)),
            _ => Err(AppError::unauthorized("invalid caller identity")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(header: Option<&str>) -> Result<CallerId, AppError> {
        let mut builder = Request::builder().uri("/themes");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        CallerId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_the_user_header() {
        let id = Uuid::new_v4();
        let caller = extract(Some(&format!(" {id} "))).await.unwrap();
        assert_eq!(caller, CallerId(id));
    }

    #[tokio::test]
    async fn missing_or_malformed_identity_is_unauthorized() {
        for header in [None, Some("not-a-uuid"), Some("00000000-0000-0000-0000-000000000000")] {
            let err = extract(header).await.unwrap_err();
            assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        }
    }
}
