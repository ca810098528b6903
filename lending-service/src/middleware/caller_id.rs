use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const CALLER_ID_HEADER: &str = "X-Caller-ID";

/// Identities are stored in `VARCHAR(128)` columns.
pub const MAX_CALLER_ID_LEN: usize = 128;

/// Identity on whose behalf the request acts.
///
/// Taken verbatim from the `X-Caller-ID` header; authentication of that
/// identity happens in front of this service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let caller_id = parts
            .headers
            .get(CALLER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-Caller-ID header"))
            })?;

        if caller_id.chars().count() > MAX_CALLER_ID_LEN {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "X-Caller-ID must be at most {} characters",
                MAX_CALLER_ID_LEN
            )));
        }

        tracing::Span::current().record("caller_id", caller_id);

        Ok(CallerId(caller_id.to_string()))
    }
}
