use crate::dtos::BucketResponse;
use crate::error::ApiError;
use crate::models::BucketId;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};

pub async fn get_bucket(
    State(state): State<AppState>,
    Path(bucket_id): Path<BucketId>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = state
        .service
        .read(|p| Ok(BucketResponse::new(p.bucket(bucket_id)?, p.current_chi(bucket_id)?)))
        .await?;
    Ok(Json(bucket))
}

/// Advance the bucket's chi to now. Open to anyone.
#[tracing::instrument(skip(state))]
pub async fn drip(
    State(state): State<AppState>,
    Path(bucket_id): Path<BucketId>,
) -> Result<Json<BucketResponse>, ApiError> {
    let bucket = state
        .service
        .execute("drip", |p| {
            let chi = p.drip(bucket_id)?;
            Ok(BucketResponse::new(p.bucket(bucket_id)?, chi))
        })
        .await?;
    tracing::debug!(bucket_id = bucket_id, chi = %bucket.chi, "Bucket dripped");
    Ok(Json(bucket))
}
