//! Administrative endpoints. Every call here is checked against the caller's
//! grants on the target module.

use crate::dtos::{
    BalanceResponse, BucketResponse, CreateBucketRequest, GrantRequest, GrantResponse,
    MintRequest, SetBoundsRequest,
};
use crate::engine::ModuleId;
use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::models::LoanBounds;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use tracing::info;
use validator::Validate;

fn parse_module(raw: &str) -> Result<ModuleId, ApiError> {
    raw.parse::<ModuleId>()
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)).into())
}

#[tracing::instrument(skip(state, request))]
pub async fn grant(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    request.validate()?;
    let module = parse_module(&request.module)?;

    let changed = state
        .service
        .execute("grant", |p| p.grant(caller.as_str(), &module, &request.grantee))
        .await?;

    info!(module = %module, grantee = %request.grantee, changed = changed, "Grant issued");
    Ok(Json(GrantResponse {
        module: module.to_string(),
        grantee: request.grantee,
        active: true,
        changed,
    }))
}

#[tracing::instrument(skip(state, request))]
pub async fn revoke(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<GrantRequest>,
) -> Result<Json<GrantResponse>, ApiError> {
    request.validate()?;
    let module = parse_module(&request.module)?;

    let changed = state
        .service
        .execute("revoke", |p| p.revoke(caller.as_str(), &module, &request.grantee))
        .await?;

    info!(module = %module, grantee = %request.grantee, changed = changed, "Grant revoked");
    Ok(Json(GrantResponse {
        module: module.to_string(),
        grantee: request.grantee,
        active: false,
        changed,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn create_bucket(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<CreateBucketRequest>,
) -> Result<(StatusCode, Json<BucketResponse>), ApiError> {
    let bucket = state
        .service
        .execute("create_bucket", |p| {
            let bucket_id = p.create_bucket(caller.as_str(), request.rate_per_second)?;
            Ok(BucketResponse::new(p.bucket(bucket_id)?, p.current_chi(bucket_id)?))
        })
        .await?;

    info!(bucket_id = bucket.bucket_id, rate = %bucket.rate_per_second, "Rate bucket created");
    Ok((StatusCode::CREATED, Json(bucket)))
}

#[tracing::instrument(skip(state, request))]
pub async fn set_bounds(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<SetBoundsRequest>,
) -> Result<Json<LoanBounds>, ApiError> {
    request.validate()?;
    let bounds = LoanBounds::from(request);

    let bounds = state
        .service
        .execute("set_bounds", |p| {
            p.set_bounds(caller.as_str(), bounds)?;
            Ok(p.bounds().clone())
        })
        .await?;

    info!(
        min_principal = %bounds.min_principal,
        min_duration_secs = bounds.min_duration_secs,
        "Origination bounds updated"
    );
    Ok(Json(bounds))
}

#[tracing::instrument(skip(state, request))]
pub async fn mint(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<MintRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    request.validate()?;

    let balance = state
        .service
        .execute("mint", |p| p.mint(caller.as_str(), &request.to, request.amount))
        .await?;

    info!(account = %request.to, amount = %request.amount, "Settlement asset minted");
    Ok(Json(BalanceResponse {
        account: request.to,
        balance,
    }))
}
