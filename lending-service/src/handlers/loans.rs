use crate::dtos::{
    DebtResponse, LoanResponse, NextLoanIdResponse, RepayRequest, RequestLoanRequest,
    RequestedLoansResponse,
};
use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::models::LoanId;
use crate::services::record_loan_transition;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use validator::Validate;

/// Open a loan request on behalf of the caller.
#[tracing::instrument(skip(state, request))]
pub async fn request_loan(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<RequestLoanRequest>,
) -> Result<(StatusCode, Json<LoanResponse>), ApiError> {
    request.validate()?;
    let duration_secs = request.duration_secs();

    let loan = state
        .service
        .execute("request_loan", |p| {
            let loan_id = p.request_loan(
                caller.as_str(),
                request.principal,
                duration_secs,
                request.bucket_id,
            )?;
            p.loan(loan_id).map(LoanResponse::from)
        })
        .await?;

    record_loan_transition("requested");
    info!(
        loan_id = loan.loan_id,
        borrower = %loan.borrower,
        principal = %loan.principal,
        bucket_id = loan.bucket_id,
        "Loan requested"
    );
    Ok((StatusCode::CREATED, Json(loan)))
}

pub async fn list_requested(
    State(state): State<AppState>,
) -> Result<Json<RequestedLoansResponse>, ApiError> {
    let loan_ids = state
        .service
        .read(|p| Ok(p.list_requested_loans().collect::<Vec<_>>()))
        .await?;
    Ok(Json(RequestedLoansResponse { loan_ids }))
}

pub async fn next_loan_id(
    State(state): State<AppState>,
) -> Result<Json<NextLoanIdResponse>, ApiError> {
    let next_loan_id = state.service.read(|p| Ok(p.next_loan_id())).await?;
    Ok(Json(NextLoanIdResponse { next_loan_id }))
}

pub async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<LoanId>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .service
        .read(|p| p.loan(loan_id).map(LoanResponse::from))
        .await?;
    Ok(Json(loan))
}

/// Current debt. Drips the loan's bucket, so this goes through the write path.
pub async fn get_debt(
    State(state): State<AppState>,
    Path(loan_id): Path<LoanId>,
) -> Result<Json<DebtResponse>, ApiError> {
    let response = state
        .service
        .execute("debt_of", |p| {
            let debt = p.debt_of(loan_id)?;
            Ok(DebtResponse {
                loan_id,
                status: p.loan(loan_id)?.status,
                debt,
            })
        })
        .await?;
    Ok(Json(response))
}

/// Fund a loan directly from the caller's own asset balance.
#[tracing::instrument(skip(state))]
pub async fn fund_loan(
    State(state): State<AppState>,
    caller: CallerId,
    Path(loan_id): Path<LoanId>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .service
        .execute("fund_loan", |p| {
            p.fund_loan(caller.as_str(), loan_id).map(LoanResponse::from)
        })
        .await?;

    record_loan_transition("funded");
    info!(loan_id = loan_id, funder = %caller.as_str(), "Loan funded");
    Ok(Json(loan))
}

#[tracing::instrument(skip(state))]
pub async fn repay(
    State(state): State<AppState>,
    caller: CallerId,
    Path(loan_id): Path<LoanId>,
    Json(request): Json<RepayRequest>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .service
        .execute("repay", |p| {
            p.repay(caller.as_str(), loan_id, request.amount)
                .map(LoanResponse::from)
        })
        .await?;

    record_loan_transition("repaid");
    info!(loan_id = loan_id, amount = %request.amount, "Loan repaid");
    Ok(Json(loan))
}

#[tracing::instrument(skip(state))]
pub async fn mark_default(
    State(state): State<AppState>,
    caller: CallerId,
    Path(loan_id): Path<LoanId>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan = state
        .service
        .execute("mark_default", |p| {
            p.mark_default(caller.as_str(), loan_id)
                .map(LoanResponse::from)
        })
        .await?;

    record_loan_transition("defaulted");
    info!(loan_id = loan_id, "Loan marked defaulted");
    Ok(Json(loan))
}
