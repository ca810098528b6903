use crate::dtos::{
    ConsiderResponse, CreateFundRequest, DepositRequest, DepositResponse, FundResponse,
    InvestResponse, SetPolicyRequest, WithdrawRequest, WithdrawResponse,
};
use crate::engine::{AutoInvestOutcome, Settlement};
use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::models::LoanId;
use crate::services::{record_fund_operation, record_loan_transition};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use validator::Validate;

#[tracing::instrument(skip(state, request))]
pub async fn create_fund(
    State(state): State<AppState>,
    caller: CallerId,
    Json(request): Json<CreateFundRequest>,
) -> Result<(StatusCode, Json<FundResponse>), ApiError> {
    request.validate()?;

    let fund = state
        .service
        .execute("create_fund", |p| {
            p.create_fund(caller.as_str(), &request.symbol, request.policy)?;
            p.fund(&request.symbol).map(FundResponse::from)
        })
        .await?;

    record_fund_operation("create", "ok");
    info!(fund = %fund.symbol, admin = %caller.as_str(), "Fund created");
    Ok((StatusCode::CREATED, Json(fund)))
}

pub async fn list_funds(State(state): State<AppState>) -> Result<Json<Vec<FundResponse>>, ApiError> {
    let funds = state
        .service
        .read(|p| Ok(p.funds().map(FundResponse::from).collect()))
        .await?;
    Ok(Json(funds))
}

pub async fn get_fund(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<FundResponse>, ApiError> {
    let fund = state
        .service
        .read(|p| p.fund(&symbol).map(FundResponse::from))
        .await?;
    Ok(Json(fund))
}

#[tracing::instrument(skip(state, request))]
pub async fn set_policy(
    State(state): State<AppState>,
    caller: CallerId,
    Path(symbol): Path<String>,
    Json(request): Json<SetPolicyRequest>,
) -> Result<Json<FundResponse>, ApiError> {
    let fund = state
        .service
        .execute("set_policy", |p| {
            p.set_policy(caller.as_str(), &symbol, request.policy)?;
            p.fund(&symbol).map(FundResponse::from)
        })
        .await?;

    record_fund_operation("set_policy", "ok");
    info!(fund = %symbol, "Delegate policy replaced");
    Ok(Json(fund))
}

#[tracing::instrument(skip(state))]
pub async fn deposit(
    State(state): State<AppState>,
    caller: CallerId,
    Path(symbol): Path<String>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<DepositResponse>, ApiError> {
    let (shares_minted, shares_held) = state
        .service
        .execute("deposit", |p| {
            let minted = p.deposit(caller.as_str(), &symbol, request.amount)?;
            Ok((minted, p.fund(&symbol)?.shares_of(caller.as_str())))
        })
        .await?;

    record_fund_operation("deposit", "ok");
    info!(fund = %symbol, amount = %request.amount, shares = %shares_minted, "Deposit accepted");
    Ok(Json(DepositResponse {
        symbol,
        depositor: caller.0,
        shares_minted,
        shares_held,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn withdraw(
    State(state): State<AppState>,
    caller: CallerId,
    Path(symbol): Path<String>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let (payout, shares_held) = state
        .service
        .execute("withdraw", |p| {
            let payout = p.withdraw(caller.as_str(), &symbol, request.shares)?;
            Ok((payout, p.fund(&symbol)?.shares_of(caller.as_str())))
        })
        .await?;

    record_fund_operation("withdraw", "ok");
    info!(fund = %symbol, shares = %request.shares, payout = %payout, "Withdrawal paid");
    Ok(Json(WithdrawResponse {
        symbol,
        depositor: caller.0,
        payout,
        shares_held,
    }))
}

pub async fn consider(
    State(state): State<AppState>,
    Path((symbol, loan_id)): Path<(String, LoanId)>,
) -> Result<Json<ConsiderResponse>, ApiError> {
    let approved = state
        .service
        .read(|p| p.consider_request(&symbol, loan_id))
        .await?;
    Ok(Json(ConsiderResponse {
        symbol,
        loan_id,
        approved,
    }))
}

/// Fund a specific loan from the fund's free cash.
#[tracing::instrument(skip(state))]
pub async fn invest(
    State(state): State<AppState>,
    Path((symbol, loan_id)): Path<(String, LoanId)>,
) -> Result<Json<InvestResponse>, ApiError> {
    let principal = state
        .service
        .execute("invest", |p| p.invest(&symbol, loan_id))
        .await?;

    record_fund_operation("invest", "funded");
    record_loan_transition("funded");
    info!(fund = %symbol, loan_id = loan_id, principal = %principal, "Fund invested in loan");
    Ok(Json(InvestResponse {
        symbol,
        loan_id,
        principal,
    }))
}

/// Run a single auto-invest step for the fund.
#[tracing::instrument(skip(state))]
pub async fn auto_invest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<AutoInvestOutcome>, ApiError> {
    let outcome = state
        .service
        .execute("auto_invest", |p| p.auto_invest(&symbol))
        .await?;

    let label = match &outcome {
        AutoInvestOutcome::Idle => "idle",
        AutoInvestOutcome::Funded { .. } => {
            record_loan_transition("funded");
            "funded"
        }
        AutoInvestOutcome::Declined { .. } => "declined",
        AutoInvestOutcome::Skipped { .. } => "skipped",
    };
    record_fund_operation("auto_invest", label);
    info!(fund = %symbol, outcome = label, "Auto-invest step");
    Ok(Json(outcome))
}

#[tracing::instrument(skip(state))]
pub async fn settle(
    State(state): State<AppState>,
    Path((symbol, loan_id)): Path<(String, LoanId)>,
) -> Result<Json<Settlement>, ApiError> {
    let settlement = state
        .service
        .execute("settle", |p| p.settle(&symbol, loan_id))
        .await?;

    record_fund_operation("settle", settlement.status.as_str());
    info!(
        fund = %symbol,
        loan_id = loan_id,
        realized = %settlement.realized,
        "Held loan settled"
    );
    Ok(Json(settlement))
}
