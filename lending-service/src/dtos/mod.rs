pub mod admin;
pub mod funds;
pub mod loans;

pub use admin::{
    BalanceResponse, BucketResponse, CreateBucketRequest, GrantRequest, GrantResponse,
    MintRequest, SetBoundsRequest,
};
pub use funds::{
    ConsiderResponse, CreateFundRequest, DepositRequest, DepositResponse, FundResponse,
    InvestResponse, SetPolicyRequest, WithdrawRequest, WithdrawResponse,
};
pub use loans::{
    DebtResponse, LoanResponse, NextLoanIdResponse, RepayRequest, RequestLoanRequest,
    RequestedLoansResponse,
};
