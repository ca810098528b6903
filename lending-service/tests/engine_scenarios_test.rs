//! End-to-end engine scenarios driven on a manual clock.

mod common;

use common::{dec, deploy, ADMIN};
use lending_service::engine::{AutoInvestOutcome, LendingError, ModuleId};
use lending_service::models::{LoanStatus, PolicyConfig};
use rust_decimal::Decimal;

// =============================================================================
// Interest accrual
// =============================================================================

#[test]
fn compounding_loan_repays_exact_debt() {
    let (mut engine, clock) = deploy();
    let bucket = engine.create_bucket(ADMIN, dec("1.0000001")).unwrap();
    engine.grant(ADMIN, &ModuleId::Origination, "lender").unwrap();
    engine.mint(ADMIN, "lender", dec("1000000")).unwrap();

    let loan_id = engine
        .request_loan("borrower", dec("1000000"), 200_000, bucket)
        .unwrap();
    engine.fund_loan("lender", loan_id).unwrap();
    assert_eq!(engine.loan(loan_id).unwrap().chi_at_draw, Some(Decimal::ONE));
    assert_eq!(engine.debt_of(loan_id).unwrap(), Some(dec("1000000")));

    clock.advance(100_000);
    // 1_000_000 * 1.0000001^100_000 = 1_010_050.16...
    let debt = engine.debt_of(loan_id).unwrap().unwrap();
    assert_eq!(debt, dec("1010050"));

    engine.mint(ADMIN, "borrower", dec("10050")).unwrap();
    let short = engine.repay("borrower", loan_id, debt - Decimal::ONE);
    assert!(matches!(
        short,
        Err(LendingError::InsufficientRepayment { .. })
    ));
    assert_eq!(engine.loan(loan_id).unwrap().status, LoanStatus::Funded);

    let loan = engine.repay("borrower", loan_id, debt).unwrap();
    assert_eq!(loan.status, LoanStatus::Repaid);
    assert_eq!(loan.repaid_amount, Some(debt));
    assert_eq!(engine.balance_of("lender"), debt);
    assert_eq!(engine.balance_of("borrower"), Decimal::ZERO);
}

#[test]
fn chi_never_decreases_and_same_second_drips_agree() {
    let (mut engine, clock) = deploy();
    let bucket = engine.create_bucket(ADMIN, dec("1.000000005")).unwrap();

    let mut last = engine.drip(bucket).unwrap();
    for step in [0, 1, 0, 59, 3_600, 0, 86_400] {
        clock.advance(step);
        let once = engine.drip(bucket).unwrap();
        let twice = engine.drip(bucket).unwrap();
        assert_eq!(once, twice);
        assert!(once >= last);
        last = once;
    }
}

#[test]
fn debt_grows_while_funded() {
    let (mut engine, clock) = deploy();
    let bucket = engine.create_bucket(ADMIN, dec("1.00000001")).unwrap();
    engine.grant(ADMIN, &ModuleId::Origination, "lender").unwrap();
    engine.mint(ADMIN, "lender", dec("5000000")).unwrap();
    let loan_id = engine
        .request_loan("borrower", dec("5000000"), 10 * 86_400, bucket)
        .unwrap();
    engine.fund_loan("lender", loan_id).unwrap();

    let mut previous = engine.debt_of(loan_id).unwrap().unwrap();
    assert_eq!(previous, dec("5000000"));
    for _ in 0..5 {
        clock.advance(86_400);
        let debt = engine.debt_of(loan_id).unwrap().unwrap();
        assert!(debt > previous);
        previous = debt;
    }
}

// =============================================================================
// Authorization
// =============================================================================

#[test]
fn revoked_funder_is_unauthorized() {
    let (mut engine, _clock) = deploy();
    let bucket = engine.create_bucket(ADMIN, Decimal::ONE).unwrap();
    engine.grant(ADMIN, &ModuleId::Origination, "lender").unwrap();
    engine.mint(ADMIN, "lender", dec("100")).unwrap();
    let loan_id = engine.request_loan("borrower", dec("100"), 60, bucket).unwrap();

    assert!(engine.revoke(ADMIN, &ModuleId::Origination, "lender").unwrap());
    let result = engine.fund_loan("lender", loan_id);
    assert!(matches!(result, Err(LendingError::Unauthorized { .. })));
    assert_eq!(engine.balance_of("lender"), dec("100"));
    assert_eq!(engine.loan(loan_id).unwrap().status, LoanStatus::Requested);
}

#[test]
fn administrators_chain_and_the_last_one_cannot_leave() {
    let (mut engine, _clock) = deploy();
    let pile = ModuleId::Pile;

    engine.grant(ADMIN, &pile, "ops").unwrap();
    engine.grant("ops", &pile, "ops2").unwrap();
    engine.revoke("ops", &pile, ADMIN).unwrap();
    engine.revoke("ops2", &pile, "ops").unwrap();
    // the registry's own grant keeps the module administered
    engine.revoke("ops2", &pile, "origination").unwrap();

    let orphan = engine.revoke("ops2", &pile, "ops2");
    assert!(matches!(orphan, Err(LendingError::WouldOrphanModule { .. })));
    assert!(engine.is_permitted(&pile, "ops2").unwrap());
    assert!(!engine.is_permitted(&pile, ADMIN).unwrap());

    let denied = engine.create_bucket(ADMIN, Decimal::ONE);
    assert!(matches!(denied, Err(LendingError::Unauthorized { .. })));
}

// =============================================================================
// Funding races
// =============================================================================

#[test]
fn only_the_first_funder_wins() {
    let (mut engine, _clock) = deploy();
    let bucket = engine.create_bucket(ADMIN, Decimal::ONE).unwrap();
    for funder in ["first", "second"] {
        engine.grant(ADMIN, &ModuleId::Origination, funder).unwrap();
        engine.mint(ADMIN, funder, dec("250")).unwrap();
    }
    let loan_id = engine.request_loan("borrower", dec("250"), 60, bucket).unwrap();

    engine.fund_loan("first", loan_id).unwrap();
    let lost = engine.fund_loan("second", loan_id);
    assert!(matches!(lost, Err(LendingError::InvalidState { .. })));

    assert_eq!(engine.balance_of("second"), dec("250"));
    assert_eq!(engine.balance_of("borrower"), dec("250"));
    assert_eq!(
        engine.loan(loan_id).unwrap().funded_by.as_deref(),
        Some("first")
    );
}

// =============================================================================
// Funds
// =============================================================================

fn funded_pool(engine: &mut lending_service::engine::Protocol) {
    engine.create_bucket(ADMIN, Decimal::ONE).unwrap();
    engine
        .create_fund(ADMIN, "POOL", PolicyConfig::WhitelistAll)
        .unwrap();
    engine
        .grant(ADMIN, &ModuleId::Origination, "fund:POOL")
        .unwrap();
}

#[test]
fn deposits_mint_shares_at_the_current_price() {
    let (mut engine, _clock) = deploy();
    funded_pool(&mut engine);
    engine.mint(ADMIN, "alice", dec("150")).unwrap();

    assert_eq!(engine.deposit("alice", "POOL", dec("100")).unwrap(), dec("100"));
    assert_eq!(engine.deposit("alice", "POOL", dec("50")).unwrap(), dec("50"));

    let state = engine.fund("POOL").unwrap().state();
    assert_eq!(state.total_assets, dec("150"));
    assert_eq!(state.total_shares, dec("150"));
    assert_eq!(engine.balance_of("fund:POOL"), dec("150"));
}

#[test]
fn deposit_then_withdraw_returns_the_deposit() {
    let (mut engine, _clock) = deploy();
    funded_pool(&mut engine);
    engine.mint(ADMIN, "alice", dec("300")).unwrap();
    engine.mint(ADMIN, "carol", dec("77")).unwrap();
    engine.deposit("alice", "POOL", dec("300")).unwrap();

    let shares = engine.deposit("carol", "POOL", dec("77")).unwrap();
    let payout = engine.withdraw("carol", "POOL", shares).unwrap();
    assert_eq!(payout, dec("77"));
    assert_eq!(engine.balance_of("carol"), dec("77"));

    let over = engine.withdraw("carol", "POOL", Decimal::ONE);
    assert!(matches!(over, Err(LendingError::InsufficientShares { .. })));
}

#[test]
fn fund_account_cannot_inflate_its_own_books() {
    let (mut engine, _clock) = deploy();
    funded_pool(&mut engine);
    engine.mint(ADMIN, "alice", dec("100")).unwrap();
    engine.deposit("alice", "POOL", dec("100")).unwrap();

    let self_deposit = engine.deposit("fund:POOL", "POOL", dec("100"));
    assert!(matches!(self_deposit, Err(LendingError::ReservedAccount(_))));
    let self_loan = engine.request_loan("fund:POOL", dec("50"), 60, 1);
    assert!(matches!(self_loan, Err(LendingError::ReservedAccount(_))));

    let state = engine.fund("POOL").unwrap().state();
    assert_eq!(state.total_assets, dec("100"));
    assert_eq!(state.free_cash, engine.balance_of("fund:POOL"));
    assert!(engine.check_invariants());

    let payout = engine.withdraw("alice", "POOL", dec("100")).unwrap();
    assert_eq!(payout, dec("100"));
}

#[test]
fn auto_invest_then_default_books_the_loss() {
    let (mut engine, clock) = deploy();
    funded_pool(&mut engine);
    engine.mint(ADMIN, "alice", dec("1000")).unwrap();
    engine.deposit("alice", "POOL", dec("1000")).unwrap();
    let loan_id = engine.request_loan("bob", dec("400"), 3_600, 1).unwrap();

    let outcome = engine.auto_invest("POOL").unwrap();
    assert_eq!(outcome, AutoInvestOutcome::Funded { loan_id });
    assert_eq!(engine.auto_invest("POOL").unwrap(), AutoInvestOutcome::Idle);
    assert!(engine.check_invariants());

    let early = engine.mark_default(ADMIN, loan_id);
    assert!(matches!(early, Err(LendingError::InvalidState { .. })));

    clock.advance(3_601);
    engine.mark_default(ADMIN, loan_id).unwrap();
    let settlement = engine.settle("POOL", loan_id).unwrap();
    assert_eq!(settlement.realized, dec("-400"));

    let state = engine.fund("POOL").unwrap().state();
    assert_eq!(state.total_assets, dec("600"));
    assert_eq!(state.free_cash, dec("600"));
    assert_eq!(state.held_count, 0);
    assert!(engine.check_invariants());

    // remaining shares are now worth 0.6 each
    let payout = engine.withdraw("alice", "POOL", dec("500")).unwrap();
    assert_eq!(payout, dec("300"));
}

#[test]
fn repayment_returns_interest_to_the_pool() {
    let (mut engine, clock) = deploy();
    engine.create_bucket(ADMIN, dec("1.0000001")).unwrap();
    engine
        .create_fund(ADMIN, "POOL", PolicyConfig::WhitelistAll)
        .unwrap();
    engine
        .grant(ADMIN, &ModuleId::Origination, "fund:POOL")
        .unwrap();
    engine.mint(ADMIN, "alice", dec("1000000")).unwrap();
    engine.deposit("alice", "POOL", dec("1000000")).unwrap();
    let loan_id = engine
        .request_loan("bob", dec("1000000"), 200_000, 1)
        .unwrap();
    engine.invest("POOL", loan_id).unwrap();

    clock.advance(100_000);
    let debt = engine.debt_of(loan_id).unwrap().unwrap();
    engine.mint(ADMIN, "bob", debt - dec("1000000")).unwrap();
    engine.repay("bob", loan_id, debt).unwrap();

    let settled = engine.sweep("POOL").unwrap();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].realized, debt - dec("1000000"));

    let state = engine.fund("POOL").unwrap().state();
    assert_eq!(state.total_assets, debt);
    assert_eq!(state.free_cash, debt);
    assert_eq!(engine.balance_of("fund:POOL"), debt);
    assert!(engine.check_invariants());
}

#[test]
fn concentration_policy_declines_oversized_requests() {
    let (mut engine, _clock) = deploy();
    engine.create_bucket(ADMIN, Decimal::ONE).unwrap();
    engine
        .create_fund(
            ADMIN,
            "SAFE",
            PolicyConfig::ConcentrationLimit {
                max_share: dec("0.25"),
            },
        )
        .unwrap();
    engine
        .grant(ADMIN, &ModuleId::Origination, "fund:SAFE")
        .unwrap();
    engine.mint(ADMIN, "alice", dec("1000")).unwrap();
    engine.deposit("alice", "SAFE", dec("1000")).unwrap();

    let big = engine.request_loan("bob", dec("400"), 60, 1).unwrap();
    let small = engine.request_loan("carol", dec("200"), 60, 1).unwrap();
    assert!(!engine.consider_request("SAFE", big).unwrap());
    assert!(engine.consider_request("SAFE", small).unwrap());

    assert_eq!(
        engine.auto_invest("SAFE").unwrap(),
        AutoInvestOutcome::Declined { loan_id: big }
    );
    assert_eq!(
        engine.auto_invest("SAFE").unwrap(),
        AutoInvestOutcome::Funded { loan_id: small }
    );
    assert_eq!(engine.loan(big).unwrap().status, LoanStatus::Requested);
}
