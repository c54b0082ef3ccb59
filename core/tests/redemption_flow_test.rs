//! End-to-end engine behavior against the in-memory store.
//!
//! Covers the full reject taxonomy, the three consumption policies, and
//! the ledger bookkeeping rules (reject rows always, success rows
//! deduplicated).

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Duration;
use farepass_core::error::{EngineError, RejectReason};
use farepass_core::repository::LedgerFilter;
use farepass_core::types::{
    Entitlement, FunctionCode, OperatorId, ScanRequest, ScanResult, Session, SessionCode,
    SessionStatus, TicketCode, TicketStatus, TokenId,
};
use farepass_testing::fixtures::{ScenarioWorld, signed_token};

#[tokio::test]
async fn scenario_walkthrough_matches_the_product_script() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    // Scan #1: ferry boarding at the pier. Unlimited: granted, balance
    // untouched and never reported.
    let result = engine.redeem(world.scan("ferry_boarding")).await.unwrap();
    assert_eq!(result.result, ScanResult::Success);
    assert_eq!(result.reason, None);
    assert_eq!(result.remaining_uses, None);
    assert_eq!(result.ticket_status, TicketStatus::Active);
    assert!(result.performance_metrics.fraud_checks_passed);
    let ferry = result
        .entitlements
        .iter()
        .find(|e| e.function_code == FunctionCode::new("ferry_boarding"))
        .unwrap();
    assert_eq!(ferry.remaining_uses, 1, "unlimited must not touch balances");

    // Scan #2: gift pickup. Single-use: granted exactly once.
    let result = engine.redeem(world.scan("gift_redemption")).await.unwrap();
    assert_eq!(result.result, ScanResult::Success);
    let gift = result
        .entitlements
        .iter()
        .find(|e| e.function_code == FunctionCode::new("gift_redemption"))
        .unwrap();
    assert_eq!(gift.remaining_uses, 1, "single-use must not touch balances");

    // A later scan with a *new* rotated token for the same function is
    // refused by the ledger, not by any balance.
    let result = engine.redeem(world.scan("gift_redemption")).await.unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::AlreadyRedeemed));

    // Scan #3: playground entry with an exhausted balance.
    let result = engine.redeem(world.scan("playground_token")).await.unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::NoRemaining));
    assert_eq!(result.remaining_uses, Some(0));
}

#[tokio::test]
async fn unlimited_functions_never_depend_on_balances() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    for _ in 0..4 {
        let result = engine.redeem(world.scan("ferry_boarding")).await.unwrap();
        assert_eq!(result.result, ScanResult::Success);
        assert_eq!(result.remaining_uses, None);
    }
    let entitlements = engine
        .ticket_entitlements(&world.ticket)
        .await
        .unwrap()
        .unwrap();
    let ferry = entitlements
        .iter()
        .find(|e| e.function_code == FunctionCode::new("ferry_boarding"))
        .unwrap();
    assert_eq!(ferry.remaining_uses, 1);
}

#[tokio::test]
async fn counted_functions_decrement_to_zero_then_refuse() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let ticket = TicketCode::new("TKT-RIDES");
    world.repo.insert_ticket(
        &ticket,
        vec![Entitlement {
            function_code: FunctionCode::new("playground_token"),
            remaining_uses: 1,
        }],
    );
    let scan = |raw: String| ScanRequest {
        scan_token: raw,
        function_code: FunctionCode::new("playground_token"),
        session_code: world.pier_session.clone(),
        terminal_device_id: "GATE-01".to_string(),
    };

    let raw = signed_token(&ticket, TokenId::new(), world.now + Duration::hours(1));
    let result = engine.redeem(scan(raw)).await.unwrap();
    assert_eq!(result.result, ScanResult::Success);
    assert_eq!(result.remaining_uses, Some(0));

    let raw = signed_token(&ticket, TokenId::new(), world.now + Duration::hours(1));
    let result = engine.redeem(scan(raw)).await.unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::NoRemaining));

    // Balance bottomed out at zero, never negative.
    let entitlements = engine.ticket_entitlements(&ticket).await.unwrap().unwrap();
    assert_eq!(entitlements[0].remaining_uses, 0);
}

#[tokio::test]
async fn venue_restricted_function_rejects_elsewhere() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let result = engine
        .redeem(world.scan_at_shop("ferry_boarding"))
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::WrongLocation));

    // The attempt left a reject row and no success anywhere.
    let events = world.repo.events_snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, ScanResult::Reject);
    assert_eq!(events[0].reason, Some(RejectReason::WrongLocation));
}

#[tokio::test]
async fn unsupported_function_is_wrong_function() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    // attraction_ride is a known counted function, but no venue here
    // supports it.
    let result = engine.redeem(world.scan("attraction_ride")).await.unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::WrongFunction));
}

#[tokio::test]
async fn missing_entitlement_is_wrong_function() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let bare_ticket = TicketCode::new("TKT-BARE");
    world.repo.insert_ticket(&bare_ticket, Vec::new());

    let raw = signed_token(&bare_ticket, TokenId::new(), world.now + Duration::hours(1));
    let result = engine
        .redeem(ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("gift_redemption"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::WrongFunction));
    assert_eq!(result.ticket_status, TicketStatus::Active);
}

#[tokio::test]
async fn unknown_ticket_is_ticket_not_found() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let ghost = TicketCode::new("TKT-GHOST");
    let raw = signed_token(&ghost, TokenId::new(), world.now + Duration::hours(1));
    let result = engine
        .redeem(ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("gift_redemption"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::TicketNotFound));
}

#[tokio::test]
async fn one_token_authorizes_at_most_one_function() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let (token_id, raw) = world.fresh_token();
    let result = engine
        .redeem(ScanRequest {
            scan_token: raw.clone(),
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Success);

    // Same token presented again for a *different* function: replay.
    let result = engine
        .redeem(ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("gift_redemption"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::AlreadyRedeemed));
    assert!(!result.performance_metrics.fraud_checks_passed);
    assert_eq!(world.repo.success_count_for_token(token_id), 1);
}

#[tokio::test]
async fn expired_token_logs_a_reject_row() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let raw = signed_token(&world.ticket, TokenId::new(), world.now - Duration::minutes(1));
    let result = engine
        .redeem(ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::TokenExpired));

    let events = world.repo.events_snapshot();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, Some(RejectReason::TokenExpired));
    assert_eq!(events[0].ticket_code, world.ticket);
}

#[tokio::test]
async fn forged_token_rejects_without_ledger_row() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let result = engine
        .redeem(ScanRequest {
            scan_token: "FP1.not-a-payload.not-a-tag".to_string(),
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.result, ScanResult::Reject);
    assert_eq!(result.reason, Some(RejectReason::TokenExpired));
    assert!(world.repo.events_snapshot().is_empty());
}

#[tokio::test]
async fn invalid_session_rejects_are_independently_logged() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let request = || ScanRequest {
        scan_token: world.fresh_token().1,
        function_code: FunctionCode::new("ferry_boarding"),
        session_code: SessionCode::new("SES-NOWHERE"),
        terminal_device_id: "GATE-01".to_string(),
    };

    for _ in 0..2 {
        let result = engine.redeem(request()).await.unwrap();
        assert_eq!(result.result, ScanResult::Reject);
        assert_eq!(result.reason, Some(RejectReason::InvalidSession));
    }
    // Only successes are deduplicated; both rejects are in the ledger.
    assert_eq!(world.repo.events_snapshot().len(), 2);
}

#[tokio::test]
async fn stale_session_is_expired_then_rejected() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let stale = SessionCode::new("SES-STALE");
    world.repo.insert_session(Session {
        code: stale.clone(),
        venue_id: world.pier.id,
        operator_id: OperatorId::new(),
        device_id: "GATE-02".to_string(),
        started_at: world.now - Duration::hours(9),
        duration_secs: 8 * 3600,
        status: SessionStatus::Active,
    });

    let result = engine
        .redeem(ScanRequest {
            scan_token: world.fresh_token().1,
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: stale.clone(),
            terminal_device_id: "GATE-02".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.reason, Some(RejectReason::InvalidSession));

    // The flip persisted and is idempotent under a second scan.
    let snapshot = world.repo.session_snapshot(&stale).unwrap();
    assert_eq!(snapshot.status, SessionStatus::Expired);

    let result = engine
        .redeem(ScanRequest {
            scan_token: world.fresh_token().1,
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: stale,
            terminal_device_id: "GATE-02".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(result.reason, Some(RejectReason::InvalidSession));
}

#[tokio::test]
async fn storage_outage_surfaces_as_error_with_no_ledger_row() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    world.repo.set_unavailable(true);
    let outcome = engine.redeem(world.scan("ferry_boarding")).await;
    assert!(matches!(outcome, Err(EngineError::Repository(_))));

    world.repo.set_unavailable(false);
    assert!(world.repo.events_snapshot().is_empty());
}

#[tokio::test]
async fn ledger_query_pages_newest_first() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    // Three attempts: ferry success, gift success, gift replay reject.
    engine.redeem(world.scan("ferry_boarding")).await.unwrap();
    engine.redeem(world.scan("gift_redemption")).await.unwrap();
    engine.redeem(world.scan("gift_redemption")).await.unwrap();

    let page = engine.query_events(&LedgerFilter::default()).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.events.len(), 3);
    // Newest first: the replay reject is on top.
    assert_eq!(page.events[0].result, ScanResult::Reject);
    assert_eq!(page.events[0].reason, Some(RejectReason::AlreadyRedeemed));

    let successes = engine
        .query_events(&LedgerFilter {
            result: Some(ScanResult::Success),
            ..LedgerFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(successes.total, 2);

    let gifts = engine
        .query_events(&LedgerFilter {
            function_code: Some(FunctionCode::new("gift_redemption")),
            ..LedgerFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(gifts.total, 2);

    let paged = engine
        .query_events(&LedgerFilter {
            limit: Some(1),
            offset: Some(1),
            ..LedgerFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.total, 3);
    assert_eq!(paged.events.len(), 1);
}
