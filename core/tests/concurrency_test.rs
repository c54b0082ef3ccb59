//! Concurrency properties of the redemption engine.
//!
//! The per-token lock is the sole ordering authority: for one token id at
//! most one success can ever commit, no matter how many terminals scan it
//! at once, while distinct tokens proceed fully in parallel.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Duration;
use farepass_core::error::{EngineError, RejectReason, RepositoryError};
use farepass_core::repository::RedemptionRepository;
use farepass_core::types::{Entitlement, FunctionCode, ScanRequest, ScanResult, TicketCode, TokenId};
use farepass_testing::fixtures::{ScenarioWorld, signed_token};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_scans_of_one_token_yield_one_success() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();
    let (token_id, raw) = world.fresh_token();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        let request = ScanRequest {
            scan_token: raw.clone(),
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        };
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.redeem(request).await
        }));
    }

    let mut successes = 0;
    let mut replays = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        match result.result {
            ScanResult::Success => successes += 1,
            ScanResult::Reject => {
                assert_eq!(result.reason, Some(RejectReason::AlreadyRedeemed));
                replays += 1;
            }
        }
    }
    assert_eq!(successes, 1, "exactly one scan of a token may win");
    assert_eq!(replays, workers - 1);
    assert_eq!(world.repo.success_count_for_token(token_id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_token_cannot_win_two_functions_concurrently() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();
    let (token_id, raw) = world.fresh_token();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for function in ["ferry_boarding", "gift_redemption"] {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        let request = ScanRequest {
            scan_token: raw.clone(),
            function_code: FunctionCode::new(function),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        };
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.redeem(request).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        if result.result == ScanResult::Success {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(world.repo.success_count_for_token(token_id), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_tokens_proceed_independently() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for _ in 0..workers {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        // A fresh rotated token per scan, as the issuing app produces them.
        let request = world.scan("ferry_boarding");
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.redeem(request).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.result, ScanResult::Success);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn counted_balance_of_one_admits_exactly_one_of_two_racers() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();

    let ticket = TicketCode::new("TKT-LAST-USE");
    world.repo.insert_ticket(
        &ticket,
        vec![Entitlement {
            function_code: FunctionCode::new("playground_token"),
            remaining_uses: 1,
        }],
    );

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        let barrier = Arc::clone(&barrier);
        let raw = signed_token(&ticket, TokenId::new(), world.now + Duration::hours(1));
        let request = ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("playground_token"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        };
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.redeem(request).await
        }));
    }

    let mut successes = 0;
    let mut exhausted = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        match result.result {
            ScanResult::Success => successes += 1,
            ScanResult::Reject => {
                assert_eq!(result.reason, Some(RejectReason::NoRemaining));
                exhausted += 1;
            }
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(exhausted, 1);

    // Balance bottomed out at zero, never negative.
    let entitlements = engine.ticket_entitlements(&ticket).await.unwrap().unwrap();
    assert_eq!(entitlements[0].remaining_uses, 0);
}

#[tokio::test]
async fn exhausted_lock_wait_is_an_infrastructure_error() {
    let world = ScenarioWorld::seed();
    let engine = world.engine();
    let (token_id, raw) = world.fresh_token();

    // Hold the token's scan transaction open so the engine cannot take it.
    let _open_tx = world.repo.begin_scan(token_id).await.unwrap();

    // The default in-memory wait is 2s; shrink the race window by scanning
    // while the transaction is parked.
    let scan = tokio::time::timeout(
        StdDuration::from_secs(5),
        engine.redeem(ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new("ferry_boarding"),
            session_code: world.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        }),
    )
    .await
    .unwrap();

    match scan {
        Err(EngineError::Repository(RepositoryError::LockTimeout)) => {}
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    // The blocked scan left no ledger row.
    assert!(world.repo.events_snapshot().is_empty());
}
