//! Signed-token helpers and a seeded scenario world.
//!
//! The scenario mirrors the shape of a real deployment: a ferry pier and a
//! gift shop, an active operator session at each, and a ticket bundling an
//! unlimited ferry right, a single-use gift pickup, and an exhausted
//! playground balance.

use crate::mocks::{FixedClock, InMemoryRedemptionRepository};
use chrono::{DateTime, Duration, TimeZone, Utc};
use farepass_core::engine::RedemptionEngine;
use farepass_core::token::{HmacTokenVerifier, TokenClaims, sign_token};
use farepass_core::types::{
    Entitlement, FunctionCode, OperatorId, ScanRequest, Session, SessionCode, SessionStatus,
    TicketCode, TokenId, Venue, VenueCode, VenueId,
};
use std::sync::Arc;

/// Shared signing secret for fixture tokens.
pub const TEST_TOKEN_SECRET: &[u8] = b"farepass-fixture-secret";

/// Sign a token in the production container format.
#[must_use]
pub fn signed_token(ticket: &TicketCode, token_id: TokenId, expires_at: DateTime<Utc>) -> String {
    sign_token(
        TEST_TOKEN_SECRET,
        &TokenClaims {
            ticket_code: ticket.clone(),
            token_id,
            expires_at: expires_at.timestamp(),
        },
    )
}

/// A seeded in-memory world for engine tests.
pub struct ScenarioWorld {
    /// The backing store, pre-seeded
    pub repo: Arc<InMemoryRedemptionRepository>,
    /// Deterministic clock, pinned to [`Self::now`]
    pub clock: Arc<FixedClock>,
    /// The instant every fixture is anchored to
    pub now: DateTime<Utc>,
    /// Ferry pier venue (supports all three functions)
    pub pier: Venue,
    /// Gift shop venue (no ferry boarding here)
    pub gift_shop: Venue,
    /// Active session at the pier, device `GATE-01`
    pub pier_session: SessionCode,
    /// Active session at the gift shop, device `SHOP-01`
    pub shop_session: SessionCode,
    /// The scenario ticket
    pub ticket: TicketCode,
}

impl ScenarioWorld {
    /// Seed the world at a fixed instant.
    #[must_use]
    pub fn seed() -> Self {
        // Deterministic anchor; the exact date is irrelevant.
        let now = Utc
            .with_ymd_and_hms(2026, 8, 7, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let repo = Arc::new(InMemoryRedemptionRepository::new());

        let pier = Venue {
            id: VenueId::new(),
            code: VenueCode::new("FERRY_PIER"),
            name: "Harbor Ferry Pier".to_string(),
            supported_functions: vec![
                FunctionCode::new("ferry_boarding"),
                FunctionCode::new("gift_redemption"),
                FunctionCode::new("playground_token"),
            ],
            active: true,
        };
        let gift_shop = Venue {
            id: VenueId::new(),
            code: VenueCode::new("GIFT_SHOP"),
            name: "Harbor Gift Shop".to_string(),
            supported_functions: vec![
                FunctionCode::new("gift_redemption"),
                FunctionCode::new("playground_token"),
            ],
            active: true,
        };
        repo.insert_venue(pier.clone());
        repo.insert_venue(gift_shop.clone());

        let pier_session = SessionCode::new("SES-PIER-01");
        repo.insert_session(Session {
            code: pier_session.clone(),
            venue_id: pier.id,
            operator_id: OperatorId::new(),
            device_id: "GATE-01".to_string(),
            started_at: now - Duration::minutes(5),
            duration_secs: 8 * 3600,
            status: SessionStatus::Active,
        });
        let shop_session = SessionCode::new("SES-SHOP-01");
        repo.insert_session(Session {
            code: shop_session.clone(),
            venue_id: gift_shop.id,
            operator_id: OperatorId::new(),
            device_id: "SHOP-01".to_string(),
            started_at: now - Duration::minutes(5),
            duration_secs: 8 * 3600,
            status: SessionStatus::Active,
        });

        let ticket = TicketCode::new("TKT-0001");
        repo.insert_ticket(
            &ticket,
            vec![
                Entitlement {
                    function_code: FunctionCode::new("ferry_boarding"),
                    remaining_uses: 1,
                },
                Entitlement {
                    function_code: FunctionCode::new("gift_redemption"),
                    remaining_uses: 1,
                },
                Entitlement {
                    function_code: FunctionCode::new("playground_token"),
                    remaining_uses: 0,
                },
            ],
        );

        Self {
            clock: Arc::new(FixedClock::at(now)),
            repo,
            now,
            pier,
            gift_shop,
            pier_session,
            shop_session,
            ticket,
        }
    }

    /// Engine wired to this world's store, secret, and clock.
    #[must_use]
    pub fn engine(&self) -> RedemptionEngine {
        RedemptionEngine::new(
            Arc::clone(&self.repo) as Arc<dyn farepass_core::repository::RedemptionRepository>,
            Arc::new(HmacTokenVerifier::new(TEST_TOKEN_SECRET)),
        )
        .with_clock(Arc::clone(&self.clock) as Arc<dyn farepass_core::clock::Clock>)
    }

    /// A fresh rotated token for the scenario ticket, valid for an hour.
    #[must_use]
    pub fn fresh_token(&self) -> (TokenId, String) {
        let token_id = TokenId::new();
        let raw = signed_token(&self.ticket, token_id, self.now + Duration::hours(1));
        (token_id, raw)
    }

    /// A scan request at the pier session using a fresh token.
    #[must_use]
    pub fn scan(&self, function: &str) -> ScanRequest {
        let (_, raw) = self.fresh_token();
        ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new(function),
            session_code: self.pier_session.clone(),
            terminal_device_id: "GATE-01".to_string(),
        }
    }

    /// A scan request at the gift shop session using a fresh token.
    #[must_use]
    pub fn scan_at_shop(&self, function: &str) -> ScanRequest {
        let (_, raw) = self.fresh_token();
        ScanRequest {
            scan_token: raw,
            function_code: FunctionCode::new(function),
            session_code: self.shop_session.clone(),
            terminal_device_id: "SHOP-01".to_string(),
        }
    }
}
