//! Function alias resolution and consumption policies.
//!
//! Products sell the same right under different codes (`ferry`,
//! `boarding_pass`, ...). The resolver maps any incoming code to one
//! canonical function, the policy that governs its consumption, and an
//! optional venue restriction. Resolution is a static table lookup decided
//! once per scan, not string comparisons scattered through the engine.

use crate::types::{FunctionCode, VenueCode};
use serde::{Deserialize, Serialize};

/// How redeeming a function consumes the ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionPolicy {
    /// Always permitted; the balance is never read or changed.
    Unlimited,
    /// Permitted iff no prior successful ledger entry exists for
    /// (ticket, function); the ledger itself is the source of truth,
    /// no balance is touched.
    SingleUse,
    /// Permitted iff `remaining_uses > 0`; success decrements the balance.
    Counted,
}

impl ConsumptionPolicy {
    /// Wire string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unlimited => "unlimited",
            Self::SingleUse => "single_use",
            Self::Counted => "counted",
        }
    }
}

/// The outcome of resolving an incoming function code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedFunction {
    /// Canonical function code used for policy, venue, and ledger lookups
    pub canonical: FunctionCode,
    /// Consumption policy for the canonical function
    pub policy: ConsumptionPolicy,
    /// When set, the function is only redeemable at this venue
    pub restricted_venue: Option<VenueCode>,
}

/// One entry of the policy catalog.
#[derive(Clone, Debug)]
pub struct FunctionSpec {
    /// Canonical code
    pub canonical: &'static str,
    /// Product aliases that resolve to the canonical code
    pub aliases: &'static [&'static str],
    /// Consumption policy
    pub policy: ConsumptionPolicy,
    /// Optional venue restriction (venue code)
    pub restricted_venue: Option<&'static str>,
}

/// The built-in catalog.
///
/// Unknown codes are deliberately absent: they fall through to `Counted`
/// so a miss can never silently grant unlimited use.
const DEFAULT_CATALOG: &[FunctionSpec] = &[
    FunctionSpec {
        canonical: "ferry_boarding",
        aliases: &["ferry", "boarding_pass"],
        policy: ConsumptionPolicy::Unlimited,
        restricted_venue: Some("FERRY_PIER"),
    },
    FunctionSpec {
        canonical: "gift_redemption",
        aliases: &["gift", "souvenir_pickup"],
        policy: ConsumptionPolicy::SingleUse,
        restricted_venue: None,
    },
    FunctionSpec {
        canonical: "playground_token",
        aliases: &["playground", "play_token"],
        policy: ConsumptionPolicy::Counted,
        restricted_venue: None,
    },
    FunctionSpec {
        canonical: "attraction_ride",
        aliases: &["ride"],
        policy: ConsumptionPolicy::Counted,
        restricted_venue: None,
    },
];

/// Maps incoming function codes to canonical functions and policies.
#[derive(Clone, Debug)]
pub struct FunctionPolicyResolver {
    catalog: &'static [FunctionSpec],
}

impl FunctionPolicyResolver {
    /// Resolver over the built-in catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            catalog: DEFAULT_CATALOG,
        }
    }

    /// Resolver over a custom catalog (deployment-specific products).
    #[must_use]
    pub const fn with_catalog(catalog: &'static [FunctionSpec]) -> Self {
        Self { catalog }
    }

    /// Resolve an incoming code to its canonical function and policy.
    ///
    /// Codes not present in the catalog resolve to themselves with
    /// [`ConsumptionPolicy::Counted`] and no venue restriction: the
    /// fail-safe default, since a counted function with no matching
    /// balance can never be granted.
    #[must_use]
    pub fn resolve(&self, code: &FunctionCode) -> ResolvedFunction {
        for spec in self.catalog {
            if spec.canonical == code.as_str() || spec.aliases.contains(&code.as_str()) {
                return ResolvedFunction {
                    canonical: FunctionCode::new(spec.canonical),
                    policy: spec.policy,
                    restricted_venue: spec.restricted_venue.map(VenueCode::new),
                };
            }
        }
        ResolvedFunction {
            canonical: code.clone(),
            policy: ConsumptionPolicy::Counted,
            restricted_venue: None,
        }
    }
}

impl Default for FunctionPolicyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_codes_resolve_to_themselves() {
        let resolver = FunctionPolicyResolver::new();
        let resolved = resolver.resolve(&FunctionCode::new("gift_redemption"));
        assert_eq!(resolved.canonical.as_str(), "gift_redemption");
        assert_eq!(resolved.policy, ConsumptionPolicy::SingleUse);
        assert_eq!(resolved.restricted_venue, None);
    }

    #[test]
    fn aliases_collapse_to_the_canonical_code() {
        let resolver = FunctionPolicyResolver::new();
        for alias in ["ferry", "boarding_pass", "ferry_boarding"] {
            let resolved = resolver.resolve(&FunctionCode::new(alias));
            assert_eq!(resolved.canonical.as_str(), "ferry_boarding");
            assert_eq!(resolved.policy, ConsumptionPolicy::Unlimited);
            assert_eq!(
                resolved.restricted_venue,
                Some(VenueCode::new("FERRY_PIER"))
            );
        }
    }

    #[test]
    fn unknown_codes_default_to_counted() {
        let resolver = FunctionPolicyResolver::new();
        let resolved = resolver.resolve(&FunctionCode::new("vip_lounge"));
        assert_eq!(resolved.canonical.as_str(), "vip_lounge");
        assert_eq!(resolved.policy, ConsumptionPolicy::Counted);
        assert_eq!(resolved.restricted_venue, None);
    }

    proptest! {
        #[test]
        fn resolution_is_total_and_never_unlimited_for_unknowns(code in "[a-z_]{1,24}") {
            let resolver = FunctionPolicyResolver::new();
            let resolved = resolver.resolve(&FunctionCode::new(code.as_str()));
            let known = DEFAULT_CATALOG.iter().any(|s| {
                s.canonical == code || s.aliases.contains(&code.as_str())
            });
            if !known {
                prop_assert_eq!(resolved.policy, ConsumptionPolicy::Counted);
                prop_assert_eq!(resolved.canonical.as_str(), code.as_str());
            }
        }
    }
}
