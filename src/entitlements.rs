//! The subscription and credit gate checked before admission.
//!
//! Plan management and billing live elsewhere; the orchestrator only asks a
//! pass/fail question at submit time. There is no reservation protocol: a
//! job that passes the gate is charged the cost computed at admission.

use thiserror::Error;

/// Why a generation request was not permitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionDenied {
    #[error("no active subscription")]
    NoSubscription,
    #[error("generation is not available on the current plan")]
    GenerationDisabled,
    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },
}

/// The caller's subscription and credit standing.
pub trait Entitlements: Send + Sync {
    fn has_active_subscription(&self) -> bool;

    fn can_generate(&self) -> bool;

    /// Credits remaining on the caller's plan.
    fn available_credits(&self) -> u32;

    /// The admission gate: all checks combined, cheapest first.
    fn check(&self, required_credits: u32) -> Result<(), PermissionDenied> {
        if !self.has_active_subscription() {
            return Err(PermissionDenied::NoSubscription);
        }
        if !self.can_generate() {
            return Err(PermissionDenied::GenerationDisabled);
        }
        let available = self.available_credits();
        if available < required_credits {
            return Err(PermissionDenied::InsufficientCredits {
                required: required_credits,
                available,
            });
        }
        Ok(())
    }
}

/// Fixed entitlements, for tests and single-tenant setups.
#[derive(Debug, Clone)]
pub struct StaticEntitlements {
    subscription: bool,
    can_generate: bool,
    credits: u32,
}

impl StaticEntitlements {
    /// An active subscription with the given credit balance.
    pub fn subscribed(credits: u32) -> Self {
        Self {
            subscription: true,
            can_generate: true,
            credits,
        }
    }

    /// No subscription at all.
    pub fn unsubscribed() -> Self {
        Self {
            subscription: false,
            can_generate: false,
            credits: 0,
        }
    }

    pub fn with_generation_disabled(self) -> Self {
        Self {
            can_generate: false,
            ..self
        }
    }
}

impl Entitlements for StaticEntitlements {
    fn has_active_subscription(&self) -> bool {
        self.subscription
    }

    fn can_generate(&self) -> bool {
        self.can_generate
    }

    fn available_credits(&self) -> u32 {
        self.credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn subscription_is_checked_first() {
        assert_matches!(
            StaticEntitlements::unsubscribed().check(10),
            Err(PermissionDenied::NoSubscription)
        );
    }

    #[test]
    fn disabled_generation_is_rejected() {
        let entitlements = StaticEntitlements::subscribed(100).with_generation_disabled();

        assert_matches!(
            entitlements.check(10),
            Err(PermissionDenied::GenerationDisabled)
        );
    }

    #[test]
    fn credit_balance_must_cover_the_cost() {
        let entitlements = StaticEntitlements::subscribed(5);

        assert_matches!(
            entitlements.check(10),
            Err(PermissionDenied::InsufficientCredits {
                required: 10,
                available: 5
            })
        );
        entitlements.check(5).unwrap();
    }
}
