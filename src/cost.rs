//! Deterministic credit pricing for generation requests.
//!
//! The cost of a generation is a pure function of its settings: a configured
//! base price scaled by per-setting multipliers, with a flat surcharge when
//! upscaling is enabled. The same settings always price to the same
//! [`GenerationCost`], so the UI can quote speculatively while the
//! orchestrator charges the authoritative amount at admission.
//!
//! # Example
//!
//! ```
//! use vidgen::cost::CostConfig;
//! use vidgen::job::settings::GenerationSettings;
//!
//! let cost = CostConfig::new().compute(&GenerationSettings::default());
//!
//! assert_eq!(cost.total_credits, 10);
//! ```

use serde::{Deserialize, Serialize};

use crate::job::settings::GenerationSettings;

/// The price of one generation, broken down into its factors.
///
/// A value object: computed once at admission and never recomputed for that
/// job, even if the configured prices later change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationCost {
    pub base_credits: u32,
    pub resolution_multiplier: f64,
    pub duration_multiplier: f64,
    pub quality_multiplier: f64,
    pub total_credits: u32,
    pub usd_cost: f64,
}

/// Pricing configuration for [`GenerationCost`] computation.
///
/// All of the constructors and configuration functions are `const`.
///
/// # Example
///
/// ```
/// use vidgen::cost::CostConfig;
/// use vidgen::job::settings::{GenerationSettings, Quality, Resolution};
///
/// let config = CostConfig::new().with_base_credits(20);
/// let settings = GenerationSettings {
///     resolution: Resolution::Sd480,
///     quality: Quality::Draft,
///     ..Default::default()
/// };
///
/// // 20 x 0.5 x 1.0 x 0.5 = 5
/// assert_eq!(config.compute(&settings).total_credits, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostConfig {
    base_credits: u32,
    credit_unit_price: f64,
    upscaling_surcharge: f64,
}

impl CostConfig {
    /// Creates the reference pricing: 10 base credits, $0.05 per credit, and
    /// a 50% surcharge for upscaling.
    pub const fn new() -> Self {
        Self {
            base_credits: 10,
            credit_unit_price: 0.05,
            upscaling_surcharge: 0.5,
        }
    }

    pub const fn with_base_credits(self, base_credits: u32) -> Self {
        Self {
            base_credits,
            ..self
        }
    }

    pub const fn with_credit_unit_price(self, credit_unit_price: f64) -> Self {
        Self {
            credit_unit_price,
            ..self
        }
    }

    pub const fn with_upscaling_surcharge(self, upscaling_surcharge: f64) -> Self {
        Self {
            upscaling_surcharge,
            ..self
        }
    }

    /// Prices the given settings.
    ///
    /// `total_credits` is the product of the base price and the
    /// resolution/duration/quality multipliers, plus the upscaling surcharge
    /// when enabled, rounded up to a whole credit.
    pub fn compute(&self, settings: &GenerationSettings) -> GenerationCost {
        let resolution_multiplier = settings.resolution.cost_multiplier();
        let duration_multiplier = duration_multiplier(settings.duration_seconds);
        let quality_multiplier = settings.quality.cost_multiplier();

        let mut raw = self.base_credits as f64
            * resolution_multiplier
            * duration_multiplier
            * quality_multiplier;
        if settings.enable_upscaling {
            raw *= 1.0 + self.upscaling_surcharge;
        }
        let total_credits = raw.ceil() as u32;

        GenerationCost {
            base_credits: self.base_credits,
            resolution_multiplier,
            duration_multiplier,
            quality_multiplier,
            total_credits,
            usd_cost: total_credits as f64 * self.credit_unit_price,
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_multiplier(duration_seconds: u8) -> f64 {
    match duration_seconds {
        5 => 0.5,
        10 => 1.0,
        30 => 2.5,
        // Unsupported durations never pass admission validation; price them
        // linearly against the 10s reference so speculative quotes stay sane.
        other => other as f64 / 10.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::settings::{Quality, Resolution};

    #[test]
    fn default_settings_price_to_ten_credits() {
        let cost = CostConfig::new().compute(&GenerationSettings::default());

        assert_eq!(cost.base_credits, 10);
        assert_eq!(cost.resolution_multiplier, 1.0);
        assert_eq!(cost.duration_multiplier, 1.0);
        assert_eq!(cost.quality_multiplier, 1.0);
        assert_eq!(cost.total_credits, 10);
        assert_eq!(cost.usd_cost, 0.5);
    }

    #[test]
    fn computation_is_deterministic() {
        let config = CostConfig::new();
        let settings = GenerationSettings {
            resolution: Resolution::Uhd2160,
            duration_seconds: 30,
            quality: Quality::High,
            enable_upscaling: true,
            ..Default::default()
        };

        assert_eq!(config.compute(&settings), config.compute(&settings));
    }

    #[test]
    fn total_is_product_of_multipliers() {
        let settings = GenerationSettings {
            resolution: Resolution::Hd1080,
            duration_seconds: 30,
            quality: Quality::High,
            ..Default::default()
        };

        // 10 x 1.5 x 2.5 x 1.5 = 56.25, rounded up.
        assert_eq!(CostConfig::new().compute(&settings).total_credits, 57);
    }

    #[test]
    fn upscaling_adds_half_again() {
        let settings = GenerationSettings {
            enable_upscaling: true,
            ..Default::default()
        };

        assert_eq!(CostConfig::new().compute(&settings).total_credits, 15);
    }

    #[test]
    fn fractional_credits_round_up() {
        let settings = GenerationSettings {
            resolution: Resolution::Sd480,
            duration_seconds: 5,
            quality: Quality::Draft,
            ..Default::default()
        };

        // 10 x 0.5 x 0.5 x 0.5 = 1.25, rounded up.
        assert_eq!(CostConfig::new().compute(&settings).total_credits, 2);
    }
}
