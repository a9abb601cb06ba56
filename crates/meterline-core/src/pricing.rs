//! Token cost calculation for meterline.
//!
//! Usage is converted into credits in two steps. The output token count is
//! scaled by a fixed input:output [`TokenRatio`] into a base cost, then the
//! sum of all active profit margins is added on top. Both steps round up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::usage::{CostBreakdown, TokenUsage};
use crate::BillingError;

/// Basis points in 100%.
pub const BASIS_POINTS_PER_WHOLE: u64 = 10_000;

/// Input:output token ratio, e.g. `1:4`.
///
/// One credit of base cost is charged per `output / input` output tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRatio {
    /// Input side of the ratio.
    pub input: u32,
    /// Output side of the ratio.
    pub output: u32,
}

impl TokenRatio {
    /// Create a ratio.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::Configuration`] if either side is zero.
    pub fn new(input: u32, output: u32) -> crate::Result<Self> {
        if input == 0 || output == 0 {
            return Err(BillingError::Configuration(format!(
                "token ratio sides must be positive, got {input}:{output}"
            )));
        }
        Ok(Self { input, output })
    }

    /// Input token count implied by `output_tokens`, rounded up.
    #[must_use]
    pub fn implied_input(&self, output_tokens: u64) -> u64 {
        ceil_div(
            u128::from(output_tokens) * u128::from(self.input),
            u128::from(self.output),
        )
    }
}

impl Default for TokenRatio {
    fn default() -> Self {
        Self {
            input: 1,
            output: 4,
        }
    }
}

impl fmt::Display for TokenRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.input, self.output)
    }
}

impl FromStr for TokenRatio {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BillingError::Configuration(format!("invalid token ratio: {s:?}"));
        let (input, output) = s.split_once(':').ok_or_else(invalid)?;
        let input = input.trim().parse().map_err(|_| invalid())?;
        let output = output.trim().parse().map_err(|_| invalid())?;
        Self::new(input, output)
    }
}

/// Converts token usage into a credit cost.
///
/// The calculator is pure: the caller supplies the total active profit margin,
/// so the same inputs always produce the same breakdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCostCalculator {
    ratio: TokenRatio,
}

impl TokenCostCalculator {
    /// Create a calculator for `ratio`.
    #[must_use]
    pub const fn new(ratio: TokenRatio) -> Self {
        Self { ratio }
    }

    /// The configured ratio.
    #[must_use]
    pub const fn ratio(&self) -> TokenRatio {
        self.ratio
    }

    /// Compute the cost of `usage` with `total_profit_bps` of stacked margin.
    ///
    /// - `base = ceil(output_tokens * input / output)`
    /// - `final = ceil(base + base * total_profit_bps / 10_000)`
    ///
    /// An input count more than one token away from the ratio-implied value is
    /// logged; it never changes the result.
    ///
    /// # Errors
    ///
    /// Returns [`BillingError::InvalidUsage`] if the cost does not fit in `i64`.
    pub fn calculate(
        &self,
        usage: TokenUsage,
        total_profit_bps: u64,
    ) -> crate::Result<CostBreakdown> {
        let implied_input = self.ratio.implied_input(usage.output_tokens);
        if usage.input_tokens.abs_diff(implied_input) > 1 {
            tracing::warn!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                implied_input,
                ratio = %self.ratio,
                "Input token count does not match the configured ratio"
            );
        }

        let base = u128::from(implied_input);
        let scaled =
            base * u128::from(BASIS_POINTS_PER_WHOLE) + base * u128::from(total_profit_bps);
        let total = ceil_div(scaled, u128::from(BASIS_POINTS_PER_WHOLE));
        let profit = base * u128::from(total_profit_bps) / u128::from(BASIS_POINTS_PER_WHOLE);

        let to_credits = |value: u128| {
            i64::try_from(value)
                .map_err(|_| BillingError::InvalidUsage(format!("cost {value} exceeds i64")))
        };
        let cost_credits = to_credits(base)?;
        let profit_credits = to_credits(profit)?;
        let credits = to_credits(u128::from(total))?;

        Ok(CostBreakdown {
            cost_credits,
            profit_credits,
            rounding_credits: credits - cost_credits - profit_credits,
            profit_bps: total_profit_bps,
            credits,
        })
    }
}

/// Saturates at `u64::MAX`.
fn ceil_div(numerator: u128, denominator: u128) -> u64 {
    let quotient = numerator.div_ceil(denominator);
    u64::try_from(quotient).unwrap_or(u64::MAX)
}
