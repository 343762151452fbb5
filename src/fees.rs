// splitpay/src/fees.rs
// Platform fee split. Pure: no I/O besides the fallback log line.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::error::{Result, SplitError};

pub const DEFAULT_FEE_PERCENTAGE: Decimal = Decimal::TEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSplit {
    pub amount: Decimal,
    /// Percentage actually applied, after the default fallback
    pub fee_percentage: Decimal,
    pub platform_fee: Decimal,
    pub producer_amount: Decimal,
}

impl FeeSplit {
    pub fn producer_percentage(&self) -> Decimal {
        Decimal::ONE_HUNDRED - self.fee_percentage
    }
}

/// `platform_fee = round(amount * pct / 100, 2)`, `producer_amount = amount - platform_fee`.
///
/// The producer share is derived, never rounded on its own, so the two legs
/// always add back up to `amount`.
pub fn compute_split(amount: Decimal, fee_percentage: Option<Decimal>) -> Result<FeeSplit> {
    if amount <= Decimal::ZERO {
        return Err(SplitError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    let fee_percentage = match fee_percentage {
        Some(pct) if pct > Decimal::ZERO => pct,
        _ => {
            tracing::info!(
                "Fee percentage not set, falling back to {}%",
                DEFAULT_FEE_PERCENTAGE
            );
            DEFAULT_FEE_PERCENTAGE
        }
    };

    if fee_percentage > Decimal::ONE_HUNDRED {
        return Err(SplitError::InvalidAmount(format!(
            "fee percentage must be within 0..=100, got {}",
            fee_percentage
        )));
    }

    let platform_fee = (amount * fee_percentage / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let producer_amount = amount - platform_fee;

    Ok(FeeSplit {
        amount,
        fee_percentage,
        platform_fee,
        producer_amount,
    })
}
