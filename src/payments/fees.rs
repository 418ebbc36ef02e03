use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// Flat per-transfer provider fee used when the provider response does not
/// report one
const TRANSFER_FLAT_PROVIDER_FEE: Decimal = dec!(10);
/// Platform fee: 0.3% of the amount, capped
const PLATFORM_FEE_RATE: Decimal = dec!(0.003);
const PLATFORM_FEE_CAP: Decimal = dec!(50);
/// Collection fee: 1.5% plus a flat surcharge above the threshold, capped
const COLLECTION_FEE_RATE: Decimal = dec!(0.015);
const COLLECTION_SURCHARGE: Decimal = dec!(100);
const COLLECTION_SURCHARGE_THRESHOLD: Decimal = dec!(2500);
const COLLECTION_FEE_CAP: Decimal = dec!(2000);
/// Provider-reported fees above this are assumed to be in minor currency
/// units and divided by 100
const MINOR_UNIT_THRESHOLD: Decimal = dec!(1000);

/// Keys under which providers report an explicit fee, checked at the top
/// level of the response and one level into a nested `data` object
const PROVIDER_FEE_KEYS: [&str; 4] = ["fee", "fees", "transfer_fee", "charge"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub provider_fee: Decimal,
    pub platform_fee: Decimal,
    pub total: Decimal,
}

/// Round-half-up to 2 decimal places. The epsilon nudges values sitting a
/// hair below the midpoint due to decimal division (e.g. a rate product
/// ending in ...4999) up onto it before rounding.
pub fn round_money(value: Decimal) -> Decimal {
    (value + dec!(0.000001)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// 0.3% capped platform fee. Zero/negative amounts yield a zero fee rather
/// than an error; the schedule engine rejects non-positive amounts upstream.
pub fn platform_fee(amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_money((amount * PLATFORM_FEE_RATE).min(PLATFORM_FEE_CAP))
}

/// Fee for an outbound transfer. A fee reported in the provider's raw
/// response overrides the flat default.
pub fn transfer_fee(amount: Decimal, provider_response: Option<&Value>) -> FeeBreakdown {
    let provider_fee = provider_response
        .and_then(extract_provider_fee)
        .unwrap_or(TRANSFER_FLAT_PROVIDER_FEE);
    let provider_fee = round_money(provider_fee);
    let platform = platform_fee(amount);
    FeeBreakdown {
        provider_fee,
        platform_fee: platform,
        total: round_money(provider_fee + platform),
    }
}

/// Fee for collecting money in: percentage plus a flat surcharge above the
/// threshold, capped, plus the platform fee.
pub fn collection_fee(amount: Decimal) -> FeeBreakdown {
    let mut provider_fee = if amount <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        let mut fee = amount * COLLECTION_FEE_RATE;
        if amount > COLLECTION_SURCHARGE_THRESHOLD {
            fee += COLLECTION_SURCHARGE;
        }
        fee
    };
    provider_fee = round_money(provider_fee.min(COLLECTION_FEE_CAP));
    let platform = platform_fee(amount);
    FeeBreakdown {
        provider_fee,
        platform_fee: platform,
        total: round_money(provider_fee + platform),
    }
}

/// Pull an explicit fee out of a provider response body. Values above the
/// minor-unit threshold are normalized (kobo -> naira).
fn extract_provider_fee(response: &Value) -> Option<Decimal> {
    fee_from_object(response)
        .or_else(|| response.get("data").and_then(fee_from_object))
        .map(|fee| {
            if fee > MINOR_UNIT_THRESHOLD {
                fee / dec!(100)
            } else {
                fee
            }
        })
}

fn fee_from_object(value: &Value) -> Option<Decimal> {
    for key in PROVIDER_FEE_KEYS {
        if let Some(raw) = value.get(key) {
            let fee = match raw {
                Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
                Value::String(s) => Decimal::from_str(s).ok(),
                _ => None,
            };
            if let Some(fee) = fee {
                return Some(fee);
            }
        }
    }
    None
}
