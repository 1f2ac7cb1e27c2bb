//! Price arithmetic for resubmission rounds

use rust_decimal::{Decimal, RoundingStrategy};

/// Prices are handled at cent precision
pub const PRICE_DP: u32 = 2;

/// Round to cents, half-up on the cent boundary.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Render a price the way the page expects it typed (`"9.00"`, never `"9"`).
pub fn format_price(value: Decimal) -> String {
    let mut rounded = round2(value);
    rounded.rescale(PRICE_DP);
    rounded.to_string()
}

/// Result of one all-or-nothing decrement round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Every item stays at or above its floor
    Next(Vec<Decimal>),
    /// At least one item would drop below its floor; nothing is committed
    FloorBreached {
        index: usize,
        attempted: Decimal,
        floor: Decimal,
    },
}

/// Lower every price by `step`, halting the whole round on the first floor breach.
///
/// `prices` and `floors` must be the same length (checked by settings validation).
pub fn decrement_round(prices: &[Decimal], floors: &[Decimal], step: Decimal) -> DecrementOutcome {
    let mut next = Vec::with_capacity(prices.len());

    for (index, (price, floor)) in prices.iter().zip(floors).enumerate() {
        let attempted = round2(*price - step);
        if attempted < *floor {
            return DecrementOutcome::FloorBreached {
                index,
                attempted,
                floor: *floor,
            };
        }
        next.push(attempted);
    }

    DecrementOutcome::Next(next)
}
