//! Message pricing.
//!
//! An SMS is billed in parts. Character weights follow the SMS alphabet
//! split: printable English ASCII (0x20..=0x7E) counts 1, everything else
//! (Persian text in practice) counts 2. The glyph that stands in for the
//! tracked short link is excluded from the count entirely, since it is
//! replaced per-recipient before dispatch.

use common::amount::Amount;

use crate::models::campaign::PriceFactor;

/// Placeholder the composer inserts where the per-recipient short link will
/// go; excluded from part counting.
pub const LINK_GLYPH: char = '\u{1F517}';

/// Base price component in Toman; both the per-part term and the factor
/// term scale from it.
pub const BASE_PRICE: u64 = 200;

/// Weighted character count -> number of message parts.
///
/// Buckets: <=70 -> 1, <=132 -> 2, <=198 -> 3, <=264 -> 4, <=330 -> 5,
/// else 6.
pub fn message_parts(content: &str) -> u32 {
    let weighted: u64 = content
        .chars()
        .map(|c| match c {
            LINK_GLYPH => 0,
            '\x20'..='\x7e' => 1,
            _ => 2,
        })
        .sum();
    match weighted {
        0..=70 => 1,
        71..=132 => 2,
        133..=198 => 3,
        199..=264 => 4,
        265..=330 => 5,
        _ => 6,
    }
}

/// Price of one message:
/// `BASE_PRICE * parts + BASE_PRICE * line_factor * segment_factor`,
/// with the factor term floored to whole Tomans.
pub fn price_per_message(
    parts: u32,
    line_factor: PriceFactor,
    segment_factor: PriceFactor,
) -> Amount {
    let parts_term = BASE_PRICE * parts as u64;
    let factor_term = BASE_PRICE as u128
        * line_factor.per_mille() as u128
        * segment_factor.per_mille() as u128
        / 1_000_000;
    Amount::from_tomans(parts_term + factor_term as u64)
}

/// The audience actually targeted and the total cost.
///
/// With a budget, the audience is capped at `floor(budget / price)`;
/// without one, the whole matched capacity is targeted.
pub fn audience_and_cost(
    capacity: u64,
    budget: Option<Amount>,
    price_per_msg: Amount,
) -> (u64, Amount) {
    let num_audience = match budget {
        Some(budget) => {
            let affordable = budget
                .checked_div(price_per_msg)
                .expect("price_per_msg is never zero");
            capacity.min(affordable)
        }
        None => capacity,
    };
    let total_cost = price_per_msg
        .checked_mul(num_audience)
        .expect("cost bounded by budget or capacity");
    (num_audience, total_cost)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ascii_counts_one_persian_counts_two() {
        // 70 ASCII chars: still one part.
        let ascii70 = "a".repeat(70);
        assert_eq!(message_parts(&ascii70), 1);
        assert_eq!(message_parts(&"a".repeat(71)), 2);

        // 35 Persian chars weigh 70: one part; 36 weigh 72: two parts.
        let fa35 = "م".repeat(35);
        assert_eq!(message_parts(&fa35), 1);
        assert_eq!(message_parts(&"م".repeat(36)), 2);
    }

    #[test]
    fn link_glyph_is_free() {
        let with_glyph = format!("{}{}", "a".repeat(70), LINK_GLYPH);
        assert_eq!(message_parts(&with_glyph), 1);
    }

    #[test]
    fn part_buckets() {
        let cases = [
            (0u64, 1u32),
            (70, 1),
            (71, 2),
            (132, 2),
            (133, 3),
            (198, 3),
            (199, 4),
            (264, 4),
            (265, 5),
            (330, 5),
            (331, 6),
            (10_000, 6),
        ];
        for (chars, parts) in cases {
            let content = "a".repeat(chars as usize);
            assert_eq!(message_parts(&content), parts, "chars={chars}");
        }
    }

    #[test]
    fn price_with_neutral_factors() {
        let price =
            price_per_message(1, PriceFactor::ONE, PriceFactor::ONE);
        // 200 * 1 + 200 * 1.0 * 1.0
        assert_eq!(price, Amount::from_tomans(400));
    }

    #[test]
    fn price_floors_factor_term() {
        // 200 * 1.5 * 1.1 = 330
        let price = price_per_message(
            2,
            PriceFactor::from_per_mille(1500),
            PriceFactor::from_per_mille(1100),
        );
        assert_eq!(price, Amount::from_tomans(400 + 330));

        // 200 * 1.333 * 1.333 = 355.37.. -> 355
        let price = price_per_message(
            1,
            PriceFactor::from_per_mille(1333),
            PriceFactor::from_per_mille(1333),
        );
        assert_eq!(price, Amount::from_tomans(200 + 355));
    }

    #[test]
    fn budget_caps_audience() {
        let price = Amount::from_tomans(400);

        let (num, cost) =
            audience_and_cost(10_000, Some(Amount::from_tomans(300_000)), price);
        assert_eq!(num, 750);
        assert_eq!(cost, Amount::from_tomans(300_000));

        // Budget not an exact multiple: floor, cost below budget.
        let (num, cost) =
            audience_and_cost(10_000, Some(Amount::from_tomans(1_000)), price);
        assert_eq!(num, 2);
        assert_eq!(cost, Amount::from_tomans(800));

        // No budget: whole capacity.
        let (num, cost) = audience_and_cost(1_234, None, price);
        assert_eq!(num, 1_234);
        assert_eq!(cost, Amount::from_tomans(493_600));
    }
}
