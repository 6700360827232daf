use crate::models::Side;

/// Notional exposure of a position: margin × leverage, in USD cents.
pub fn exposure(margin: i128, leverage: u32) -> i128 {
    margin * leverage as i128
}

/// Realized profit-and-loss at close, in USD cents.
///
/// `pnl = (exit - entry) * exposure / entry`, sign-flipped for shorts.
/// The division truncates toward zero (i128 semantics); that rounding rule
/// is deliberate and covered by tests. Caller guarantees `entry_price > 0`
/// (positions are only ever opened against an existing quote).
pub fn realized_pnl(
    side: Side,
    entry_price: i128,
    exit_price: i128,
    margin: i128,
    leverage: u32,
) -> i128 {
    let delta = match side {
        Side::Long => exit_price - entry_price,
        Side::Short => entry_price - exit_price,
    };
    delta * exposure(margin, leverage) / entry_price
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_gain_truncates() {
        // $100 move on a $60,000 entry, 10x on $100 margin:
        // 100_000 * 100_000 / 6_000_000 = 1666.66.. -> 1666
        let pnl = realized_pnl(Side::Long, 6_000_000, 6_100_000, 10_000, 10);
        assert_eq!(pnl, 1666);
    }

    #[test]
    fn test_long_loss() {
        let pnl = realized_pnl(Side::Long, 6_000_000, 5_900_000, 10_000, 10);
        assert_eq!(pnl, -1666); // truncation toward zero, not floor
    }

    #[test]
    fn test_short_mirrors_long() {
        let long = realized_pnl(Side::Long, 6_000_000, 6_100_000, 10_000, 10);
        let short = realized_pnl(Side::Short, 6_000_000, 6_100_000, 10_000, 10);
        assert_eq!(short, -long);
    }

    #[test]
    fn test_flat_price_is_zero() {
        assert_eq!(realized_pnl(Side::Long, 150_00, 150_00, 5_000, 3), 0);
        assert_eq!(realized_pnl(Side::Short, 150_00, 150_00, 5_000, 3), 0);
    }

    #[test]
    fn test_exposure() {
        assert_eq!(exposure(10_000, 10), 100_000);
        assert_eq!(exposure(1, 1), 1);
    }

    #[test]
    fn test_leverage_scales_pnl() {
        let x1 = realized_pnl(Side::Long, 1_000, 1_100, 10_000, 1);
        let x100 = realized_pnl(Side::Long, 1_000, 1_100, 10_000, 100);
        assert_eq!(x100, x1 * 100);
    }
}
