/// Half-up rounding to one decimal, `Int(10*x + 0.5) / 10`. Finals, averages
/// and medians all pass through this exactly once.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Applies the one-decimal rounding to each entry percent when roff is on.
pub fn pre_round(x: f64, roff: bool) -> f64 {
    if roff {
        round_off_1_decimal(x)
    } else {
        x
    }
}
