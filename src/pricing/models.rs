//! Closed-form and lattice option pricing models.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::data::OptionType;

/// Standard normal CDF.
fn norm_cdf(x: f64) -> f64 {
    let normal = Normal::new(0.0, 1.0).unwrap();
    normal.cdf(x)
}

/// Zero-volatility limit: the discounted forward payoff.
fn deterministic_price(spot: f64, strike: f64, t: f64, rate: f64, option_type: OptionType) -> f64 {
    let discounted_strike = strike * (-rate * t).exp();
    match option_type {
        OptionType::Call => (spot - discounted_strike).max(0.0),
        OptionType::Put => (discounted_strike - spot).max(0.0),
    }
}

/// European option price under Black-Scholes (no dividends).
pub fn black_scholes(
    spot: f64,
    strike: f64,
    t: f64,
    rate: f64,
    sigma: f64,
    option_type: OptionType,
) -> f64 {
    if t <= 0.0 {
        return option_type.intrinsic(spot, strike);
    }
    if sigma <= 0.0 {
        return deterministic_price(spot, strike, t, rate, option_type);
    }

    let sqrt_t = t.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
    let d2 = d1 - sigma * sqrt_t;
    let discount = (-rate * t).exp();

    match option_type {
        OptionType::Call => spot * norm_cdf(d1) - strike * discount * norm_cdf(d2),
        OptionType::Put => strike * discount * norm_cdf(-d2) - spot * norm_cdf(-d1),
    }
}

/// American option price on a Cox-Ross-Rubinstein binomial tree.
///
/// Terminal payoffs are intrinsic; backward induction takes the maximum of
/// the discounted expected continuation value and immediate exercise, which
/// is what separates this from the European closed form.
pub fn binomial_tree(
    spot: f64,
    strike: f64,
    t: f64,
    rate: f64,
    sigma: f64,
    steps: usize,
    option_type: OptionType,
) -> f64 {
    if t <= 0.0 || steps == 0 {
        return option_type.intrinsic(spot, strike);
    }
    if sigma <= 0.0 {
        // u == d degenerates the lattice; use the deterministic limit,
        // floored at intrinsic for the American exercise right.
        return deterministic_price(spot, strike, t, rate, option_type)
            .max(option_type.intrinsic(spot, strike));
    }

    let dt = t / steps as f64;
    let up = (sigma * dt.sqrt()).exp();
    let down = 1.0 / up;
    let growth = (rate * dt).exp();
    let p_up = (growth - down) / (up - down);
    let discount = 1.0 / growth;

    // Terminal payoffs, node i = number of down moves
    let mut values: Vec<f64> = (0..=steps)
        .map(|i| {
            let price = spot * up.powi((steps - i) as i32) * down.powi(i as i32);
            option_type.intrinsic(price, strike)
        })
        .collect();

    for step in (0..steps).rev() {
        for i in 0..=step {
            let continuation = discount * (p_up * values[i] + (1.0 - p_up) * values[i + 1]);
            let asset_price = spot * up.powi((step - i) as i32) * down.powi(i as i32);
            let exercise = option_type.intrinsic(asset_price, strike);
            values[i] = continuation.max(exercise);
        }
    }

    values[0]
}
