use chrono::{DateTime, Duration, TimeZone, Utc};
use common::Bar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn synthetic_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Generate a seeded random-walk daily series for demos and tests
pub fn generate_synthetic_bars(days: usize, initial_price: f64, seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(days);

    let mut price = initial_price;
    let start_date = synthetic_start();

    let daily_volatility = 0.015;
    let drift = 0.0003;

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);

        let random_return: f64 = rng.gen_range(-1.0..1.0);
        let daily_return = drift + daily_volatility * random_return;

        let new_price = price * (1.0 + daily_return);

        // Generate OHLC
        let intraday_range = price * rng.gen_range(0.005..0.02);
        let open = price + rng.gen_range(-intraday_range / 2.0..intraday_range / 2.0);
        let close = new_price;

        let high = open.max(close) + rng.gen_range(0.0..intraday_range / 2.0);
        let low = open.min(close) - rng.gen_range(0.0..intraday_range / 2.0);

        // Higher volume on volatile days
        let base_volume = 5_000_000.0;
        let volume_multiplier = 1.0 + daily_return.abs() * 10.0;
        let volume = (base_volume * volume_multiplier * rng.gen_range(0.8..1.2)).round();

        bars.push(Bar {
            timestamp: date,
            open,
            high,
            low,
            close,
            volume,
            adj_close: close,
            open_interest: None,
        });

        price = new_price;
    }

    bars
}

/// Generate bars that step down on `down_days` and up on `up_days`.
///
/// Each step is 3% of `initial_price`, so round starting prices give exact
/// closes and flat stretches have exactly equal averages.
pub fn generate_bars_with_pattern(
    days: usize,
    initial_price: f64,
    down_days: &[usize],
    up_days: &[usize],
) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(days);
    let mut price = initial_price;
    let start_date = synthetic_start();
    let step = initial_price * 0.03;

    for i in 0..days {
        let date = start_date + Duration::days(i as i64);

        let change = if down_days.contains(&i) {
            -step
        } else if up_days.contains(&i) {
            step
        } else {
            0.0
        };

        let new_price = price + change;
        let range = initial_price * 0.01;

        bars.push(Bar {
            timestamp: date,
            open: price,
            high: price.max(new_price) + range,
            low: price.min(new_price) - range,
            close: new_price,
            volume: 1_000_000.0,
            adj_close: new_price,
            open_interest: None,
        });

        price = new_price;
    }

    bars
}
