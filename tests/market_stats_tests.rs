use signal_desk::indicator::{compute_market_stats, MarketStats};
use signal_desk::model::candle::Candle;

fn c(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    Candle::historical(0, open, high, low, close, volume)
}

#[test]
/// Verifies the empty window yields zeroed stats instead of an error.
fn empty_input_is_all_zero() {
    let stats = compute_market_stats(&[]);
    assert_eq!(
        stats,
        MarketStats {
            high: 0.0,
            low: 0.0,
            open: 0.0,
            volume: 0.0,
            change: 0.0,
            change_percent: 0.0,
        }
    );
}

#[test]
/// Verifies high/low are taken over closes even when wicks go further.
fn extremes_ignore_candle_wicks() {
    let candles = vec![
        c(100.0, 150.0, 50.0, 101.0, 10.0),
        c(101.0, 160.0, 40.0, 104.0, 20.0),
        c(104.0, 170.0, 30.0, 99.0, 30.0),
    ];
    let stats = compute_market_stats(&candles);
    assert_eq!(stats.high, 104.0);
    assert_eq!(stats.low, 99.0);
    assert_eq!(stats.open, 100.0);
    assert_eq!(stats.volume, 60.0);
}

#[test]
/// Verifies change is measured from the first close, not the first open.
fn change_is_relative_to_first_close() {
    let candles = vec![c(90.0, 101.0, 89.0, 100.0, 1.0), c(100.0, 111.0, 99.0, 110.0, 1.0)];
    let stats = compute_market_stats(&candles);
    assert!((stats.change - 10.0).abs() < 1e-12);
    assert!((stats.change_percent - 10.0).abs() < 1e-12);
}

#[test]
fn single_candle_has_no_change() {
    let stats = compute_market_stats(&[c(10.0, 12.0, 9.0, 11.0, 5.0)]);
    assert_eq!(stats.change, 0.0);
    assert_eq!(stats.change_percent, 0.0);
    assert_eq!(stats.high, 11.0);
    assert_eq!(stats.low, 11.0);
}
