use proptest::prelude::*;

use signal_desk::aggregator::{CandleAggregator, SeriesChange, DEFAULT_TICK_BUFFER_CAPACITY};
use signal_desk::model::candle::{Candle, CandleOrigin};
use signal_desk::model::tick::Tick;

fn history(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Candle::historical(i as u64 * 86_400_000, *c, *c + 2.0, *c - 2.0, *c, 1_000.0))
        .collect()
}

fn feed(agg: &mut CandleAggregator, prices: &[f64]) {
    for (i, p) in prices.iter().enumerate() {
        agg.push_tick(Tick::from_price(*p, 1_000_000_000 + i as u64 * 250));
    }
}

#[test]
fn reference_vector_two_ticks() {
    let mut agg = CandleAggregator::default();
    agg.replace_historical(history(&[100.0, 102.0, 101.0, 105.0, 110.0]));
    feed(&mut agg, &[111.0, 109.0]);

    let merged = agg.merged_series();
    assert_eq!(merged.len(), 7);
    assert_eq!(merged[5].origin, CandleOrigin::Synthetic);
    assert_eq!((merged[5].open, merged[5].close), (110.0, 111.0));
    assert_eq!((merged[6].open, merged[6].close), (111.0, 109.0));
    assert_eq!(merged[6].volume, 0.0);
}

#[test]
fn buffer_keeps_exactly_the_last_200_ticks() {
    let mut agg = CandleAggregator::default();
    agg.replace_historical(history(&[100.0, 101.0]));
    let prices: Vec<f64> = (0..DEFAULT_TICK_BUFFER_CAPACITY).map(|i| 100.0 + i as f64).collect();
    feed(&mut agg, &prices);
    assert_eq!(agg.len(), 2 + DEFAULT_TICK_BUFFER_CAPACITY);

    let change = agg.push_tick(Tick::from_price(999.0, 2_000_000_000));
    assert_eq!(change, SeriesChange::Rebuilt { from: 2 });
    assert_eq!(agg.len(), 2 + DEFAULT_TICK_BUFFER_CAPACITY);
    assert_eq!(agg.ticks().front().map(|t| t.ltp), Some(101.0));
    assert_eq!(agg.last_tick().map(|t| t.ltp), Some(999.0));
}

#[test]
fn historical_always_precedes_synthetic() {
    let mut agg = CandleAggregator::new(5);
    agg.replace_historical(history(&[10.0, 11.0, 12.0]));
    feed(&mut agg, &[13.0, 14.0, 15.0, 16.0, 17.0, 18.0, 19.0]);
    let merged = agg.merged_series();
    let first_synthetic = merged.iter().position(Candle::is_synthetic).unwrap();
    assert_eq!(first_synthetic, 3);
    assert!(merged[first_synthetic..].iter().all(Candle::is_synthetic));
}

#[test]
fn volume_comes_from_tick_when_present() {
    let mut agg = CandleAggregator::default();
    let mut tick = Tick::from_price(50.0, 1);
    tick.volume = Some(12.5);
    agg.push_tick(tick);
    assert_eq!(agg.synthetic()[0].volume, 12.5);
}

proptest! {
    #[test]
    fn merged_length_is_history_plus_capped_ticks(
        closes in prop::collection::vec(1.0f64..10_000.0, 0..40),
        prices in prop::collection::vec(1.0f64..10_000.0, 0..450),
    ) {
        let mut agg = CandleAggregator::default();
        agg.replace_historical(history(&closes));
        feed(&mut agg, &prices);
        prop_assert_eq!(
            agg.merged_series().len(),
            closes.len() + prices.len().min(DEFAULT_TICK_BUFFER_CAPACITY)
        );
    }

    #[test]
    fn synthetic_open_equals_previous_close(
        closes in prop::collection::vec(1.0f64..10_000.0, 1..30),
        prices in prop::collection::vec(1.0f64..10_000.0, 1..300),
    ) {
        let mut agg = CandleAggregator::default();
        agg.replace_historical(history(&closes));
        feed(&mut agg, &prices);
        let merged = agg.merged_series();
        for i in closes.len()..merged.len() {
            prop_assert_eq!(merged[i].open, merged[i - 1].close, "index {}", i);
            prop_assert!(merged[i].high >= merged[i].open.max(merged[i].close));
            prop_assert!(merged[i].low <= merged[i].open.min(merged[i].close));
        }
    }
}
