//! Determinism tests for the market feature pipeline
//!
//! Validates that the pipeline produces identical outputs given identical
//! inputs, and that scheduling, gap handling and indicator state behave
//! the same way when driven end to end.
//!
//! Tests include:
//! - Dual replay comparison over a volatile synthetic journal
//! - Indicator sequences replayed from fresh state
//! - Missing book message detection
//! - Catch-up across a lunch break and the five-periods-due scenario

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use market_features::calendar::SessionCalendar;
use market_features::config::{EventStream, FeatureSpec, HistoryConfig, PipelineConfig};
use market_features::events::{Bar, BookMessage, MarketEvent, Trade, TradeSide};
use market_features::features::FeatureCatalog;
use market_features::history::History;
use market_features::manager::FeatureManager;
use market_features::order_book::{OrderBookLevel, SequenceGap};
use market_features::parameters::Parameters;
use market_features::pipeline::InstrumentPipeline;
use market_features::replay::ReplayEngine;
use market_features::scheduler::PeriodicFeatureResult;
use market_features::set_features::{SetFeature, INVALID_RESULT};
use market_features::source::WindowSpec;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use types::ids::InstrumentId;
use types::time::ManualClock;

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn volatile_journal(events: usize) -> Vec<MarketEvent> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut mid: f64 = 1_000.0;
    let mut journal = Vec::with_capacity(events);
    let mut sequence = 0;

    for i in 0..events {
        let ts = at(9, 30, 0) + TimeDelta::seconds(i as i64 * 7);
        mid = (mid + rng.gen_range(-1.0..1.0)).max(10.0);

        let event = if i % 3 == 2 {
            MarketEvent::Trade(Trade {
                timestamp: ts,
                price: mid,
                quantity: rng.gen_range(1.0..10.0),
                side: if rng.gen_bool(0.5) { TradeSide::Buy } else { TradeSide::Sell },
            })
        } else if i % 10 == 0 {
            sequence += 1;
            MarketEvent::Book(BookMessage::snapshot(
                sequence,
                ts,
                (1..=5).map(|k| OrderBookLevel::new(mid - k as f64 * 0.5, k as f64)).collect(),
                (1..=5).map(|k| OrderBookLevel::new(mid + k as f64 * 0.5, k as f64)).collect(),
            ))
        } else {
            sequence += 1;
            MarketEvent::Book(BookMessage::update(
                sequence,
                ts,
                vec![OrderBookLevel::new(mid - 0.25, rng.gen_range(1.0..2.0))],
                vec![OrderBookLevel::new(mid + 0.25, rng.gen_range(1.0..2.0))],
            ))
        };
        journal.push(event);
    }
    journal
}

fn feature_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.instrument = InstrumentId::new("BTC/USDT");
    config.features = vec![
        FeatureSpec::new("mid", EventStream::Book, SetFeature::Close, "mid", WindowSpec::all()),
        FeatureSpec::new("wap_ema", EventStream::Book, SetFeature::ExponentialWeightedMovingAverage, "wap", WindowSpec::last(10)),
        FeatureSpec::new("mid_rsi", EventStream::Book, SetFeature::RelativeStrengthIndex, "mid", WindowSpec::last(14)),
        FeatureSpec::new(
            "spread_std",
            EventStream::Book,
            SetFeature::StandardDeviation,
            "spread",
            WindowSpec::within(TimeDelta::minutes(5)),
        ),
        FeatureSpec::new(
            "flow",
            EventStream::Trades,
            SetFeature::Decay,
            "signed_quantity",
            WindowSpec::within(TimeDelta::minutes(1)),
        ),
    ];
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_dual_replay_identical() {
    init_tracing();
    let journal = volatile_journal(2_000);
    let engine = ReplayEngine::new(feature_config());

    let first = engine.replay(&journal).unwrap();
    let second = engine.replay(&journal).unwrap();

    assert!(!first.results.is_empty());
    assert_eq!(first.metrics.state_checksum, second.metrics.state_checksum);
    assert_eq!(first.results, second.results);
    assert_eq!(first.metrics.pipeline.sequence_gaps, 0);
}

#[test]
fn test_different_journals_differ() {
    let engine = ReplayEngine::new(feature_config());
    let a = engine.replay(&volatile_journal(600)).unwrap();
    let b = engine.replay(&volatile_journal(601)).unwrap();
    assert_ne!(a.metrics.state_checksum, b.metrics.state_checksum);
}

#[test]
fn test_rsi_stays_in_bounds_over_replay() {
    let result = ReplayEngine::new(feature_config())
        .replay(&volatile_journal(1_500))
        .unwrap();
    for value in result.results.iter().filter_map(|r| r.get("mid_rsi")) {
        assert!((0.0..=100.0).contains(&value), "rsi out of range: {value}");
    }
}

#[test]
fn test_ewma_sequence_repeatable_from_fresh_state() {
    let closes = [10.0, 11.0, 12.5, 12.0, 13.0, 15.5, 14.0];

    let run = || {
        let clock = Arc::new(ManualClock::new(at(9, 0, 0)));
        let mut manager = FeatureManager::new(History::new(HistoryConfig::default(), clock), 16);
        let catalog = FeatureCatalog::standard();
        let close = catalog.bar("close").unwrap();
        let mut values = Vec::new();
        for (i, price) in closes.iter().enumerate() {
            let start = at(9, i as u32, 0);
            manager
                .record(Bar {
                    start,
                    end: start + TimeDelta::minutes(1),
                    open: *price,
                    high: *price,
                    low: *price,
                    close: *price,
                    volume: 1.0,
                })
                .unwrap();
            let window = WindowSpec::last(3);
            let value = manager
                .get(SetFeature::ExponentialWeightedMovingAverage, close, &window, &Parameters::new())
                .unwrap();
            // Asking twice at the same source state must not advance the EMA.
            let again = manager
                .get(SetFeature::ExponentialWeightedMovingAverage, close, &window, &Parameters::new())
                .unwrap();
            assert_eq!(value, again);
            values.push(value);
        }
        values
    };

    let first = run();
    assert_eq!(&first[..2], &[INVALID_RESULT, INVALID_RESULT]);
    assert!(first[2..].iter().all(|v| *v > 0.0));
    assert_eq!(first, run());
}

#[test]
fn test_missing_book_message_detected() {
    let mut journal = volatile_journal(40);
    // Drop a single incremental update.
    let removed = journal.remove(4);
    assert!(matches!(removed, MarketEvent::Book(_)));

    let result = ReplayEngine::new(feature_config()).replay(&journal).unwrap();
    assert_eq!(result.metrics.pipeline.sequence_gaps, 1);
    assert!(result.metrics.alerts.iter().any(|a| a.metric == "sequence_gaps"));
}

#[test]
fn test_gap_returned_by_pipeline() {
    let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
    let mut pipeline =
        InstrumentPipeline::new(feature_config(), clock, Arc::new(FeatureCatalog::standard())).unwrap();

    let level = |p: f64| vec![OrderBookLevel::new(p, 1.0)];
    pipeline
        .record(MarketEvent::Book(BookMessage::snapshot(10, at(10, 0, 1), level(99.0), level(101.0))))
        .unwrap();
    let gap = pipeline
        .record(MarketEvent::Book(BookMessage::update(13, at(10, 0, 2), level(99.5), Vec::new())))
        .unwrap();
    assert_eq!(gap, Some(SequenceGap { expected: 11, received: 13 }));

    // A snapshot re-baselines the sequence.
    let gap = pipeline
        .record(MarketEvent::Book(BookMessage::snapshot(20, at(10, 0, 3), level(98.0), level(102.0))))
        .unwrap();
    assert_eq!(gap, None);
    let gap = pipeline
        .record(MarketEvent::Book(BookMessage::update(21, at(10, 0, 4), level(98.5), Vec::new())))
        .unwrap();
    assert_eq!(gap, None);
}

fn heartbeat(ts: NaiveDateTime) -> MarketEvent {
    MarketEvent::Heartbeat { timestamp: ts }
}

#[test]
fn test_five_updates_due() {
    let clock = Arc::new(ManualClock::new(at(10, 0, 0)));
    let mut pipeline =
        InstrumentPipeline::new(feature_config(), clock.clone(), Arc::new(FeatureCatalog::standard())).unwrap();

    let notifications: Arc<Mutex<Vec<Vec<PeriodicFeatureResult>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = notifications.clone();
    pipeline.add_listener(move |results: &[PeriodicFeatureResult]| {
        sink.lock().unwrap().push(results.to_vec());
    });

    pipeline.on_tick();
    clock.set(at(10, 5, 0));
    let outcome = pipeline.on_tick();

    assert_eq!(outcome.recorded, 5);
    let recorded = pipeline.results().events();
    assert_eq!(recorded.iter().filter(|r| !r.is_filler).count(), 5);
    assert_eq!(recorded.iter().filter(|r| r.is_filler).count(), 1);
    assert_eq!(notifications.lock().unwrap().len(), 2);
    assert_eq!(pipeline.metrics().snapshot().fillers_emitted, 1);
}

#[test]
fn test_catch_up_across_lunch_break() {
    let mut config = feature_config();
    config.calendar = SessionCalendar::with_break(t(9, 0), t(12, 0), t(13, 0), t(17, 0));

    let journal = vec![
        heartbeat(at(11, 57, 30)),
        heartbeat(at(11, 58, 10)),
        heartbeat(at(13, 2, 5)),
        heartbeat(at(13, 3, 0)),
    ];
    let result = ReplayEngine::new(config).replay(&journal).unwrap();

    let genuine: Vec<_> = result.results.iter().filter(|r| !r.is_filler).collect();
    assert!(genuine
        .iter()
        .all(|r| r.period_start < at(12, 0, 0) || r.period_start >= at(13, 0, 0)));

    let starts: Vec<NaiveDateTime> = genuine.iter().map(|r| r.period_start).collect();
    assert_eq!(
        starts,
        vec![at(11, 57, 0), at(11, 58, 0), at(11, 59, 0), at(13, 0, 0), at(13, 1, 0), at(13, 2, 0)]
    );
    // One filler for the catch-up batch spanning the break.
    assert_eq!(result.results.iter().filter(|r| r.is_filler).count(), 1);
    assert_eq!(result.metrics.pipeline.periods_skipped, 60);
}

#[test]
fn test_isolated_indicator_state() {
    let mut config = feature_config();
    config.features = vec![
        FeatureSpec::new("ema_short", EventStream::Book, SetFeature::ExponentialWeightedMovingAverage, "mid", WindowSpec::last(3)),
        FeatureSpec::new("ema_long", EventStream::Book, SetFeature::ExponentialWeightedMovingAverage, "mid", WindowSpec::last(30)),
    ];
    let result = ReplayEngine::new(config).replay(&volatile_journal(900)).unwrap();

    let last = result.results.iter().rev().find(|r| !r.is_filler).unwrap();
    let short = last.get("ema_short").unwrap();
    let long = last.get("ema_long").unwrap();
    assert!(short > 0.0 && long > 0.0);
    assert_ne!(short, long);
}
