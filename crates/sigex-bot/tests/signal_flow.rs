//! End-to-end signal flow through the application with an in-memory broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

use sigex_bot::config::BrokerBackend;
use sigex_bot::{AppConfig, AppError, Application};
use sigex_broker::MockBroker;
use sigex_core::{LegStatus, RejectReason};
use sigex_executor::{ExecutionConfig, ExecutionOutcome, ManualClock, TradingMode};
use sigex_risk::LedgerSnapshot;

fn market_open() -> DateTime<Utc> {
    // 10:30 IST on a Wednesday.
    Utc.with_ymd_and_hms(2024, 6, 12, 5, 0, 0).unwrap()
}

fn signal_line(symbol: &str) -> String {
    format!(
        r#"{{"symbol":"{symbol}","direction":"long","entry":"100","stop_loss":"95","target1":"118","quantity":10,"atr":"5","meta":{{"strategy":"orb","category":"breakout"}},"confidence":0.7,"generated_at":"2024-06-12T05:00:00Z"}}"#
    )
}

fn test_config(mode: TradingMode) -> AppConfig {
    let mut config = AppConfig::default();
    config.broker_backend = BrokerBackend::Mock;
    config.persistence.snapshot_path = None;
    config.execution = ExecutionConfig {
        mode,
        place_backoff_ms: 1,
        poll_interval_ms: 5,
        entry_fill_timeout_secs: 1,
        bracket_deadline_secs: 2,
        margin_timeout_secs: 1,
        ..Default::default()
    };
    config
}

fn app_with(config: AppConfig) -> (Application, Arc<MockBroker>) {
    let broker = Arc::new(MockBroker::new());
    broker.set_margins(dec!(1000000), dec!(100));
    let clock = Arc::new(ManualClock::new(market_open()));
    let app = Application::with_parts(config, broker.clone(), clock).unwrap();
    (app, broker)
}

fn snapshot_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("sigex-bot-{}-{name}", std::process::id()))
        .join("ledger.json")
}

#[tokio::test]
async fn test_paper_signal_is_sized_and_not_placed() {
    let (app, broker) = app_with(test_config(TradingMode::Paper));

    let outcome = app.submit_line(&signal_line("INFY")).await.unwrap();
    assert_eq!(outcome, Some(ExecutionOutcome::Paper { quantity: 10 }));
    assert!(broker.placed().is_empty());

    // Same instrument and direction inside the duplicate window.
    let outcome = app.submit_line(&signal_line("INFY")).await.unwrap();
    assert!(matches!(
        outcome,
        Some(ExecutionOutcome::Rejected {
            reason: RejectReason::DuplicateWindow,
            queued: false,
            ..
        })
    ));
}

#[tokio::test]
async fn test_blank_comment_and_malformed_lines() {
    let (app, _broker) = app_with(test_config(TradingMode::Paper));

    assert_eq!(app.submit_line("").await.unwrap(), None);
    assert_eq!(app.submit_line("   # replayed from yesterday").await.unwrap(), None);
    assert!(matches!(
        app.submit_line(r#"{"symbol":"INFY"}"#).await,
        Err(AppError::Signal(_))
    ));
    assert_eq!(app.ledger().stats().signal_count, 0);
}

#[tokio::test]
async fn test_live_bracket_round_trip() {
    let (app, broker) = app_with(test_config(TradingMode::Live));
    broker.script_statuses("MOCK-1", &[LegStatus::Open, LegStatus::Complete]);

    let outcome = app.submit_line(&signal_line("INFY")).await.unwrap();
    assert!(matches!(
        outcome,
        Some(ExecutionOutcome::Opened { quantity: 10, .. })
    ));
    assert_eq!(app.engine().open_trades().len(), 1);

    broker.set_status("MOCK-3", LegStatus::Complete);
    for _ in 0..400 {
        if app.engine().open_trades().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = app.ledger().stats();
    assert_eq!(stats.open_positions, 0);
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.equity, dec!(100180));
    assert_eq!(broker.cancels(), vec!["MOCK-2".to_string()]);
}

#[tokio::test]
async fn test_run_drains_input_and_saves_snapshot() {
    let path = snapshot_path("run");
    let mut config = test_config(TradingMode::Paper);
    config.persistence.snapshot_path = Some(path.clone());
    config.persistence.snapshot_interval_secs = 0;

    let (app, _broker) = app_with(config);
    let ledger = app.ledger().clone();
    let shutdown = app.shutdown_token();

    let input = format!(
        "# morning batch\n{}\nnot json\n\n{}\n",
        signal_line("INFY"),
        signal_line("TCS")
    );
    let handle = tokio::spawn(app.run(std::io::Cursor::new(input.into_bytes())));

    for _ in 0..400 {
        if ledger.stats().signal_count >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(ledger.stats().signal_count, 2);

    shutdown.cancel();
    handle.await.unwrap().unwrap();

    let snapshot = LedgerSnapshot::load(&path).unwrap().unwrap();
    assert_eq!(snapshot.signal_count, 2);
    assert_eq!(snapshot.trade_count, 0);
    assert_eq!(snapshot.duplicate_window.len(), 2);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_restore_ledger_carries_counters() {
    let path = snapshot_path("restore");
    let mut config = test_config(TradingMode::Paper);
    config.persistence.snapshot_path = Some(path.clone());

    let (first, _broker) = app_with(config.clone());
    assert!(!first.restore_ledger().unwrap());
    first.submit_line(&signal_line("INFY")).await.unwrap();
    first.save_ledger().unwrap();

    let (second, _broker) = app_with(config);
    assert!(second.restore_ledger().unwrap());
    assert_eq!(second.ledger().stats().signal_count, 1);

    // The duplicate window survives the restart.
    let outcome = second.submit_line(&signal_line("INFY")).await.unwrap();
    assert!(matches!(
        outcome,
        Some(ExecutionOutcome::Rejected {
            reason: RejectReason::DuplicateWindow,
            ..
        })
    ));

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
