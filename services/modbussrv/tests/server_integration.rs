//! Modbus subsystem integration tests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::ticker::ManualTicker;
use common::ManualClock;
use modbussrv::frame::parse_read_response;
use modbussrv::{Direction, ModbusConfig, ModbusServer, ReadRequest, TransactionOutcome};
use sensor_model::{QuantityStatus, Scenario};

fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

fn server_with(config: ModbusConfig) -> Arc<ModbusServer> {
    let clock = ManualClock::new(start_time());
    Arc::new(ModbusServer::new(config, clock.shared()).unwrap())
}

async fn wait_for_ticks(server: &ModbusServer, ticks: u64) {
    for _ in 0..1000 {
        if server.ticks() >= ticks {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("server reached {} of {} ticks", server.ticks(), ticks);
}

#[test]
fn test_clean_device_answers_every_request() {
    let server = server_with(ModbusConfig::default());
    for sensor in 0..10u16 {
        let outcome = server.handle_request(ReadRequest::read_input(16, 30000 + sensor * 2, 2));
        assert!(outcome.is_success());
    }
    let document = server.modbus_log(1000);
    assert_eq!(document.statistics.tx_count, 10);
    assert_eq!(document.statistics.rx_count, 10);
    assert_eq!(document.statistics.error_count, 0);
    assert!(document.entries.iter().all(|e| e.parsed.error.is_none()));
    assert!(document
        .entries
        .chunks(2)
        .all(|pair| pair[0].direction == Direction::Tx && pair[1].direction == Direction::Rx));
}

#[test]
fn test_always_timing_out_device_logs_tx_only() {
    let mut config = ModbusConfig::default();
    config.errors.timeout_rate = 1.0;
    let server = server_with(config);
    for _ in 0..25 {
        let outcome = server.handle_request(ReadRequest::read_holding(16, 40000, 20));
        assert!(matches!(outcome, TransactionOutcome::Timeout { timeout_ms: 1000, .. }));
    }
    let document = server.modbus_log(1000);
    assert_eq!(document.entries.len(), 25);
    assert!(document.entries.iter().all(|e| e.direction == Direction::Tx));
    assert_eq!(document.statistics.timeout_count, 25);
    assert_eq!(document.statistics.avg_response_time_ms, 0.0);
}

#[test]
fn test_log_stays_bounded() {
    let mut config = ModbusConfig::default();
    config.log.max_entries = 50;
    let server = server_with(config);
    for _ in 0..100 {
        server.handle_request(ReadRequest::read_input(16, 30000, 4));
    }
    let document = server.modbus_log(1000);
    assert_eq!(document.max_entries, 50);
    assert_eq!(document.entries.len(), 50);
    assert_eq!(document.statistics.total_entries, 50);
}

#[test]
fn test_rx_frame_decodes_like_a_master() {
    let server = server_with(ModbusConfig::default());
    server.handle_request(ReadRequest::read_input(16, 30000, 4));
    let rx = server.modbus_log(1).entries.pop().unwrap();
    let bytes = common::hex::decode_spaced(&rx.raw_hex).unwrap();
    let values = parse_read_response(&bytes).unwrap();
    assert_eq!(Some(values), rx.parsed.values);
}

#[test]
fn test_concurrent_requests_are_serialized() {
    let mut config = ModbusConfig::default();
    config.log.max_entries = 1000;
    let server = server_with(config);

    std::thread::scope(|scope| {
        for quantity in 1..=8u16 {
            let server = &server;
            scope.spawn(move || {
                for _ in 0..40 {
                    assert!(server
                        .handle_request(ReadRequest::read_input(16, 30000, quantity))
                        .is_success());
                }
            });
        }
    });

    let document = server.modbus_log(1000);
    assert_eq!(document.entries.len(), 640);
    assert_eq!(document.statistics.tx_count, 320);
    assert_eq!(document.statistics.rx_count, 320);
    assert!(document
        .entries
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    for pair in document.entries.chunks(2) {
        assert_eq!(pair[0].direction, Direction::Tx);
        assert_eq!(pair[1].direction, Direction::Rx);
        let quantity = usize::from(pair[0].parsed.quantity.unwrap());
        assert_eq!(pair[1].parsed.values.as_ref().unwrap().len(), quantity);
    }
}

#[test]
fn test_reads_racing_ticks_see_whole_snapshots() {
    let server = server_with(ModbusConfig::default());
    let offline_word = QuantityStatus::Offline.status_word();

    std::thread::scope(|scope| {
        let ticking = &server;
        scope.spawn(move || {
            for i in 0..200 {
                let scenario = if i % 2 == 0 { Scenario::Offline } else { Scenario::Normal };
                ticking.set_scenario(scenario);
                ticking.tick_at(start_time() + chrono::Duration::seconds(i));
            }
        });

        for _ in 0..4 {
            let reading = &server;
            scope.spawn(move || {
                for _ in 0..200 {
                    let registers = reading.registers();
                    let offline = registers
                        .values()
                        .filter(|r| r.status.temperature.status == Some(QuantityStatus::Offline))
                        .count();
                    assert!(offline == 0 || offline == registers.len(), "torn view: {}", offline);

                    match reading.handle_request(ReadRequest::read_holding(16, 40000, 20)) {
                        TransactionOutcome::Success { values, .. } => {
                            assert!(values.iter().all(|w| *w != offline_word));
                        },
                        TransactionOutcome::Timeout { .. } => {},
                        other => panic!("unexpected outcome {:?}", other),
                    }
                }
            });
        }
    });
}

#[tokio::test]
async fn test_scheduler_ticks_until_stopped() {
    let server = server_with(ModbusConfig::default());
    let (ticker, handle) = ManualTicker::new();
    assert!(server.start_with_ticker(ticker));
    assert!(server.is_running());

    for i in 1..=3 {
        handle.fire(start_time() + chrono::Duration::seconds(i));
    }
    wait_for_ticks(&server, 3).await;

    assert!(server.stop().await);
    assert!(!server.stop().await);
    assert!(!server.is_running());

    handle.fire(start_time() + chrono::Duration::seconds(10));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.ticks(), 3);
}

#[tokio::test]
async fn test_offline_scenario_times_out_after_tick() {
    let server = server_with(ModbusConfig::default());
    assert!(server.handle_request(ReadRequest::read_input(16, 30000, 2)).is_success());

    server.set_scenario(Scenario::Offline);
    server.tick_at(start_time());
    let outcome = server.handle_request(ReadRequest::read_input(16, 30000, 2));
    assert!(matches!(outcome, TransactionOutcome::Timeout { .. }));
    assert_eq!(server.status().scenario, Scenario::Offline);
}

#[tokio::test]
async fn test_set_config_restarts_running_scheduler() {
    let server = server_with(ModbusConfig::default());
    let (ticker, _handle) = ManualTicker::new();
    server.start_with_ticker(ticker);

    let mut config = ModbusConfig::default();
    config.unit_id = 7;
    server.set_config(config).await.unwrap();
    assert!(server.is_running());
    assert!(server.handle_request(ReadRequest::read_input(7, 30000, 2)).is_success());
    assert!(!server.handle_request(ReadRequest::read_input(16, 30000, 2)).is_success());
    server.stop().await;
}
