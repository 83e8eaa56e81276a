mod common;

use common::{bank_for, context, device, runtime};
use gateway_connector::{InMemorySink, PollEngine};
use gateway_protocol::MemoryClientFactory;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn three_points() -> serde_json::Value {
    json!([
        {"tag": "a", "type": "16int", "functionCode": 3, "address": 0},
        {"tag": "b", "type": "16int", "functionCode": 3, "address": 1},
        {"tag": "c", "type": "16int", "functionCode": 4, "address": 2}
    ])
}

#[tokio::test]
async fn poll_collects_sections_and_enqueues_conversion() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.1",
        "attributes": [{"tag": "serial", "type": "16uint", "functionCode": 3, "address": 100}],
        "timeseries": three_points(),
        "rpc": [{"tag": "reset", "type": "16int", "functionCode": 6, "address": 9}]
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let sink = Arc::new(InMemorySink::new());
    let ctx = context(factory.clone(), sink.clone());
    let mut runtime = runtime(&meter);

    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert!(report.connected);
    assert_eq!(report.items, 4);
    assert!(!report.abandoned);
    assert!(report.enqueued);
    assert_eq!(ctx.conversions.len(), 1);
    // 命令段不轮询
    assert_eq!(bank_for(&factory, &meter).op_log().len(), 4);
    assert_eq!(sink.online(), vec!["Meter".to_string()]);
}

#[tokio::test]
async fn transport_fault_reconnects_and_retries_once() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.2", "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let bank = bank_for(&factory, &meter);
    let sink = Arc::new(InMemorySink::new());
    let ctx = context(factory.clone(), sink.clone());
    let mut runtime = runtime(&meter);

    bank.fail_next_ops(1);
    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert_eq!(report.items, 3);
    assert!(!report.abandoned);
    assert_eq!(bank.connect_count(), 2);
    // 拆除连接时下线，重连后再次上线
    assert_eq!(sink.offline(), vec!["Meter".to_string()]);
    assert_eq!(sink.online(), vec!["Meter".to_string(), "Meter".to_string()]);
}

#[tokio::test]
async fn second_consecutive_fault_abandons_the_cycle() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.3", "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let bank = bank_for(&factory, &meter);
    let sink = Arc::new(InMemorySink::new());
    let ctx = context(factory.clone(), sink.clone());
    let mut runtime = runtime(&meter);

    bank.fail_next_ops(2);
    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert!(report.abandoned);
    assert_eq!(report.items, 0);
    assert!(!report.enqueued);
    assert!(!runtime.is_online());
    assert_eq!(bank.op_log().len(), 2);

    // 下一轮从头重连
    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert_eq!(report.items, 3);
    assert!(runtime.is_online());
}

#[tokio::test]
async fn device_exception_retries_on_the_same_connection() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.4", "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let bank = bank_for(&factory, &meter);
    let sink = Arc::new(InMemorySink::new());
    let ctx = context(factory.clone(), sink.clone());
    let mut runtime = runtime(&meter);

    bank.exception_next_ops(1);
    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert_eq!(report.items, 3);
    assert_eq!(bank.connect_count(), 1);
    assert_eq!(bank.op_log().len(), 4);
    // 异常响应不拆除连接，也不下线
    assert!(sink.offline().is_empty());
    assert!(runtime.is_online());
}

#[tokio::test]
async fn unknown_function_code_skips_only_that_point() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.5",
        "timeseries": [
            {"tag": "bad", "type": "16int", "functionCode": 43, "address": 0},
            {"tag": "good", "type": "16int", "functionCode": 3, "address": 1}
        ]
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let ctx = context(factory, Arc::new(InMemorySink::new()));
    let mut runtime = runtime(&meter);

    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert_eq!(report.items, 1);
    assert!(!report.abandoned);
    assert!(report.enqueued);
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_is_not_polled() {
    let meter = device(json!({
        "deviceName": "Meter", "type": "tcp", "host": "10.0.0.6", "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    bank_for(&factory, &meter).fail_next_connects(1);
    let sink = Arc::new(InMemorySink::new());
    let ctx = context(factory, sink.clone());
    let mut runtime = runtime(&meter);

    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert!(!report.connected);
    assert_eq!(runtime.connection().attempts(), 1);
    assert!(sink.online().is_empty());

    tokio::time::advance(Duration::from_millis(500)).await;
    let report = PollEngine::poll_device(&mut runtime, &ctx).await;
    assert!(report.connected);
    assert_eq!(runtime.connection().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn distinct_connections_poll_concurrently() {
    let left = device(json!({
        "deviceName": "Left", "type": "tcp", "host": "10.0.1.1", "timeseries": three_points()
    }));
    let right = device(json!({
        "deviceName": "Right", "type": "tcp", "host": "10.0.1.2", "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    bank_for(&factory, &left).set_latency(Duration::from_millis(100));
    bank_for(&factory, &right).set_latency(Duration::from_millis(100));
    let ctx = context(factory, Arc::new(InMemorySink::new()));
    let (mut left, mut right) = (runtime(&left), runtime(&right));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        PollEngine::poll_device(&mut left, &ctx),
        PollEngine::poll_device(&mut right, &ctx)
    );
    assert_eq!((a.items, b.items), (3, 3));
    assert!(started.elapsed() < Duration::from_millis(600));
}

#[tokio::test(start_paused = true)]
async fn exclusive_bus_never_interleaves_devices() {
    let first = device(json!({
        "deviceName": "First", "type": "serial", "port": "/dev/ttyUSB0", "unitId": 1,
        "timeseries": three_points()
    }));
    let second = device(json!({
        "deviceName": "Second", "type": "serial", "port": "/dev/ttyUSB0", "unitId": 2,
        "timeseries": three_points()
    }));
    let factory = Arc::new(MemoryClientFactory::new());
    let bank = bank_for(&factory, &first);
    bank.set_latency(Duration::from_millis(100));
    let ctx = context(factory, Arc::new(InMemorySink::new()));
    let (mut first, mut second) = (runtime(&first), runtime(&second));

    let started = Instant::now();
    tokio::join!(
        PollEngine::poll_device(&mut first, &ctx),
        PollEngine::poll_device(&mut second, &ctx)
    );
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(bank.max_in_flight(), 1);
    let log = bank.op_log();
    assert!(
        log == vec![1, 1, 1, 2, 2, 2] || log == vec![2, 2, 2, 1, 1, 1],
        "interleaved bus access: {:?}",
        log
    );
}
