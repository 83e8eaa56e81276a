mod common;

use common::{context, wait_for};
use domain::{ConvertedData, ConverterConfig, Datapoint, DeviceResponses, Endian};
use gateway_connector::{ConversionTask, InMemorySink, Rebalance, WorkerPool};
use gateway_converter::{ConversionError, UplinkConverter};
use gateway_protocol::MemoryClientFactory;
use gateway_telemetry::metrics;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// 在闸门打开前阻塞的转换器。
#[derive(Default)]
struct GatedConverter {
    open: Mutex<bool>,
    signal: Condvar,
    started: AtomicUsize,
}

impl GatedConverter {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.signal.notify_all();
    }
}

impl UplinkConverter for GatedConverter {
    fn convert(
        &self,
        config: &ConverterConfig,
        _responses: &DeviceResponses,
    ) -> Result<Option<ConvertedData>, ConversionError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
        drop(open);
        let mut data = ConvertedData::new(&config.device_name, &config.device_type);
        data.telemetry.push(Datapoint::new("value", json!(1)));
        Ok(Some(data))
    }
}

struct FailingConverter;

impl UplinkConverter for FailingConverter {
    fn convert(
        &self,
        _config: &ConverterConfig,
        _responses: &DeviceResponses,
    ) -> Result<Option<ConvertedData>, ConversionError> {
        Err(ConversionError::InvalidValue("garbage".to_string()))
    }
}

fn converter_config() -> ConverterConfig {
    ConverterConfig {
        device_name: "Meter".to_string(),
        device_type: "default".to_string(),
        byte_order: Endian::Little,
        word_order: Endian::Little,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_workers_are_never_retired() {
    let sink = Arc::new(InMemorySink::new());
    let ctx = Arc::new(context(Arc::new(MemoryClientFactory::new()), sink.clone()));
    let converter = Arc::new(GatedConverter::default());
    for _ in 0..3 {
        ctx.conversions
            .push(ConversionTask::new(
                converter.clone(),
                converter_config(),
                DeviceResponses::default(),
            ))
            .unwrap();
    }
    let (stop, shutdown) = watch::channel(false);
    let pool = WorkerPool::start(ctx.clone(), 1, 2, shutdown);
    assert_eq!(pool.names(), vec!["Main".to_string()]);
    assert!(wait_for(|| converter.started.load(Ordering::SeqCst) == 1).await);

    // 队列深度 2，期望 2 个工作者
    let Rebalance::Spawned(spawned) = pool.rebalance().unwrap() else {
        panic!("expected a new worker");
    };
    assert!(spawned.starts_with("Converter worker "));
    assert!(wait_for(|| converter.started.load(Ordering::SeqCst) == 2).await);

    // 队列深度 1，期望 1 个，但两个工作者都在忙
    for _ in 0..5 {
        assert_eq!(pool.rebalance().unwrap(), Rebalance::Unchanged);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(pool.len(), 2);

    converter.release();
    assert!(wait_for(|| sink.deliveries().len() == 3).await);
    assert!(ctx.conversions.is_empty());

    let mut retired = None;
    for _ in 0..100 {
        if let Rebalance::Retired(name) = pool.rebalance().unwrap() {
            retired = Some(name);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(retired, Some(spawned));
    assert_eq!(pool.names(), vec!["Main".to_string()]);
    // Main 始终保留
    assert_eq!(pool.rebalance().unwrap(), Rebalance::Unchanged);

    stop.send(true).unwrap();
    pool.shutdown(Duration::from_secs(1)).await;
    assert!(pool.is_empty());
}

#[tokio::test]
async fn failed_conversion_is_dropped_and_counted() {
    let sink = Arc::new(InMemorySink::new());
    let ctx = Arc::new(context(Arc::new(MemoryClientFactory::new()), sink.clone()));
    let before = metrics().snapshot().conversion_failures;

    ctx.conversions
        .push(ConversionTask::new(
            Arc::new(FailingConverter),
            converter_config(),
            DeviceResponses::default(),
        ))
        .unwrap();
    let (_stop, shutdown) = watch::channel(false);
    let pool = WorkerPool::start(ctx.clone(), 10, 4, shutdown);

    assert!(wait_for(|| metrics().snapshot().conversion_failures > before).await);
    assert!(ctx.conversions.is_empty());
    assert!(sink.deliveries().is_empty());
    pool.shutdown(Duration::from_secs(1)).await;
}
