//! Timing checks for the bridge's hot paths.
//!
//! These tests measure how long the common operations take and fail when
//! they regress badly. Run with:
//!
//! ```sh
//! cargo test -p cas-bridge --test benchmarks -- --ignored --nocapture
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cas_bridge::bridge::convert;
use cas_bridge::catalog::{PvDirectory, PvOptions};
use cas_bridge::engine::{CaNetAddr, CasEngine, Gdd, GddData, WriteOutcome};
use cas_bridge::host::{lock, Attributes, HostValue};
use cas_bridge::{bridge, Events, FieldType, HostEnum, Server};

// ---------------------------------------------------------------------------
// Conversion benchmark
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_attribute_conversion() {
    const ITERATIONS: usize = 10_000;
    let attributes = Attributes::from([
        ("value".to_owned(), HostValue::Seq((0..64).map(HostValue::Int).collect())),
        ("unit".to_owned(), HostValue::Str("mm".into())),
        ("control_limits".to_owned(), HostValue::Seq(vec![HostValue::Int(0), HostValue::Int(100)])),
    ]);

    let start = Instant::now();
    for _ in 0..ITERATIONS {
        let value = convert::attributes_to_value(&attributes, FieldType::Long).unwrap();
        convert::value_to_attributes(&value).unwrap();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / ITERATIONS as u32;

    eprintln!("[bench_attribute_conversion] {ITERATIONS} round trips in {elapsed:?} ({per_iter:?}/iter)");
    assert!(
        per_iter.as_micros() < 500,
        "64-element conversion round trip should take < 500 us, got {per_iter:?}"
    );
}

// ---------------------------------------------------------------------------
// Engine write benchmark
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_engine_writes() {
    const ITERATIONS: usize = 5_000;
    let directory = Arc::new(PvDirectory::new());
    let pv = directory
        .create_pv("BENCH:WRITE", FieldType::Double, 1, PvOptions::default())
        .unwrap();
    let engine = CasEngine::new();
    let _server = Server::new(&engine, directory.clone());
    engine.attach("BENCH:WRITE").unwrap();
    let _subscription = engine
        .subscribe("BENCH:WRITE", engine.vocabulary().value_event_mask())
        .unwrap();

    let start = Instant::now();
    for i in 0..ITERATIONS {
        let value = Gdd::scalar(GddData::Float64(vec![i as f64]));
        assert!(matches!(
            engine.write("BENCH:WRITE", &value),
            WriteOutcome::Completed(status) if status.is_success()
        ));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / ITERATIONS as u32;

    eprintln!("[bench_engine_writes] {ITERATIONS} monitored writes in {elapsed:?} ({per_iter:?}/iter)");
    assert_eq!(pv.value(), HostValue::Float((ITERATIONS - 1) as f64));
    assert!(
        per_iter.as_micros() < 1_000,
        "a monitored write should take < 1 ms, got {per_iter:?}"
    );
}

// ---------------------------------------------------------------------------
// Event posting benchmark
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_post_event() {
    const ITERATIONS: usize = 10_000;
    let directory = Arc::new(PvDirectory::new());
    let pv = directory
        .create_pv("BENCH:POST", FieldType::Double, 1, PvOptions::default())
        .unwrap();
    let engine = CasEngine::new();
    let _server = Server::new(&engine, directory.clone());
    engine.attach("BENCH:POST").unwrap();
    let subscription = engine
        .subscribe("BENCH:POST", engine.vocabulary().value_event_mask())
        .unwrap();

    let events = Events::Value.to_host();
    let attributes = Attributes::from([("value".to_owned(), HostValue::Float(1.0))]);
    let start = Instant::now();
    for _ in 0..ITERATIONS {
        pv.pv().post_event(&events, &attributes).unwrap();
        subscription.events().try_recv().unwrap();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / ITERATIONS as u32;

    eprintln!("[bench_post_event] {ITERATIONS} events in {elapsed:?} ({per_iter:?}/iter)");
    assert_eq!(engine.live_values(), 0, "posted values must all be released");
    assert!(
        per_iter.as_micros() < 200,
        "posting one event should take < 200 us, got {per_iter:?}"
    );
}

// ---------------------------------------------------------------------------
// Client round trip benchmark
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn bench_client_round_trips() {
    const ITERATIONS: usize = 1_000;
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let directory = Arc::new(PvDirectory::new());
    let _pv = directory
        .create_pv("BENCH:CLIENT", FieldType::Long, 1, PvOptions::default())
        .unwrap();
    let engine = CasEngine::new();
    let _server = Server::new(&engine, directory.clone());

    let worker = {
        let engine = engine.clone();
        rt.spawn_blocking(move || {
            let mut guard = lock::ensure();
            while bridge::process(&mut guard, &engine, 0.01).is_ok() {}
        })
    };

    let client = engine
        .client(CaNetAddr::new(Ipv4Addr::LOCALHOST, 5064))
        .with_timeout(Duration::from_secs(1));
    client.connect("BENCH:CLIENT").unwrap();

    let start = Instant::now();
    for i in 0..ITERATIONS as i32 {
        client
            .put("BENCH:CLIENT", Gdd::scalar(GddData::Int32(vec![i])))
            .unwrap();
        client.get("BENCH:CLIENT").unwrap();
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / ITERATIONS as u32;

    eprintln!("[bench_client_round_trips] {ITERATIONS} put+get pairs in {elapsed:?} ({per_iter:?}/iter)");
    engine.shutdown();
    rt.block_on(worker).unwrap();
    assert!(
        per_iter.as_millis() < 5,
        "a queued put+get pair should take < 5 ms, got {per_iter:?}"
    );
}
