// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// End-to-end tests for the channel RPC path: a registry thread serving
// calls alongside a client thread invoking them in the same process,
// in the style of `tests/test_mutex.rs`'s multi-threaded same-process
// harness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use shmipc_rpc::{Invoker, Registry, TypeTag, Value};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_channel(tag: &str) -> String {
    format!(
        "/shmipc_rpc_test_{tag}_{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

fn spawn_server(channel: String, calls: usize) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut registry = Registry::publish(&channel).expect("publish");
        registry.register2("add", |a: i32, b: i32| a + b).unwrap();
        registry
            .register2("concat", |a: String, b: String| format!("{a}{b}"))
            .unwrap();
        registry.register1("negate", |a: i32| -a).unwrap();
        registry.register2("scale", |a: f64, b: f64| a * b).unwrap();
        registry.register0("ping", || ()).unwrap();
        registry.register0("status", || true).unwrap();
        registry.register1("log", |_msg: String| ()).unwrap();
        for _ in 0..calls {
            registry.listen_once(Some(5_000)).expect("listen_once");
        }
    })
}

#[test]
fn add_round_trip() {
    let channel = unique_channel("add");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke("add", Some(TypeTag::Int32), &[Value::Int32(1), Value::Int32(2)])
        .expect("invoke add");
    assert_eq!(ret, Some(Value::Int32(3)));

    server.join().unwrap();
}

#[test]
fn concat_round_trip() {
    let channel = unique_channel("concat");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke(
            "concat",
            Some(TypeTag::String),
            &[
                Value::String("foo".to_string()),
                Value::String("bar".to_string()),
            ],
        )
        .expect("invoke concat");
    assert_eq!(ret, Some(Value::String("foobar".to_string())));

    server.join().unwrap();
}

#[test]
fn negate_round_trip() {
    let channel = unique_channel("negate");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke("negate", Some(TypeTag::Int32), &[Value::Int32(7)])
        .expect("invoke negate");
    assert_eq!(ret, Some(Value::Int32(-7)));

    server.join().unwrap();
}

#[test]
fn scale_round_trip() {
    let channel = unique_channel("scale");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke(
            "scale",
            Some(TypeTag::Float64),
            &[Value::Float64(2.5), Value::Float64(4.0)],
        )
        .expect("invoke scale");
    assert_eq!(ret, Some(Value::Float64(10.0)));

    server.join().unwrap();
}

#[test]
fn ping_returns_void() {
    let channel = unique_channel("ping");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker.invoke("ping", None, &[]).expect("invoke ping");
    assert_eq!(ret, None);

    server.join().unwrap();
}

#[test]
fn status_with_no_args_and_bool_return() {
    let channel = unique_channel("status");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke("status", Some(TypeTag::Bool), &[])
        .expect("invoke status");
    assert_eq!(ret, Some(Value::Bool(true)));

    server.join().unwrap();
}

#[test]
fn void_return_carries_no_value() {
    let channel = unique_channel("void");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke("log", None, &[Value::String("hello".to_string())])
        .expect("invoke log");
    assert_eq!(ret, None);

    server.join().unwrap();
}

#[test]
fn invoke_as_decodes_into_the_declared_return_type() {
    let channel = unique_channel("invoke_as");
    let server = spawn_server(channel.clone(), 2);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let sum: i32 = invoker
        .invoke_as("add", &[Value::Int32(4), Value::Int32(5)])
        .expect("invoke_as add");
    assert_eq!(sum, 9);

    invoker
        .invoke_void("log", &[Value::String("hi".to_string())])
        .expect("invoke_void log");

    server.join().unwrap();
}

#[test]
fn empty_string_argument() {
    let channel = unique_channel("empty_str");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke(
            "concat",
            Some(TypeTag::String),
            &[Value::String(String::new()), Value::String("bar".to_string())],
        )
        .expect("invoke concat with empty string");
    assert_eq!(ret, Some(Value::String("bar".to_string())));

    server.join().unwrap();
}

#[test]
fn large_string_argument_near_a_megabyte() {
    let channel = unique_channel("large_str");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let big = "x".repeat(1024 * 1024);
    let invoker = Invoker::attach(&channel).expect("attach");
    let ret = invoker
        .invoke(
            "concat",
            Some(TypeTag::String),
            &[Value::String(big.clone()), Value::String(String::new())],
        )
        .expect("invoke concat with a megabyte-sized string");
    assert_eq!(ret, Some(Value::String(big)));

    server.join().unwrap();
}

#[test]
fn sequential_calls_from_one_client_preserve_order() {
    let channel = unique_channel("sequential");
    let server = spawn_server(channel.clone(), 3);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    for (a, b, expected) in [(1, 1, 2), (10, 20, 30), (-5, 5, 0)] {
        let ret = invoker
            .invoke("add", Some(TypeTag::Int32), &[Value::Int32(a), Value::Int32(b)])
            .expect("invoke add");
        assert_eq!(ret, Some(Value::Int32(expected)));
    }

    server.join().unwrap();
}

#[test]
fn two_concurrent_clients_get_correct_distinct_results() {
    let channel = unique_channel("concurrent");
    let server = spawn_server(channel.clone(), 2);
    thread::sleep(Duration::from_millis(50));

    let channel1 = channel.clone();
    let t1 = thread::spawn(move || {
        let invoker = Invoker::attach(&channel1).expect("attach 1");
        invoker
            .invoke("add", Some(TypeTag::Int32), &[Value::Int32(2), Value::Int32(3)])
            .expect("invoke add")
    });

    let channel2 = channel.clone();
    let t2 = thread::spawn(move || {
        let invoker = Invoker::attach(&channel2).expect("attach 2");
        invoker
            .invoke("negate", Some(TypeTag::Int32), &[Value::Int32(9)])
            .expect("invoke negate")
    });

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();
    assert_eq!(r1, Some(Value::Int32(5)));
    assert_eq!(r2, Some(Value::Int32(-9)));

    server.join().unwrap();
}

#[cfg(unix)]
#[test]
fn successful_call_leaves_no_packet_segments_behind() {
    let channel = unique_channel("noleak");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    invoker
        .invoke("add", Some(TypeTag::Int32), &[Value::Int32(1), Value::Int32(1)])
        .expect("invoke add");

    server.join().unwrap();

    let needle_call = format!("{}_call_", &channel[1..]);
    let needle_ret = format!("{}_ret_", &channel[1..]);
    let leftover: Vec<_> = std::fs::read_dir("/dev/shm")
        .expect("read /dev/shm")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(&needle_call) || name.contains(&needle_ret))
        .collect();
    assert!(
        leftover.is_empty(),
        "Call/Result Packet segments were not cleaned up: {leftover:?}"
    );
}

#[cfg(unix)]
#[test]
fn failed_call_leaves_no_ret_size_segment_behind() {
    let channel = unique_channel("noleak_err");
    let server = spawn_server(channel.clone(), 1);
    thread::sleep(Duration::from_millis(50));

    let invoker = Invoker::attach(&channel).expect("attach");
    invoker
        .invoke("missing", Some(TypeTag::Int32), &[])
        .expect_err("missing is not registered");

    server.join().unwrap();

    let needle = format!("{}_ret_size_", &channel[1..]);
    let leftover: Vec<_> = std::fs::read_dir("/dev/shm")
        .expect("read /dev/shm")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(&needle))
        .collect();
    assert!(
        leftover.is_empty(),
        "a failed call should never create a Result Packet: {leftover:?}"
    );
}

#[cfg(unix)]
#[test]
fn shutdown_removes_the_ccr_from_the_shm_namespace() {
    let channel = unique_channel("shutdown");
    let registry = Registry::publish(&channel).expect("publish");
    registry.shutdown();

    let needle = format!("{}_slot", &channel[1..]);
    let leftover: Vec<_> = std::fs::read_dir("/dev/shm")
        .expect("read /dev/shm")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(&needle))
        .collect();
    assert!(
        leftover.is_empty(),
        "Registry::shutdown should unlink the CCR's slot: {leftover:?}"
    );
}
