// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rust port of original_source's example/client.cc: attaches to a
// published channel and calls `add`, printing the result.
//
// Usage:
//   demo_client <channel>

use std::time::{Duration, Instant};

use shmipc_rpc::{Invoker, TypeTag, Value};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let channel = args.get(1).map(String::as_str).unwrap_or("sample-ipc");

    println!("client: attaching to channel {channel:?}...");
    let invoker = Invoker::attach_wait(channel, Instant::now() + Duration::from_secs(5))
        .expect("attach to channel");

    let ret = invoker
        .invoke("add", Some(TypeTag::Int32), &[Value::Int32(1), Value::Int32(2)])
        .expect("invoke add");
    println!("add(1, 2) = {ret:?}");

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
    println!("concat(\"foo\", \"bar\") = {ret:?}");

    invoker
        .invoke("ping", None, &[])
        .expect("invoke ping");
    println!("ping() = ()");

    let ret = invoker
        .invoke("status", Some(TypeTag::Bool), &[])
        .expect("invoke status");
    println!("status() = {ret:?}");
}
