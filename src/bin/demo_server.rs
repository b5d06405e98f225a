// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rust port of original_source's example/server.cc, generalized from
// one hard-coded `add` function to a small handful of functions
// exercising every primitive type, served over a named channel instead
// of invoked in-process.
//
// Usage:
//   demo_server <channel>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shmipc_rpc::Registry;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let channel = args.get(1).map(String::as_str).unwrap_or("sample-ipc");

    shmipc_rpc::ShmHandle::clear_storage(&format!("{channel}_slot"));

    let mut registry = Registry::publish(channel).expect("publish channel");
    registry.register2("add", |a: i32, b: i32| a + b).expect("register add");
    registry
        .register2("concat", |a: String, b: String| format!("{a}{b}"))
        .expect("register concat");
    registry.register1("negate", |a: i32| -a).expect("register negate");
    registry
        .register2("scale", |a: f64, b: f64| a * b)
        .expect("register scale");
    registry.register0("ping", || ()).expect("register ping");
    registry.register0("status", || true).expect("register status");

    println!("server: listening on channel {channel:?}");

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }

    while !quit.load(Ordering::Acquire) {
        match registry.listen_once(Some(500)) {
            Ok(true) => {}
            Ok(false) => {}
            Err(e) => eprintln!("server: call failed: {e}"),
        }
    }
    registry.shutdown();
    println!("server: shutting down");
}

fn ctrlc_or_sigterm(f: impl Fn() + Send + 'static) {
    #[cfg(unix)]
    {
        use std::sync::Mutex;
        static CB: std::sync::OnceLock<Mutex<Box<dyn Fn() + Send>>> = std::sync::OnceLock::new();
        CB.get_or_init(|| Mutex::new(Box::new(f)));
        extern "C" fn handler(_: libc::c_int) {
            if let Some(cb) = CB.get() {
                if let Ok(g) = cb.lock() {
                    g();
                }
            }
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = f;
    }
}

#[cfg(unix)]
extern crate libc;
