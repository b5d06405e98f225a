// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform named counting semaphore.
// Delegates to platform::PlatformSemaphore (POSIX sem_open or a Windows
// kernel semaphore). Used internally by `IpcCondition`'s Windows emulation;
// exported as a standalone primitive since it is also useful on its own.

use std::io;

use crate::platform::PlatformSemaphore;

/// A named, inter-process counting semaphore.
pub struct IpcSemaphore {
    inner: PlatformSemaphore,
}

impl IpcSemaphore {
    /// Open (or create) a named semaphore with `initial_count`.
    pub fn open(name: &str, initial_count: u32) -> io::Result<Self> {
        let inner = PlatformSemaphore::open(name, initial_count)?;
        Ok(Self { inner })
    }

    /// Decrement the semaphore, blocking until it is non-zero or
    /// `timeout_ms` elapses. `None` blocks indefinitely.
    /// Returns `Ok(false)` on timeout.
    pub fn wait(&self, timeout_ms: Option<u64>) -> io::Result<bool> {
        self.inner.wait(timeout_ms)
    }

    /// Increment the semaphore by `count`.
    pub fn post(&self, count: u32) -> io::Result<()> {
        self.inner.post(count)
    }

    /// Remove the backing storage for a named semaphore (static helper).
    pub fn clear_storage(name: &str) {
        PlatformSemaphore::clear_storage(name);
    }
}
