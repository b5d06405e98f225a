// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process RPC runtime built on POSIX shared memory and
// process-shared synchronization primitives.
//
// A server publishes a named channel and registers typed functions on it;
// clients attached to the same channel invoke those functions by name with
// a list of dynamically typed arguments and synchronously receive a
// dynamically typed result. See `Registry` and `Invoker`.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod semaphore;
pub use semaphore::IpcSemaphore;

mod condition;
pub use condition::IpcCondition;

mod scoped_access;
pub use scoped_access::ScopedAccess;

mod spin_lock;
pub use spin_lock::SpinLock;

mod waiter;
pub use waiter::Waiter;

mod error;
pub use error::{Error, Result};

mod value;
pub use value::{TypeTag, Value};

mod wire;

mod ccr;

mod registry;
pub use registry::{FromValue, IntoReturn, Registry, Signature};

mod invoker;
pub use invoker::Invoker;
