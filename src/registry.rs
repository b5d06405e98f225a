// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Typed function registry and server-side dispatch loop.
//
// original_source's fn_registry.cc keeps a `std::map<std::string, Fn>`
// of type-erased `std::any`-based closures and dispatches by walking
// each argument's `typeid`. Here the same table-driven dispatch is
// built on monomorphized `registerN` generics and the `FromValue` /
// `IntoReturn` traits instead of runtime type identity.

use std::collections::HashMap;

use crate::ccr::{ChannelControlRegion, Status};
use crate::error::{Error, Result};
use crate::value::{TypeTag, Value};
use crate::wire;
use crate::{ShmHandle, ShmOpenMode};

/// The parameter type list of a registered function, in order.
pub type Signature = Vec<TypeTag>;

/// Convert a [`Value`] into a concrete argument type. Implemented for
/// every member of the primitive set `P`.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
    fn type_tag() -> TypeTag;
}

macro_rules! impl_from_value {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::$variant(v) => Ok(v),
                    // Unreachable via `decode_arg` below, which always decodes
                    // against `Self::type_tag()` first. Kept for callers that
                    // construct a `Value` by hand and convert it directly.
                    _ => Err(Error::ArgTypeMismatch {
                        index: 0,
                        expected: TypeTag::$variant,
                    }),
                }
            }

            fn type_tag() -> TypeTag {
                TypeTag::$variant
            }
        }
    };
}

impl_from_value!(i32, Int32);
impl_from_value!(f32, Float32);
impl_from_value!(f64, Float64);
impl_from_value!(bool, Bool);
impl_from_value!(String, String);

/// Convert a function's Rust return value into the wire's dynamically
/// typed result, or `None` for a void return.
pub trait IntoReturn {
    fn into_return(self) -> Option<Value>;
    fn type_tag() -> Option<TypeTag>;
}

macro_rules! impl_into_return {
    ($ty:ty, $variant:ident) => {
        impl IntoReturn for $ty {
            fn into_return(self) -> Option<Value> {
                Some(Value::$variant(self))
            }

            fn type_tag() -> Option<TypeTag> {
                Some(TypeTag::$variant)
            }
        }
    };
}

impl_into_return!(i32, Int32);
impl_into_return!(f32, Float32);
impl_into_return!(f64, Float64);
impl_into_return!(bool, Bool);
impl_into_return!(String, String);

impl IntoReturn for () {
    fn into_return(self) -> Option<Value> {
        None
    }

    fn type_tag() -> Option<TypeTag> {
        None
    }
}

/// A Call Packet argument's still-undecoded raw bytes, one per position.
type RawArgs = Vec<Vec<u8>>;

type RegisteredFn = Box<dyn Fn(RawArgs) -> Result<Option<Value>> + Send + Sync>;

struct Entry {
    signature: Signature,
    func: RegisteredFn,
}

fn check_arg_count(signature: &Signature, args: &RawArgs) -> Result<()> {
    if signature.len() != args.len() {
        return Err(Error::ArgCountMismatch {
            expected: signature.len(),
            actual: args.len(),
        });
    }
    Ok(())
}

/// Decode argument `index`'s raw bytes as `T`, per spec.md §4.2 step 3:
/// the registered signature's `arg_types[i]` is the only schema, so this
/// is the one and only place a Call Packet argument's type is decided.
fn decode_arg<T: FromValue>(raw: &[u8], index: usize) -> Result<T> {
    let value = Value::decode(T::type_tag(), raw).map_err(|_| Error::ArgTypeMismatch {
        index,
        expected: T::type_tag(),
    })?;
    T::from_value(value)
}

/// Publishes a named channel and owns the table of functions callers may
/// invoke on it.
pub struct Registry {
    ccr: ChannelControlRegion,
    functions: HashMap<String, Entry>,
}

impl Registry {
    /// Publish a new channel. Fails if a channel with this name is already
    /// published.
    pub fn publish(channel: &str) -> Result<Self> {
        let ccr = ChannelControlRegion::create(channel)?;
        log::info!("published channel {channel:?}");
        Ok(Self {
            ccr,
            functions: HashMap::new(),
        })
    }

    pub fn channel(&self) -> &str {
        self.ccr.channel()
    }

    /// Unlink the channel's CCR (slot + sync pair) from the shm namespace.
    /// Per spec.md §5, the server is the sole unlinker of these names; call
    /// this once, after `listen`/`listen_once` has returned for good, not
    /// while another thread may still be serving calls on this `Registry`.
    pub fn shutdown(&self) {
        self.ccr.unlink();
        log::info!("unpublished channel {:?}", self.channel());
    }

    /// The parameter signature of a registered function, if any.
    pub fn introspect(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name).map(|e| &e.signature)
    }

    fn insert(&mut self, name: &str, signature: Signature, func: RegisteredFn) -> Result<()> {
        if self.functions.contains_key(name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        self.functions.insert(name.to_string(), Entry { signature, func });
        Ok(())
    }

    /// Register a zero-argument function.
    pub fn register0<F, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: IntoReturn,
    {
        let signature: Signature = vec![];
        self.insert(
            name,
            signature.clone(),
            Box::new(move |args: RawArgs| {
                check_arg_count(&signature, &args)?;
                Ok(f().into_return())
            }),
        )
    }

    /// Register a one-argument function.
    pub fn register1<F, A, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: FromValue,
        R: IntoReturn,
    {
        let signature = vec![A::type_tag()];
        self.insert(
            name,
            signature.clone(),
            Box::new(move |args: RawArgs| {
                check_arg_count(&signature, &args)?;
                let a = decode_arg::<A>(&args[0], 0)?;
                Ok(f(a).into_return())
            }),
        )
    }

    /// Register a two-argument function.
    pub fn register2<F, A, B, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A, B) -> R + Send + Sync + 'static,
        A: FromValue,
        B: FromValue,
        R: IntoReturn,
    {
        let signature = vec![A::type_tag(), B::type_tag()];
        self.insert(
            name,
            signature.clone(),
            Box::new(move |args: RawArgs| {
                check_arg_count(&signature, &args)?;
                let a = decode_arg::<A>(&args[0], 0)?;
                let b = decode_arg::<B>(&args[1], 1)?;
                Ok(f(a, b).into_return())
            }),
        )
    }

    /// Register a three-argument function.
    pub fn register3<F, A, B, C, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A, B, C) -> R + Send + Sync + 'static,
        A: FromValue,
        B: FromValue,
        C: FromValue,
        R: IntoReturn,
    {
        let signature = vec![A::type_tag(), B::type_tag(), C::type_tag()];
        self.insert(
            name,
            signature.clone(),
            Box::new(move |args: RawArgs| {
                check_arg_count(&signature, &args)?;
                let a = decode_arg::<A>(&args[0], 0)?;
                let b = decode_arg::<B>(&args[1], 1)?;
                let c = decode_arg::<C>(&args[2], 2)?;
                Ok(f(a, b, c).into_return())
            }),
        )
    }

    /// Register a four-argument function.
    pub fn register4<F, A, B, C, D, R>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A, B, C, D) -> R + Send + Sync + 'static,
        A: FromValue,
        B: FromValue,
        C: FromValue,
        D: FromValue,
        R: IntoReturn,
    {
        let signature = vec![A::type_tag(), B::type_tag(), C::type_tag(), D::type_tag()];
        self.insert(
            name,
            signature.clone(),
            Box::new(move |args: RawArgs| {
                check_arg_count(&signature, &args)?;
                let a = decode_arg::<A>(&args[0], 0)?;
                let b = decode_arg::<B>(&args[1], 1)?;
                let c = decode_arg::<C>(&args[2], 2)?;
                let d = decode_arg::<D>(&args[3], 3)?;
                Ok(f(a, b, c, d).into_return())
            }),
        )
    }

    fn dispatch(&self, name: &str, args: RawArgs) -> std::result::Result<Option<Value>, Status> {
        let entry = match self.functions.get(name) {
            Some(e) => e,
            None => {
                log::warn!("no function named {name:?} on channel {:?}", self.channel());
                return Err(Status::NotFound);
            }
        };
        match (entry.func)(args) {
            Ok(ret) => Ok(ret),
            Err(Error::ArgCountMismatch { expected, actual }) => {
                log::warn!(
                    "{name:?} called with {actual} argument(s), expected {expected}"
                );
                Err(Status::ArgCountMismatch)
            }
            Err(Error::ArgTypeMismatch { index, expected }) => {
                log::warn!("{name:?} argument {index} did not decode as {expected:?}");
                Err(Status::ArgTypeMismatch)
            }
            Err(e) => {
                log::error!("dispatch of {name:?} failed: {e}");
                Err(Status::DispatcherFailed)
            }
        }
    }

    /// Serve one call if one arrives within `timeout_ms` (blocks forever if
    /// `None`). Returns `Ok(false)` on timeout with no call served.
    pub fn listen_once(&self, timeout_ms: Option<u64>) -> Result<bool> {
        self.ccr.lock()?;
        if !self.ccr.wait_until_occupied(timeout_ms)? {
            self.ccr.unlock()?;
            return Ok(false);
        }

        let call_id = self.ccr.read_id()?;
        let packet_size = self.ccr.read_packet_size()? as usize;

        let call_shm_name = self.ccr.call_packet_name(&call_id);
        let packet = ShmHandle::acquire(&call_shm_name, packet_size.max(1), ShmOpenMode::Open)
            .map_err(|source| Error::SmsOpenFailed {
                name: call_shm_name.clone(),
                source,
            })?;
        let bytes = packet.read(0, packet_size)?;
        packet.unlink();
        drop(packet);

        let outcome = wire::decode_call_packet(&bytes).and_then(|call| {
            Ok((call.method.clone(), self.dispatch(&call.method, call.args)))
        });

        let (status, ret) = match outcome {
            Ok((_, Ok(ret))) => (Status::Ok, ret),
            Ok((_, Err(status))) => (status, None),
            Err(e) => {
                log::error!("malformed call packet on channel {:?}: {e}", self.channel());
                (Status::DispatcherFailed, None)
            }
        };

        // Only a successful call produces a Result Packet. On any other
        // status the client returns before ever looking for `_ret_size`/
        // `_ret` (see `Invoker::invoke_timeout`), so creating them here
        // would just leak the segments into the shm namespace forever —
        // `PlatformShm`'s destructor deliberately never unlinks.
        if status == Status::Ok {
            // Per spec.md §3, `_ret_size` holds the raw payload size and
            // `_ret` holds exactly that many bytes of raw value — no
            // length prefix of its own rides along on top.
            let ret_bytes = ret.as_ref().map(Value::encode_raw);
            let ret_size = ret_bytes.as_ref().map_or(0u64, |b| b.len() as u64);

            let ret_size_name = self.ccr.ret_size_name(&call_id);
            let ret_size_shm = ShmHandle::acquire(&ret_size_name, 8, ShmOpenMode::Create)
                .map_err(|source| Error::SmsCreateFailed {
                    name: ret_size_name,
                    source,
                })?;
            ret_size_shm.write(0, &ret_size.to_ne_bytes())?;

            if let Some(bytes) = &ret_bytes {
                let ret_name = self.ccr.ret_name(&call_id);
                let ret_shm = ShmHandle::acquire(&ret_name, bytes.len(), ShmOpenMode::Create)
                    .map_err(|source| Error::SmsCreateFailed {
                        name: ret_name,
                        source,
                    })?;
                ret_shm.write(0, bytes)?;
            }
        }

        self.ccr.write_status(status)?;
        self.ccr.zero_slot()?;
        self.ccr.unlock()?;
        self.ccr.broadcast()?;
        Ok(true)
    }

    /// Serve calls forever, one at a time, until the process is killed.
    pub fn listen(&self) -> Result<()> {
        loop {
            self.listen_once(None)?;
        }
    }
}
