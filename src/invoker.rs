// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client-side call path: attach to a published channel, post a Call
// Packet, and block for the matching Result Packet.
//
// Port of the client protocol in original_source's fn_invoker.cc:
// claim the slot, hand off the packet, wait for the server to clear
// it, then read back whatever it left behind.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::ccr::{ChannelControlRegion, Status};
use crate::error::{Error, Result};
use crate::registry::FromValue;
use crate::value::{TypeTag, Value};
use crate::wire;
use crate::{ShmHandle, ShmOpenMode};

/// A client handle attached to a published channel.
pub struct Invoker {
    ccr: ChannelControlRegion,
}

impl Invoker {
    /// Attach to an existing channel. Fails immediately if it is not
    /// published yet; see [`Self::attach_wait`] to tolerate a startup race.
    pub fn attach(channel: &str) -> Result<Self> {
        let ccr = ChannelControlRegion::open(channel)?;
        Ok(Self { ccr })
    }

    /// Attach to a channel, retrying until it is published or `deadline`
    /// passes.
    pub fn attach_wait(channel: &str, deadline: Instant) -> Result<Self> {
        let ccr = ChannelControlRegion::open_wait(channel, deadline)?;
        Ok(Self { ccr })
    }

    pub fn channel(&self) -> &str {
        self.ccr.channel()
    }

    /// Call `method` with `args`, declaring `return_type` (`None` for a
    /// void-returning method), and block until the server replies.
    /// Equivalent to `invoke_timeout(method, return_type, args, None)`.
    ///
    /// Per spec.md §4.3/§4.5 the wire carries no type tag of its own: the
    /// Result Packet's `_ret` region is exactly `ret_size` raw bytes (§3),
    /// and `return_type` is the only schema available to decode it.
    /// Declaring the wrong type —
    /// including a value where void was declared, or vice versa — is a
    /// client-side [`Error::DecodeError`], never a server fault.
    pub fn invoke(
        &self,
        method: &str,
        return_type: Option<TypeTag>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        self.invoke_timeout(method, return_type, args, None)
    }

    /// Call `method` with `args`, blocking for at most `timeout_ms`
    /// milliseconds at each wait point.
    ///
    /// Two distinct timeouts are possible, and they mean different things:
    /// - the slot never becomes free to claim (nobody is mid-call on our
    ///   behalf yet) — reported as [`Error::ChannelUnavailable`], the slot
    ///   is untouched;
    /// - our call was posted but the server never replied — a "claim
    ///   timeout" per §4.5/§9. We hold the lock at that point, so we can
    ///   safely check whether the slot still holds *our own* call id (no
    ///   one else could have claimed it without clearing ours first) and,
    ///   if so, clear it ourselves so the channel isn't wedged forever.
    ///   Reported as [`Error::ProtocolError`] — the call's outcome is
    ///   genuinely unknown, it may yet complete server-side after we give
    ///   up on it.
    pub fn invoke_timeout(
        &self,
        method: &str,
        return_type: Option<TypeTag>,
        args: &[Value],
        timeout_ms: Option<u64>,
    ) -> Result<Option<Value>> {
        let call_id = Uuid::new_v4().to_string();
        let packet = wire::encode_call_packet(&call_id, method, args);

        let call_shm_name = self.ccr.call_packet_name(&call_id);
        let call_shm = ShmHandle::acquire(&call_shm_name, packet.len().max(1), ShmOpenMode::Create)
            .map_err(|source| Error::SmsCreateFailed {
                name: call_shm_name,
                source,
            })?;
        call_shm.write(0, &packet)?;

        self.ccr.lock()?;
        if !self.ccr.wait_until_idle(timeout_ms)? {
            self.ccr.unlock()?;
            return Err(Error::ChannelUnavailable(self.ccr.channel().to_string()));
        }
        self.ccr.occupy(&call_id, packet.len() as u64)?;
        self.ccr.unlock()?;
        self.ccr.broadcast()?;

        log::debug!(
            "invoked {method:?} on channel {:?} (call {call_id})",
            self.ccr.channel()
        );

        self.ccr.lock()?;
        let completed = self.ccr.wait_until_idle(timeout_ms)?;
        if !completed {
            // Claim timeout: clear the slot ourselves iff it still holds
            // our own call id. If it has already gone idle or moved on to
            // a different id, the server (or a prior clear) got there
            // first and there is nothing left to reclaim.
            if self.ccr.read_id().unwrap_or_default() == call_id {
                self.ccr.zero_slot()?;
            }
            self.ccr.unlock()?;
            self.ccr.broadcast()?;
            drop(call_shm);
            return Err(Error::ProtocolError(format!(
                "call {call_id} to {method:?} timed out waiting for a reply; outcome unknown"
            )));
        }
        let status = self.ccr.read_status()?;
        self.ccr.unlock()?;

        // The Call Packet belongs to the server, which unlinks it once it
        // has read it.
        drop(call_shm);

        if status != Status::Ok {
            return Err(match status {
                Status::NotFound => Error::FunctionNotFound(method.to_string()),
                // The status byte distinguishes these two (see `ccr::Status`
                // and `registry::dispatch`), but per §4.3 the wire carries
                // no numeric payload alongside it, so the registered arity
                // / expected type that `Error::ArgCountMismatch` /
                // `Error::ArgTypeMismatch` want to report isn't available
                // here — those structured variants stay reserved for
                // errors raised locally, where the fields are known. A
                // `ProtocolError` with a distinguishing message is what the
                // caller actually gets back; see DESIGN.md.
                Status::ArgCountMismatch => Error::ProtocolError(format!(
                    "{method:?} rejected the supplied argument count"
                )),
                Status::ArgTypeMismatch => Error::ProtocolError(format!(
                    "{method:?} rejected an argument's type"
                )),
                Status::DispatcherFailed => {
                    Error::ProtocolError(format!("{method:?} failed on the server"))
                }
                Status::Unsupported => Error::UnsupportedType(method.to_string()),
                Status::Ok => unreachable!(),
            });
        }

        let ret_size_name = self.ccr.ret_size_name(&call_id);
        let ret_size_shm = ShmHandle::acquire(&ret_size_name, 8, ShmOpenMode::Open)
            .map_err(|source| Error::SmsOpenFailed {
                name: ret_size_name,
                source,
            })?;
        let size_bytes = ret_size_shm.read(0, 8)?;
        let ret_size = u64::from_ne_bytes(size_bytes.try_into().unwrap()) as usize;
        ret_size_shm.unlink();
        drop(ret_size_shm);

        if ret_size == 0 {
            if let Some(expected) = return_type {
                return Err(Error::DecodeError(format!(
                    "{method:?} returned void, but caller declared return type {expected:?}"
                )));
            }
            return Ok(None);
        }

        let ret_name = self.ccr.ret_name(&call_id);
        let ret_shm = ShmHandle::acquire(&ret_name, ret_size, ShmOpenMode::Open)
            .map_err(|source| Error::SmsOpenFailed {
                name: ret_name,
                source,
            })?;
        let bytes = ret_shm.read(0, ret_size)?;
        ret_shm.unlink();

        let Some(expected) = return_type else {
            // We must still drain the Result Packet's value region to
            // avoid leaking the segment, even though we can't decode it
            // without a declared type.
            return Err(Error::DecodeError(format!(
                "{method:?} returned a value, but caller declared return type void"
            )));
        };
        let value = Value::decode(expected, &bytes)?;
        Ok(Some(value))
    }
}

impl Invoker {
    /// Call `method` declaring the expected return type `R`, decoding the
    /// reply into it.
    pub fn invoke_as<R: FromValue>(&self, method: &str, args: &[Value]) -> Result<R> {
        let ret = self.invoke(method, Some(R::type_tag()), args)?;
        match ret {
            Some(value) => R::from_value(value),
            None => Err(Error::DecodeError(format!(
                "{method:?} returned void, but caller declared return type {:?}",
                R::type_tag()
            ))),
        }
    }

    /// Call `method` declaring that it returns `void`.
    pub fn invoke_void(&self, method: &str, args: &[Value]) -> Result<()> {
        match self.invoke(method, None, args)? {
            None => Ok(()),
            Some(value) => Err(Error::DecodeError(format!(
                "{method:?} returned a {:?} value, but caller declared return type void",
                value.tag()
            ))),
        }
    }

    /// Call `method` declaring the expected return type as a [`TypeTag`],
    /// for callers that only have the tag (not a concrete Rust type) at
    /// hand — e.g. building on `Registry::introspect`'s output. A thin
    /// alias over [`Self::invoke`], which already enforces the declared
    /// type against the reply.
    pub fn invoke_checked(
        &self,
        method: &str,
        expected_return: Option<TypeTag>,
        args: &[Value],
    ) -> Result<Option<Value>> {
        self.invoke(method, expected_return, args)
    }
}

/// A `timeout_ms` helper turning a `Duration` into the deadline the ccr
/// wait primitives expect, used by demo binaries and tests.
pub fn deadline_from(timeout: Duration) -> Instant {
    Instant::now() + timeout
}
