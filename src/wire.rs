// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Call Packet / Result Packet framing.
//
// Port of the positional, non-self-describing wire format read and
// written by original_source's fn_invoker.cc (client side) and
// fn_registry.cc (server side), with one deliberate change: every
// length prefix is a fixed 8-byte host-endian `u64` rather than a
// platform `size_t`, so the format does not depend on the pointer
// width of whichever process built the binary.
//
// Per spec.md §4.3, the format carries no type information of its
// own: a value is `[8-byte length][raw bytes]`, nothing else. The
// registered signature (for Call Packet arguments) or the caller's
// declared return type (for the Result Packet value) is the only
// schema; decoding always happens one level up, in `registry`/
// `invoker`, against that externally known type.
//
// Call Packet: call_id, method name, argument count, then each
// argument as `[8-byte length][raw bytes]`.

use crate::error::{Error, Result};
use crate::value::{TypeTag, Value};

/// A cursor over an in-memory packet buffer, tracking a read offset and
/// erroring (rather than panicking) on truncated input.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| {
            Error::ProtocolError("packet length overflow".to_string())
        })?;
        if end > self.buf.len() {
            return Err(Error::ProtocolError(format!(
                "truncated packet: need {len} bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let arr: [u8; 8] = bytes.try_into().unwrap();
        Ok(u64::from_ne_bytes(arr))
    }

    fn take_string(&mut self) -> Result<String> {
        let len = self.take_u64()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::ProtocolError(format!("invalid UTF-8 in packet: {e}")))
    }
}

fn write_u64(buf: &mut Vec<u8>, n: u64) {
    buf.extend_from_slice(&n.to_ne_bytes());
}

fn write_length_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u64(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Encode a single value as `[u64 length][raw bytes]`, with no type tag.
/// Used for each Call Packet argument and for the Result Packet's `_ret`
/// payload; the reader must already know the type from the registered
/// signature or the caller's declared return type.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    write_length_prefixed(&mut buf, &value.encode_raw());
    buf
}

/// Decode a single value written by [`encode_value`], interpreting its
/// bytes as `tag` (supplied by the caller, never read off the wire).
pub fn decode_value(tag: TypeTag, bytes: &[u8]) -> Result<Value> {
    let mut r = Reader::new(bytes);
    let len = r.take_u64()? as usize;
    let raw = r.take(len)?;
    Value::decode(tag, raw)
}

/// Encode a full Call Packet: call id, method name, argument count, then
/// each argument via [`encode_value`].
pub fn encode_call_packet(call_id: &str, method: &str, args: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_length_prefixed(&mut buf, call_id.as_bytes());
    write_length_prefixed(&mut buf, method.as_bytes());
    write_u64(&mut buf, args.len() as u64);
    for arg in args {
        buf.extend_from_slice(&encode_value(arg));
    }
    buf
}

/// A decoded Call Packet. Arguments are the raw, still-undecoded bytes
/// behind each length prefix — the method's registered `arg_types[i]`
/// is needed to turn them into [`Value`]s, and the packet alone cannot
/// supply that (§4.3).
pub struct CallPacket {
    pub call_id: String,
    pub method: String,
    pub args: Vec<Vec<u8>>,
}

/// Decode a Call Packet written by [`encode_call_packet`], without
/// interpreting argument bytes — that happens in `registry::dispatch`
/// once the method's registered signature is known.
pub fn decode_call_packet(bytes: &[u8]) -> Result<CallPacket> {
    let mut r = Reader::new(bytes);
    let call_id = r.take_string()?;
    let method = r.take_string()?;
    let num_args = r.take_u64()? as usize;
    let mut args = Vec::with_capacity(num_args);
    for _ in 0..num_args {
        let len = r.take_u64()? as usize;
        let raw = r.take(len)?;
        args.push(raw.to_vec());
    }
    Ok(CallPacket {
        call_id,
        method,
        args,
    })
}
