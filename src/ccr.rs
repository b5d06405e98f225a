// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The Channel Control Region: the single rendezvous slot a server
// publishes and clients attach to, plus the process-shared mutex and
// condition variable that guard it.
//
// Port of the wait/signal handshake in original_source's
// shm_manager.cc onto `IpcMutex`/`IpcCondition`, in the predicate-loop
// style of `Waiter::wait_if` (waiter.rs) rather than a literal
// spin loop: every wait here is "lock, while predicate, cond.wait,
// re-check", never a hot poll.
//
// Slot layout (`SLOT_SIZE` bytes total):
//   [0..128)   call id, UTF-8, zero-padded — `id[0] == 0` means idle.
//   [128..136) u64 host-endian call packet size, set by the caller
//              before occupying the slot.
//   [136..137) status byte, set by the server before it clears `id`.
//              Survives the idle transition because `zero_slot` only
//              clears the id field, never size or status.

use std::time::Instant;

use crate::error::{Error, Result};
use crate::{IpcCondition, IpcMutex, ShmHandle, ShmOpenMode};

const ID_OFFSET: usize = 0;
const ID_SIZE: usize = 128;
const SIZE_OFFSET: usize = ID_SIZE;
const SIZE_SIZE: usize = 8;
const STATUS_OFFSET: usize = SIZE_OFFSET + SIZE_SIZE;
const STATUS_SIZE: usize = 1;
pub const SLOT_SIZE: usize = STATUS_OFFSET + STATUS_SIZE;

/// Server-reported outcome of a call, carried in the slot's status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    ArgCountMismatch,
    ArgTypeMismatch,
    DispatcherFailed,
    Unsupported,
}

impl Status {
    fn to_byte(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::NotFound => 1,
            Status::ArgCountMismatch => 2,
            Status::ArgTypeMismatch => 3,
            Status::DispatcherFailed => 4,
            Status::Unsupported => 5,
        }
    }

    fn from_byte(b: u8) -> Result<Status> {
        match b {
            0 => Ok(Status::Ok),
            1 => Ok(Status::NotFound),
            2 => Ok(Status::ArgCountMismatch),
            3 => Ok(Status::ArgTypeMismatch),
            4 => Ok(Status::DispatcherFailed),
            5 => Ok(Status::Unsupported),
            other => Err(Error::ChannelCorrupted(format!(
                "unknown status byte {other}"
            ))),
        }
    }
}

/// The control region for a named channel: one slot, one mutex, one
/// condition variable, shared by every process attached to `channel`.
pub struct ChannelControlRegion {
    channel: String,
    slot: ShmHandle,
    mutex: IpcMutex,
    cond: IpcCondition,
}

impl ChannelControlRegion {
    fn slot_name(channel: &str) -> String {
        format!("{channel}_slot")
    }

    fn mutex_name(channel: &str) -> String {
        format!("{channel}_sync_mutex")
    }

    fn cond_name(channel: &str) -> String {
        format!("{channel}_sync_cond")
    }

    /// Publish a new channel. Fails if one with this name already exists.
    pub fn create(channel: &str) -> Result<Self> {
        let slot = ShmHandle::acquire(&Self::slot_name(channel), SLOT_SIZE, ShmOpenMode::Create)
            .map_err(|source| Error::SmsCreateFailed {
                name: Self::slot_name(channel),
                source,
            })?;
        slot.write(0, &[0u8; SLOT_SIZE]).map_err(Error::Io)?;
        let mutex = IpcMutex::open(&Self::mutex_name(channel)).map_err(Error::MutexInitFailed)?;
        let cond = IpcCondition::open(&Self::cond_name(channel)).map_err(Error::CondInitFailed)?;
        Ok(Self {
            channel: channel.to_string(),
            slot,
            mutex,
            cond,
        })
    }

    /// Attach to an existing channel. Fails immediately if it does not exist.
    pub fn open(channel: &str) -> Result<Self> {
        let slot = ShmHandle::acquire(&Self::slot_name(channel), SLOT_SIZE, ShmOpenMode::Open)
            .map_err(|source| Error::SmsOpenFailed {
                name: Self::slot_name(channel),
                source,
            })?;
        let mutex = IpcMutex::open(&Self::mutex_name(channel)).map_err(Error::MutexInitFailed)?;
        let cond = IpcCondition::open(&Self::cond_name(channel)).map_err(Error::CondInitFailed)?;
        Ok(Self {
            channel: channel.to_string(),
            slot,
            mutex,
            cond,
        })
    }

    /// Attach to an existing channel, retrying until it appears or
    /// `deadline` passes. Used by clients that may race channel publication.
    pub fn open_wait(channel: &str, deadline: Instant) -> Result<Self> {
        loop {
            match Self::open(channel) {
                Ok(ccr) => return Ok(ccr),
                Err(_) if Instant::now() >= deadline => {
                    return Err(Error::ChannelUnavailable(channel.to_string()))
                }
                Err(_) => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the CCR's backing names from the shm namespace: the slot
    /// region and the sync pair. Per spec.md §5, "server unlinks CCR at
    /// shutdown" — the server is this region's sole owner, so this is
    /// safe to call once, on orderly shutdown, and never from a client.
    pub fn unlink(&self) {
        self.slot.unlink();
        IpcMutex::clear_storage(&Self::mutex_name(&self.channel));
        IpcCondition::clear_storage(&Self::cond_name(&self.channel));
    }

    pub fn lock(&self) -> Result<()> {
        self.mutex.lock().map_err(Error::Io)
    }

    pub fn unlock(&self) -> Result<()> {
        self.mutex.unlock().map_err(Error::Io)
    }

    /// Wake every process blocked in [`Self::wait_until_idle`] or
    /// [`Self::wait_until_occupied`].
    pub fn broadcast(&self) -> Result<()> {
        self.cond.broadcast().map_err(Error::Io)
    }

    /// `id[0] == 0`: the slot holds no in-flight call.
    pub fn is_idle(&self) -> Result<bool> {
        let byte = self.slot.read(ID_OFFSET, 1).map_err(Error::Io)?;
        Ok(byte[0] == 0)
    }

    /// Block (releasing and reacquiring the lock around each wake) until
    /// the slot becomes idle, or `timeout_ms` elapses. Caller must hold
    /// the lock. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout_ms: Option<u64>) -> Result<bool> {
        while !self.is_idle()? {
            if !self.cond.wait(&self.mutex, timeout_ms).map_err(Error::Io)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Block until the slot becomes occupied (a call has been posted), or
    /// `timeout_ms` elapses. Caller must hold the lock. Returns `false` on
    /// timeout.
    pub fn wait_until_occupied(&self, timeout_ms: Option<u64>) -> Result<bool> {
        while self.is_idle()? {
            if !self.cond.wait(&self.mutex, timeout_ms).map_err(Error::Io)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Occupy the slot: write the call id and the call packet size.
    /// Caller must hold the lock and have already confirmed the slot idle.
    pub fn occupy(&self, call_id: &str, packet_size: u64) -> Result<()> {
        let mut id_bytes = [0u8; ID_SIZE];
        let src = call_id.as_bytes();
        if src.len() >= ID_SIZE {
            return Err(Error::ProtocolError(format!(
                "call id {call_id:?} exceeds {ID_SIZE} bytes"
            )));
        }
        id_bytes[..src.len()].copy_from_slice(src);
        self.slot.write(ID_OFFSET, &id_bytes).map_err(Error::Io)?;
        self.slot
            .write(SIZE_OFFSET, &packet_size.to_ne_bytes())
            .map_err(Error::Io)?;
        Ok(())
    }

    /// Read the call id currently in the slot.
    pub fn read_id(&self) -> Result<String> {
        let bytes = self.slot.read(ID_OFFSET, ID_SIZE).map_err(Error::Io)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(ID_SIZE);
        String::from_utf8(bytes[..end].to_vec())
            .map_err(|e| Error::ChannelCorrupted(format!("non-UTF-8 call id: {e}")))
    }

    /// Read the call packet size currently in the slot.
    pub fn read_packet_size(&self) -> Result<u64> {
        let bytes = self.slot.read(SIZE_OFFSET, SIZE_SIZE).map_err(Error::Io)?;
        let arr: [u8; 8] = bytes.try_into().unwrap();
        Ok(u64::from_ne_bytes(arr))
    }

    /// Write the server's outcome for the call currently occupying the slot.
    /// Must be called before [`Self::zero_slot`].
    pub fn write_status(&self, status: Status) -> Result<()> {
        self.slot
            .write(STATUS_OFFSET, &[status.to_byte()])
            .map_err(Error::Io)
    }

    /// Read the most recently written status byte.
    pub fn read_status(&self) -> Result<Status> {
        let byte = self.slot.read(STATUS_OFFSET, STATUS_SIZE).map_err(Error::Io)?;
        Status::from_byte(byte[0])
    }

    /// Return the slot to idle by clearing only the id field. `size` and
    /// `status` are left untouched so the client can still read them after
    /// waking from [`Self::wait_until_idle`].
    pub fn zero_slot(&self) -> Result<()> {
        self.slot.write(ID_OFFSET, &[0u8; ID_SIZE]).map_err(Error::Io)
    }

    /// SMS name for the Call Packet region of `call_id` on this channel.
    pub fn call_packet_name(&self, call_id: &str) -> String {
        format!("{}_call_{call_id}", self.channel)
    }

    /// SMS name for the Result Packet's size region of `call_id`.
    pub fn ret_size_name(&self, call_id: &str) -> String {
        format!("{}_ret_size_{call_id}", self.channel)
    }

    /// SMS name for the Result Packet's value region of `call_id`.
    pub fn ret_name(&self, call_id: &str) -> String {
        format!("{}_ret_{call_id}", self.channel)
    }
}
