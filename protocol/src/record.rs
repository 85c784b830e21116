//! Fixed-layout trace records.
//!
//! One [`TraceRecord`] is appended per interposed synchronization call. The
//! on-disk format is the in-memory `#[repr(C)]` layout, native endianness,
//! naturally aligned; any change to these types is a compatibility break
//! between tracer and analyzer.

use thiserror::Error;

/// Number of call-stack slots stored per record. Unused slots are zero; the
/// first zero terminates the meaningful prefix.
pub const CALLER_DEPTH: usize = 8;

/// Maximum thread-name length including the terminating NUL
/// (the pthread_setname_np limit).
pub const THREAD_NAME_LEN: usize = 16;

/// What the traced call did. Stored as the raw `u32` in [`TraceRecord`];
/// the tag describes the action attempted, not its outcome: failed calls
/// carry a non-zero `rc` with the same tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LockAction {
    MutexLock = 0,
    MutexUnlock = 1,
    RwReadLock = 2,
    RwWriteLock = 3,
    RwUnlock = 4,
    MutexInit = 5,
    MutexDestroy = 6,
    RwInit = 7,
    RwDestroy = 8,
    ThreadExit = 9,
}

impl LockAction {
    /// Decode the raw tag from a record; `None` for values written by a
    /// newer (or corrupt) tracer.
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::MutexLock,
            1 => Self::MutexUnlock,
            2 => Self::RwReadLock,
            3 => Self::RwWriteLock,
            4 => Self::RwUnlock,
            5 => Self::MutexInit,
            6 => Self::MutexDestroy,
            7 => Self::RwInit,
            8 => Self::RwDestroy,
            9 => Self::ThreadExit,
            _ => return None,
        })
    }

    pub fn is_acquire(self) -> bool {
        matches!(self, Self::MutexLock | Self::RwReadLock | Self::RwWriteLock)
    }

    pub fn is_release(self) -> bool {
        matches!(self, Self::MutexUnlock | Self::RwUnlock)
    }

    pub fn is_mutex(self) -> bool {
        matches!(
            self,
            Self::MutexLock | Self::MutexUnlock | Self::MutexInit | Self::MutexDestroy
        )
    }

    pub fn is_rwlock(self) -> bool {
        matches!(
            self,
            Self::RwReadLock
                | Self::RwWriteLock
                | Self::RwUnlock
                | Self::RwInit
                | Self::RwDestroy
        )
    }

    /// Short lowercase label used in trace listings.
    pub fn label(self) -> &'static str {
        match self {
            Self::MutexLock => "lock",
            Self::MutexUnlock => "unlock",
            Self::RwReadLock => "readlock",
            Self::RwWriteLock => "writelock",
            Self::RwUnlock => "rwunlock",
            Self::MutexInit => "init",
            Self::MutexDestroy => "destroy",
            Self::RwInit => "rw_init",
            Self::RwDestroy => "rw_destroy",
            Self::ThreadExit => "thread_exit",
        }
    }
}

/// Advisory copy of the glibc mutex internals at capture time. These fields
/// read concurrently-mutated memory and are not required to be consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct MutexInnards {
    pub count: u32,
    pub owner: i32,
    pub kind: i32,
    pub spins: i16,
    pub elision: i16,
}

/// Advisory copy of the glibc rwlock internals at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RwlockInnards {
    pub readers: u32,
    pub writers: u32,
    pub cur_writer: i32,
}

/// Payload discriminated by [`TraceRecord::action`], stored as a fixed-size
/// arm to keep the record layout dense. The `raw` arm pins the union to 16
/// bytes and provides zero initialization.
#[derive(Clone, Copy)]
#[repr(C)]
pub union KindSpecific {
    pub mutex: MutexInnards,
    pub rwlock: RwlockInnards,
    raw: [u8; 16],
}

impl KindSpecific {
    pub const fn zeroed() -> Self {
        Self { raw: [0; 16] }
    }

    /// Mutex arm over a zeroed payload, so the bytes past the arm are
    /// defined when the record is written out.
    pub fn from_mutex(innards: MutexInnards) -> Self {
        let mut k = Self::zeroed();
        k.mutex = innards;
        k
    }

    /// Rwlock arm over a zeroed payload.
    pub fn from_rwlock(innards: RwlockInnards) -> Self {
        let mut k = Self::zeroed();
        k.rwlock = innards;
        k
    }
}

impl Default for KindSpecific {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// One interposed synchronization call.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TraceRecord {
    /// Call stack, youngest first, zero-terminated.
    pub caller: [u64; CALLER_DEPTH],
    /// Opaque lock address. Unique only while the object is live; address
    /// reuse after destroy/free is an acknowledged false-positive source.
    pub lock: u64,
    /// OS-level thread id.
    pub tid: i32,
    /// Raw [`LockAction`] tag.
    pub action: u32,
    /// Nanoseconds on the tracer's clock.
    pub timestamp: u64,
    /// Nanoseconds spent inside the delegated call; 0 for non-waiting actions.
    pub took: u64,
    /// NUL-padded short thread label, empty when the thread was never named.
    pub thread_name: [u8; THREAD_NAME_LEN],
    pub kind_specific: KindSpecific,
    /// Error code returned by the delegated call, 0 on success.
    pub rc: i32,
    pub _pad: u32,
}

impl TraceRecord {
    pub fn lock_action(&self) -> Option<LockAction> {
        LockAction::from_raw(self.action)
    }

    /// The meaningful prefix of the call stack (up to the zero sentinel).
    pub fn frames(&self) -> &[u64] {
        let end = self
            .caller
            .iter()
            .position(|&a| a == 0)
            .unwrap_or(CALLER_DEPTH);
        &self.caller[..end]
    }

    /// The mutex arm of the payload, for mutex-family actions only.
    pub fn mutex_innards(&self) -> Option<MutexInnards> {
        if self.lock_action()?.is_mutex() {
            // The union is written with this arm for mutex actions; every
            // bit pattern of the arm's fields is a valid value.
            Some(unsafe { self.kind_specific.mutex })
        } else {
            None
        }
    }

    /// The rwlock arm of the payload, for rwlock-family actions only.
    pub fn rwlock_innards(&self) -> Option<RwlockInnards> {
        if self.lock_action()?.is_rwlock() {
            Some(unsafe { self.kind_specific.rwlock })
        } else {
            None
        }
    }

    /// Thread name up to the first NUL; empty when unnamed or non-UTF-8.
    pub fn thread_name_str(&self) -> &str {
        let end = self
            .thread_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(THREAD_NAME_LEN);
        std::str::from_utf8(&self.thread_name[..end]).unwrap_or("")
    }
}

impl std::fmt::Debug for TraceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecord")
            .field("lock", &format_args!("{:#x}", self.lock))
            .field("tid", &self.tid)
            .field("action", &self.lock_action())
            .field("timestamp", &self.timestamp)
            .field("took", &self.took)
            .field("rc", &self.rc)
            .finish_non_exhaustive()
    }
}

/// One usage-group trail entry: a lighter record capturing intent-to-acquire,
/// written before delegating to the original primitive.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct UsageRecord {
    pub timestamp: u64,
    pub lock: u64,
    pub tid: i32,
    pub action: u32,
    pub thread_name: [u8; THREAD_NAME_LEN],
    /// Single-frame caller (the wrapper's return address).
    pub caller: u64,
}

impl UsageRecord {
    pub fn lock_action(&self) -> Option<LockAction> {
        LockAction::from_raw(self.action)
    }
}

#[derive(Debug, Error)]
pub enum RecordCastError {
    #[error("record buffer is misaligned for {0}")]
    Misaligned(&'static str),
    #[error("record buffer of {len} bytes holds no complete record")]
    TooShort { len: usize },
}

/// Reinterpret a mapped byte buffer as trace records. Trailing bytes that do
/// not form a whole record are ignored (the file is sized for the capacity,
/// not for the inserted count).
pub fn records_from_bytes(bytes: &[u8]) -> Result<&[TraceRecord], RecordCastError> {
    cast_records(bytes, "TraceRecord")
}

/// Reinterpret a mapped byte buffer as usage-group records.
pub fn usage_records_from_bytes(bytes: &[u8]) -> Result<&[UsageRecord], RecordCastError> {
    cast_records(bytes, "UsageRecord")
}

fn cast_records<'a, T>(bytes: &'a [u8], name: &'static str) -> Result<&'a [T], RecordCastError> {
    let size = std::mem::size_of::<T>();
    if bytes.len() < size {
        return Err(RecordCastError::TooShort { len: bytes.len() });
    }
    if bytes.as_ptr() as usize % std::mem::align_of::<T>() != 0 {
        return Err(RecordCastError::Misaligned(name));
    }
    let n = bytes.len() / size;
    // Layout-checked above; T is #[repr(C)] plain data and every field
    // tolerates arbitrary bit patterns (the action tag is decoded fallibly).
    Ok(unsafe { std::slice::from_raw_parts(bytes.as_ptr().cast::<T>(), n) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn trace_record_layout_is_stable() {
        assert_eq!(size_of::<TraceRecord>(), 136);
        assert_eq!(align_of::<TraceRecord>(), 8);
        assert_eq!(offset_of!(TraceRecord, caller), 0);
        assert_eq!(offset_of!(TraceRecord, lock), 64);
        assert_eq!(offset_of!(TraceRecord, tid), 72);
        assert_eq!(offset_of!(TraceRecord, action), 76);
        assert_eq!(offset_of!(TraceRecord, timestamp), 80);
        assert_eq!(offset_of!(TraceRecord, took), 88);
        assert_eq!(offset_of!(TraceRecord, thread_name), 96);
        assert_eq!(offset_of!(TraceRecord, kind_specific), 112);
        assert_eq!(offset_of!(TraceRecord, rc), 128);
    }

    #[test]
    fn usage_record_layout_is_stable() {
        assert_eq!(size_of::<UsageRecord>(), 48);
        assert_eq!(offset_of!(UsageRecord, caller), 40);
    }

    #[test]
    fn kind_specific_is_sized_to_max_arm() {
        assert_eq!(size_of::<KindSpecific>(), 16);
        assert!(size_of::<MutexInnards>() <= 16);
        assert!(size_of::<RwlockInnards>() <= 16);
    }

    #[test]
    fn action_raw_round_trip() {
        for raw in 0..10u32 {
            let action = LockAction::from_raw(raw).expect("tag in range");
            assert_eq!(action as u32, raw);
        }
        assert_eq!(LockAction::from_raw(10), None);
        assert_eq!(LockAction::from_raw(u32::MAX), None);
    }

    #[test]
    fn frames_stop_at_sentinel() {
        let mut rec = sample_record(LockAction::MutexLock);
        rec.caller = [0x10, 0x20, 0, 0x30, 0, 0, 0, 0];
        assert_eq!(rec.frames(), &[0x10, 0x20]);

        rec.caller = [0; CALLER_DEPTH];
        assert!(rec.frames().is_empty());

        rec.caller = [1; CALLER_DEPTH];
        assert_eq!(rec.frames().len(), CALLER_DEPTH);
    }

    #[test]
    fn innards_accessors_follow_action_tag() {
        let mut rec = sample_record(LockAction::MutexLock);
        rec.kind_specific = KindSpecific {
            mutex: MutexInnards {
                count: 1,
                owner: 42,
                kind: 0,
                spins: 0,
                elision: 0,
            },
        };
        assert_eq!(rec.mutex_innards().unwrap().owner, 42);
        assert!(rec.rwlock_innards().is_none());

        rec.action = LockAction::RwReadLock as u32;
        rec.kind_specific = KindSpecific {
            rwlock: RwlockInnards {
                readers: 3,
                writers: 0,
                cur_writer: 0,
            },
        };
        assert_eq!(rec.rwlock_innards().unwrap().readers, 3);
        assert!(rec.mutex_innards().is_none());
    }

    #[test]
    fn thread_name_truncates_at_nul() {
        let mut rec = sample_record(LockAction::MutexLock);
        rec.thread_name[..6].copy_from_slice(b"worker");
        assert_eq!(rec.thread_name_str(), "worker");

        rec.thread_name = [0; THREAD_NAME_LEN];
        assert_eq!(rec.thread_name_str(), "");
    }

    #[test]
    fn cast_ignores_trailing_partial_record() {
        let recs = vec![sample_record(LockAction::MutexLock); 4];
        let bytes = unsafe {
            std::slice::from_raw_parts(recs.as_ptr().cast::<u8>(), 4 * size_of::<TraceRecord>())
        };
        // Chop 17 bytes off the last record; the cast keeps whole records only.
        let back = records_from_bytes(&bytes[..bytes.len() - 17]).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[1].lock, recs[1].lock);
    }

    #[test]
    fn cast_rejects_short_buffer() {
        let buf = [0u8; 8];
        assert!(matches!(
            records_from_bytes(&buf),
            Err(RecordCastError::TooShort { .. })
        ));
    }

    pub(crate) fn sample_record(action: LockAction) -> TraceRecord {
        TraceRecord {
            caller: [0; CALLER_DEPTH],
            lock: 0x7f00_0000_1000,
            tid: 1234,
            action: action as u32,
            timestamp: 1_000,
            took: 0,
            thread_name: [0; THREAD_NAME_LEN],
            kind_specific: KindSpecific::zeroed(),
            rc: 0,
            _pad: 0,
        }
    }
}
