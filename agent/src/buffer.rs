//! The memory-mapped event buffer.
//!
//! A file-backed array of fixed-size records. Writers take a ticket from an
//! atomic counter; each ticket is a unique index, so the record write itself
//! needs no locking. Tickets past the capacity are dropped after a one-time
//! warning. The file is the persistent artifact; the mapping is ephemeral.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Context, Result};
use memmap2::{Advice, MmapMut, MmapOptions};

use crate::diag;

pub struct EventBuffer<T> {
    /// Keeps the mapping alive; all writes go through `base`.
    map: MmapMut,
    base: *mut T,
    capacity: u64,
    idx: AtomicU64,
    /// Ticket interval between "% full" diagnostics; 0 disables them.
    verbose_step: u64,
    full_warned: AtomicBool,
}

// Appends write disjoint indices through a raw pointer; the mapping itself
// is owned and never remapped.
unsafe impl<T: Copy + Send> Send for EventBuffer<T> {}
unsafe impl<T: Copy + Send> Sync for EventBuffer<T> {}

impl<T: Copy + Send> EventBuffer<T> {
    /// Create the backing file, size it by truncation, and map it shared
    /// read/write with eager population and a sequential-access hint.
    pub fn create(path: impl AsRef<Path>, capacity: u64, verbose: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("creating {}", path.display()))?;

        let len = capacity
            .checked_mul(std::mem::size_of::<T>() as u64)
            .context("buffer size overflows")?;
        file.set_len(len)
            .context("reserving space on disk (reduce TRACE_N_RECORDS)")?;

        // SAFETY: the file stays untouched by this process outside the
        // mapping; concurrent writers use disjoint record slots.
        let mut map = unsafe {
            MmapOptions::new()
                .populate()
                .map_mut(&file)
                .context("mapping event buffer (reduce TRACE_N_RECORDS)")?
        };
        if let Err(e) = map.advise(Advice::Sequential) {
            log::warn!("madvise failed: {e}");
        }

        let base = map.as_mut_ptr().cast::<T>();

        Ok(Self {
            map,
            base,
            capacity,
            idx: AtomicU64::new(0),
            verbose_step: if verbose { (capacity / 10).max(1) } else { 0 },
            full_warned: AtomicBool::new(false),
        })
    }

    /// Append one record. Returns the index it was written at, or `None`
    /// when the buffer is exhausted (first drop warns once).
    pub fn append(&self, record: T) -> Option<u64> {
        let ticket = self.idx.fetch_add(1, Ordering::Relaxed);

        if self.verbose_step > 0 && ticket % self.verbose_step == 0 {
            diag::red(&format!(
                "trace buffer {:.2}% full",
                ticket as f64 * 100.0 / self.capacity as f64
            ));
        }

        if ticket < self.capacity {
            // SAFETY: ticket is in bounds and handed out exactly once.
            unsafe { self.base.add(ticket as usize).write(record) };
            Some(ticket)
        } else {
            if !self.full_warned.swap(true, Ordering::Relaxed) {
                diag::red("trace buffer full");
            }
            None
        }
    }

    /// Stop new writers by pushing the counter to the capacity. Returns the
    /// number of tickets handed out before sealing (may exceed capacity).
    /// In-flight appends may still complete a write to a valid slot; that
    /// race is benign.
    pub fn seal(&self) -> u64 {
        self.idx.swap(self.capacity, Ordering::Relaxed)
    }

    /// Records actually present given a ticket count from [`Self::seal`].
    pub fn inserted(&self, tickets: u64) -> u64 {
        tickets.min(self.capacity)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Synchronous flush of the mapping to its file.
    pub fn flush(&self) -> std::io::Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tmp(name: &str) -> tempfile::TempPath {
        tempfile::Builder::new()
            .prefix(name)
            .tempfile()
            .unwrap()
            .into_temp_path()
    }

    #[test]
    fn appends_land_at_their_ticket_index() {
        let path = tmp("buf-seq");
        let buf: EventBuffer<u64> = EventBuffer::create(&path, 8, false).unwrap();

        for v in 0..5u64 {
            assert_eq!(buf.append(v * 10), Some(v));
        }
        buf.flush().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 8 * 8);
        let third = u64::from_ne_bytes(bytes[16..24].try_into().unwrap());
        assert_eq!(third, 20);
    }

    #[test]
    fn overrun_drops_and_counts() {
        let path = tmp("buf-full");
        let buf: EventBuffer<u64> = EventBuffer::create(&path, 4, false).unwrap();

        for v in 0..4u64 {
            assert!(buf.append(v).is_some());
        }
        assert_eq!(buf.append(99), None);
        assert_eq!(buf.append(99), None);

        let tickets = buf.seal();
        assert_eq!(tickets, 6);
        assert_eq!(buf.inserted(tickets), 4);
    }

    #[test]
    fn sealed_buffer_rejects_appends() {
        let path = tmp("buf-seal");
        let buf: EventBuffer<u64> = EventBuffer::create(&path, 16, false).unwrap();
        buf.append(1);
        let tickets = buf.seal();
        assert_eq!(tickets, 1);
        assert_eq!(buf.append(2), None);
    }

    #[test]
    fn concurrent_tickets_form_a_permutation() {
        let path = tmp("buf-mt");
        let buf: Arc<EventBuffer<u64>> = Arc::new(EventBuffer::create(&path, 4096, false).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buf = Arc::clone(&buf);
                std::thread::spawn(move || {
                    (0..512).filter_map(|v| buf.append(v)).collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        // No gaps, no repeats: insertion indices are a permutation of 0..N.
        assert_eq!(all.len(), 8 * 512);
        assert!(all.iter().copied().eq(0..(8 * 512) as u64));
    }
}
