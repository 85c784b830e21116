//! The tid-to-thread-name table.
//!
//! Filled by the `pthread_setname_np` wrapper, pruned on thread exit, read
//! on every event append. Guarded by a std `RwLock`: on Linux the std
//! primitives are futex-based and never call the interposed pthread entry
//! points, so lookups cannot recurse into the tracer.

use std::collections::HashMap;
use std::sync::RwLock;

use locktrace_protocol::THREAD_NAME_LEN;

pub struct NameTable {
    names: RwLock<HashMap<i32, String>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self {
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Record a thread's label, truncated to fit the record field
    /// (15 bytes plus NUL, the pthread limit).
    pub fn set(&self, tid: i32, name: &str) {
        let mut end = name.len().min(THREAD_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        if let Ok(mut map) = self.names.write() {
            map.insert(tid, name[..end].to_string());
        }
    }

    pub fn remove(&self, tid: i32) {
        if let Ok(mut map) = self.names.write() {
            map.remove(&tid);
        }
    }

    /// Best-effort lookup into a record's name field; absent threads leave
    /// the field all-NUL.
    pub fn fill(&self, tid: i32, out: &mut [u8; THREAD_NAME_LEN]) {
        if let Ok(map) = self.names.read() {
            if let Some(name) = map.get(&tid) {
                out[..name.len()].copy_from_slice(name.as_bytes());
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.names.write() {
            map.clear();
        }
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}
