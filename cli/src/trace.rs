//! Loading a trace: sidecar plus memory-mapped event files.
//!
//! The sidecar is the entry point; it names the event blobs. Malformed
//! sidecars, missing event files, and size mismatches are refused outright;
//! the analyzer never guesses at partial inputs.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use memmap2::{Advice, Mmap};

use locktrace_protocol::{
    Sidecar, TraceRecord, UsageRecord, records_from_bytes, usage_records_from_bytes,
};

#[derive(Debug)]
pub struct TraceData {
    pub sidecar: Sidecar,
    /// None when the trace holds zero records (empty files cannot be mapped).
    events: Option<Mmap>,
    usage: Option<Mmap>,
}

impl TraceData {
    /// Load the sidecar at `path` and map the event files it names.
    /// Relative file names are resolved against the sidecar's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading sidecar {}", path.display()))?;
        let sidecar: Sidecar = serde_json::from_str(&text)
            .with_context(|| format!("malformed sidecar {}", path.display()))?;

        let base = path.parent().unwrap_or(Path::new("."));

        let events = map_records_file(
            &resolve(base, &sidecar.measurements),
            sidecar.n_records,
            std::mem::size_of::<TraceRecord>(),
        )?;

        let usage = match &sidecar.ug_measurements {
            Some(name) => map_records_file(
                &resolve(base, name),
                sidecar.ug_n_records,
                std::mem::size_of::<UsageRecord>(),
            )?,
            None => None,
        };

        Ok(Self {
            sidecar,
            events,
            usage,
        })
    }

    /// The recorded event stream, in insertion order.
    pub fn records(&self) -> &[TraceRecord] {
        match &self.events {
            Some(map) => {
                // Validated at load time; a cast failure here is a bug.
                let all = records_from_bytes(map).expect("validated at load");
                &all[..self.sidecar.n_records as usize]
            }
            None => &[],
        }
    }

    /// The usage-group trail, empty when not recorded.
    pub fn usage_records(&self) -> &[UsageRecord] {
        match &self.usage {
            Some(map) => {
                let all = usage_records_from_bytes(map).expect("validated at load");
                &all[..self.sidecar.ug_n_records as usize]
            }
            None => &[],
        }
    }
}

fn resolve(base: &Path, name: &str) -> PathBuf {
    let p = Path::new(name);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

fn map_records_file(path: &Path, n_records: u64, record_size: usize) -> Result<Option<Mmap>> {
    if n_records == 0 {
        return Ok(None);
    }

    let file =
        File::open(path).with_context(|| format!("opening event file {}", path.display()))?;
    let needed = n_records
        .checked_mul(record_size as u64)
        .context("record count overflows")?;
    let actual = file.metadata()?.len();
    if actual < needed {
        bail!(
            "event file {} holds {} bytes but the sidecar promises {} records ({} bytes)",
            path.display(),
            actual,
            n_records,
            needed
        );
    }

    // SAFETY: mapped read-only; the producing process has exited.
    let map = unsafe { Mmap::map(&file) }
        .with_context(|| format!("mapping {}", path.display()))?;
    if let Err(e) = map.advise(Advice::Sequential) {
        log::warn!("madvise failed: {e}");
    }

    Ok(Some(map))
}
