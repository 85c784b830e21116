//! Linear trace listings: the raw event stream (or the usage-group trail)
//! rendered line by line instead of statistics.

use std::io::{self, Write};

use clap::ValueEnum;

use crate::trace::TraceData;

use super::format_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TraceFormat {
    Html,
    Ascii,
}

pub fn write_trace(out: &mut impl Write, data: &TraceData, format: TraceFormat) -> io::Result<()> {
    if format == TraceFormat::Html {
        writeln!(
            out,
            "<!DOCTYPE html>\n<html><head><title>lock trace</title></head><body><pre>"
        )?;
    }

    writeln!(
        out,
        "{:>10} {:<28} {:<10} {:>18} {:>8} {:<16} {:>12} {:>4}",
        "index", "timestamp", "action", "lock", "tid", "thread", "took(ns)", "rc"
    )?;
    for (i, rec) in data.records().iter().enumerate() {
        let action = rec
            .lock_action()
            .map(|a| a.label())
            .unwrap_or("?");
        writeln!(
            out,
            "{:>10} {:<28} {:<10} {:>#18x} {:>8} {:<16} {:>12} {:>4}",
            i,
            format_ts(rec.timestamp),
            action,
            rec.lock,
            rec.tid,
            rec.thread_name_str(),
            rec.took,
            rec.rc,
        )?;
    }

    if format == TraceFormat::Html {
        writeln!(out, "</pre></body></html>")?;
    }
    Ok(())
}

pub fn write_usage_trail(
    out: &mut impl Write,
    data: &TraceData,
    format: TraceFormat,
) -> io::Result<()> {
    if format == TraceFormat::Html {
        writeln!(
            out,
            "<!DOCTYPE html>\n<html><head><title>usage-group trail</title></head><body><pre>"
        )?;
    }

    writeln!(
        out,
        "{:>10} {:<28} {:<10} {:>18} {:>8} {:<16} {:>18}",
        "index", "timestamp", "action", "lock", "tid", "thread", "caller"
    )?;
    for (i, rec) in data.usage_records().iter().enumerate() {
        let action = rec
            .lock_action()
            .map(|a| a.label())
            .unwrap_or("?");
        let name_end = rec
            .thread_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(rec.thread_name.len());
        writeln!(
            out,
            "{:>10} {:<28} {:<10} {:>#18x} {:>8} {:<16} {:>#18x}",
            i,
            format_ts(rec.timestamp),
            action,
            rec.lock,
            rec.tid,
            String::from_utf8_lossy(&rec.thread_name[..name_end]),
            rec.caller,
        )?;
    }

    if format == TraceFormat::Html {
        writeln!(out, "</pre></body></html>")?;
    }
    Ok(())
}
