//! The statistics report.

use std::io::{self, Write};

use locktrace_protocol::TraceRecord;

use crate::analysis::Analysis;
use crate::analysis::durations::Category;
use crate::analysis::grouping::FirstPlusNext;
use crate::symbols::SymbolResolver;
use crate::trace::TraceData;

use super::{format_ns, format_ts};

const STYLE: &str = "table{font-size:15px;font-family:sans-serif;border-collapse:collapse;width:100%}\
td,th{border:1px solid #ddd;text-align:left;padding:6px}\
tr:nth-child(even){background-color:#f2f2f2}\
th{background-color:#04aa6d;color:#fff}\
h1,h2,h3,h4{font-family:monospace;margin-top:2em}";

pub struct ReportContext<'a> {
    pub data: &'a TraceData,
    pub analysis: &'a Analysis,
    pub symbols: &'a mut SymbolResolver,
    /// Relative path of the rendered correlation SVG, when produced.
    pub correlation_svg: Option<String>,
}

pub fn write_report(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<!DOCTYPE html>\n<html><head>")?;
    writeln!(out, "<style>{STYLE}</style>")?;
    writeln!(out, "<title>lock trace</title></head><body>")?;
    writeln!(out, "<h1>LOCK TRACE</h1>")?;

    toc(out, ctx)?;
    metadata(out, ctx)?;
    call_errors(out, ctx)?;
    mutex_misuse(out, ctx)?;
    still_locked(out, ctx, "stillm", "still locked mutexes", true)?;
    rwlock_misuse(out, ctx)?;
    still_locked(out, ctx, "stillrw", "still locked rw-locks", false)?;
    durations(out, ctx)?;
    where_used(out, ctx)?;
    correlation(out, ctx)?;

    writeln!(out, "</body></html>")
}

fn toc(out: &mut impl Write, ctx: &ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2>table of contents</h2>\n<ul>")?;
    writeln!(out, "<li><a href=\"#meta\">meta data</a>")?;
    writeln!(out, "<li><a href=\"#errors\">function call errors</a>")?;
    writeln!(out, "<li><a href=\"#doublem\">mutex lock/unlock mistakes</a>")?;
    writeln!(out, "<li><a href=\"#stillm\">still locked mutexes</a>")?;
    writeln!(out, "<li><a href=\"#doublerw\">rw-lock mistakes</a>")?;
    writeln!(out, "<li><a href=\"#stillrw\">still locked rw-locks</a>")?;
    writeln!(out, "<li><a href=\"#durations\">locking durations</a>")?;
    writeln!(out, "<li><a href=\"#whereused\">where locks were used</a>")?;
    if ctx.analysis.correlation.is_some() {
        writeln!(out, "<li><a href=\"#correlation\">lock correlation</a>")?;
    }
    writeln!(out, "</ul>")
}

fn metadata(out: &mut impl Write, ctx: &ReportContext<'_>) -> io::Result<()> {
    let sc = &ctx.data.sidecar;
    let took_s = sc.end_ts.saturating_sub(sc.start_ts) as f64 / 1e9;

    writeln!(out, "<h2 id=\"meta\">META DATA</h2>")?;
    writeln!(out, "<table><tr><th colspan=2>meta data</th></tr>")?;
    row(out, "executable", &sc.exe_name)?;
    row(out, "PID", &sc.pid.to_string())?;
    row(out, "host name", &sc.hostname)?;
    row(out, "scheduler", &sc.scheduler.to_string())?;
    row(out, "# cores", &sc.n_procs.to_string())?;
    row(out, "fork warning", &sc.fork_warning.to_string())?;
    row(
        out,
        "# trace records",
        &format!(
            "{} of max. {} ({:.2}%, {:.0} records/s)",
            sc.n_records,
            sc.n_records_max,
            sc.n_records as f64 * 100.0 / sc.n_records_max.max(1) as f64,
            if took_s > 0.0 {
                sc.n_records as f64 / took_s
            } else {
                0.0
            },
        ),
    )?;
    if sc.dropped_records() > 0 {
        row(
            out,
            "# dropped records",
            &format!("{} (buffer full)", sc.dropped_records()),
        )?;
    }
    row(out, "started at", &format_ts(sc.start_ts))?;
    row(out, "stopped at", &format_ts(sc.end_ts))?;
    row(out, "took", &format!("{took_s:.6}s"))?;
    row(out, "# mutex try-locks", &sc.cnt_mutex_trylock.to_string())?;
    row(
        out,
        "# rwlock try-rdlocks",
        &sc.cnt_rwlock_try_rdlock.to_string(),
    )?;
    row(
        out,
        "# rwlock timed-rdlocks",
        &sc.cnt_rwlock_try_timedrdlock.to_string(),
    )?;
    row(
        out,
        "# rwlock try-wrlocks",
        &sc.cnt_rwlock_try_wrlock.to_string(),
    )?;
    row(
        out,
        "# rwlock timed-wrlocks",
        &sc.cnt_rwlock_try_timedwrlock.to_string(),
    )?;
    writeln!(out, "</table>")
}

fn row(out: &mut impl Write, key: &str, value: &str) -> io::Result<()> {
    writeln!(out, "<tr><td>{key}:</td><td>{value}</td></tr>")
}

fn call_errors(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2 id=\"errors\">FUNCTION CALL ERRORS</h2>")?;
    writeln!(out, "<p>Count: {}</p>", ctx.analysis.errors.len())?;

    // BTreeMap iteration keeps error codes in ascending order.
    let analysis = ctx.analysis;
    for (rc, group) in &analysis.errors {
        writeln!(
            out,
            "<h3>{} ({}) &mdash; {} calls, {} sites</h3>",
            crate::analysis::errors::errno_string(*rc),
            rc,
            group.indices.len(),
            group.sites.len()
        )?;
        for &(_, index) in &group.sites {
            record_details(out, ctx, index)?;
        }
    }
    Ok(())
}

fn mutex_misuse(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2 id=\"doublem\">MUTEX LOCK/UNLOCK MISTAKES</h2>")?;
    writeln!(out, "<p>Count: {}</p>", ctx.analysis.mutex_misuse.len())?;

    let analysis = ctx.analysis;
    for (&(lock, kind), group) in &analysis.mutex_misuse {
        misuse_group(out, ctx, lock, kind.describe(), group)?;
    }
    Ok(())
}

fn rwlock_misuse(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2 id=\"doublerw\">RW-LOCK MISTAKES</h2>")?;
    writeln!(out, "<p>Count: {}</p>", ctx.analysis.rwlock_misuse.len())?;

    let analysis = ctx.analysis;
    for (&(lock, kind), group) in &analysis.rwlock_misuse {
        misuse_group(out, ctx, lock, kind.describe(), group)?;
    }
    Ok(())
}

fn misuse_group(
    out: &mut impl Write,
    ctx: &mut ReportContext<'_>,
    lock: u64,
    kind: &str,
    group: &FirstPlusNext,
) -> io::Result<()> {
    writeln!(
        out,
        "<h3>lock {lock:#018x}, \"{kind}\" ({} occurrences)</h3>",
        group.total()
    )?;
    writeln!(out, "<h4>first</h4>")?;
    record_details(out, ctx, group.first)?;
    for site in &group.latest {
        writeln!(
            out,
            "<h4>{} more at one site (latest shown)</h4>",
            site.count
        )?;
        record_details(out, ctx, site.representative)?;
    }
    Ok(())
}

fn still_locked(
    out: &mut impl Write,
    ctx: &mut ReportContext<'_>,
    anchor: &str,
    title: &str,
    mutex: bool,
) -> io::Result<()> {
    let analysis = ctx.analysis;
    let still = if mutex {
        &analysis.mutex_still_locked
    } else {
        &analysis.rwlock_still_locked
    };

    writeln!(out, "<h2 id=\"{anchor}\">{}</h2>", title.to_uppercase())?;
    writeln!(out, "<p>Count: {}</p>", still.len())?;

    let records = ctx.data.records();
    for (lock, indices) in still {
        writeln!(out, "<h3>lock {lock:#018x}</h3>")?;
        if indices.len() == 1 {
            writeln!(out, "<p>The following location did not unlock:</p>")?;
        } else {
            writeln!(out, "<p>One of the following locations did not unlock:</p>")?;
        }
        // One example per distinct call site.
        let mut seen_hashes = Vec::new();
        for &index in indices {
            let hash = locktrace_protocol::call_stack_hash(&records[index].caller);
            if seen_hashes.contains(&hash) {
                continue;
            }
            seen_hashes.push(hash);
            record_details(out, ctx, index)?;
        }
    }
    Ok(())
}

fn durations(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2 id=\"durations\">LOCKING DURATIONS</h2>")?;

    writeln!(out, "<h3>overall</h3>")?;
    writeln!(
        out,
        "<table><tr><th>category</th><th>what</th><th>n</th><th>mean</th><th>stddev</th><th>max</th></tr>"
    )?;
    for cat in Category::ALL {
        for (what, agg) in [
            ("acquisition", ctx.analysis.durations.acquire(cat)),
            ("hold", ctx.analysis.durations.hold(cat)),
        ] {
            writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                cat.label(),
                what,
                agg.n,
                format_ns(agg.mean()),
                format_ns(agg.stddev()),
                format_ns(agg.max as f64),
            )?;
        }
    }
    writeln!(out, "</table>")?;

    writeln!(out, "<h3>per lock</h3>")?;
    writeln!(
        out,
        "<table><tr><th>lock</th><th>acquires</th><th>contended</th>\
         <th>acquire mean</th><th>acquire max</th>\
         <th>hold n</th><th>hold mean</th><th>hold stddev</th><th>hold max</th></tr>"
    )?;
    for (lock, per) in &ctx.analysis.durations.per_lock {
        writeln!(
            out,
            "<tr><td id=\"lock_{lock:x}\">{lock:#018x}</td><td>{}</td><td>{:.2}% ({})</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            per.acquires,
            per.contended as f64 * 100.0 / per.acquires.max(1) as f64,
            per.contended,
            format_ns(per.acquire.mean()),
            format_ns(per.acquire.max as f64),
            per.hold.n,
            format_ns(per.hold.mean()),
            format_ns(per.hold.stddev()),
            format_ns(per.hold.max as f64),
        )?;
    }
    writeln!(out, "</table>")
}

fn where_used(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    writeln!(out, "<h2 id=\"whereused\">WHERE LOCKS WERE USED</h2>")?;

    let analysis = ctx.analysis;
    for (lock, lock_sites) in &analysis.sites {
        writeln!(
            out,
            "<h3>lock {lock:#018x} ({} distinct sites)</h3>",
            lock_sites.len()
        )?;
        for &(_, index) in lock_sites {
            record_details(out, ctx, index)?;
        }
        if let Some(threads) = analysis.threads_seen.get(lock) {
            let labels: Vec<&str> = threads.iter().map(String::as_str).collect();
            writeln!(out, "<p>Seen in threads: {}</p>", labels.join(", "))?;
        }
    }
    Ok(())
}

fn correlation(out: &mut impl Write, ctx: &mut ReportContext<'_>) -> io::Result<()> {
    let Some(corr) = &ctx.analysis.correlation else {
        return Ok(());
    };

    writeln!(out, "<h2 id=\"correlation\">LOCK CORRELATION</h2>")?;
    let edges = corr.top_edges(crate::analysis::correlation::MAX_EDGES);
    writeln!(out, "<p>{} pairs (top {} shown)</p>", corr.pair_counts.len(), edges.len())?;
    writeln!(
        out,
        "<table><tr><th>lock A</th><th>lock B</th><th>co-held steps</th><th>closeness</th></tr>"
    )?;
    for e in &edges {
        writeln!(
            out,
            "<tr><td>{:#018x}</td><td>{:#018x}</td><td>{}</td><td>{:.3}</td></tr>",
            e.a, e.b, e.count, e.closeness
        )?;
    }
    writeln!(out, "</table>")?;

    if let Some(svg) = &ctx.correlation_svg {
        writeln!(out, "<p><img src=\"{svg}\" alt=\"lock correlation graph\"></p>")?;
    }
    Ok(())
}

/// One record rendered as tid/name plus a resolved call trace. Frames that
/// sit inside the interposed entry points are dropped so the innermost user
/// frame leads.
fn record_details(out: &mut impl Write, ctx: &mut ReportContext<'_>, index: usize) -> io::Result<()> {
    let records = ctx.data.records();
    let rec: &TraceRecord = &records[index];
    let wrappers = ctx.data.sidecar.wrapper_addresses();

    writeln!(out, "<table>")?;
    writeln!(out, "<tr><td>index:</td><td>{index}</td></tr>")?;
    writeln!(out, "<tr><td>tid:</td><td>{}</td></tr>", rec.tid)?;
    writeln!(
        out,
        "<tr><td>thread name:</td><td>{}</td></tr>",
        rec.thread_name_str()
    )?;
    writeln!(
        out,
        "<tr><td>at:</td><td>{}</td></tr>",
        format_ts(rec.timestamp)
    )?;
    if let Some(innards) = rec.mutex_innards() {
        writeln!(
            out,
            "<tr><td>mutex state:</td><td>count {}, owner {}, kind {}</td></tr>",
            innards.count, innards.owner, innards.kind
        )?;
    }
    if let Some(innards) = rec.rwlock_innards() {
        writeln!(
            out,
            "<tr><td>rwlock state:</td><td>readers {}, writers {}, cur_writer {}</td></tr>",
            innards.readers, innards.writers, innards.cur_writer
        )?;
    }

    writeln!(out, "<tr><td>call trace:</td><td><table>")?;
    for &addr in rec.frames() {
        if wrappers.contains(&addr) {
            continue;
        }
        writeln!(
            out,
            "<tr><td>{addr:#x}</td><td>{}</td></tr>",
            ctx.symbols.resolve(addr)
        )?;
    }
    writeln!(out, "</table></td></tr>")?;
    writeln!(out, "</table><br>")
}
