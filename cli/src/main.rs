//! locktrace analyzer - post-mortem lock-usage reports.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use locktrace_cli::analysis::Analysis;
use locktrace_cli::analysis::correlation::MAX_EDGES;
use locktrace_cli::report::html::{ReportContext, write_report};
use locktrace_cli::report::trace_view::{TraceFormat, write_trace, write_usage_trail};
use locktrace_cli::symbols::{ResolveTarget, SymbolResolver};
use locktrace_cli::trace::TraceData;

#[derive(Parser)]
#[command(name = "locktrace", version, about = "Analyze lock-usage trace files")]
struct Cli {
    /// Sidecar file written by the tracer (dump.dat.<pid>)
    #[arg(short = 't', long = "trace", value_name = "FILE")]
    trace: PathBuf,

    /// Core file of the traced process, for the symbol resolver
    #[arg(short = 'c', long = "core", value_name = "FILE")]
    core: Option<PathBuf>,

    /// Symbol resolver executable
    #[arg(
        short = 'r',
        long = "resolver",
        value_name = "FILE",
        default_value = "/usr/bin/eu-addr2line"
    )]
    resolver: PathBuf,

    /// Report output file
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    output: PathBuf,

    /// Emit a linear event trace instead of statistics
    #[arg(short = 'T', long = "trace-format", value_name = "FORMAT", value_enum)]
    trace_format: Option<TraceFormat>,

    /// Emit the usage-group trail instead of statistics
    #[arg(short = 'Q', long = "usage-groups")]
    usage_groups: bool,

    /// Include the lock co-occurrence graph (slow)
    #[arg(short = 'C', long = "correlation")]
    correlation: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let data = TraceData::load(&cli.trace)?;
    info!(
        "loaded {} records from {} (pid {})",
        data.records().len(),
        data.sidecar.measurements,
        data.sidecar.pid
    );

    let out = File::create(&cli.output)
        .with_context(|| format!("creating report file {}", cli.output.display()))?;
    let mut out = BufWriter::new(out);

    if cli.usage_groups {
        write_usage_trail(
            &mut out,
            &data,
            cli.trace_format.unwrap_or(TraceFormat::Ascii),
        )?;
        return Ok(());
    }
    if let Some(format) = cli.trace_format {
        write_trace(&mut out, &data, format)?;
        return Ok(());
    }

    let analysis = Analysis::run(data.records(), cli.correlation);

    let correlation_svg = analysis
        .correlation
        .as_ref()
        .and_then(|corr| render_correlation_graph(corr, &cli.output));

    let target = match cli.core {
        Some(core) => Some(ResolveTarget::Core(core)),
        None if !data.sidecar.exe_name.is_empty() => Some(ResolveTarget::Exe(PathBuf::from(
            &data.sidecar.exe_name,
        ))),
        None => None,
    };
    let mut symbols = SymbolResolver::new(cli.resolver, target);

    let mut ctx = ReportContext {
        data: &data,
        analysis: &analysis,
        symbols: &mut symbols,
        correlation_svg,
    };
    write_report(&mut out, &mut ctx)?;

    info!("report written to {}", cli.output.display());
    Ok(())
}

/// Write the DOT description next to the report and hand it to the external
/// layout engine. The DOT file always stays; the SVG is best-effort.
fn render_correlation_graph(
    corr: &locktrace_cli::analysis::correlation::Correlation,
    report_path: &std::path::Path,
) -> Option<String> {
    let dot_path = report_path.with_extension("dot");
    let svg_path = report_path.with_extension("svg");

    if let Err(e) = std::fs::write(&dot_path, corr.to_dot(MAX_EDGES)) {
        warn!("cannot write {}: {e}", dot_path.display());
        return None;
    }

    let status = Command::new("dot")
        .arg("-Tsvg")
        .arg(&dot_path)
        .arg("-o")
        .arg(&svg_path)
        .status();
    match status {
        Ok(s) if s.success() => svg_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        Ok(s) => {
            warn!("graph layout engine exited with {s}; DOT kept at {}", dot_path.display());
            None
        }
        Err(e) => {
            warn!(
                "graph layout engine unavailable ({e}); DOT kept at {}",
                dot_path.display()
            );
            None
        }
    }
}
