//! Export engine: a stepped sweep across the IPv4 space through a
//! `Searcher`, coalescing adjacent equal-region probes into runs.

use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::error::XdbError;
use crate::range::Segment;
use crate::searcher::Searcher;

pub const DEFAULT_STRIDE: u32 = 256;

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub start_ip: u32,
    pub end_ip: u32,
    pub stride: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        // The reference sweep starts at 1.0.0.0, not 0.0.0.0/8 (spec.md §9
        // Open Questions); callers who need the low octet swept explicitly
        // override `start_ip`.
        Self { start_ip: 0x0100_0000, end_ip: u32::MAX, stride: DEFAULT_STRIDE }
    }
}

/// Sweeps `[opts.start_ip, opts.end_ip]` in steps of `opts.stride`, folding
/// consecutive probes that land on the same region into a single run.
///
/// `progress` is called after every probe with `(probes_done, probes_total)`.
/// `should_cancel` is polled once per probe; if it returns `true` the sweep
/// stops and `XdbError::Cancelled` is returned with nothing written anywhere
/// — the caller never sees a partial result.
pub fn sweep(
    searcher: &Searcher,
    opts: ExportOptions,
    mut progress: impl FnMut(u64, u64),
    mut should_cancel: impl FnMut() -> bool,
) -> Result<Vec<Segment>, XdbError> {
    if opts.start_ip > opts.end_ip {
        return Err(XdbError::RangeInverted { start: opts.start_ip, end: opts.end_ip });
    }
    let stride = opts.stride.max(1);
    let total_span = opts.end_ip as u64 - opts.start_ip as u64 + 1;
    let probes_total = total_span.div_ceil(stride as u64);

    let mut runs: Vec<Segment> = Vec::new();
    let mut current: Option<(u32, u32, String)> = None;
    let mut ip = opts.start_ip;
    let mut probes_done = 0u64;

    loop {
        if should_cancel() {
            debug!(probes_done, probes_total, "export sweep cancelled");
            return Err(XdbError::Cancelled);
        }

        let (region, _io_count) = searcher.search(ip)?;
        let probe_end = ip.saturating_add(stride - 1).min(opts.end_ip);

        match &mut current {
            Some((_, end, r)) if *r == region => {
                *end = probe_end;
            }
            _ => {
                if let Some((s, e, r)) = current.take() {
                    runs.push(Segment::new(s, e, r));
                }
                current = Some((ip, probe_end, region));
            }
        }

        probes_done += 1;
        progress(probes_done, probes_total);

        if probe_end == opts.end_ip {
            break;
        }
        ip = probe_end + 1;
    }

    if let Some((s, e, r)) = current {
        runs.push(Segment::new(s, e, r));
    }

    info!(runs = runs.len(), probes = probes_done, "export sweep finished");
    Ok(runs)
}

/// Runs `sweep` fully in memory and only then creates `dst`, so a
/// cancelled or failed sweep never leaves a partial file behind.
pub fn export_to_file(
    searcher: &Searcher,
    opts: ExportOptions,
    dst: &Path,
    progress: impl FnMut(u64, u64),
    should_cancel: impl FnMut() -> bool,
) -> Result<usize, XdbError> {
    let runs = sweep(searcher, opts, progress, should_cancel)?;
    let mut file = std::io::BufWriter::new(std::fs::File::create(dst)?);
    for seg in &runs {
        writeln!(file, "{}", seg.to_line())?;
    }
    file.flush()?;
    Ok(runs.len())
}
