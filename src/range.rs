//! The range/segment model and the text range-file parser shared by
//! `Maker` and `Editor` (spec.md §4.5).

use std::io::BufRead;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::{ipv4_to_u32, u32_to_ipv4, MAX_REGION_LEN};
use crate::error::{ParseContext, XdbError};

/// An inclusive `[start_ip, end_ip]` range tagged with an opaque region string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_ip: u32,
    pub end_ip: u32,
    pub region: String,
}

impl Segment {
    pub fn new(start_ip: u32, end_ip: u32, region: impl Into<String>) -> Self {
        Self { start_ip, end_ip, region: region.into() }
    }

    /// Parses a single `a.b.c.d|a.b.c.d|region` line (no surrounding validation).
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.splitn(3, '|').collect();
        if fields.len() != 3 {
            return Err(format!("expected 3 '|'-delimited fields, found {}", fields.len()));
        }
        let start_ip = ipv4_to_u32(fields[0]).map_err(|e| e.to_string())?;
        let end_ip = ipv4_to_u32(fields[1]).map_err(|e| e.to_string())?;
        let region = fields[2].to_string();
        if start_ip > end_ip {
            return Err(format!(
                "start {} is greater than end {}",
                fields[0], fields[1]
            ));
        }
        if region.is_empty() {
            return Err("region field is empty".to_string());
        }
        if region.len() > MAX_REGION_LEN {
            return Err(format!(
                "region length {} exceeds {} bytes",
                region.len(),
                MAX_REGION_LEN
            ));
        }
        Ok(Segment { start_ip, end_ip, region })
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}",
            u32_to_ipv4(self.start_ip),
            u32_to_ipv4(self.end_ip),
            self.region
        )
    }
}

const CONTEXT_LINES: usize = 3;

/// Streams a range file, validating and (for the Maker variant) merging
/// adjacent same-region entries, enforcing full contiguity throughout.
///
/// `merge_adjacent = true` is the Maker parser (spec.md §4.3/§4.5): adjacent
/// entries with identical regions collapse into one. `merge_adjacent =
/// false` is the Editor parser (spec.md §4.4): adjacent same-region entries
/// are kept distinct, and any gap is a hard `Discontiguous` error either way.
pub fn parse_range_reader(
    reader: impl BufRead,
    merge_adjacent: bool,
) -> Result<Vec<Segment>, XdbError> {
    let mut all_lines = Vec::new();
    for line in reader.lines() {
        all_lines.push(line?);
    }
    parse_range_lines(&all_lines, merge_adjacent)
}

pub fn parse_range_file(path: &Path, merge_adjacent: bool) -> Result<Vec<Segment>, XdbError> {
    let file = std::fs::File::open(path)?;
    parse_range_reader(std::io::BufReader::new(file), merge_adjacent)
}

fn parse_range_lines(lines: &[String], merge_adjacent: bool) -> Result<Vec<Segment>, XdbError> {
    let mut segments: Vec<Segment> = Vec::new();

    let reject = |line_no: usize, line_text: &str, reason: String| -> XdbError {
        let before: Vec<String> = lines[line_no.saturating_sub(1 + CONTEXT_LINES)..line_no.saturating_sub(1)]
            .to_vec();
        let after_start = line_no; // lines is 0-indexed, line_no is 1-indexed, so `line_no` is the next line
        let after: Vec<String> = lines
            .get(after_start..(after_start + CONTEXT_LINES).min(lines.len()))
            .unwrap_or(&[])
            .to_vec();
        XdbError::Parse(ParseContext {
            line_no,
            line_text: line_text.to_string(),
            before,
            after,
            reason,
        })
    };

    for (idx, raw_line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let candidate = Segment::parse_line(trimmed)
            .map_err(|reason| reject(line_no, trimmed, reason))?;

        match segments.last_mut() {
            None => segments.push(candidate),
            Some(prev) => {
                let adjacent = prev.end_ip.checked_add(1) == Some(candidate.start_ip);
                if !adjacent {
                    return Err(reject(
                        line_no,
                        trimmed,
                        format!(
                            "range is not contiguous with the previous entry ending at {}",
                            u32_to_ipv4(prev.end_ip)
                        ),
                    ));
                }
                if merge_adjacent && prev.region == candidate.region {
                    prev.end_ip = candidate.end_ip;
                } else {
                    segments.push(candidate);
                }
            }
        }
    }

    if segments.is_empty() {
        return Err(XdbError::EmptyInput);
    }

    Ok(segments)
}

/// Decomposes `[s, e]` into sub-ranges each confined to a single `/16`,
/// preserving order, region, and full coverage (spec.md §4.3 "Range
/// splitting"; testable property 3).
pub fn split_into_subnets(seg: &Segment) -> Vec<Segment> {
    let mut out = Vec::new();
    let b0_start = (seg.start_ip >> 24) & 0xFF;
    let b0_end = (seg.end_ip >> 24) & 0xFF;

    for b0 in b0_start..=b0_end {
        let base = b0 << 24;
        let sub_start = seg.start_ip.max(base);
        let sub_end = seg.end_ip.min(base | 0x00FF_FFFF);

        let b1_start = (sub_start >> 16) & 0xFF;
        let b1_end = (sub_end >> 16) & 0xFF;

        for b1 in b1_start..=b1_end {
            let cell_base = base | (b1 << 16);
            let start = sub_start.max(cell_base);
            let end = sub_end.min(cell_base | 0x0000_FFFF);
            out.push(Segment::new(start, end, seg.region.clone()));
        }
    }

    out
}
