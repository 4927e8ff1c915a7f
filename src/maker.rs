//! Builds an XDB file from a sorted, contiguous range file (spec.md §4.3).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::codec::{
    write_u16_le, write_u32_le, DATA_PAYLOAD_OFFSET, HEADER_LEN, INDEX_POLICY_VECTOR,
    SEGMENT_INDEX_LEN, VECTOR_LEN, XDB_VERSION,
};
use crate::error::XdbError;
use crate::range::{parse_range_file, split_into_subnets, Segment};

enum State {
    New,
    Initialized { ranges: Vec<Segment> },
    Writing { file: BufWriter<File>, seg_index_start: u32, seg_index_end: u32 },
    Finished,
}

/// One-shot builder: `new` → `init` → `start` → `finish` → `close`.
pub struct Maker {
    src_path: PathBuf,
    dst_path: PathBuf,
    state: State,
}

impl Maker {
    pub fn new(src_path: impl AsRef<Path>, dst_path: impl AsRef<Path>) -> Self {
        Self {
            src_path: src_path.as_ref().to_path_buf(),
            dst_path: dst_path.as_ref().to_path_buf(),
            state: State::New,
        }
    }

    /// Parses and validates the range file, merging adjacent same-region
    /// entries and storing the resulting ordered list (spec.md §4.3). The
    /// `/16`-confining split happens later, inside `start()`'s segment-index
    /// step, not here.
    pub fn init(&mut self) -> Result<(), XdbError> {
        let ranges = parse_range_file(&self.src_path, true)?;
        info!(ranges = ranges.len(), "maker initialized");
        self.state = State::Initialized { ranges };
        Ok(())
    }

    /// Number of merged ranges loaded by `init()` (pre-`/16`-split).
    pub fn segments_count(&self) -> usize {
        match &self.state {
            State::Initialized { ranges } => ranges.len(),
            _ => 0,
        }
    }

    /// Writes header (placeholder), vector index, data payload, and segment
    /// index, in that order, to the destination file.
    pub fn start(&mut self) -> Result<(), XdbError> {
        let ranges = match std::mem::replace(&mut self.state, State::New) {
            State::Initialized { ranges } => ranges,
            _ => return Err(XdbError::CorruptXdb("start() called before init()".into())),
        };

        let mut segments = Vec::with_capacity(ranges.len());
        for seg in &ranges {
            segments.extend(split_into_subnets(seg));
        }

        let mut file = BufWriter::new(File::create(&self.dst_path)?);

        // Header placeholder; fixed up in `finish`.
        file.write_all(&[0u8; HEADER_LEN])?;
        // Vector index placeholder; filled in below.
        file.write_all(&[0u8; VECTOR_LEN])?;

        let mut data_payload: Vec<u8> = Vec::new();
        let mut region_offsets: HashMap<&str, (u16, u32)> = HashMap::new();
        let mut records: Vec<[u8; SEGMENT_INDEX_LEN]> = Vec::with_capacity(segments.len());

        for seg in &segments {
            let (region_len, region_ptr) = match region_offsets.get(seg.region.as_str()) {
                Some(&entry) => entry,
                None => {
                    let ptr = (DATA_PAYLOAD_OFFSET + data_payload.len()) as u32;
                    let len = seg.region.len() as u16;
                    data_payload.extend_from_slice(seg.region.as_bytes());
                    region_offsets.insert(seg.region.as_str(), (len, ptr));
                    (len, ptr)
                }
            };
            let mut record = [0u8; SEGMENT_INDEX_LEN];
            write_u32_le(&mut record, 0, seg.start_ip);
            write_u32_le(&mut record, 4, seg.end_ip);
            write_u16_le(&mut record, 8, region_len);
            write_u32_le(&mut record, 10, region_ptr);
            records.push(record);
        }

        file.write_all(&data_payload)?;

        let seg_index_start = (DATA_PAYLOAD_OFFSET + data_payload.len()) as u32;

        // Vector index: for each (b0, b1) cell, the byte range of segment-index
        // records whose start/end ip falls in that cell. Segments are sorted
        // ascending and each is confined to a single /16, so records sharing a
        // cell are contiguous.
        let mut vector = vec![0u8; VECTOR_LEN];
        let mut idx = 0usize;
        while idx < segments.len() {
            let b0 = ((segments[idx].start_ip >> 24) & 0xFF) as usize;
            let b1 = ((segments[idx].start_ip >> 16) & 0xFF) as usize;
            let run_start = idx;
            while idx < segments.len() {
                let cb0 = ((segments[idx].start_ip >> 24) & 0xFF) as usize;
                let cb1 = ((segments[idx].start_ip >> 16) & 0xFF) as usize;
                if cb0 != b0 || cb1 != b1 {
                    break;
                }
                idx += 1;
            }
            let cell_off = (b0 * 256 + b1) * 8;
            let s_ptr = seg_index_start + (run_start * SEGMENT_INDEX_LEN) as u32;
            let e_ptr = seg_index_start + (idx * SEGMENT_INDEX_LEN) as u32;
            write_u32_le(&mut vector, cell_off, s_ptr);
            write_u32_le(&mut vector, cell_off + 4, e_ptr);
        }

        for record in &records {
            file.write_all(record)?;
        }
        let seg_index_end = seg_index_start + (records.len() * SEGMENT_INDEX_LEN) as u32;

        // Back-patch the vector index (was written as placeholder zeros).
        file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        file.write_all(&vector)?;
        file.seek(SeekFrom::End(0))?;

        self.state = State::Writing { file, seg_index_start, seg_index_end };
        Ok(())
    }

    /// Back-patches the header with real offsets and a build timestamp, then
    /// flushes the file.
    pub fn finish(&mut self) -> Result<(), XdbError> {
        let (mut file, seg_index_start, seg_index_end) = match std::mem::replace(&mut self.state, State::New) {
            State::Writing { file, seg_index_start, seg_index_end } => (file, seg_index_start, seg_index_end),
            _ => return Err(XdbError::CorruptXdb("finish() called before start()".into())),
        };

        let mut header = [0u8; HEADER_LEN];
        write_u16_le(&mut header, 0, XDB_VERSION);
        write_u16_le(&mut header, 2, INDEX_POLICY_VECTOR);
        let build_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        write_u32_le(&mut header, 4, build_time);
        write_u32_le(&mut header, 8, seg_index_start);
        write_u32_le(&mut header, 12, seg_index_end);

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        file.flush()?;

        info!(
            path = %self.dst_path.display(),
            seg_index_start,
            seg_index_end,
            "xdb build finished"
        );
        self.state = State::Finished;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = State::Finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::Searcher;
    use std::io::Write as _;

    fn write_src(dir: &tempfile::TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("src.txt");
        std::fs::File::create(&path).unwrap().write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn builds_a_searchable_xdb() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_src(
            &dir,
            "1.0.0.0|1.0.0.255|CN|GD|SZ\n1.0.1.0|1.0.1.255|CN|GD|GZ\n1.0.2.0|2.255.255.255|US\n",
        );
        let dst = dir.path().join("out.xdb");

        let mut maker = Maker::new(&src, &dst);
        maker.init().unwrap();
        assert!(maker.segments_count() >= 3);
        maker.start().unwrap();
        maker.finish().unwrap();

        let searcher = Searcher::open_memory(&dst).unwrap();
        let (region, io) = searcher.search(0x01000000).unwrap();
        assert_eq!(region, "CN|GD|SZ");
        assert_eq!(io, 0);
        let (region, _) = searcher.search(0x01000180).unwrap();
        assert_eq!(region, "CN|GD|GZ");
        let (region, _) = searcher.search(0x02000000).unwrap();
        assert_eq!(region, "US");
    }

    #[test]
    fn dedups_identical_regions_in_the_data_payload() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_src(
            &dir,
            "1.0.0.0|1.0.255.255|SAME\n1.1.0.0|1.1.255.255|SAME\n",
        );
        let dst = dir.path().join("out.xdb");
        let mut maker = Maker::new(&src, &dst);
        maker.init().unwrap();
        maker.start().unwrap();
        maker.finish().unwrap();

        let header_and_vector = HEADER_LEN + VECTOR_LEN;
        let file_len = std::fs::metadata(&dst).unwrap().len() as usize;
        // Two /16 segments, one "SAME" region stored once: payload is tiny.
        assert!(file_len < header_and_vector + 32 + 2 * SEGMENT_INDEX_LEN);
    }

    #[test]
    fn segments_count_reflects_pre_split_ranges_not_post_split() {
        let dir = tempfile::tempdir().unwrap();
        // A single merged range spanning three /16s: init() must report 1,
        // even though start() will later split it into 3 segment-index
        // records.
        let src = write_src(&dir, "1.0.0.0|1.2.255.255|US\n");
        let dst = dir.path().join("out.xdb");
        let mut maker = Maker::new(&src, &dst);
        maker.init().unwrap();
        assert_eq!(maker.segments_count(), 1);
        maker.start().unwrap();
        maker.finish().unwrap();

        let searcher = Searcher::open_memory(&dst).unwrap();
        let (region, _) = searcher.search(0x01020000).unwrap();
        assert_eq!(region, "US");
    }

    #[test]
    fn start_before_init_errors() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out.xdb");
        let mut maker = Maker::new(dir.path().join("missing.txt"), &dst);
        assert!(maker.start().is_err());
    }
}
