//! XDB Searcher with File, Vector, and Memory loader modes.
//!
//! Supported modes:
//! - File: no preload, every lookup hits disk
//! - Vector: the 256×256 vector index is preloaded, everything else on disk
//! - Memory: the whole file is loaded once, no disk access after open

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::codec::{
    read_u16_le, read_u32_le, vector_cell, vector_cell_offset, DATA_PAYLOAD_OFFSET, HEADER_LEN,
    SEGMENT_INDEX_LEN, VECTOR_INDEX_OFFSET, VECTOR_LEN, XDB_VERSION,
};
use crate::error::XdbError;

#[cfg(unix)]
type FileHandle = File;
#[cfg(not(unix))]
type FileHandle = std::sync::Mutex<File>;

#[cfg(unix)]
fn open_handle(file: File) -> FileHandle {
    file
}
#[cfg(not(unix))]
fn open_handle(file: File) -> FileHandle {
    std::sync::Mutex::new(file)
}

/// Reads exactly `buf.len()` bytes at `offset` without disturbing any other
/// reader's view of the file (spec.md §4.2/§5: "positioned reads").
#[cfg(unix)]
fn pread_exact(handle: &FileHandle, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    handle.read_exact_at(buf, offset)
}
#[cfg(not(unix))]
fn pread_exact(handle: &FileHandle, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    let mut f = handle.lock().expect("searcher file mutex poisoned");
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)
}

/// Loader mode — trades memory footprint for lookup latency (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    File,
    Vector,
    Memory,
}

enum Backing {
    File(FileHandle),
    Vector { file: FileHandle, vector: Vec<u8> },
    Memory(Vec<u8>),
}

/// An open XDB. See spec.md §4.2 for the lookup algorithm and io_count contract.
pub struct Searcher {
    path: PathBuf,
    mode: LoaderMode,
    file_len: u64,
    seg_index_start: u32,
    #[allow(dead_code)]
    seg_index_end: u32,
    backing: Option<Backing>,
}

fn read_and_validate_header(file: &mut File, file_len: u64) -> Result<(u32, u32), XdbError> {
    if file_len < (HEADER_LEN + VECTOR_LEN) as u64 {
        return Err(XdbError::TruncatedFile {
            actual: file_len as usize,
            required: HEADER_LEN + VECTOR_LEN,
        });
    }
    let mut header = [0u8; HEADER_LEN];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header)?;

    let version = read_u16_le(&header, 0);
    if version != XDB_VERSION {
        warn!(version, "unsupported xdb version");
        return Err(XdbError::UnsupportedVersion(version));
    }
    let seg_index_start = read_u32_le(&header, 8);
    let seg_index_end = read_u32_le(&header, 12);
    Ok((seg_index_start, seg_index_end))
}

impl Searcher {
    /// Opens the XDB for on-demand reads only; no preload.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self, XdbError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), mode = "file", "opening xdb");
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let (seg_index_start, seg_index_end) = read_and_validate_header(&mut file, file_len)?;
        Ok(Searcher {
            path,
            mode: LoaderMode::File,
            file_len,
            seg_index_start,
            seg_index_end,
            backing: Some(Backing::File(open_handle(file))),
        })
    }

    /// Opens the XDB and eagerly loads the 524,288-byte vector index.
    pub fn open_vector(path: impl AsRef<Path>) -> Result<Self, XdbError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), mode = "vector", "opening xdb");
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let (seg_index_start, seg_index_end) = read_and_validate_header(&mut file, file_len)?;

        let mut vector = vec![0u8; VECTOR_LEN];
        file.seek(SeekFrom::Start(VECTOR_INDEX_OFFSET as u64))?;
        file.read_exact(&mut vector)?;

        Ok(Searcher {
            path,
            mode: LoaderMode::Vector,
            file_len,
            seg_index_start,
            seg_index_end,
            backing: Some(Backing::Vector { file: open_handle(file), vector }),
        })
    }

    /// Reads the entire file into one owned buffer; no handle is retained.
    pub fn open_memory(path: impl AsRef<Path>) -> Result<Self, XdbError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), mode = "memory", "opening xdb");
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let (seg_index_start, seg_index_end) = read_and_validate_header(&mut file, file_len)?;

        let mut buf = Vec::with_capacity(file_len as usize);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buf)?;

        Ok(Searcher {
            path,
            mode: LoaderMode::Memory,
            file_len,
            seg_index_start,
            seg_index_end,
            backing: Some(Backing::Memory(buf)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LoaderMode {
        self.mode
    }

    pub fn is_memory_mode(&self) -> bool {
        self.mode == LoaderMode::Memory
    }

    pub fn is_vector_loaded(&self) -> bool {
        matches!(self.mode, LoaderMode::Vector | LoaderMode::Memory)
    }

    pub fn content_buffer_size(&self) -> usize {
        match &self.backing {
            Some(Backing::Memory(buf)) => buf.len(),
            _ => 0,
        }
    }

    pub fn vector_index_size(&self) -> usize {
        match &self.backing {
            Some(Backing::Vector { .. }) | Some(Backing::Memory(_)) => VECTOR_LEN,
            _ => 0,
        }
    }

    /// Releases handles/buffers. Idempotent.
    pub fn close(&mut self) {
        self.backing = None;
    }

    fn read_segment_record(
        &self,
        backing: &Backing,
        offset: usize,
        io_count: &mut u32,
    ) -> Result<[u8; SEGMENT_INDEX_LEN], XdbError> {
        let mut buf = [0u8; SEGMENT_INDEX_LEN];
        match backing {
            Backing::Memory(data) => {
                let end = offset + SEGMENT_INDEX_LEN;
                if end > data.len() {
                    return Err(XdbError::CorruptXdb(format!(
                        "segment record at {offset:#x} falls outside the file"
                    )));
                }
                buf.copy_from_slice(&data[offset..end]);
            }
            Backing::Vector { file, .. } | Backing::File(file) => {
                if (offset + SEGMENT_INDEX_LEN) as u64 > self.file_len {
                    return Err(XdbError::CorruptXdb(format!(
                        "segment record at {offset:#x} falls outside the file"
                    )));
                }
                pread_exact(file, offset as u64, &mut buf)?;
                *io_count += 1;
            }
        }
        Ok(buf)
    }

    fn read_region(
        &self,
        backing: &Backing,
        ptr: usize,
        len: usize,
        io_count: &mut u32,
    ) -> Result<String, XdbError> {
        let end = ptr + len;
        if ptr < DATA_PAYLOAD_OFFSET || end as u32 > self.seg_index_start {
            return Err(XdbError::CorruptXdb(format!(
                "region pointer {ptr:#x}/{len} falls outside the data payload"
            )));
        }
        let bytes = match backing {
            Backing::Memory(data) => {
                if end > data.len() {
                    return Err(XdbError::CorruptXdb(format!(
                        "region pointer {ptr:#x}/{len} falls outside the file"
                    )));
                }
                data[ptr..end].to_vec()
            }
            Backing::Vector { file, .. } | Backing::File(file) => {
                if end as u64 > self.file_len {
                    return Err(XdbError::CorruptXdb(format!(
                        "region pointer {ptr:#x}/{len} falls outside the file"
                    )));
                }
                let mut buf = vec![0u8; len];
                pread_exact(file, ptr as u64, &mut buf)?;
                *io_count += 1;
                buf
            }
        };
        String::from_utf8(bytes)
            .map_err(|_| XdbError::CorruptXdb(format!("region at {ptr:#x} is not valid utf-8")))
    }

    /// Looks up `ip`, returning the region (empty if uncovered) and the
    /// number of distinct backing-file reads performed (spec.md §4.2).
    pub fn search(&self, ip: u32) -> Result<(String, u32), XdbError> {
        let backing = self.backing.as_ref().ok_or(XdbError::Closed)?;
        let mut io_count = 0u32;

        let (b0, b1) = vector_cell(ip);
        let cell_off = vector_cell_offset(b0, b1);

        let (s_ptr, e_ptr): (usize, usize) = match backing {
            Backing::Memory(data) => {
                let off = VECTOR_INDEX_OFFSET + cell_off;
                (
                    read_u32_le(data, off) as usize,
                    read_u32_le(data, off + 4) as usize,
                )
            }
            Backing::Vector { vector, .. } => (
                read_u32_le(vector, cell_off) as usize,
                read_u32_le(vector, cell_off + 4) as usize,
            ),
            Backing::File(file) => {
                let mut buf = [0u8; 8];
                pread_exact(file, (VECTOR_INDEX_OFFSET + cell_off) as u64, &mut buf)?;
                io_count += 1;
                (read_u32_le(&buf, 0) as usize, read_u32_le(&buf, 4) as usize)
            }
        };

        if (s_ptr == 0 && e_ptr == 0) || s_ptr >= e_ptr {
            return Ok((String::new(), io_count));
        }

        let count = (e_ptr - s_ptr) / SEGMENT_INDEX_LEN;
        let mut lo: i64 = 0;
        let mut hi: i64 = count as i64 - 1;
        let mut found: Option<(u16, u32)> = None;

        while lo <= hi {
            let mid = (lo + hi) / 2;
            let offset = s_ptr + mid as usize * SEGMENT_INDEX_LEN;
            let record = self.read_segment_record(backing, offset, &mut io_count)?;
            let start_ip = read_u32_le(&record, 0);
            let end_ip = read_u32_le(&record, 4);

            if ip < start_ip {
                hi = mid - 1;
            } else if ip > end_ip {
                lo = mid + 1;
            } else {
                let region_len = read_u16_le(&record, 8);
                let region_ptr = read_u32_le(&record, 10);
                found = Some((region_len, region_ptr));
                break;
            }
        }

        let Some((region_len, region_ptr)) = found else {
            return Ok((String::new(), io_count));
        };

        let region = self.read_region(backing, region_ptr as usize, region_len as usize, &mut io_count)?;
        Ok((region, io_count))
    }
}

/// At most one cached non-file-mode Searcher, keyed by `(path, mode)`
/// (spec.md §5/§9). Replacing the cached entry drops (and so closes) the
/// previous one once no other `Arc` holds it. File-mode opens always
/// bypass the cache.
pub struct SearcherCache {
    inner: RwLock<Option<(PathBuf, LoaderMode, Arc<Searcher>)>>,
}

impl Default for SearcherCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SearcherCache {
    pub fn new() -> Self {
        Self { inner: RwLock::new(None) }
    }

    pub fn get_or_open(&self, path: &Path, mode: LoaderMode) -> Result<Arc<Searcher>, XdbError> {
        if mode == LoaderMode::File {
            return Ok(Arc::new(Searcher::open_file(path)?));
        }

        if let Some((cached_path, cached_mode, searcher)) = self.inner.read().unwrap().as_ref() {
            if cached_path == path && *cached_mode == mode {
                return Ok(searcher.clone());
            }
        }

        let opened = match mode {
            LoaderMode::Vector => Searcher::open_vector(path)?,
            LoaderMode::Memory => Searcher::open_memory(path)?,
            LoaderMode::File => unreachable!(),
        };
        let arc = Arc::new(opened);
        *self.inner.write().unwrap() = Some((path.to_path_buf(), mode, arc.clone()));
        Ok(arc)
    }

    pub fn evict(&self) {
        *self.inner.write().unwrap() = None;
    }
}
