//! Line index sidecar for block-gzipped text, and random line access over
//! it.
//!
//! The index records a virtual offset for every Nth data line: the byte
//! offset of a gzip member in the high 48 bits and the uncompressed offset
//! within that member in the low 16. Every field is little-endian.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;

use crate::error::BuildError;

/// "LIX1".
pub const LINE_INDEX_MAGIC: i32 = 0x4C49_5831;

const INTRA_BITS: u32 = 16;

/// Combine a gzip member offset and an intra-member uncompressed offset
/// into one virtual offset.
pub fn virtual_offset(member: u64, intra: u16) -> u64 {
    (member << INTRA_BITS) | intra as u64
}

pub fn split_virtual_offset(offset: u64) -> (u64, u16) {
    (offset >> INTRA_BITS, (offset & 0xFFFF) as u16)
}

/// Parsed index sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    /// Leading byte marking comment lines in the data file.
    pub comment_char: u8,
    /// Non-comment lines to skip before data begins.
    pub header_lines: u32,
    /// Data lines between consecutive index entries.
    pub line_interval: u32,
    /// Annotation strings carried verbatim from the indexer.
    pub names: Vec<String>,
    /// Virtual offset of data line k * line_interval, for each k.
    pub offsets: Vec<u64>,
}

impl LineIndex {
    pub fn read<R: Read>(mut r: R) -> Result<LineIndex, BuildError> {
        let magic = read_i32(&mut r)?;
        if magic != LINE_INDEX_MAGIC {
            return Err(BuildError::Resource(format!(
                "not a line index (magic {:#010x}, expected {:#010x})",
                magic, LINE_INDEX_MAGIC
            )));
        }

        let comment_char = read_i32(&mut r)? as u8;
        let header_lines = read_i32(&mut r)? as u32;
        let line_interval = read_i32(&mut r)? as u32;
        if line_interval == 0 {
            return Err(BuildError::Resource(
                "line index declares a zero line interval".to_string(),
            ));
        }

        let num_names = read_i32(&mut r)? as usize;
        let mut names = Vec::with_capacity(num_names);
        for _ in 0..num_names {
            let len = read_i32(&mut r)? as usize;
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf)?;
            names.push(String::from_utf8(buf).map_err(|_| {
                BuildError::Resource("line index name is not valid UTF-8".to_string())
            })?);
        }

        let num_offsets = read_i32(&mut r)? as usize;
        let mut offsets = Vec::with_capacity(num_offsets);
        for _ in 0..num_offsets {
            offsets.push(read_i64(&mut r)? as u64);
        }

        Ok(LineIndex {
            comment_char,
            header_lines,
            line_interval,
            names,
            offsets,
        })
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        write_i32(&mut w, LINE_INDEX_MAGIC)?;
        write_i32(&mut w, self.comment_char as i32)?;
        write_i32(&mut w, self.header_lines as i32)?;
        write_i32(&mut w, self.line_interval as i32)?;

        write_i32(&mut w, self.names.len() as i32)?;
        for name in self.names.iter() {
            write_i32(&mut w, name.len() as i32)?;
            w.write_all(name.as_bytes())?;
        }

        write_i32(&mut w, self.offsets.len() as i32)?;
        for &offset in self.offsets.iter() {
            write_i64(&mut w, offset as i64)?;
        }
        Ok(())
    }

    pub fn open(path: &Path) -> Result<LineIndex, BuildError> {
        LineIndex::read(BufReader::new(File::open(path)?))
    }
}

/// Random line access over block-gzipped text via a line index.
///
/// Seeks to the nearest indexed gzip member, decompresses forward from
/// there, and skips to the requested line. Lines may span member
/// boundaries; the decoder runs across members.
pub struct IndexedReader<R: Read + Seek> {
    src: R,
    index: LineIndex,
}

impl IndexedReader<File> {
    pub fn open(data: &Path, index: &Path) -> Result<IndexedReader<File>, BuildError> {
        Ok(IndexedReader {
            src: File::open(data)?,
            index: LineIndex::open(index)?,
        })
    }
}

impl<R: Read + Seek> IndexedReader<R> {
    pub fn new(src: R, index: LineIndex) -> IndexedReader<R> {
        IndexedReader { src, index }
    }

    pub fn index(&self) -> &LineIndex {
        &self.index
    }

    /// Fetch data line n (zero-based, counted from the first data line).
    pub fn line(&mut self, n: u64) -> Result<Vec<u8>, BuildError> {
        let entry = (n / self.index.line_interval as u64) as usize;
        let offset = *self.index.offsets.get(entry).ok_or_else(|| {
            BuildError::Resource(format!("line {} is past the end of the index", n))
        })?;
        let (member, intra) = split_virtual_offset(offset);

        self.src.seek(SeekFrom::Start(member))?;
        let mut decoder =
            BufReader::new(MultiGzDecoder::new(BufReader::new(&mut self.src)));
        io::copy(&mut (&mut decoder).take(intra as u64), &mut io::sink())?;

        let mut skip = n - entry as u64 * self.index.line_interval as u64;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = decoder.read_until(b'\n', &mut buf)?;
            if read == 0 {
                return Err(BuildError::Resource(format!(
                    "line {} is past the end of the data",
                    n
                )));
            }
            if skip == 0 {
                break;
            }
            skip -= 1;
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        Ok(buf)
    }
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32, BuildError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, BuildError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
