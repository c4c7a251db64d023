use std::io;

use thiserror::Error;

/// How much of an offending input line is kept in error messages.
pub const LINE_PREVIEW: usize = 80;

/// Truncate a raw input line for inclusion in an error message.
pub fn preview(line: &[u8]) -> String {
    let end = line.len().min(LINE_PREVIEW);
    let mut s = String::from_utf8_lossy(&line[..end]).into_owned();
    if line.len() > LINE_PREVIEW {
        s.push_str("...");
    }
    s
}

/// Errors from the pure codecs (diploid, depth, taxa distribution).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unrecognized allele symbol '{0}'")]
    InvalidSymbol(char),
    #[error("depth {0} is not representable")]
    InvalidDepth(i32),
    #[error("taxon index {index} out of range (max taxa {max_taxa})")]
    IndexOutOfRange { index: u32, max_taxa: u32 },
}

/// Errors from the ingestion pipeline. Every variant is fatal for the build
/// that raised it; callers decide exit codes.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed record in {file} at line {line}: {message}")]
    Format {
        file: String,
        line: u64,
        message: String,
    },
    #[error("positions out of order at site {index}: {previous} > {current}")]
    Ordering {
        index: usize,
        previous: String,
        current: String,
    },
    #[error("encoding failed in {file} at line {line}: {source}")]
    Codec {
        file: String,
        line: u64,
        #[source]
        source: CodecError,
    },
    #[error("{0}")]
    Resource(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BuildError {
    /// Format error with the nearest preceding site name folded into the
    /// message, when one is known.
    pub fn format_at(
        file: &str,
        line: u64,
        site: Option<&str>,
        message: impl Into<String>,
    ) -> BuildError {
        let mut message = message.into();
        if let Some(site) = site {
            message.push_str(&format!(" (after site {})", site));
        }
        BuildError::Format {
            file: file.to_string(),
            line,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_preview_truncates() {
        let long = vec![b'x'; 200];
        let p = preview(&long);
        assert!(p.len() == LINE_PREVIEW + 3);
        assert!(p.ends_with("..."));

        let short = b"rs1\tA/T";
        assert!(preview(short) == "rs1\tA/T");
    }

    #[test]
    pub fn test_format_error_message() {
        let e = BuildError::format_at(
            "test.hmp.txt",
            12,
            Some("rs42"),
            "expected 13 fields, found 12",
        );
        let msg = format!("{}", e);
        assert!(msg.contains("test.hmp.txt"));
        assert!(msg.contains("line 12"));
        assert!(msg.contains("rs42"));
    }
}
