//! Append-only newline-delimited JSON ledger file.
//!
//! - One canonical JSON record per line
//! - Lines are only ever appended, never rewritten
//! - A trailing line without `\n` is an append still in flight

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::record::EvidenceRecord;
use super::RegistryError;

/// One physical line of the ledger.
#[derive(Debug)]
pub enum LedgerLine {
    Record(Box<EvidenceRecord>),
    Malformed(String),
}

/// Streaming reader over ledger lines, numbered from 1.
pub struct LedgerReader<R> {
    reader: R,
    line_no: usize,
    buf: Vec<u8>,
}

impl LedgerReader<BufReader<File>> {
    /// Open a ledger for reading. A missing file reads as empty.
    pub fn open(path: &Path) -> io::Result<Option<Self>> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self::new(BufReader::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<R: BufRead> LedgerReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for LedgerReader<R> {
    type Item = io::Result<(usize, LedgerLine)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let read = match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };
            if read == 0 {
                return None;
            }
            self.line_no += 1;

            if self.buf.last() != Some(&b'\n') {
                tracing::debug!(line = self.line_no, "Skipping partially written ledger line");
                return None;
            }

            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(e) => {
                    return Some(Ok((self.line_no, LedgerLine::Malformed(e.to_string()))));
                }
            };
            if text.is_empty() {
                continue;
            }

            let line = match EvidenceRecord::from_line(text) {
                Ok(record) => LedgerLine::Record(Box::new(record)),
                Err(e) => LedgerLine::Malformed(e.to_string()),
            };
            return Some(Ok((self.line_no, line)));
        }
    }
}

/// Re-verify every record of a ledger file against its predecessor.
///
/// Never stops at the first finding: every failing line is reported.
/// A malformed line breaks linkage, so the next record is only checked
/// on its own.
pub fn verify_ledger(path: &Path) -> (bool, Vec<String>) {
    let reader = match LedgerReader::open(path) {
        Ok(Some(reader)) => reader,
        Ok(None) => return (true, Vec::new()),
        Err(e) => return (false, vec![format!("Failed to open ledger: {}", e)]),
    };

    let mut errors = Vec::new();
    let mut previous: Option<EvidenceRecord> = None;

    for item in reader {
        let (line_no, line) = match item {
            Ok(item) => item,
            Err(e) => {
                errors.push(format!("Failed to read ledger: {}", e));
                break;
            }
        };

        match line {
            LedgerLine::Record(record) => {
                if let Err(failure) = record.check_integrity(previous.as_ref()) {
                    tracing::warn!(line = line_no, reason = %failure, "Integrity check failed");
                    errors.push(format!("Line {}: Integrity check failed", line_no));
                }
                previous = Some(*record);
            }
            LedgerLine::Malformed(reason) => {
                tracing::warn!(line = line_no, reason = %reason, "Malformed ledger line");
                errors.push(format!("Line {}: Malformed record: {}", line_no, reason));
                previous = None;
            }
        }
    }

    (errors.is_empty(), errors)
}

/// Exclusive appender holding the chain tail.
pub struct LedgerWriter {
    path: PathBuf,
    file: File,
    tail_hash: String,
    fsync: bool,
}

impl LedgerWriter {
    /// Open `path` for appending, continuing the chain after `tail_hash`.
    ///
    /// A torn final line left by an interrupted append is terminated with a
    /// newline so the next record starts on its own line.
    pub fn open(path: &Path, tail_hash: String, fsync: bool) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        if ends_with_partial_line(&mut file)? {
            tracing::warn!(path = %path.display(), "Terminating torn ledger line");
            file.write_all(b"\n")?;
            file.sync_data()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            tail_hash,
            fsync,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `entry_hash` of the last appended record, empty for a new ledger.
    pub fn tail_hash(&self) -> &str {
        &self.tail_hash
    }

    /// Append one record. The tail only advances once the line is written.
    pub fn append(&mut self, record: &EvidenceRecord) -> Result<(), RegistryError> {
        let mut line = record.to_line()?;
        line.push('\n');

        append_line(&mut self.file, line.as_bytes(), self.fsync)?;

        self.tail_hash = record.entry_hash.clone();
        Ok(())
    }

    pub fn sync(&self) -> Result<(), RegistryError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Append target that can be cut back to an earlier length.
pub(crate) trait LedgerSink: Write {
    fn len(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync_data(&mut self) -> io::Result<()>;
}

impl LedgerSink for File {
    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }
}

/// Write one full line or nothing: a failed write is cut back to the
/// length the sink had before it started.
pub(crate) fn append_line<S: LedgerSink>(sink: &mut S, line: &[u8], fsync: bool) -> io::Result<()> {
    let start = sink.len()?;

    let written = sink.write_all(line).and_then(|_| sink.flush());
    if let Err(e) = written {
        tracing::warn!(error = %e, "Ledger append failed; rolling back partial line");
        if let Err(rollback) = sink.truncate(start) {
            tracing::error!(error = %rollback, "Failed to roll back partial ledger line");
        }
        return Err(e);
    }

    if fsync {
        sink.sync_data()?;
    }
    Ok(())
}

fn ends_with_partial_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
