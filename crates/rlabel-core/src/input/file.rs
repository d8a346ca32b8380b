//! Line-oriented file input (gzip-aware).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{RecordInput, RecordReader, lock_or_recover};
use crate::error::InputError;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

/// Record input backed by a file with one record per line.
///
/// Files ending in `.gz` are decompressed transparently. Every
/// `create_reader` call reopens the file from the start.
pub struct FileInput {
    path: PathBuf,
}

impl FileInput {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl RecordInput for FileInput {
    fn create_reader(&mut self) -> Result<Box<dyn RecordReader + '_>, InputError> {
        let reader = open_line_reader(&self.path).map_err(|source| InputError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(Box::new(FileReader { cursor: Mutex::new(LineCursor { reader, done: false }) }))
    }
}

fn open_line_reader(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
    let f = File::open(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    if ext == "gz" {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

struct LineCursor {
    reader: Box<dyn BufRead + Send>,
    done: bool,
}

struct FileReader {
    cursor: Mutex<LineCursor>,
}

impl RecordReader for FileReader {
    fn read(&self) -> Option<String> {
        let mut cursor = lock_or_recover(&self.cursor);
        if cursor.done {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match cursor.reader.read_line(&mut line) {
                Ok(0) => {
                    cursor.done = true;
                    return None;
                }
                Ok(_) => {
                    if !line.trim().is_empty() {
                        return Some(line.trim_end_matches(['\n', '\r']).to_string());
                    }
                    // Blank line; keep reading under the same lock.
                }
                Err(e) => {
                    log::error!("read error on input stream: {e}");
                    cursor.done = true;
                    return None;
                }
            }
        }
    }

    fn at_end(&self) -> bool {
        // Observed under the cursor lock so a reader cannot report
        // not-at-end just before a concurrent read drains the file.
        lock_or_recover(&self.cursor).done
    }
}
