//! JSON Lines journal writer.
//!
//! One JSON object per line, appended to `{prefix}_{YYYY-MM-DD}.jsonl`:
//! - An interrupted write only damages its own line
//! - Files can be tailed and replayed line by line
//! - The file rotates when the UTC date changes

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Open file for one day.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: NaiveDate,
    records_written: usize,
}

/// Buffered, append-only JSON Lines writer.
pub struct JsonLinesWriter<T: Serialize> {
    base_dir: PathBuf,
    prefix: String,
    buffer: Vec<T>,
    max_buffer_size: usize,
    active_writer: Option<ActiveWriter>,
}

impl<T: Serialize> JsonLinesWriter<T> {
    pub fn new(base_dir: impl AsRef<Path>, prefix: &str, max_buffer_size: usize) -> Self {
        let base_dir = base_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&base_dir) {
            warn!(?e, dir = %base_dir.display(), "Failed to create journal directory");
        }

        Self {
            base_dir,
            prefix: prefix.to_string(),
            buffer: Vec::with_capacity(max_buffer_size),
            max_buffer_size: max_buffer_size.max(1),
            active_writer: None,
        }
    }

    /// Buffer a record, flushing once the buffer is full.
    pub fn add_record(&mut self, record: T) -> PersistenceResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.max_buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn file_path(&self, date: NaiveDate) -> PathBuf {
        self.base_dir
            .join(format!("{}_{}.jsonl", self.prefix, date.format("%Y-%m-%d")))
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush writer on close");
            }
            info!(
                prefix = %self.prefix,
                date = %active.date,
                records = active.records_written,
                "Closed JSON Lines writer"
            );
        }
    }

    fn open_writer(&self, date: NaiveDate) -> PersistenceResult<ActiveWriter> {
        let path = self.file_path(date);
        info!(file = %path.display(), "Opening JSON Lines writer (append mode)");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date,
            records_written: 0,
        })
    }

    pub fn flush(&mut self) -> PersistenceResult<()> {
        self.flush_for(Utc::now().date_naive())
    }

    /// Flush into the file for `date`, rotating if the open file is older.
    fn flush_for(&mut self, date: NaiveDate) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        if self.active_writer.as_ref().is_some_and(|w| w.date != date) {
            self.close_active_writer();
        }
        let mut active = match self.active_writer.take() {
            Some(active) => active,
            None => self.open_writer(date)?,
        };

        let record_count = self.buffer.len();
        let result = (|| -> PersistenceResult<()> {
            for record in &self.buffer {
                let json = serde_json::to_string(record)?;
                writeln!(active.writer, "{json}")?;
            }
            active.writer.flush()?;
            Ok(())
        })();
        if result.is_ok() {
            active.records_written += record_count;
            self.buffer.clear();
            debug!(prefix = %self.prefix, records = record_count, "Flushed JSON Lines");
        }
        self.active_writer = Some(active);
        result
    }

    /// Flush pending records and close the file.
    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_active_writer();
        Ok(())
    }
}

impl<T: Serialize> Drop for JsonLinesWriter<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush buffer on drop");
        }
        self.close_active_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        note: String,
    }

    fn entry(id: u32) -> Entry {
        Entry {
            id,
            note: format!("entry_{id}"),
        }
    }

    fn read_lines(path: &Path) -> Vec<String> {
        let reader = BufReader::new(File::open(path).unwrap());
        reader.lines().map_while(Result::ok).collect()
    }

    fn files(dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 100);
        for i in 0..5 {
            writer.add_record(entry(i)).unwrap();
        }
        writer.close().unwrap();

        let paths = files(dir.path());
        assert_eq!(paths.len(), 1);
        let name = paths[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cycles_") && name.ends_with(".jsonl"));

        let lines = read_lines(&paths[0]);
        assert_eq!(lines.len(), 5);
        let first: Entry = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.note, "entry_0");
    }

    #[test]
    fn test_append_across_writers() {
        let dir = TempDir::new().unwrap();
        for batch in 0..2 {
            let mut writer = JsonLinesWriter::new(dir.path(), "positions", 100);
            for i in 0..3 {
                writer.add_record(entry(batch * 3 + i)).unwrap();
            }
        }
        let paths = files(dir.path());
        assert_eq!(read_lines(&paths[0]).len(), 6);
    }

    #[test]
    fn test_buffer_limit_flushes() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 2);
        writer.add_record(entry(1)).unwrap();
        assert_eq!(writer.pending(), 1);
        writer.add_record(entry(2)).unwrap();
        assert_eq!(writer.pending(), 0);
        assert_eq!(read_lines(&files(dir.path())[0]).len(), 2);
    }

    #[test]
    fn test_rotates_on_date_change() {
        let dir = TempDir::new().unwrap();
        let mut writer = JsonLinesWriter::new(dir.path(), "cycles", 100);
        let day1 = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        writer.add_record(entry(1)).unwrap();
        writer.flush_for(day1).unwrap();
        writer.add_record(entry(2)).unwrap();
        writer.add_record(entry(3)).unwrap();
        writer.flush_for(day2).unwrap();
        drop(writer);

        let paths = files(dir.path());
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("cycles_2026-03-01.jsonl"));
        assert_eq!(read_lines(&paths[0]).len(), 1);
        assert_eq!(read_lines(&paths[1]).len(), 2);
    }

    #[test]
    fn test_empty_flush_noop() {
        let dir = TempDir::new().unwrap();
        let mut writer: JsonLinesWriter<Entry> = JsonLinesWriter::new(dir.path(), "cycles", 10);
        writer.flush().unwrap();
        assert!(files(dir.path()).is_empty());
    }
}
