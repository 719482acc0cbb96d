//! Size-based rotating file writer
//!
//! Used for the DAG processor manager log. When a write would take the file
//! past `max_bytes`, `name` becomes `name.1`, `name.1` becomes `name.2` and
//! so on, keeping at most `backup_count` rolled files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use bytesize::ByteSize;
use tracing::debug;

use log_config::assembler::FileMode;

/// A file writer that rolls over by size
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    file: File,
    written: u64,
}

impl RotatingFileWriter {
    /// Opens the file; rotation is disabled when `max_bytes` or `backup_count` is zero
    pub fn open(
        path: impl Into<PathBuf>,
        max_bytes: u64,
        backup_count: usize,
        mode: FileMode,
    ) -> io::Result<Self> {
        let path = path.into();
        let file = open_file(&path, mode)?;
        let written = file.metadata()?.len();
        debug!(
            "Opened {} (rotating at {}, keeping {} backups)",
            path.display(),
            ByteSize(max_bytes),
            backup_count
        );
        Ok(Self {
            path,
            max_bytes,
            backup_count,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the current file
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Path of the `index`-th rolled file
    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn should_rollover(&self, incoming: usize) -> bool {
        self.max_bytes > 0
            && self.backup_count > 0
            && self.written > 0
            && self.written + incoming as u64 >= self.max_bytes
    }

    fn rollover(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for index in (1..self.backup_count).rev() {
            let source = self.backup_path(index);
            if source.exists() {
                let target = self.backup_path(index + 1);
                if target.exists() {
                    fs::remove_file(&target)?;
                }
                fs::rename(&source, &target)?;
            }
        }
        let first = self.backup_path(1);
        if first.exists() {
            fs::remove_file(&first)?;
        }
        fs::rename(&self.path, &first)?;

        self.file = open_file(&self.path, FileMode::Truncate)?;
        self.written = 0;
        Ok(())
    }
}

fn open_file(path: &Path, mode: FileMode) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        FileMode::Append => options.append(true),
        FileMode::Truncate => options.write(true).truncate(true),
    };
    options.open(path)
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rollover(buf.len()) {
            self.rollover()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.log");
        fs::write(&path, "old\n").unwrap();

        let mut writer = RotatingFileWriter::open(&path, 1024, 5, FileMode::Append).unwrap();
        assert_eq!(writer.written(), 4);
        writer.write_all(b"new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nnew\n");
    }

    #[test]
    fn test_rolls_over_and_keeps_backup_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.log");
        let mut writer = RotatingFileWriter::open(&path, 10, 2, FileMode::Append).unwrap();

        for line in ["aaaaaaaa\n", "bbbbbbbb\n", "cccccccc\n", "dddddddd\n"] {
            writer.write_all(line.as_bytes()).unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "dddddddd\n");
        assert_eq!(fs::read_to_string(writer.backup_path(1)).unwrap(), "cccccccc\n");
        assert_eq!(fs::read_to_string(writer.backup_path(2)).unwrap(), "bbbbbbbb\n");
        assert!(!writer.backup_path(3).exists());
    }

    #[test]
    fn test_no_rotation_without_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.log");
        let mut writer = RotatingFileWriter::open(&path, 4, 0, FileMode::Append).unwrap();

        writer.write_all(b"12345678").unwrap();
        writer.write_all(b"9").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "123456789");
        assert!(!writer.backup_path(1).exists());
    }

    #[test]
    fn test_truncate_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manager.log");
        fs::write(&path, "stale").unwrap();

        let writer = RotatingFileWriter::open(&path, 1024, 1, FileMode::Truncate).unwrap();
        assert_eq!(writer.written(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
