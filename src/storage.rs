//! Disk layout and writing live at the boundary: the piece manager hands
//! verified `(index, bytes)` pairs to a single-callback collaborator and
//! logs, but never fails, on a write error. `FileSink` is one concrete,
//! minimal collaborator, a single-file layout, not a multi-file path
//! mapper.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};

pub trait PieceSink {
    /// Returns `Ok(())` on success; failures are logged by the caller and
    /// are not fatal to the core.
    fn write_piece(&mut self, index: usize, data: &[u8]) -> io::Result<()>;
}

/// Discards every piece; useful for tests and for dry runs.
#[derive(Debug, Default)]
pub struct NullSink;

impl PieceSink for NullSink {
    fn write_piece(&mut self, _index: usize, _data: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each verified piece at `index * piece_length` into a single
/// output file, growing it as needed.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    piece_length: u64,
}

impl FileSink {
    pub fn create(path: &str, piece_length: u64) -> io::Result<FileSink> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(FileSink { file, piece_length })
    }
}

impl PieceSink for FileSink {
    fn write_piece(&mut self, index: usize, data: &[u8]) -> io::Result<()> {
        let offset = index as u64 * self.piece_length;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_piece_at_its_byte_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = FileSink::create(path.to_str().unwrap(), 4).unwrap();

        sink.write_piece(1, b"beef").unwrap();
        sink.write_piece(0, b"dead").unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"dead");
        assert_eq!(&bytes[4..8], b"beef");
    }

    #[test]
    fn null_sink_never_fails() {
        let mut sink = NullSink;
        assert!(sink.write_piece(0, b"anything").is_ok());
    }
}
