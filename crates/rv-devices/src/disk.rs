use std::fs::{File, OpenOptions};
use std::io::{self, Read as _, Seek, SeekFrom, Write as _};
use std::path::Path;

/// A host file loaded whole into memory and addressable as a flat byte
/// buffer. No virtio-blk queue protocol sits in front of it — spec.md
/// keeps the virtio transport out of scope — so this is reachable only as
/// a named resource the embedder can read/write directly, not through the
/// guest's physical address space.
pub struct Disk {
    file: File,
    bytes: Vec<u8>,
    dirty: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DiskError {
    #[error("disk I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Disk {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DiskError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Self { file, bytes, dirty: false })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Option<()> {
        let end = offset.checked_add(buf.len())?;
        if end > self.bytes.len() {
            return None;
        }
        buf.copy_from_slice(&self.bytes[offset..end]);
        Some(())
    }

    pub fn write(&mut self, offset: usize, data: &[u8]) -> Option<()> {
        let end = offset.checked_add(data.len())?;
        if end > self.bytes.len() {
            return None;
        }
        self.bytes[offset..end].copy_from_slice(data);
        self.dirty = true;
        Some(())
    }

    /// Persist pending writes to the backing host file.
    pub fn flush(&mut self) -> Result<(), DiskError> {
        if !self.dirty {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.bytes)?;
        self.file.flush()?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("failed to flush disk image on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn write_then_flush_persists_to_backing_file() {
        let mut tmp = tempfile_with(&[0u8; 16]);
        {
            let mut disk = Disk::open(tmp.path()).unwrap();
            disk.write(4, &[1, 2, 3, 4]).unwrap();
            disk.flush().unwrap();
        }
        let mut reopened = Disk::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        reopened.read(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        let _ = &mut tmp;
    }

    #[test]
    fn out_of_range_access_is_none() {
        let tmp = tempfile_with(&[0u8; 8]);
        let disk = Disk::open(tmp.path()).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(disk.read(8, &mut buf), None);
    }

    struct TempPath(std::path::PathBuf);
    impl TempPath {
        fn path(&self) -> &Path {
            &self.0
        }
    }
    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn tempfile_with(contents: &[u8]) -> TempPath {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("rv-devices-disk-test-{}-{id}", std::process::id()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        TempPath(path)
    }
}
