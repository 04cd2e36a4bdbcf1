use crate::env::background::{BackgroundScheduler, Job};
use crate::env::{Env, RandomAccessFile, SequentialFile, WritableFile};
use crate::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub const WRITABLE_FILE_BUFFER_SIZE: usize = 65536;

/// Retry `f` while it fails with `Interrupted`.
fn retry_interrupted<T>(mut f: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match f() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            r => return r,
        }
    }
}

/// Fill `buf` from `read` until it is full or `read` reports end of file.
fn read_full(buf: &mut [u8], mut read: impl FnMut(&mut [u8], usize) -> io::Result<usize>) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = retry_interrupted(|| read(&mut buf[filled..], filled))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub struct PosixSequentialFile {
    file: File,
}

impl SequentialFile for PosixSequentialFile {
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; n];
        let file = &mut self.file;
        let len = read_full(&mut buf, |b, _| file.read(b))?;
        buf.truncate(len);
        Ok(buf)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.file.seek(SeekFrom::Current(n as i64))?;
        Ok(())
    }
}

pub struct PosixRandomAccessFile {
    file: File,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; n];
        let len = read_full(&mut buf, |b, filled| {
            self.file.read_at(b, offset + filled as u64)
        })?;
        buf.truncate(len);
        Ok(buf)
    }
}

#[cfg(feature = "mmap")]
pub mod mmap {
    use crate::env::RandomAccessFile;
    use crate::Result;
    use memmap::{Mmap, MmapOptions};
    use std::fs::File;

    /// Random access file backed by a read-only memory map of the whole file.
    pub struct MmapRandomAccessFile {
        mmap: Mmap,
    }

    impl MmapRandomAccessFile {
        pub fn open(file: &File) -> Result<MmapRandomAccessFile> {
            let mmap = unsafe { MmapOptions::new().map(file)? };
            Ok(MmapRandomAccessFile { mmap })
        }
    }

    impl RandomAccessFile for MmapRandomAccessFile {
        fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
            let len = self.mmap.len() as u64;
            let start = offset.min(len) as usize;
            let end = (offset.saturating_add(n as u64)).min(len) as usize;
            Ok(self.mmap[start..end].to_vec())
        }
    }
}

/// Writable file with a fixed-size append buffer.
pub struct PosixWritableFile {
    file: File,
    buf: Vec<u8>,
    path: PathBuf,
    /// Directory entries of a manifest must be durable before its contents.
    is_manifest: bool,
}

impl PosixWritableFile {
    fn new(file: File, path: &Path) -> PosixWritableFile {
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("MANIFEST"));
        PosixWritableFile {
            file,
            buf: Vec::with_capacity(WRITABLE_FILE_BUFFER_SIZE),
            path: path.to_path_buf(),
            is_manifest,
        }
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn sync_dir_if_manifest(&self) -> Result<()> {
        if !self.is_manifest {
            return Ok(());
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        retry_interrupted(|| File::open(dir)?.sync_all())?;
        Ok(())
    }
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, mut data: &[u8]) -> Result<()> {
        // Fit as much as possible into buffer.
        let copy = data.len().min(WRITABLE_FILE_BUFFER_SIZE - self.buf.len());
        self.buf.extend_from_slice(&data[..copy]);
        data = &data[copy..];
        if data.is_empty() {
            return Ok(());
        }

        // Can't fit in buffer, so need to do at least one write.
        self.flush_buffer()?;

        // Small writes go to buffer, large writes are written directly.
        if data.len() < WRITABLE_FILE_BUFFER_SIZE {
            self.buf.extend_from_slice(data);
            return Ok(());
        }
        self.file.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_buffer()
    }

    fn sync(&mut self) -> Result<()> {
        // Ensure new files referred to by the manifest are in the filesystem.
        self.sync_dir_if_manifest()?;
        self.flush_buffer()?;
        retry_interrupted(|| self.file.sync_data())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_buffer()
    }
}

impl Drop for PosixWritableFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush_buffer() {
            error!("failed to flush {}: {}", self.path.display(), e);
        }
    }
}

/// [`Env`] backed by the local file system.
#[derive(Default)]
pub struct PosixEnv {
    background: BackgroundScheduler,
}

impl PosixEnv {
    pub fn new() -> PosixEnv {
        PosixEnv::default()
    }
}

impl Env for PosixEnv {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        let file = File::open(path)?;
        Ok(Box::new(PosixSequentialFile { file }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        #[cfg(feature = "mmap")]
        {
            // empty files cannot be mapped
            if file.metadata()?.len() > 0 {
                return Ok(Box::new(mmap::MmapRandomAccessFile::open(&file)?));
            }
        }
        Ok(Box::new(PosixRandomAccessFile { file }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(PosixWritableFile::new(file, path)))
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Box::new(PosixWritableFile::new(file, path)))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        let mut children = vec![];
        for entry in std::fs::read_dir(dir)? {
            children.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(children)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path)?;
        Ok(())
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir(dir)?;
        Ok(())
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        std::fs::remove_dir(dir)?;
        Ok(())
    }

    fn get_file_size(&self, path: &Path) -> Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn schedule(&self, job: Job) -> Result<()> {
        self.background.schedule(job)
    }
}
