//! File system and background work abstractions.

pub mod background;
pub mod file_system;

use crate::Result;
use std::path::Path;

pub use background::{BackgroundScheduler, Job};
pub use file_system::PosixEnv;

/// A file read sequentially.
pub trait SequentialFile: Send {
    /// Read up to `n` bytes. Fewer bytes are returned only at end of file.
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Skip `n` bytes. Skipping past the end is not an error.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// A file read at arbitrary offsets, safe for concurrent use.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `n` bytes starting at `offset`. Fewer bytes are returned only at end of file.
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>>;
}

/// A file written sequentially. Implementations may buffer appends.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered data to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Flush and make the data durable.
    fn sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<W: WritableFile + ?Sized> WritableFile for Box<W> {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        (**self).append(data)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn sync(&mut self) -> Result<()> {
        (**self).sync()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Operating system services used by the storage engine.
pub trait Env: Send + Sync {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;

    fn new_random_access_file(&self, path: &Path) -> Result<Box<dyn RandomAccessFile>>;

    /// Create a new file, truncating any existing one.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Open a file for appending, creating it if needed.
    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Names of the entries in `dir`, without the directory prefix.
    fn get_children(&self, dir: &Path) -> Result<Vec<String>>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn create_dir(&self, dir: &Path) -> Result<()>;

    fn remove_dir(&self, dir: &Path) -> Result<()>;

    fn get_file_size(&self, path: &Path) -> Result<u64>;

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Run `job` once on a background thread. Jobs run one at a time in FIFO order.
    fn schedule(&self, job: Job) -> Result<()>;
}
