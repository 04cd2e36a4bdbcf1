//! Helpers shared by unit tests.

use crate::env::{RandomAccessFile, WritableFile};
use crate::Result;
use rand::distributions::Alphanumeric;
use rand::{Rng, SeedableRng};
use std::io;
use std::sync::{Arc, Mutex};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `n` entries `key{i:06}` -> `value{i:06}`, in ascending key order.
pub(crate) fn sequential_kvs(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..n)
        .map(|i| {
            (
                format!("key{:06}", i).into_bytes(),
                format!("value{:06}", i).into_bytes(),
            )
        })
        .collect()
}

/// `n` sorted entries with distinct random keys, reproducible from `seed`.
pub(crate) fn random_kvs(n: usize, seed: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut kvs = std::collections::BTreeMap::new();
    while kvs.len() < n {
        let key_len = rng.gen_range(1..32);
        let value_len = rng.gen_range(0..200);
        let key: Vec<u8> = (&mut rng).sample_iter(&Alphanumeric).take(key_len).collect();
        let value: Vec<u8> = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(value_len)
            .collect();
        kvs.insert(key, value);
    }
    kvs.into_iter().collect()
}

/// In-memory writable file. Clones share the same contents.
#[derive(Clone, Default)]
pub(crate) struct MemWritableFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemWritableFile {
    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl WritableFile for MemWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.data.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writable file failing every append once `limit` bytes would be exceeded.
pub(crate) struct FailingWritableFile {
    limit: usize,
    written: usize,
    appends: usize,
}

impl FailingWritableFile {
    pub(crate) fn failing_after(limit: usize) -> FailingWritableFile {
        FailingWritableFile {
            limit,
            written: 0,
            appends: 0,
        }
    }

    /// Number of `append` calls, failed ones included.
    pub(crate) fn appends(&self) -> usize {
        self.appends
    }
}

impl WritableFile for FailingWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.appends += 1;
        if self.written + data.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "no space left on device").into());
        }
        self.written += data.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory random access file.
pub(crate) struct MemFile {
    data: Vec<u8>,
}

impl MemFile {
    pub(crate) fn new(data: Vec<u8>) -> MemFile {
        MemFile { data }
    }
}

impl RandomAccessFile for MemFile {
    fn read(&self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let len = self.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(n as u64).min(len) as usize;
        Ok(self.data[start..end].to_vec())
    }
}

#[test]
fn test_random_kvs_sorted_and_reproducible() {
    let kvs = random_kvs(100, 7);
    assert_eq!(kvs.len(), 100);
    assert!(kvs.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(kvs, random_kvs(100, 7));
}
