use crate::byteutils::put_fixed64;
use crate::cache::ShardedLRUCache;
use crate::env::Env;
use crate::iterator::{Cursor, EmptyCursor};
use crate::options::Options;
use crate::sstable::table::Table;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Path of the table file numbered `number` in `dbname`.
pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{:06}.sst", number))
}

/// Keeps up to `entries` tables open, keyed by file number.
pub struct TableCache {
    dbname: PathBuf,
    options: Options,
    env: Arc<dyn Env>,
    cache: ShardedLRUCache<Table>,
}

impl TableCache {
    pub fn new(
        dbname: impl Into<PathBuf>,
        options: Options,
        env: Arc<dyn Env>,
        entries: usize,
    ) -> TableCache {
        TableCache {
            dbname: dbname.into(),
            options,
            env,
            cache: ShardedLRUCache::new(entries),
        }
    }

    /// Open table `file_number`, or return it from the cache.
    pub fn find_table(&self, file_number: u64, file_size: u64) -> Result<Arc<Table>> {
        let key = cache_key(file_number);
        if let Some(handle) = self.cache.lookup(&key) {
            return Ok(handle.value());
        }

        let path = table_file_name(&self.dbname, file_number);
        let file = self.env.new_random_access_file(&path)?;
        // Failures are not cached, so a repaired file is picked up on the next lookup
        let table = Table::open(self.options.clone(), file, file_size)?;
        debug!("opened table {}", path.display());
        Ok(self.cache.insert(&key, table, 1, None).value())
    }

    /// Search table `file_number` for `key`, see [Table::find].
    pub fn get(
        &self,
        file_number: u64,
        file_size: u64,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.find_table(file_number, file_size)?.find(key)
    }

    /// Cursor over table `file_number`. Errors opening the table are reported by the
    /// cursor's status.
    pub fn iter(&self, file_number: u64, file_size: u64) -> Box<dyn Cursor> {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(table.iter()),
            Err(e) => Box::new(EmptyCursor::with_error(e)),
        }
    }

    /// Drop any entry for `file_number`. Cursors already open keep the table alive.
    pub fn evict(&self, file_number: u64) {
        self.cache.erase(&cache_key(file_number));
    }
}

fn cache_key(file_number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(8);
    put_fixed64(&mut key, file_number);
    key
}
