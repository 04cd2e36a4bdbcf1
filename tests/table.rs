use kvstone::cache::ShardedLRUCache;
use kvstone::comparator::{BytewiseComparator, Comparator};
use kvstone::env::{Env, PosixEnv};
use kvstone::filter::{BloomFilterPolicy, InternalFilterPolicy};
use kvstone::iterator::{Cursor, MergingCursor};
use kvstone::memory::key_types::{
    internal_key, parse_internal_key, InternalKeyComparator, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};
use kvstone::memory::ValueType;
use kvstone::sstable::format::{BLOCK_HANDLE_LENGTH, FOOTER_LENGTH};
use kvstone::sstable::table_cache::table_file_name;
use kvstone::sstable::{Table, TableBuilder, TableCache};
use kvstone::{MemTable, Options, Result};
use std::path::Path;
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn internal_options() -> Options {
    Options {
        comparator: Arc::new(InternalKeyComparator::new(Arc::new(BytewiseComparator))),
        filter_policy: Some(Arc::new(InternalFilterPolicy::new(Arc::new(
            BloomFilterPolicy::new(10),
        )))),
        block_size: 1024,
        ..Options::default()
    }
}

/// Write every entry of `cursor` to table `number` and return the file size.
fn write_table(
    env: &dyn Env,
    dir: &Path,
    number: u64,
    options: &Options,
    cursor: &mut dyn Cursor,
) -> Result<u64> {
    let file = env.new_writable_file(&table_file_name(dir, number))?;
    let mut builder = TableBuilder::new(options.clone(), file);
    cursor.seek_to_first();
    while cursor.valid() {
        builder.add(cursor.key(), cursor.value())?;
        cursor.next();
    }
    cursor.status()?;
    builder.finish()?;
    let size = builder.file_size();
    let mut file = builder.into_file();
    file.sync()?;
    file.close()?;
    Ok(size)
}

/// Newest entry of `user_key` in `table`: `Some(Some(value))` if live, `Some(None)` if
/// deleted.
fn table_lookup(table: &Table, user_key: &[u8]) -> Option<Option<Vec<u8>>> {
    let target = internal_key(user_key, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK);
    let (k, v) = table.find(&target).unwrap()?;
    let parsed = parse_internal_key(&k).unwrap();
    if parsed.user_key != user_key {
        return None;
    }
    match parsed.value_type {
        ValueType::Value => Some(Some(v)),
        ValueType::Deletion => Some(None),
    }
}

#[test]
fn test_flush_memtable_to_table() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let env = PosixEnv::new();
    let options = internal_options();

    let mem = MemTable::default();
    let mut seq = 0;
    for i in 0..2000 {
        seq += 1;
        mem.add(
            seq,
            ValueType::Value,
            format!("key{:05}", i).as_bytes(),
            format!("old{}", i).as_bytes(),
        )?;
    }
    for i in (0..2000).step_by(3) {
        seq += 1;
        mem.add(
            seq,
            ValueType::Value,
            format!("key{:05}", i).as_bytes(),
            format!("new{}", i).as_bytes(),
        )?;
    }
    for i in (0..2000).step_by(5) {
        seq += 1;
        mem.add(seq, ValueType::Deletion, format!("key{:05}", i).as_bytes(), b"")?;
    }

    let size = write_table(&env, dir.path(), 1, &options, &mut mem.iter())?;
    assert_eq!(
        size,
        env.get_file_size(&table_file_name(dir.path(), 1))?
    );
    let file = env.new_random_access_file(&table_file_name(dir.path(), 1))?;
    let table = Arc::new(Table::open(options.clone(), file, size)?);

    for i in 0..2000 {
        let key = format!("key{:05}", i);
        let expected_mem = mem.get(key.as_bytes());
        let found = table_lookup(&table, key.as_bytes()).unwrap();
        if i % 5 == 0 {
            assert!(expected_mem.unwrap_err().is_not_found());
            assert_eq!(found, None);
        } else if i % 3 == 0 {
            assert_eq!(found, Some(format!("new{}", i).into_bytes()));
            assert_eq!(expected_mem?, found.unwrap());
        } else {
            assert_eq!(found, Some(format!("old{}", i).into_bytes()));
        }
    }
    assert_eq!(table_lookup(&table, b"key99999"), None);
    assert_eq!(table_lookup(&table, b"a"), None);

    // the table yields exactly the memtable entries, in the same order
    let mut mem_iter = mem.iter();
    let mut table_iter = table.clone().iter();
    mem_iter.seek_to_first();
    table_iter.seek_to_first();
    let mut count = 0;
    while mem_iter.valid() {
        assert!(table_iter.valid());
        assert_eq!(mem_iter.key(), table_iter.key());
        assert_eq!(mem_iter.value(), table_iter.value());
        mem_iter.next();
        table_iter.next();
        count += 1;
    }
    assert!(!table_iter.valid());
    assert_eq!(count, mem.len());
    Ok(())
}

#[test]
fn test_merge_memtable_and_tables() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let env: Arc<dyn Env> = Arc::new(PosixEnv::new());
    let options = Options {
        block_cache: Some(Arc::new(ShardedLRUCache::new(1 << 20))),
        ..internal_options()
    };

    // oldest data in table 1, newer in table 2, newest in the memtable
    let mut sizes = vec![];
    let mut seq = 0;
    for (number, round) in [(1u64, "t1"), (2, "t2")] {
        let mem = MemTable::default();
        for i in 0..300 {
            seq += 1;
            mem.add(
                seq,
                ValueType::Value,
                format!("key{:04}", i).as_bytes(),
                format!("{}-{}", round, i).as_bytes(),
            )?;
        }
        sizes.push(write_table(&*env, dir.path(), number, &options, &mut mem.iter())?);
    }
    let mem = MemTable::default();
    for i in 0..300 {
        seq += 1;
        mem.add(seq, ValueType::Value, format!("key{:04}", i).as_bytes(), b"mem")?;
    }

    let table_cache = TableCache::new(dir.path(), options.clone(), env.clone(), 100);
    let children: Vec<Box<dyn Cursor + '_>> = vec![
        Box::new(mem.iter()),
        table_cache.iter(2, sizes[1]),
        table_cache.iter(1, sizes[0]),
    ];
    let mut merged = MergingCursor::new(options.comparator.clone(), children);

    merged.seek_to_first();
    let mut last_key: Option<Vec<u8>> = None;
    let mut count = 0;
    while merged.valid() {
        if let Some(last) = &last_key {
            assert_eq!(
                options.comparator.compare(last, merged.key()),
                std::cmp::Ordering::Less
            );
        }
        let parsed = parse_internal_key(merged.key())?;
        let expected = match count % 3 {
            0 => b"mem".to_vec(),
            1 => format!("t2-{}", count / 3).into_bytes(),
            _ => format!("t1-{}", count / 3).into_bytes(),
        };
        assert_eq!(merged.value(), expected.as_slice());
        assert_eq!(parsed.user_key, format!("key{:04}", count / 3).as_bytes());
        last_key = Some(merged.key().to_vec());
        merged.next();
        count += 1;
    }
    merged.status()?;
    assert_eq!(count, 900);

    // the newest version of a key comes first
    merged.seek(&internal_key(b"key0150", MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK));
    assert_eq!(merged.value(), b"mem");
    let t1 = table_cache.find_table(1, sizes[0])?;
    assert_eq!(table_lookup(&t1, b"key0150"), Some(Some(b"t1-150".to_vec())));
    Ok(())
}

#[test]
fn test_corrupted_table_file() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let env = PosixEnv::new();
    let options = Options::default();

    let mem = MemTable::default();
    for i in 0..100 {
        mem.add(i + 1, ValueType::Value, format!("key{:03}", i).as_bytes(), b"value")?;
    }
    // strip the tags so the table is keyed by plain user keys
    let mut entries = vec![];
    let mut iter = mem.iter();
    iter.seek_to_first();
    while iter.valid() {
        let parsed = parse_internal_key(iter.key())?;
        entries.push((parsed.user_key.to_vec(), iter.value().to_vec()));
        iter.next();
    }
    drop(iter);

    let path = table_file_name(dir.path(), 3);
    let mut builder = TableBuilder::new(options.clone(), env.new_writable_file(&path)?);
    for (k, v) in &entries {
        builder.add(k, v)?;
    }
    builder.finish()?;
    let size = builder.file_size();
    builder.into_file().close()?;

    // entry 0 is [12 byte header]["key000"]["value"]: flip a byte of the value
    let mut contents = std::fs::read(&path)?;
    contents[20] ^= 0x20;
    std::fs::write(&path, &contents)?;

    let table = Table::open(options.clone(), env.new_random_access_file(&path)?, size)?;
    assert!(table.get(b"key000").unwrap_err().is_corruption());

    let unverified = Options {
        verify_checksums: false,
        ..options.clone()
    };
    let table = Table::open(unverified, env.new_random_access_file(&path)?, size)?;
    assert_eq!(table.get(b"key000")?, Some(b"vaLue".to_vec()));
    assert_eq!(table.get(b"key001")?, Some(b"value".to_vec()));

    // a truncated file loses its footer
    std::fs::write(&path, &contents[..contents.len() - 10])?;
    let result = Table::open(options, env.new_random_access_file(&path)?, size - 10);
    assert!(result.err().unwrap().is_corruption());
    Ok(())
}

#[test]
fn test_corrupted_footer_handle() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let env = PosixEnv::new();
    let options = Options::default();

    let path = table_file_name(dir.path(), 4);
    let mut builder = TableBuilder::new(options.clone(), env.new_writable_file(&path)?);
    builder.add(b"key", b"value")?;
    builder.finish()?;
    let size = builder.file_size();
    builder.into_file().close()?;
    let contents = std::fs::read(&path)?;

    // every byte of the index handle, including the top byte of its size
    let handle_start = contents.len() - FOOTER_LENGTH;
    for i in handle_start..handle_start + BLOCK_HANDLE_LENGTH {
        let mut bad = contents.clone();
        bad[i] = 0x40;
        if bad[i] == contents[i] {
            bad[i] = 0x41;
        }
        std::fs::write(&path, &bad)?;
        let result = Table::open(options.clone(), env.new_random_access_file(&path)?, size);
        assert!(result.err().unwrap().is_corruption(), "byte {}", i);
    }

    std::fs::write(&path, &contents)?;
    let table = Table::open(options, env.new_random_access_file(&path)?, size)?;
    assert_eq!(table.get(b"key")?, Some(b"value".to_vec()));
    Ok(())
}
