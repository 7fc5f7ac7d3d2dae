//! LRU page cache shared by heap files and B-tree indexes: evicts the
//! least-recently-used page and writes it back first if dirty.
//!
//! Keyed on `(file path, byte offset)` rather than `(file path, page
//! number)`: the caller (heap file or B-tree index) already knows how to
//! turn a page/node number into a file offset, so the pool itself stays
//! oblivious to page size and numbering scheme and can be shared by both
//! callers as a single pool.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, trace};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub path: Rc<PathBuf>,
    pub offset: u64,
}

impl PageKey {
    pub fn new(path: Rc<PathBuf>, offset: u64) -> Self {
        PageKey { path, offset }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub dirty_pages: usize,
}

struct Entry {
    bytes: Vec<u8>,
    dirty: bool,
}

pub struct BufferPool {
    capacity: usize,
    cache: HashMap<PageKey, Entry>,
    /// Recency order, least-recently-used first. `capacity` is expected to
    /// stay small enough (default 128) that a linear scan to bump an entry
    /// to the back is cheap relative to the disk I/O it is there to avoid.
    recency: Vec<PageKey>,
    hits: u64,
    misses: u64,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            capacity: capacity.max(1),
            cache: HashMap::new(),
            recency: Vec::new(),
            hits: 0,
            misses: 0,
        }
    }

    fn touch(&mut self, key: &PageKey) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            let k = self.recency.remove(pos);
            self.recency.push(k);
        } else {
            self.recency.push(key.clone());
        }
    }

    /// Fetch a page, loading it from disk via `loader` on a cache miss.
    pub fn get<F>(&mut self, key: &PageKey, loader: F) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if self.cache.contains_key(key) {
            self.hits += 1;
            self.touch(key);
            return Ok(self.cache.get(key).unwrap().bytes.clone());
        }

        self.misses += 1;
        let bytes = loader()?;
        self.insert(key.clone(), bytes.clone(), false)?;
        Ok(bytes)
    }

    /// Overwrite a page's cached contents (used after the caller mutates a
    /// page in memory) and mark it dirty.
    pub fn put_dirty(&mut self, key: &PageKey, bytes: Vec<u8>) -> Result<()> {
        self.insert(key.clone(), bytes, true)
    }

    pub fn mark_dirty(&mut self, key: &PageKey) {
        if let Some(entry) = self.cache.get_mut(key) {
            entry.dirty = true;
        }
    }

    fn insert(&mut self, key: PageKey, bytes: Vec<u8>, dirty: bool) -> Result<()> {
        if !self.cache.contains_key(&key) && self.cache.len() >= self.capacity {
            self.evict_one()?;
        }
        self.touch(&key);
        self.cache.insert(key, Entry { bytes, dirty });
        Ok(())
    }

    fn evict_one(&mut self) -> Result<()> {
        if self.recency.is_empty() {
            return Ok(());
        }
        let victim = self.recency.remove(0);
        if let Some(entry) = self.cache.remove(&victim) {
            if entry.dirty {
                trace!("evicting dirty page at offset {}, flushing", victim.offset);
                write_page_at(&victim.path, victim.offset, &entry.bytes)?;
            } else {
                trace!("evicting clean page at offset {}", victim.offset);
            }
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for (key, entry) in self.cache.iter_mut() {
            if entry.dirty {
                debug!("flushing dirty page at offset {}", key.offset);
                write_page_at(&key.path, key.offset, &entry.bytes)?;
                entry.dirty = false;
            }
        }
        Ok(())
    }

    pub fn invalidate(&mut self, key: &PageKey) {
        self.cache.remove(key);
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
    }

    /// Drop every cached page for a file (used by DROP TABLE before the
    /// file is unlinked, so a later file reusing the same inode never sees
    /// stale cached pages).
    pub fn invalidate_file(&mut self, path: &Path) {
        let keys: Vec<PageKey> = self
            .cache
            .keys()
            .filter(|k| k.path.as_path() == path)
            .cloned()
            .collect();
        for key in keys {
            self.invalidate(&key);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits,
            misses: self.misses,
            dirty_pages: self.cache.values().filter(|e| e.dirty).count(),
        }
    }
}

fn write_page_at(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn evicts_least_recently_used_and_flushes_dirty() {
        let dir = tempdir().unwrap();
        let path = Rc::new(dir.path().join("f.dat"));
        std::fs::write(path.as_path(), vec![0u8; 4096]).unwrap();

        let mut pool = BufferPool::new(2);
        let k0 = PageKey::new(path.clone(), 0);
        let k1 = PageKey::new(path.clone(), 100);
        let k2 = PageKey::new(path.clone(), 200);

        pool.get(&k0, || Ok(vec![1u8; 10])).unwrap();
        pool.put_dirty(&k0, vec![9u8; 10]).unwrap();
        pool.get(&k1, || Ok(vec![2u8; 10])).unwrap();

        // k0 is now LRU relative to k1; inserting k2 evicts k0 and flushes it.
        pool.get(&k2, || Ok(vec![3u8; 10])).unwrap();

        let mut on_disk = vec![0u8; 10];
        {
            use std::io::Read;
            let mut f = std::fs::File::open(path.as_path()).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.read_exact(&mut on_disk).unwrap();
        }
        assert_eq!(on_disk, vec![9u8; 10]);

        let stats = pool.stats();
        assert_eq!(stats.misses, 3);
    }
}
