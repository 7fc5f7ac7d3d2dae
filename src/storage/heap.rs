//! Paged heap files: slotted pages, tombstone deletes, a free-space map,
//! sequential scan, and vacuum.
//!
//! Each page owns a typed in-memory view that is (de)serialized as a
//! whole, with a **slot directory** kept at the tail of the page so every
//! record's bounds are explicit on disk and parsing doesn't depend on
//! insertion order.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::catalog::TableSchema;
use crate::codec::{ByteDecode, ByteEncode};
use crate::config::{Config, HEAP_FILE_HEADER_SIZE, HEAP_MAGIC, PAGE_HEADER_SIZE, TOMBSTONE_MARKER};
use crate::error::{Error, Result};
use crate::storage::buffer_pool::{BufferPool, PageKey};
use crate::storage::tuple::Tuple;

const SLOT_ENTRY_SIZE: usize = 4;

/// Stable row identifier: `(page_number, slot)`, where `slot` is the index
/// into the page's slot directory rather than a raw byte offset, which is
/// what lets deserialization stay independent of insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ctid {
    pub page_number: u32,
    pub slot: u16,
}

impl Ctid {
    pub fn new(page_number: u32, slot: u16) -> Self {
        Ctid { page_number, slot }
    }
}

impl crate::codec::ByteEncode for Ctid {
    fn encode(&self, out: &mut Vec<u8>) {
        self.page_number.encode(out);
        self.slot.encode(out);
    }
}

impl crate::codec::ByteDecode for Ctid {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(Ctid {
            page_number: u32::decode(input)?,
            slot: u16::decode(input)?,
        })
    }
}

struct Slot {
    offset: u16,
    length: u16,
}

/// In-memory view of one fixed-size page.
struct HeapPage {
    page_size: usize,
    slots: Vec<Slot>,
    dead_count: u16,
    body: Vec<u8>,
}

impl HeapPage {
    fn empty(page_size: usize) -> Self {
        HeapPage {
            page_size,
            slots: Vec::new(),
            dead_count: 0,
            body: Vec::new(),
        }
    }

    fn data_end(&self) -> usize {
        PAGE_HEADER_SIZE + self.body.len()
    }

    fn slot_dir_start(&self) -> usize {
        self.page_size - self.slots.len() * SLOT_ENTRY_SIZE
    }

    /// Largest tuple body that can still be inserted, after reserving room
    /// for its own slot-directory entry.
    fn free_space(&self) -> usize {
        self.slot_dir_start()
            .saturating_sub(self.data_end())
            .saturating_sub(SLOT_ENTRY_SIZE)
    }

    fn can_fit(&self, tuple_size: usize) -> bool {
        tuple_size <= self.free_space()
    }

    fn add_tuple(&mut self, data: &[u8]) -> Result<u16> {
        if !self.can_fit(data.len()) {
            return Err(Error::constraint(format!(
                "tuple ({} bytes) doesn't fit in page ({} bytes free)",
                data.len(),
                self.free_space()
            )));
        }
        let offset = self.data_end() as u16;
        self.body.extend_from_slice(data);
        self.slots.push(Slot {
            offset,
            length: data.len() as u16,
        });
        Ok((self.slots.len() - 1) as u16)
    }

    fn record_bytes(&self, slot: u16) -> Option<&[u8]> {
        let s = self.slots.get(slot as usize)?;
        let start = s.offset as usize - PAGE_HEADER_SIZE;
        let end = start + s.length as usize;
        self.body.get(start..end)
    }

    fn get_tuple(&self, slot: u16) -> Option<&[u8]> {
        let rec = self.record_bytes(slot)?;
        if rec.first() == Some(&TOMBSTONE_MARKER) {
            None
        } else {
            Some(rec)
        }
    }

    fn mark_deleted(&mut self, slot: u16) -> Result<()> {
        let s = self
            .slots
            .get(slot as usize)
            .ok_or_else(|| Error::not_found(format!("no tuple at slot {slot}")))?;
        let start = s.offset as usize - PAGE_HEADER_SIZE;
        if self.body.get(start) == Some(&TOMBSTONE_MARKER) {
            return Ok(()); // already deleted; idempotent
        }
        self.body[start] = TOMBSTONE_MARKER;
        self.dead_count += 1;
        Ok(())
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.page_size];
        buf[0..2].copy_from_slice(&(self.free_space() as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        buf[4..6].copy_from_slice(&self.dead_count.to_le_bytes());

        buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.body.len()].copy_from_slice(&self.body);

        let dir_start = self.slot_dir_start();
        for (i, slot) in self.slots.iter().enumerate() {
            let at = dir_start + i * SLOT_ENTRY_SIZE;
            buf[at..at + 2].copy_from_slice(&slot.offset.to_le_bytes());
            buf[at + 2..at + 4].copy_from_slice(&slot.length.to_le_bytes());
        }
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let page_size = data.len();
        let tuple_count = u16::from_le_bytes([data[2], data[3]]) as usize;
        let dead_count = u16::from_le_bytes([data[4], data[5]]);

        let dir_start = page_size - tuple_count * SLOT_ENTRY_SIZE;
        let mut slots = Vec::with_capacity(tuple_count);
        let mut max_end = PAGE_HEADER_SIZE;
        for i in 0..tuple_count {
            let at = dir_start + i * SLOT_ENTRY_SIZE;
            let offset = u16::from_le_bytes([data[at], data[at + 1]]);
            let length = u16::from_le_bytes([data[at + 2], data[at + 3]]);
            max_end = max_end.max(offset as usize + length as usize);
            slots.push(Slot { offset, length });
        }

        let body = data[PAGE_HEADER_SIZE..max_end].to_vec();

        Ok(HeapPage {
            page_size,
            slots,
            dead_count,
            body,
        })
    }
}

/// Manages one table's data file: insert/read/delete, sequential scan,
/// vacuum, and the in-memory free-space map.
pub struct HeapFile {
    path: Rc<PathBuf>,
    page_size: usize,
    page_count: u32,
    free_space_map: HashMap<u32, usize>,
}

impl HeapFile {
    fn page_offset(&self, page_number: u32) -> u64 {
        HEAP_FILE_HEADER_SIZE as u64 + page_number as u64 * self.page_size as u64
    }

    pub fn create(config: &Config, table: &str) -> Result<Self> {
        let path = config.heap_path(table);
        let mut file = File::create(&path)?;
        let mut header = vec![0u8; HEAP_FILE_HEADER_SIZE];
        header[0..4].copy_from_slice(HEAP_MAGIC);
        header[4..12].copy_from_slice(&0u64.to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(HeapFile {
            path: Rc::new(path),
            page_size: config.page_size,
            page_count: 0,
            free_space_map: HashMap::new(),
        })
    }

    pub fn open(config: &Config, table: &str) -> Result<Self> {
        let path = config.heap_path(table);
        if !path.exists() {
            return Err(Error::not_found(format!("heap file not found for table '{table}'")));
        }
        let mut file = File::open(&path)?;
        let mut header = vec![0u8; HEAP_FILE_HEADER_SIZE];
        file.read_exact(&mut header)?;
        if &header[0..4] != HEAP_MAGIC {
            return Err(Error::format(format!("invalid heap file: {}", path.display())));
        }
        let page_count = u64::from_le_bytes(header[4..12].try_into().unwrap()) as u32;

        let mut heap = HeapFile {
            path: Rc::new(path),
            page_size: config.page_size,
            page_count,
            free_space_map: HashMap::new(),
        };
        heap.rebuild_fsm(&mut file)?;
        Ok(heap)
    }

    fn rebuild_fsm(&mut self, file: &mut File) -> Result<()> {
        self.free_space_map.clear();
        for page_number in 0..self.page_count {
            file.seek(SeekFrom::Start(self.page_offset(page_number)))?;
            let mut buf = vec![0u8; self.page_size];
            file.read_exact(&mut buf)?;
            let page = HeapPage::deserialize(&buf)?;
            self.free_space_map.insert(page_number, page.free_space());
        }
        Ok(())
    }

    pub fn unlink(config: &Config, table: &str) -> Result<()> {
        let path = config.heap_path(table);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn load_page(&self, pool: &mut BufferPool, page_number: u32) -> Result<HeapPage> {
        let key = PageKey::new(self.path.clone(), self.page_offset(page_number));
        let path = self.path.clone();
        let offset = self.page_offset(page_number);
        let page_size = self.page_size;
        let bytes = pool.get(&key, move || read_page_at(&path, offset, page_size))?;
        HeapPage::deserialize(&bytes)
    }

    fn store_page(&mut self, pool: &mut BufferPool, page_number: u32, page: &HeapPage) -> Result<()> {
        let key = PageKey::new(self.path.clone(), self.page_offset(page_number));
        pool.put_dirty(&key, page.serialize())?;
        self.free_space_map.insert(page_number, page.free_space());
        Ok(())
    }

    fn find_page_with_space(&self, required: usize) -> Option<u32> {
        self.free_space_map
            .iter()
            .find(|(_, &free)| free >= required)
            .map(|(&page_number, _)| page_number)
    }

    fn append_page(&mut self) -> Result<u32> {
        let page_number = self.page_count;
        let page = HeapPage::empty(self.page_size);
        let mut file = OpenOptions::new().write(true).open(self.path.as_path())?;
        file.seek(SeekFrom::Start(self.page_offset(page_number)))?;
        file.write_all(&page.serialize())?;

        self.page_count += 1;
        file.seek(SeekFrom::Start(4))?;
        file.write_all(&(self.page_count as u64).to_le_bytes())?;

        self.free_space_map.insert(page_number, page.free_space());
        Ok(page_number)
    }

    pub fn insert(&mut self, pool: &mut BufferPool, tuple_bytes: &[u8]) -> Result<Ctid> {
        let page_number = match self.find_page_with_space(tuple_bytes.len()) {
            Some(p) => p,
            None => self.append_page()?,
        };

        let mut page = self.load_page(pool, page_number)?;
        let slot = page.add_tuple(tuple_bytes)?;
        self.store_page(pool, page_number, &page)?;

        Ok(Ctid::new(page_number, slot))
    }

    pub fn read_raw(&self, pool: &mut BufferPool, ctid: Ctid) -> Result<Option<Vec<u8>>> {
        if ctid.page_number >= self.page_count {
            return Ok(None);
        }
        let page = self.load_page(pool, ctid.page_number)?;
        Ok(page.get_tuple(ctid.slot).map(|b| b.to_vec()))
    }

    pub fn read(&self, pool: &mut BufferPool, ctid: Ctid, schema: &TableSchema) -> Result<Option<Tuple>> {
        match self.read_raw(pool, ctid)? {
            Some(bytes) => Ok(Some(Tuple::deserialize(&bytes, schema)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&mut self, pool: &mut BufferPool, ctid: Ctid) -> Result<()> {
        if ctid.page_number >= self.page_count {
            return Ok(()); // no-op, delete of an absent row
        }
        let mut page = self.load_page(pool, ctid.page_number)?;
        page.mark_deleted(ctid.slot)?;
        self.store_page(pool, ctid.page_number, &page)?;
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Sequential scan in ascending page order; within a page, insertion
    /// order.
    pub fn scan_all(&self, pool: &mut BufferPool, schema: &TableSchema) -> Result<Vec<(Tuple, Ctid)>> {
        let mut out = Vec::new();
        for page_number in 0..self.page_count {
            let page = self.load_page(pool, page_number)?;
            for slot in 0..page.slots.len() as u16 {
                if let Some(bytes) = page.get_tuple(slot) {
                    let tuple = Tuple::deserialize(bytes, schema)?;
                    out.push((tuple, Ctid::new(page_number, slot)));
                }
            }
        }
        Ok(out)
    }

    /// Compacts every page with dead tuples, dropping tombstones and
    /// reassigning slots for survivors. Returns the `(old, new)` ctid pairs
    /// for every tuple that moved, so the caller (the executor) can rewrite
    /// dependent index entries.
    pub fn vacuum(&mut self, pool: &mut BufferPool) -> Result<Vec<(Ctid, Ctid)>> {
        let mut moved = Vec::new();

        for page_number in 0..self.page_count {
            let page = self.load_page(pool, page_number)?;
            if page.dead_count == 0 {
                continue;
            }

            let mut fresh = HeapPage::empty(self.page_size);
            for old_slot in 0..page.slots.len() as u16 {
                if let Some(bytes) = page.get_tuple(old_slot) {
                    let new_slot = fresh.add_tuple(bytes)?;
                    if new_slot != old_slot {
                        moved.push((Ctid::new(page_number, old_slot), Ctid::new(page_number, new_slot)));
                    }
                }
            }

            debug!(
                "vacuum: page {page_number} compacted {} -> {} live tuples",
                page.slots.len(),
                fresh.slots.len()
            );
            self.store_page(pool, page_number, &fresh)?;
        }

        Ok(moved)
    }
}

fn read_page_at(path: &Path, offset: u64, page_size: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut out = vec![0u8; page_size];
    file.read_exact(&mut out)?;
    Ok(out)
}
