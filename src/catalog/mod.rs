//! Durable registry of table schemas, index metadata, and table
//! statistics.
//!
//! Persisted as an explicit binary encoding rather than a language-native
//! serialization format, so the file is readable without the types that
//! produced it.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use crate::codec::{ByteDecode, ByteEncode};
use crate::config::{Config, CATALOG_MAGIC, CATALOG_VERSION};
use crate::error::{Error, Result};
use crate::value::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
    pub unique: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool, unique: bool) -> Self {
        ColumnDef {
            name: name.into(),
            datatype,
            nullable,
            unique,
        }
    }
}

impl ByteEncode for ColumnDef {
    fn encode(&self, out: &mut Vec<u8>) {
        crate::codec::encode_string(&self.name, out);
        self.datatype.encode(out);
        self.nullable.encode(out);
        self.unique.encode(out);
    }
}

impl ByteDecode for ColumnDef {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        Ok(ColumnDef {
            name: crate::codec::decode_string(input)?,
            datatype: DataType::decode(input)?,
            nullable: bool::decode(input)?,
            unique: bool::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDef>, primary_key: Vec<String>) -> Self {
        TableSchema {
            table_name: table_name.into(),
            columns,
            primary_key,
        }
    }

    pub fn has_nullable_columns(&self) -> bool {
        self.columns.iter().any(|c| c.nullable)
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::schema(format!("column '{name}' not found in table '{}'", self.table_name)))
    }
}

impl ByteEncode for TableSchema {
    fn encode(&self, out: &mut Vec<u8>) {
        crate::codec::encode_string(&self.table_name, out);
        (self.columns.len() as u16).encode(out);
        for c in &self.columns {
            c.encode(out);
        }
        (self.primary_key.len() as u16).encode(out);
        for pk in &self.primary_key {
            crate::codec::encode_string(pk, out);
        }
    }
}

impl ByteDecode for TableSchema {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let table_name = crate::codec::decode_string(input)?;
        let n_cols = u16::decode(input)? as usize;
        let mut columns = Vec::with_capacity(n_cols);
        for _ in 0..n_cols {
            columns.push(ColumnDef::decode(input)?);
        }
        let n_pk = u16::decode(input)? as usize;
        let mut primary_key = Vec::with_capacity(n_pk);
        for _ in 0..n_pk {
            primary_key.push(crate::codec::decode_string(input)?);
        }
        Ok(TableSchema {
            table_name,
            columns,
            primary_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMetadata {
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexMetadata {
    pub fn new(index_name: impl Into<String>, table_name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        IndexMetadata {
            index_name: index_name.into(),
            table_name: table_name.into(),
            columns,
            unique,
        }
    }

    pub fn key(&self) -> String {
        format!("{}_{}", self.table_name, self.index_name)
    }
}

impl ByteEncode for IndexMetadata {
    fn encode(&self, out: &mut Vec<u8>) {
        crate::codec::encode_string(&self.index_name, out);
        crate::codec::encode_string(&self.table_name, out);
        (self.columns.len() as u16).encode(out);
        for c in &self.columns {
            crate::codec::encode_string(c, out);
        }
        self.unique.encode(out);
    }
}

impl ByteDecode for IndexMetadata {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let index_name = crate::codec::decode_string(input)?;
        let table_name = crate::codec::decode_string(input)?;
        let n = u16::decode(input)? as usize;
        let mut columns = Vec::with_capacity(n);
        for _ in 0..n {
            columns.push(crate::codec::decode_string(input)?);
        }
        let unique = bool::decode(input)?;
        Ok(IndexMetadata {
            index_name,
            table_name,
            columns,
            unique,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStatistics {
    pub row_count: u64,
    pub page_count: u64,
    pub dead_tuple_count: u64,
    pub distinct_values: HashMap<String, u64>,
    pub modification_count: u64,
}

impl TableStatistics {
    pub fn needs_analyze(&self, threshold: u64) -> bool {
        self.modification_count >= threshold
    }

    pub fn dead_tuple_percentage(&self) -> f64 {
        let total = self.row_count + self.dead_tuple_count;
        if total == 0 {
            0.0
        } else {
            (self.dead_tuple_count as f64 / total as f64) * 100.0
        }
    }
}

impl ByteEncode for TableStatistics {
    fn encode(&self, out: &mut Vec<u8>) {
        self.row_count.encode(out);
        self.page_count.encode(out);
        self.dead_tuple_count.encode(out);
        (self.distinct_values.len() as u16).encode(out);
        for (col, count) in &self.distinct_values {
            crate::codec::encode_string(col, out);
            count.encode(out);
        }
        self.modification_count.encode(out);
    }
}

impl ByteDecode for TableStatistics {
    fn decode(input: &mut &[u8]) -> Result<Self> {
        let row_count = u64::decode(input)?;
        let page_count = u64::decode(input)?;
        let dead_tuple_count = u64::decode(input)?;
        let n = u16::decode(input)? as usize;
        let mut distinct_values = HashMap::with_capacity(n);
        for _ in 0..n {
            let col = crate::codec::decode_string(input)?;
            let count = u64::decode(input)?;
            distinct_values.insert(col, count);
        }
        let modification_count = u64::decode(input)?;
        Ok(TableStatistics {
            row_count,
            page_count,
            dead_tuple_count,
            distinct_values,
            modification_count,
        })
    }
}

/// System catalog: one file per database, written atomically by
/// truncate-and-rewrite on every mutating call.
pub struct Catalog {
    path: std::path::PathBuf,
    tables: HashMap<String, TableSchema>,
    indexes: HashMap<String, IndexMetadata>,
    statistics: HashMap<String, TableStatistics>,
}

impl Catalog {
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.catalog_path();
        let mut catalog = Catalog {
            path,
            tables: HashMap::new(),
            indexes: HashMap::new(),
            statistics: HashMap::new(),
        };
        catalog.load()?;
        Ok(catalog)
    }

    fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&self.path)?;
        let mut input = bytes.as_slice();

        if input.len() < 4 || &input[0..4] != CATALOG_MAGIC {
            return Err(Error::format("invalid catalog file: bad magic number"));
        }
        input = &input[4..];

        let version = u32::decode(&mut input)?;
        if version != CATALOG_VERSION {
            return Err(Error::format(format!("unsupported catalog version: {version}")));
        }

        let payload_len = u32::decode(&mut input)? as usize;
        if input.len() < payload_len {
            return Err(Error::format("truncated catalog payload"));
        }
        let mut payload = &input[..payload_len];

        let n_tables = u32::decode(&mut payload)? as usize;
        let mut tables = HashMap::with_capacity(n_tables);
        for _ in 0..n_tables {
            let schema = TableSchema::decode(&mut payload)?;
            tables.insert(schema.table_name.clone(), schema);
        }

        let n_indexes = u32::decode(&mut payload)? as usize;
        let mut indexes = HashMap::with_capacity(n_indexes);
        for _ in 0..n_indexes {
            let meta = IndexMetadata::decode(&mut payload)?;
            indexes.insert(meta.key(), meta);
        }

        let n_stats = u32::decode(&mut payload)? as usize;
        let mut statistics = HashMap::with_capacity(n_stats);
        for _ in 0..n_stats {
            let table_name = crate::codec::decode_string(&mut payload)?;
            let stats = TableStatistics::decode(&mut payload)?;
            statistics.insert(table_name, stats);
        }

        self.tables = tables;
        self.indexes = indexes;
        self.statistics = statistics;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        (self.tables.len() as u32).encode(&mut buf);
        for schema in self.tables.values() {
            schema.encode(&mut buf);
        }
        (self.indexes.len() as u32).encode(&mut buf);
        for meta in self.indexes.values() {
            meta.encode(&mut buf);
        }
        (self.statistics.len() as u32).encode(&mut buf);
        for (name, stats) in &self.statistics {
            crate::codec::encode_string(name, &mut buf);
            stats.encode(&mut buf);
        }
        let tmp_path = self.path.with_extension("dat.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(CATALOG_MAGIC)?;
        let mut header = Vec::new();
        CATALOG_VERSION.encode(&mut header);
        (buf.len() as u32).encode(&mut header);
        file.write_all(&header)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        if self.tables.contains_key(&schema.table_name) {
            return Err(Error::schema(format!("table '{}' already exists", schema.table_name)));
        }
        if schema.primary_key.is_empty() {
            return Err(Error::schema(format!("table '{}' must have a PRIMARY KEY", schema.table_name)));
        }
        for pk_col in &schema.primary_key {
            if schema.get_column(pk_col).is_none() {
                return Err(Error::schema(format!(
                    "PRIMARY KEY column '{pk_col}' not found in table '{}'",
                    schema.table_name
                )));
            }
        }

        let table_name = schema.table_name.clone();
        self.statistics.insert(table_name.clone(), TableStatistics::default());

        let pk_index = IndexMetadata::new("pkey", table_name.clone(), schema.primary_key.clone(), true);
        self.indexes.insert(pk_index.key(), pk_index);

        self.tables.insert(table_name, schema);
        self.save()
    }

    pub fn drop_table(&mut self, table_name: &str) -> Result<()> {
        if self.tables.remove(table_name).is_none() {
            return Err(Error::schema(format!("table '{table_name}' does not exist")));
        }
        self.statistics.remove(table_name);
        self.indexes.retain(|_, idx| idx.table_name != table_name);
        self.save()
    }

    pub fn get_table(&self, table_name: &str) -> Result<&TableSchema> {
        self.tables
            .get(table_name)
            .ok_or_else(|| Error::schema(format!("table '{table_name}' does not exist")))
    }

    pub fn replace_table_schema(&mut self, schema: TableSchema) -> Result<()> {
        if !self.tables.contains_key(&schema.table_name) {
            return Err(Error::schema(format!("table '{}' does not exist", schema.table_name)));
        }
        self.tables.insert(schema.table_name.clone(), schema);
        self.save()
    }

    pub fn create_index(&mut self, meta: IndexMetadata) -> Result<()> {
        let schema = self
            .tables
            .get(&meta.table_name)
            .ok_or_else(|| Error::schema(format!("table '{}' does not exist", meta.table_name)))?;

        for col in &meta.columns {
            if schema.get_column(col).is_none() {
                return Err(Error::schema(format!(
                    "column '{col}' not found in table '{}'",
                    meta.table_name
                )));
            }
        }

        let key = meta.key();
        if self.indexes.contains_key(&key) {
            return Err(Error::schema(format!(
                "index '{}' already exists on table '{}'",
                meta.index_name, meta.table_name
            )));
        }

        self.indexes.insert(key, meta);
        self.save()
    }

    pub fn get_indexes_for_table(&self, table_name: &str) -> Vec<&IndexMetadata> {
        self.indexes
            .values()
            .filter(|idx| idx.table_name == table_name)
            .collect()
    }

    pub fn get_statistics(&self, table_name: &str) -> TableStatistics {
        self.statistics.get(table_name).cloned().unwrap_or_default()
    }

    pub fn update_statistics(&mut self, table_name: &str, stats: TableStatistics) -> Result<()> {
        self.statistics.insert(table_name.to_string(), stats);
        self.save()
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn list_indexes(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnDef::new("id", DataType::Int, false, false),
                ColumnDef::new("name", DataType::Text, true, false),
            ],
            vec!["id".to_string()],
        )
    }

    #[test]
    fn create_table_without_primary_key_is_rejected() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut catalog = Catalog::open(&config).unwrap();
        let schema = TableSchema::new("t", vec![ColumnDef::new("id", DataType::Int, false, false)], vec![]);
        assert!(catalog.create_table(schema).is_err());
    }

    #[test]
    fn create_table_auto_creates_pkey_index_and_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut catalog = Catalog::open(&config).unwrap();
        catalog.create_table(schema()).unwrap();

        assert!(catalog.get_indexes_for_table("t").iter().any(|idx| idx.index_name == "pkey"));
        assert!(catalog.create_table(schema()).is_err());
    }

    #[test]
    fn create_index_rejects_unknown_column() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut catalog = Catalog::open(&config).unwrap();
        catalog.create_table(schema()).unwrap();

        let bad = IndexMetadata::new("idx_missing", "t", vec!["nope".to_string()], false);
        assert!(catalog.create_index(bad).is_err());
    }

    #[test]
    fn catalog_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        {
            let mut catalog = Catalog::open(&config).unwrap();
            catalog.create_table(schema()).unwrap();
            let mut stats = catalog.get_statistics("t");
            stats.row_count = 42;
            catalog.update_statistics("t", stats).unwrap();
        }

        let reopened = Catalog::open(&config).unwrap();
        assert_eq!(reopened.get_table("t").unwrap().table_name, "t");
        assert_eq!(reopened.get_statistics("t").row_count, 42);
    }

    #[test]
    fn drop_table_removes_schema_stats_and_indexes() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path());
        let mut catalog = Catalog::open(&config).unwrap();
        catalog.create_table(schema()).unwrap();
        catalog.drop_table("t").unwrap();

        assert!(catalog.get_table("t").is_err());
        assert!(catalog.get_indexes_for_table("t").is_empty());
    }
}
