//! Rule-based query executor: table/index lifecycle, scan-method
//! selection, transactional DML, and maintenance commands.
//!
//! A typed command enum dispatched through one entry point. This
//! dispatcher never parses a query language — `Command` values are
//! constructed directly by the caller.

pub mod expr;
pub mod transaction;

use std::collections::HashMap;

use log::{error, info};

use crate::catalog::{Catalog, ColumnDef, IndexMetadata, TableSchema};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::expr::{Expr, Row};
use crate::executor::transaction::{Session, SessionState, UndoAction};
use crate::index::BTreeIndex;
use crate::lock::DirLock;
use crate::storage::{BufferPool, Ctid, HeapFile, Tuple};
use crate::value::{Key, Value};

#[derive(Debug, Clone)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn { from: String, to: String },
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Everything the engine can be asked to do, aside from parsing a query
/// language into one of these.
#[derive(Debug, Clone)]
pub enum Command {
    CreateTable(TableSchema),
    DropTable(String),
    CreateIndex(IndexMetadata),
    AlterTable { table: String, action: AlterAction },
    Insert { table: String, values: Vec<Value> },
    Select {
        table: String,
        predicate: Option<Expr>,
        order_by: Option<OrderBy>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        predicate: Option<Expr>,
    },
    Delete { table: String, predicate: Option<Expr> },
    Analyze(String),
    Vacuum(String),
    Explain { table: String, predicate: Option<Expr> },
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug)]
pub enum ExecResult {
    Ack,
    RowsAffected(u64),
    Rows(Vec<Tuple>),
    Explain(String),
}

/// Which access path `scan_rows` will take for a predicate, surfaced
/// separately so `EXPLAIN` can report it without running the scan.
enum ScanMethod {
    Sequential,
    Index(String),
}

/// One open database: the catalog, the shared buffer pool, memoized
/// heap/index file handles, and the current session's transaction state.
pub struct Database {
    config: Config,
    catalog: Catalog,
    pool: BufferPool,
    heaps: HashMap<String, HeapFile>,
    indexes: HashMap<String, BTreeIndex>,
    session: Session,
    _lock: DirLock,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let lock = DirLock::acquire(&config.lock_path(), config.lock_timeout)?;
        let catalog = Catalog::open(&config)?;
        let pool = BufferPool::new(config.buffer_pool_size);

        Ok(Database {
            config,
            catalog,
            pool,
            heaps: HashMap::new(),
            indexes: HashMap::new(),
            session: Session::new(),
            _lock: lock,
        })
    }

    pub fn execute(&mut self, command: Command) -> Result<ExecResult> {
        if matches!(self.session.state, SessionState::AbortPending { .. }) && !matches!(command, Command::Rollback) {
            return Err(Error::transaction(
                "current transaction is aborted, commands ignored until ROLLBACK",
            ));
        }
        let result = self.dispatch(command);
        if result.is_err() && self.session.in_transaction() {
            self.session.mark_abort_pending();
        }
        result
    }

    fn dispatch(&mut self, command: Command) -> Result<ExecResult> {
        match command {
            Command::CreateTable(schema) => self.create_table(schema).map(|_| ExecResult::Ack),
            Command::DropTable(table) => self.drop_table(&table).map(|_| ExecResult::Ack),
            Command::CreateIndex(meta) => self.create_index(meta).map(|_| ExecResult::Ack),
            Command::AlterTable { table, action } => self.alter_table(&table, action).map(|_| ExecResult::Ack),
            Command::Insert { table, values } => self.insert(&table, values).map(|_| ExecResult::Ack),
            Command::Select { table, predicate, order_by, limit, offset } => {
                self.select(&table, predicate.as_ref(), order_by.as_ref(), limit, offset)
                    .map(ExecResult::Rows)
            }
            Command::Update { table, assignments, predicate } => {
                self.update(&table, &assignments, predicate.as_ref()).map(ExecResult::RowsAffected)
            }
            Command::Delete { table, predicate } => {
                self.delete(&table, predicate.as_ref()).map(ExecResult::RowsAffected)
            }
            Command::Analyze(table) => self.analyze(&table).map(|_| ExecResult::Ack),
            Command::Vacuum(table) => self.vacuum(&table).map(|_| ExecResult::Ack),
            Command::Explain { table, predicate } => self.explain(&table, predicate.as_ref()).map(ExecResult::Explain),
            Command::Begin => self.session.begin().map(|_| ExecResult::Ack),
            Command::Commit => {
                self.session.take_and_close();
                self.pool.flush_all()?;
                Ok(ExecResult::Ack)
            }
            Command::Rollback => self.rollback(),
        }
    }

    fn rollback(&mut self) -> Result<ExecResult> {
        let undo_log = self.session.take_and_close();
        for action in undo_log.into_iter().rev() {
            match action {
                UndoAction::InsertedRow { table, ctid } => {
                    self.remove_from_heap_and_indexes(&table, ctid)?;
                }
                UndoAction::DeletedRow { table, ctid, tuple } => {
                    self.reinsert_at(&table, ctid, &tuple)?;
                }
                UndoAction::UpdatedRow { table, ctid, old_tuple, new_tuple } => {
                    let schema = self.catalog.get_table(&table)?.clone();
                    let restored_ctid = self.overwrite_row(&table, ctid, &old_tuple)?;
                    self.reindex_row(&table, &schema, &new_tuple, &old_tuple, ctid, restored_ctid)?;
                }
            }
        }
        Ok(ExecResult::Ack)
    }

    // --- schema lifecycle -------------------------------------------------

    fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        let table = schema.table_name.clone();
        let unique_columns: Vec<String> = schema
            .columns
            .iter()
            .filter(|c| c.unique && !schema.primary_key.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();

        self.catalog.create_table(schema)?;
        let heap = HeapFile::create(&self.config, &table)?;
        self.heaps.insert(table.clone(), heap);

        let pk_index = BTreeIndex::create(&self.config, &table, "pkey", true)?;
        self.indexes.insert(format!("{table}_pkey"), pk_index);

        // UNIQUE columns with no explicit index get one auto-created,
        // named `<table>_<column>_unique`.
        for column in unique_columns {
            let index_name = format!("{column}_unique");
            let meta = IndexMetadata::new(index_name.clone(), table.clone(), vec![column], true);
            self.catalog.create_index(meta)?;
            let index = BTreeIndex::create(&self.config, &table, &index_name, true)?;
            self.indexes.insert(format!("{table}_{index_name}"), index);
        }

        info!("created table '{table}'");
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();

        self.pool.invalidate_file(&self.config.heap_path(table));
        self.heaps.remove(table);
        HeapFile::unlink(&self.config, table)?;

        for meta in &index_metas {
            self.pool.invalidate_file(&self.config.index_path(table, &meta.index_name));
            self.indexes.remove(&meta.key());
            BTreeIndex::unlink(&self.config, table, &meta.index_name)?;
        }

        self.catalog.drop_table(table)?;
        info!("dropped table '{table}'");
        Ok(())
    }

    fn create_index(&mut self, meta: IndexMetadata) -> Result<()> {
        let table = meta.table_name.clone();
        self.catalog.create_index(meta.clone())?;
        let index = BTreeIndex::create(&self.config, &table, &meta.index_name, meta.unique)?;
        self.indexes.insert(meta.key(), index);

        // Backfill from existing rows.
        let schema = self.catalog.get_table(&table)?.clone();
        let heap = get_or_open_heap(&mut self.heaps, &self.config, &table)?;
        let rows = heap.scan_all(&mut self.pool, &schema)?;
        let index = self.indexes.get_mut(&meta.key()).unwrap();
        for (tuple, ctid) in rows {
            let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
            index.insert(&mut self.pool, key, ctid)?;
        }
        Ok(())
    }

    fn alter_table(&mut self, table: &str, action: AlterAction) -> Result<()> {
        let mut schema = self.catalog.get_table(table)?.clone();
        match action {
            AlterAction::AddColumn(col) => {
                if schema.get_column(&col.name).is_some() {
                    return Err(Error::schema(format!("column '{}' already exists", col.name)));
                }
                if !col.nullable {
                    return Err(Error::constraint(
                        "ADD COLUMN requires a nullable column, since existing rows have no value for it",
                    ));
                }
                schema.columns.push(col);
            }
            AlterAction::DropColumn(name) => {
                if schema.primary_key.contains(&name) {
                    return Err(Error::constraint(format!("cannot drop primary key column '{name}'")));
                }
                let covered = self
                    .catalog
                    .get_indexes_for_table(table)
                    .into_iter()
                    .any(|idx| idx.columns.contains(&name));
                if covered {
                    return Err(Error::constraint(format!(
                        "cannot drop column '{name}': it is covered by an index"
                    )));
                }
                let idx = schema.get_column_index(&name)?;
                schema.columns.remove(idx);
            }
            AlterAction::RenameColumn { from, to } => {
                let idx = schema.get_column_index(&from)?;
                schema.columns[idx].name = to.clone();
                for pk in schema.primary_key.iter_mut() {
                    if *pk == from {
                        *pk = to.clone();
                    }
                }
            }
        }
        // Schema-only change: the heap file is not rewritten. A DROP/RENAME
        // COLUMN is safe because position and width of every other column
        // are unaffected; an ADD COLUMN relies on the column being nullable
        // so existing rows simply decode it as NULL via the schema's null
        // bitmap.
        self.catalog.replace_table_schema(schema)
    }

    // --- DML ---------------------------------------------------------------

    fn insert(&mut self, table: &str, values: Vec<Value>) -> Result<()> {
        let schema = self.catalog.get_table(table)?.clone();
        let tuple = Tuple::new(values);
        let bytes = tuple.serialize(&schema, self.config.max_tuple_size, self.config.max_text_size)?;

        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
        for meta in &index_metas {
            let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
            let index = get_or_open_index(&mut self.indexes, &self.config, table, meta)?;
            if meta.unique && !index.search(&mut self.pool, &key)?.is_empty() {
                return Err(Error::constraint(format!(
                    "duplicate value for unique index '{}' on table '{table}'",
                    meta.index_name
                )));
            }
        }

        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let ctid = heap.insert(&mut self.pool, &bytes)?;

        for meta in &index_metas {
            let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
            let index = get_or_open_index(&mut self.indexes, &self.config, table, meta)?;
            index.insert(&mut self.pool, key, ctid)?;
        }

        self.session.record(UndoAction::InsertedRow { table: table.to_string(), ctid });
        self.bump_stats(table, 1, 0)?;
        Ok(())
    }

    fn select(
        &mut self,
        table: &str,
        predicate: Option<&Expr>,
        order_by: Option<&OrderBy>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Tuple>> {
        let schema = self.catalog.get_table(table)?.clone();
        let mut rows = self.scan_rows(table, &schema, predicate)?;

        if let Some(pred) = predicate {
            rows.retain(|tuple| pred.matches(&row_env(&schema, tuple)));
        }

        if let Some(order) = order_by {
            let idx = schema.get_column_index(&order.column)?;
            // NULLs sort last for ASC, first for DESC, never by negating
            // the sort key (that only works for numeric columns).
            rows.sort_by(|a, b| {
                let (va, vb) = (&a.values[idx], &b.values[idx]);
                match (va.is_null(), vb.is_null()) {
                    (true, true) => std::cmp::Ordering::Equal,
                    (true, false) => if order.descending { std::cmp::Ordering::Less } else { std::cmp::Ordering::Greater },
                    (false, true) => if order.descending { std::cmp::Ordering::Greater } else { std::cmp::Ordering::Less },
                    (false, false) => {
                        let ord = va.partial_compare(vb).unwrap_or(std::cmp::Ordering::Equal);
                        if order.descending { ord.reverse() } else { ord }
                    }
                }
            });
        }

        let rows = rows.into_iter().skip(offset.unwrap_or(0));
        let rows: Vec<Tuple> = match limit {
            Some(n) => rows.take(n).collect(),
            None => rows.collect(),
        };
        Ok(rows)
    }

    /// Picks a sequential scan or an index scan based on `predicate`.
    /// `EXPLAIN` reports this same choice without running the scan
    /// (`explain`, below).
    fn scan_method(&self, table: &str, predicate: Option<&Expr>) -> ScanMethod {
        if let Some(Expr::Compare(lhs, op, rhs)) = predicate {
            if let (Expr::Column(column), Expr::Literal(_)) = (lhs.as_ref(), rhs.as_ref()) {
                if !matches!(op, expr::CompareOp::NotEq) {
                    if let Some(meta) = self.single_column_index(table, column) {
                        return ScanMethod::Index(meta.index_name.clone());
                    }
                }
            }
        }
        ScanMethod::Sequential
    }

    /// Index results are always re-checked against the full predicate by
    /// the caller, so a wrong or partial choice in `scan_method` can only
    /// cost performance, never correctness.
    fn scan_rows(&mut self, table: &str, schema: &TableSchema, predicate: Option<&Expr>) -> Result<Vec<Tuple>> {
        if let ScanMethod::Index(index_name) = self.scan_method(table, predicate) {
            if let Some(Expr::Compare(lhs, op, rhs)) = predicate {
                if let (Expr::Column(column), Expr::Literal(value)) = (lhs.as_ref(), rhs.as_ref()) {
                    let meta = self
                        .single_column_index(table, column)
                        .cloned()
                        .expect("scan_method chose an index that vanished between calls");
                    debug_assert_eq!(meta.index_name, index_name);

                    let key = Key::single(value.clone()).normalize(self.config.text_truncation_len);
                    let index = get_or_open_index(&mut self.indexes, &self.config, table, &meta)?;

                    let ctids = match op {
                        expr::CompareOp::Eq => index.search(&mut self.pool, &key)?,
                        expr::CompareOp::Lt | expr::CompareOp::LtEq => {
                            index.range(&mut self.pool, None, Some(&key))?.into_iter().map(|(_, c)| c).collect()
                        }
                        expr::CompareOp::Gt | expr::CompareOp::GtEq => {
                            index.range(&mut self.pool, Some(&key), None)?.into_iter().map(|(_, c)| c).collect()
                        }
                        expr::CompareOp::NotEq => unreachable!("scan_method never chooses an index for NotEq"),
                    };

                    let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
                    let mut out = Vec::with_capacity(ctids.len());
                    for ctid in ctids {
                        if let Some(tuple) = heap.read(&mut self.pool, ctid, schema)? {
                            out.push(tuple);
                        }
                    }
                    return Ok(out);
                }
            }
        }
        self.seq_scan(table, schema)
    }

    /// Reports the scan method `scan_rows` would take and the table's
    /// current statistics, without executing anything.
    fn explain(&mut self, table: &str, predicate: Option<&Expr>) -> Result<String> {
        self.catalog.get_table(table)?;
        let stats = self.catalog.get_statistics(table);
        let method = match self.scan_method(table, predicate) {
            ScanMethod::Sequential => "sequential scan".to_string(),
            ScanMethod::Index(name) => format!("index scan using '{name}'"),
        };
        Ok(format!(
            "table '{table}': {method}\nrow_count={}, page_count={}, dead_tuple_count={}",
            stats.row_count, stats.page_count, stats.dead_tuple_count
        ))
    }

    fn seq_scan(&mut self, table: &str, schema: &TableSchema) -> Result<Vec<Tuple>> {
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        Ok(heap.scan_all(&mut self.pool, schema)?.into_iter().map(|(t, _)| t).collect())
    }

    fn single_column_index(&self, table: &str, column: &str) -> Option<&IndexMetadata> {
        self.catalog
            .get_indexes_for_table(table)
            .into_iter()
            .find(|idx| idx.columns.len() == 1 && idx.columns[0] == column)
    }

    fn update(&mut self, table: &str, assignments: &[(String, Value)], predicate: Option<&Expr>) -> Result<u64> {
        let schema = self.catalog.get_table(table)?.clone();
        let targets = self.matching_ctids(table, &schema, predicate)?;

        let mut count = 0u64;
        for (old_tuple, ctid) in targets {
            let mut new_values = old_tuple.values.clone();
            for (column, value) in assignments {
                let idx = schema.get_column_index(column)?;
                new_values[idx] = value.clone();
            }
            let new_tuple = Tuple::new(new_values);

            let new_ctid = self.overwrite_row(table, ctid, &new_tuple)?;
            self.reindex_row(table, &schema, &old_tuple, &new_tuple, ctid, new_ctid)?;
            self.session.record(UndoAction::UpdatedRow {
                table: table.to_string(),
                ctid: new_ctid,
                old_tuple,
                new_tuple,
            });
            count += 1;
        }

        if count > 0 {
            self.bump_stats(table, 0, 0)?;
        }
        Ok(count)
    }

    fn delete(&mut self, table: &str, predicate: Option<&Expr>) -> Result<u64> {
        let schema = self.catalog.get_table(table)?.clone();
        let targets = self.matching_ctids(table, &schema, predicate)?;

        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
        let mut count = 0u64;
        for (tuple, ctid) in targets {
            for meta in &index_metas {
                let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
                let index = get_or_open_index(&mut self.indexes, &self.config, table, meta)?;
                index.delete(&mut self.pool, &key, ctid)?;
            }
            let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
            heap.delete(&mut self.pool, ctid)?;

            self.session.record(UndoAction::DeletedRow { table: table.to_string(), ctid, tuple });
            count += 1;
        }

        if count > 0 {
            self.bump_stats(table, -(count as i64), count as i64)?;
        }
        Ok(count)
    }

    fn matching_ctids(&mut self, table: &str, schema: &TableSchema, predicate: Option<&Expr>) -> Result<Vec<(Tuple, Ctid)>> {
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let mut rows = heap.scan_all(&mut self.pool, schema)?;
        if let Some(pred) = predicate {
            rows.retain(|(tuple, _)| pred.matches(&row_env(schema, tuple)));
        }
        Ok(rows)
    }

    /// Moves every index entry for a row from `old_ctid` to `new_ctid`,
    /// rewriting the key where the indexed columns changed. Needed on every
    /// call because `overwrite_row` never reuses the row's old ctid (a
    /// tombstoned slot is never reused by `insert`), so even an index whose
    /// key is unchanged still has a stale ctid to fix up.
    fn reindex_row(
        &mut self,
        table: &str,
        schema: &TableSchema,
        old: &Tuple,
        new: &Tuple,
        old_ctid: Ctid,
        new_ctid: Ctid,
    ) -> Result<()> {
        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
        for meta in &index_metas {
            let old_key = extract_key(old, schema, &meta.columns, self.config.text_truncation_len)?;
            let new_key = extract_key(new, schema, &meta.columns, self.config.text_truncation_len)?;
            let index = get_or_open_index(&mut self.indexes, &self.config, table, meta)?;
            index.delete(&mut self.pool, &old_key, old_ctid)?;
            if meta.unique && old_key != new_key && !index.search(&mut self.pool, &new_key)?.is_empty() {
                return Err(Error::constraint(format!(
                    "duplicate value for unique index '{}' on table '{table}'",
                    meta.index_name
                )));
            }
            index.insert(&mut self.pool, new_key, new_ctid)?;
        }
        Ok(())
    }

    /// Tombstones the row at `ctid` and inserts `tuple` as a fresh row,
    /// returning the ctid it landed at. Never the same ctid as the input,
    /// since a tombstoned slot is never reused by `insert`.
    fn overwrite_row(&mut self, table: &str, ctid: Ctid, tuple: &Tuple) -> Result<Ctid> {
        let schema = self.catalog.get_table(table)?.clone();
        let bytes = tuple.serialize(&schema, self.config.max_tuple_size, self.config.max_text_size)?;
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        heap.delete(&mut self.pool, ctid)?;
        heap.insert(&mut self.pool, &bytes)
    }

    fn reinsert_at(&mut self, table: &str, _ctid: Ctid, tuple: &Tuple) -> Result<()> {
        // ROLLBACK of a DELETE: the original slot was tombstoned, not
        // freed, so we can't guarantee the same ctid back. Re-insert as a
        // fresh row and repair every index to point at it.
        let schema = self.catalog.get_table(table)?.clone();
        let bytes = tuple.serialize(&schema, self.config.max_tuple_size, self.config.max_text_size)?;
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let new_ctid = heap.insert(&mut self.pool, &bytes)?;

        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
        for meta in &index_metas {
            let key = extract_key(tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
            let index = get_or_open_index(&mut self.indexes, &self.config, table, &meta)?;
            index.insert(&mut self.pool, key, new_ctid)?;
        }
        Ok(())
    }

    fn remove_from_heap_and_indexes(&mut self, table: &str, ctid: Ctid) -> Result<()> {
        let schema = self.catalog.get_table(table)?.clone();
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let tuple = heap.read(&mut self.pool, ctid, &schema)?;
        heap.delete(&mut self.pool, ctid)?;

        if let Some(tuple) = tuple {
            let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
            for meta in &index_metas {
                let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
                let index = get_or_open_index(&mut self.indexes, &self.config, table, &meta)?;
                index.delete(&mut self.pool, &key, ctid)?;
            }
        }
        Ok(())
    }

    // --- maintenance ---------------------------------------------------

    fn analyze(&mut self, table: &str) -> Result<()> {
        let schema = self.catalog.get_table(table)?.clone();
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let rows = heap.scan_all(&mut self.pool, &schema)?;

        let mut distinct: HashMap<String, std::collections::HashSet<String>> = HashMap::new();
        for col in &schema.columns {
            distinct.insert(col.name.clone(), std::collections::HashSet::new());
        }
        for (tuple, _) in &rows {
            for (col, value) in schema.columns.iter().zip(tuple.values.iter()) {
                distinct.get_mut(&col.name).unwrap().insert(value.to_string());
            }
        }

        let mut stats = self.catalog.get_statistics(table);
        stats.row_count = rows.len() as u64;
        stats.page_count = heap.page_count() as u64;
        stats.distinct_values = distinct.into_iter().map(|(k, v)| (k, v.len() as u64)).collect();
        stats.modification_count = 0;
        self.catalog.update_statistics(table, stats)?;
        info!("analyzed table '{table}' ({} rows)", rows.len());
        Ok(())
    }

    fn vacuum(&mut self, table: &str) -> Result<()> {
        let schema = self.catalog.get_table(table)?.clone();
        let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
        let moved = heap.vacuum(&mut self.pool)?;

        let index_metas: Vec<IndexMetadata> = self.catalog.get_indexes_for_table(table).into_iter().cloned().collect();
        for (old_ctid, new_ctid) in moved {
            let heap = get_or_open_heap(&mut self.heaps, &self.config, table)?;
            let tuple = heap.read(&mut self.pool, new_ctid, &schema)?.ok_or_else(|| {
                Error::not_found("vacuum moved a tuple that can no longer be read back")
            })?;
            for meta in &index_metas {
                let key = extract_key(&tuple, &schema, &meta.columns, self.config.text_truncation_len)?;
                let index = get_or_open_index(&mut self.indexes, &self.config, table, meta)?;
                index.delete(&mut self.pool, &key, old_ctid)?;
                index.insert(&mut self.pool, key, new_ctid)?;
            }
        }

        let mut stats = self.catalog.get_statistics(table);
        stats.dead_tuple_count = 0;
        self.catalog.update_statistics(table, stats)?;
        info!("vacuumed table '{table}'");
        Ok(())
    }

    fn bump_stats(&mut self, table: &str, row_delta: i64, dead_delta: i64) -> Result<()> {
        let mut stats = self.catalog.get_statistics(table);
        stats.row_count = (stats.row_count as i64 + row_delta).max(0) as u64;
        stats.dead_tuple_count = (stats.dead_tuple_count as i64 + dead_delta).max(0) as u64;
        stats.modification_count += 1;
        let needs_analyze = stats.needs_analyze(self.config.auto_analyze_threshold);
        let needs_vacuum = stats.dead_tuple_percentage() >= self.config.auto_vacuum_dead_tuple_pct;
        self.catalog.update_statistics(table, stats)?;

        if needs_analyze {
            self.analyze(table)?;
        }
        if needs_vacuum {
            self.vacuum(table)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.pool.flush_all()
    }
}

impl Drop for Database {
    /// Best-effort flush on shutdown, so a process that commits and exits
    /// without an explicit `flush` doesn't lose dirty pages. Errors are
    /// logged rather than propagated since `Drop` can't return a `Result`.
    fn drop(&mut self) {
        if let Err(e) = self.pool.flush_all() {
            error!("failed to flush buffer pool on shutdown: {e}");
        }
    }
}

fn extract_key(tuple: &Tuple, schema: &TableSchema, columns: &[String], truncation_len: usize) -> Result<Key> {
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        let idx = schema.get_column_index(column)?;
        values.push(tuple.values[idx].clone());
    }
    Ok(Key(values).normalize(truncation_len))
}

fn row_env<'a>(schema: &'a TableSchema, tuple: &'a Tuple) -> Row<'a> {
    schema
        .columns
        .iter()
        .zip(tuple.values.iter())
        .map(|(col, value)| (col.name.as_str(), value))
        .collect()
}

fn get_or_open_heap<'a>(heaps: &'a mut HashMap<String, HeapFile>, config: &Config, table: &str) -> Result<&'a mut HeapFile> {
    if !heaps.contains_key(table) {
        heaps.insert(table.to_string(), HeapFile::open(config, table)?);
    }
    Ok(heaps.get_mut(table).unwrap())
}

fn get_or_open_index<'a>(
    indexes: &'a mut HashMap<String, BTreeIndex>,
    config: &Config,
    table: &str,
    meta: &IndexMetadata,
) -> Result<&'a mut BTreeIndex> {
    let key = meta.key();
    if !indexes.contains_key(&key) {
        let index = BTreeIndex::open(config, table, &meta.index_name, meta.unique)?;
        indexes.insert(key.clone(), index);
    }
    Ok(indexes.get_mut(&key).unwrap())
}
