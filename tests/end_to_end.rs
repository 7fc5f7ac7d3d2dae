//! End-to-end scenarios against a real data directory, covering the
//! documented end-to-end flows plus the boundary cases called out
//! alongside them.

use lattice_db::executor::expr::{CompareOp, Expr};
use lattice_db::executor::{AlterAction, Command, Database, ExecResult, OrderBy};
use lattice_db::{ColumnDef, Config, DataType, IndexMetadata, TableSchema, Value};
use tempfile::tempdir;

fn open_db() -> (tempfile::TempDir, Database) {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path());
    let db = Database::open(config).unwrap();
    (dir, db)
}

fn eq(column: &str, value: Value) -> Expr {
    Expr::Compare(
        Box::new(Expr::Column(column.to_string())),
        CompareOp::Eq,
        Box::new(Expr::Literal(value)),
    )
}

fn rows(result: ExecResult) -> Vec<lattice_db::Tuple> {
    match result {
        ExecResult::Rows(rows) => rows,
        other => panic!("expected Rows, got {other:?}"),
    }
}

fn table_t() -> TableSchema {
    TableSchema::new(
        "t",
        vec![
            ColumnDef::new("id", DataType::Int, false, false),
            ColumnDef::new("n", DataType::Text, true, false),
        ],
        vec!["id".to_string()],
    )
}

#[test]
fn scenario_1_insert_and_select() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();

    for (id, n) in [(1, "a"), (2, "b"), (3, "c")] {
        db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(id), Value::Text(n.into())] }).unwrap();
    }

    let all = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: Some(OrderBy { column: "id".into(), descending: false }), limit: None, offset: None })
        .unwrap());
    let ids: Vec<i32> = all.iter().map(|t| match t.values[0] { Value::Int(n) => n, _ => unreachable!() }).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let found = rows(db
        .execute(Command::Select { table: "t".into(), predicate: Some(eq("id", Value::Int(2))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].values[1], Value::Text("b".into()));
}

#[test]
fn scenario_2_delete_then_scan_and_pkey_lookup() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    for id in 1..=5 {
        db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(id), Value::Text("x".into())] }).unwrap();
    }

    let affected = db.execute(Command::Delete { table: "t".into(), predicate: Some(eq("id", Value::Int(3))) }).unwrap();
    match affected {
        ExecResult::RowsAffected(n) => assert_eq!(n, 1),
        other => panic!("expected RowsAffected, got {other:?}"),
    }

    let remaining = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: Some(OrderBy { column: "id".into(), descending: false }), limit: None, offset: None })
        .unwrap());
    let ids: Vec<i32> = remaining.iter().map(|t| match t.values[0] { Value::Int(n) => n, _ => unreachable!() }).collect();
    assert_eq!(ids, vec![1, 2, 4, 5]);

    let gone = rows(db
        .execute(Command::Select { table: "t".into(), predicate: Some(eq("id", Value::Int(3))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert!(gone.is_empty());
}

#[test]
fn scenario_3_index_scan_on_secondary_column() {
    let (_dir, mut db) = open_db();
    let schema = TableSchema::new(
        "u",
        vec![
            ColumnDef::new("id", DataType::Int, false, false),
            ColumnDef::new("age", DataType::Int, false, false),
        ],
        vec!["id".to_string()],
    );
    db.execute(Command::CreateTable(schema)).unwrap();

    for (id, age) in [(1, 25), (2, 30), (3, 22), (4, 28), (5, 35)] {
        db.execute(Command::Insert { table: "u".into(), values: vec![Value::Int(id), Value::Int(age)] }).unwrap();
    }

    db.execute(Command::CreateIndex(IndexMetadata::new("idx_age", "u", vec!["age".into()], false))).unwrap();

    let found = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("age", Value::Int(30))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].values[0], Value::Int(2));

    let plan = match db.execute(Command::Explain { table: "u".into(), predicate: Some(eq("age", Value::Int(30))) }).unwrap() {
        ExecResult::Explain(text) => text,
        other => panic!("expected Explain, got {other:?}"),
    };
    assert!(plan.contains("index scan using 'idx_age'"), "plan was: {plan}");

    let seq_plan = match db.execute(Command::Explain { table: "u".into(), predicate: None }).unwrap() {
        ExecResult::Explain(text) => text,
        other => panic!("expected Explain, got {other:?}"),
    };
    assert!(seq_plan.contains("sequential scan"), "plan was: {seq_plan}");
}

#[test]
fn scenario_4_rollback_restores_prior_value() {
    let (_dir, mut db) = open_db();
    let schema = TableSchema::new(
        "u",
        vec![
            ColumnDef::new("id", DataType::Int, false, false),
            ColumnDef::new("age", DataType::Int, false, false),
        ],
        vec!["id".to_string()],
    );
    db.execute(Command::CreateTable(schema)).unwrap();
    db.execute(Command::Insert { table: "u".into(), values: vec![Value::Int(1), Value::Int(25)] }).unwrap();

    db.execute(Command::Begin).unwrap();
    db.execute(Command::Update {
        table: "u".into(),
        assignments: vec![("age".into(), Value::Int(99))],
        predicate: Some(eq("id", Value::Int(1))),
    })
    .unwrap();

    let during = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("id", Value::Int(1))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(during[0].values[1], Value::Int(99));

    db.execute(Command::Rollback).unwrap();

    let after = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("id", Value::Int(1))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].values[1], Value::Int(25));
}

#[test]
fn scenario_5_duplicate_primary_key_rejected() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("Alice".into())] }).unwrap();

    let err = db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("Alice".into())] });
    assert!(err.is_err());

    let all = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(all.len(), 1);
}

#[test]
fn scenario_6_vacuum_preserves_row_count() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();

    for id in 0..1000 {
        db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(id), Value::Text("row".into())] }).unwrap();
    }
    for id in (0..1000).step_by(2) {
        db.execute(Command::Delete { table: "t".into(), predicate: Some(eq("id", Value::Int(id))) }).unwrap();
    }

    db.execute(Command::Vacuum("t".into())).unwrap();

    let remaining = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(remaining.len(), 500);
}

#[test]
fn unique_index_on_truncated_text_catches_collision() {
    let (_dir, mut db) = open_db();
    let schema = TableSchema::new(
        "codes",
        vec![
            ColumnDef::new("id", DataType::Int, false, false),
            ColumnDef::new("code", DataType::Text, false, true),
        ],
        vec!["id".to_string()],
    );
    db.execute(Command::CreateTable(schema)).unwrap();

    db.execute(Command::Insert { table: "codes".into(), values: vec![Value::Int(1), Value::Text("abcdefghij1".into())] }).unwrap();

    let err = db.execute(Command::Insert {
        table: "codes".into(),
        values: vec![Value::Int(2), Value::Text("abcdefghij2".into())],
    });
    assert!(err.is_err());
}

#[test]
fn deleting_missing_key_is_a_no_op_and_reinsert_succeeds() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("a".into())] }).unwrap();

    let affected = db.execute(Command::Delete { table: "t".into(), predicate: Some(eq("id", Value::Int(404))) }).unwrap();
    match affected {
        ExecResult::RowsAffected(n) => assert_eq!(n, 0),
        other => panic!("expected RowsAffected, got {other:?}"),
    }

    db.execute(Command::Delete { table: "t".into(), predicate: Some(eq("id", Value::Int(1))) }).unwrap();
    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("again".into())] }).unwrap();

    let found = rows(db
        .execute(Command::Select { table: "t".into(), predicate: Some(eq("id", Value::Int(1))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].values[1], Value::Text("again".into()));
}

#[test]
fn update_keeps_every_index_pointing_at_the_rows_new_location() {
    let (_dir, mut db) = open_db();
    let schema = TableSchema::new(
        "u",
        vec![
            ColumnDef::new("id", DataType::Int, false, false),
            ColumnDef::new("age", DataType::Int, false, false),
        ],
        vec!["id".to_string()],
    );
    db.execute(Command::CreateTable(schema)).unwrap();
    db.execute(Command::CreateIndex(IndexMetadata::new("idx_age", "u", vec!["age".into()], false))).unwrap();
    db.execute(Command::Insert { table: "u".into(), values: vec![Value::Int(1), Value::Int(25)] }).unwrap();

    // Update a column with no index (id is unaffected) to force the row
    // onto a new ctid, then look it up by both the unchanged-key pkey
    // index and a secondary index whose key does change.
    db.execute(Command::Update {
        table: "u".into(),
        assignments: vec![("age".into(), Value::Int(40))],
        predicate: Some(eq("id", Value::Int(1))),
    })
    .unwrap();

    let by_pkey = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("id", Value::Int(1))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(by_pkey.len(), 1);
    assert_eq!(by_pkey[0].values[1], Value::Int(40));

    let by_age = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("age", Value::Int(40))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(by_age.len(), 1);
    assert_eq!(by_age[0].values[0], Value::Int(1));

    let stale = rows(db
        .execute(Command::Select { table: "u".into(), predicate: Some(eq("age", Value::Int(25))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert!(stale.is_empty());
}

#[test]
fn failed_statement_in_transaction_blocks_everything_but_rollback() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("a".into())] }).unwrap();

    db.execute(Command::Begin).unwrap();
    let dup = db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("dup".into())] });
    assert!(dup.is_err());

    let blocked = db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(2), Value::Text("b".into())] });
    assert!(blocked.is_err());

    db.execute(Command::Rollback).unwrap();

    let all = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(all.len(), 1);
}

#[test]
fn drop_column_covered_by_an_index_is_rejected() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    db.execute(Command::CreateIndex(IndexMetadata::new("idx_n", "t", vec!["n".into()], false))).unwrap();

    let err = db.execute(Command::AlterTable { table: "t".into(), action: AlterAction::DropColumn("n".into()) });
    assert!(err.is_err());
}

#[test]
fn alter_table_add_column_defaults_existing_rows_to_null() {
    let (_dir, mut db) = open_db();
    db.execute(Command::CreateTable(table_t())).unwrap();
    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(1), Value::Text("a".into())] }).unwrap();

    db.execute(Command::AlterTable {
        table: "t".into(),
        action: AlterAction::AddColumn(ColumnDef::new("note", DataType::Text, true, false)),
    })
    .unwrap();

    db.execute(Command::Insert { table: "t".into(), values: vec![Value::Int(2), Value::Text("b".into()), Value::Text("hi".into())] }).unwrap();

    let found = rows(db
        .execute(Command::Select { table: "t".into(), predicate: Some(eq("id", Value::Int(2))), order_by: None, limit: None, offset: None })
        .unwrap());
    assert_eq!(found[0].values[2], Value::Text("hi".into()));

    // A full scan must also decode the row written before the column
    // existed, forcing it through `seq_scan` rather than a pkey lookup.
    let all = rows(db
        .execute(Command::Select { table: "t".into(), predicate: None, order_by: None, limit: None, offset: None })
        .unwrap());
    let pre_existing = all.iter().find(|t| t.values[0] == Value::Int(1)).unwrap();
    assert_eq!(pre_existing.values[2], Value::Null);
}
