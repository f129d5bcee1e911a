use super::*;
use crate::ast::{CmpOp, ColumnRef};
use tempfile::TempDir;

const U: u32 = 0;

fn setup() -> (TempDir, DatabaseManager) {
    let temp = TempDir::new().unwrap();
    let mut dbms = DatabaseManager::new(temp.path()).unwrap();
    dbms.create_database("d").unwrap();
    dbms.use_database(U, "d").unwrap();
    (temp, dbms)
}

fn field(name: &str, data_type: DataType, not_null: bool) -> Field {
    Field::Def(FieldDef {
        name: name.to_string(),
        data_type,
        not_null,
        default: None,
    })
}

fn eq(col: &str, v: Value) -> WhereCond {
    WhereCond::Cmp {
        col: ColumnRef::unqualified(col),
        op: CmpOp::Eq,
        expr: Expr::Value(v),
    }
}

fn qeq(table: &str, col: &str, v: Value) -> WhereCond {
    WhereCond::Cmp {
        col: ColumnRef::qualified(table, col),
        op: CmpOp::Eq,
        expr: Expr::Value(v),
    }
}

fn rows_of(result: QueryResult) -> Vec<Vec<Value>> {
    match result {
        QueryResult::ResultSet { rows, .. } => rows,
        other => panic!("expected a result set, got {:?}", other),
    }
}

/// create table t(a int not null, b varchar(5), primary key(a))
fn create_t(dbms: &mut DatabaseManager) {
    dbms.create_table(
        U,
        "t",
        vec![
            field("a", DataType::Int, true),
            field("b", DataType::Varchar(5), false),
            Field::PrimaryKey(vec!["a".into()]),
        ],
    )
    .unwrap();
}

#[test]
fn test_database_registry() {
    let temp = TempDir::new().unwrap();
    let mut dbms = DatabaseManager::new(temp.path()).unwrap();

    assert!(dbms.show_databases().unwrap().is_empty());
    dbms.create_database("d1").unwrap();
    dbms.create_database("d2").unwrap();
    assert_eq!(dbms.show_databases().unwrap(), vec!["d1", "d2"]);

    assert!(matches!(
        dbms.create_database("d1"),
        Err(DbError::AlreadyExists(_))
    ));
    assert!(matches!(
        dbms.use_database(U, "nope"),
        Err(DbError::NotFound(_))
    ));
    // no database selected yet
    assert!(matches!(dbms.show_tables(U), Err(DbError::NoDatabase)));

    dbms.use_database(U, "d1").unwrap();
    assert!(dbms.show_tables(U).unwrap().is_empty());

    dbms.drop_database("d2").unwrap();
    assert_eq!(dbms.show_databases().unwrap(), vec!["d1"]);
}

#[test]
fn test_current_database_is_per_user() {
    let temp = TempDir::new().unwrap();
    let mut dbms = DatabaseManager::new(temp.path()).unwrap();
    dbms.create_database("a").unwrap();
    dbms.create_database("b").unwrap();

    dbms.use_database(1, "a").unwrap();
    dbms.use_database(2, "b").unwrap();

    dbms.create_table(1, "t1", vec![field("x", DataType::Int, false)])
        .unwrap();
    dbms.create_table(2, "t2", vec![field("y", DataType::Int, false)])
        .unwrap();

    assert_eq!(dbms.show_tables(1).unwrap(), vec!["t1"]);
    assert_eq!(dbms.show_tables(2).unwrap(), vec!["t2"]);

    // Dropping a database clears every selection pointing at it
    dbms.drop_database("b").unwrap();
    assert!(matches!(dbms.show_tables(2), Err(DbError::NoDatabase)));
}

#[test]
fn test_insert_then_select_where() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);

    let n = dbms
        .insert(
            U,
            "t",
            None,
            vec![
                vec![Value::Int(1), Value::Str("hi".into())],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap();
    assert_eq!(n, 2);

    let rows = rows_of(
        dbms.select(
            U,
            &Selector::All,
            &["t".to_string()],
            &[eq("a", Value::Int(1))],
        )
        .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Str("hi".into())]]);
}

#[test]
fn test_duplicate_primary_key_rejected_and_table_unchanged() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(
        U,
        "t",
        None,
        vec![
            vec![Value::Int(1), Value::Str("hi".into())],
            vec![Value::Int(2), Value::Null],
        ],
    )
    .unwrap();

    let result = dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Str("x".into())]]);
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));

    let rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_not_null_rejected() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    let result = dbms.insert(U, "t", None, vec![vec![Value::Null, Value::Null]]);
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
}

#[test]
fn test_insert_with_column_list_uses_defaults() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(
        U,
        "t",
        vec![
            field("a", DataType::Int, true),
            Field::Def(FieldDef {
                name: "b".into(),
                data_type: DataType::Int,
                not_null: false,
                default: Some(Value::Int(42)),
            }),
        ],
    )
    .unwrap();

    dbms.insert(
        U,
        "t",
        Some(vec!["a".to_string()]),
        vec![vec![Value::Int(1)]],
    )
    .unwrap();

    let rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Int(42)]]);
}

#[test]
fn test_foreign_key_membership_on_insert() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(2), Value::Null]])
        .unwrap();

    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();

    // present in t
    dbms.insert(U, "r", None, vec![vec![Value::Int(2)]]).unwrap();
    // absent from t
    let result = dbms.insert(U, "r", None, vec![vec![Value::Int(9)]]);
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
    // all-null composite is allowed
    dbms.insert(U, "r", None, vec![vec![Value::Null]]).unwrap();
}

#[test]
fn test_foreign_key_partial_null_rejected() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(
        U,
        "t",
        vec![
            field("a", DataType::Int, true),
            field("b", DataType::Int, true),
            Field::PrimaryKey(vec!["a".into(), "b".into()]),
        ],
    )
    .unwrap();
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Int(2)]])
        .unwrap();

    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            field("y", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into(), "y".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into(), "b".into()],
            },
        ],
    )
    .unwrap();

    let result = dbms.insert(U, "r", None, vec![vec![Value::Int(1), Value::Null]]);
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
}

#[test]
fn test_cascade_delete() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(
        U,
        "t",
        None,
        vec![
            vec![Value::Int(1), Value::Str("hi".into())],
            vec![Value::Int(2), Value::Null],
        ],
    )
    .unwrap();

    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();
    dbms.insert(U, "r", None, vec![vec![Value::Int(2)]]).unwrap();

    let n = dbms.delete(U, "t", &[eq("a", Value::Int(2))]).unwrap();
    // one row from t plus the cascaded row of r
    assert_eq!(n, 2);
    let rows = rows_of(
        dbms.select(U, &Selector::All, &["r".to_string()], &[])
            .unwrap(),
    );
    assert!(rows.is_empty());
}

#[test]
fn test_update_primary_key_sets_referencing_columns_null() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Str("hi".into())]])
        .unwrap();

    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();
    dbms.insert(U, "r", None, vec![vec![Value::Int(1)]]).unwrap();

    dbms.update(
        U,
        "t",
        &[SetPair {
            col: "a".into(),
            value: Value::Int(3),
        }],
        &[eq("a", Value::Int(1))],
    )
    .unwrap();

    let rows = rows_of(
        dbms.select(U, &Selector::All, &["r".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Null]]);
}

#[test]
fn test_update_primary_key_refused_when_source_not_null() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Null]])
        .unwrap();

    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, true),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();
    dbms.insert(U, "r", None, vec![vec![Value::Int(1)]]).unwrap();

    let result = dbms.update(
        U,
        "t",
        &[SetPair {
            col: "a".into(),
            value: Value::Int(3),
        }],
        &[eq("a", Value::Int(1))],
    );
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
    // t unchanged
    let rows = rows_of(
        dbms.select(
            U,
            &Selector::All,
            &["t".to_string()],
            &[eq("a", Value::Int(1))],
        )
        .unwrap(),
    );
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_drop_primary_key_refused_while_referenced() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Null]])
        .unwrap();
    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();

    let result = dbms.execute(
        Query::Alter(AlterStatement::DropPrimaryKey {
            table: "t".into(),
            name: None,
        }),
        U,
    );
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));

    // After the foreign key goes away the primary key can be dropped
    dbms.execute(
        Query::Alter(AlterStatement::DropForeignKey {
            table: "r".into(),
            name: "fk_r_x".into(),
        }),
        U,
    )
    .unwrap();
    dbms.execute(
        Query::Alter(AlterStatement::DropPrimaryKey {
            table: "t".into(),
            name: None,
        }),
        U,
    )
    .unwrap();
}

#[test]
fn test_index_on_off_equivalence() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "s", vec![field("a", DataType::Int, false)])
        .unwrap();

    let rows: Vec<Vec<Value>> = (0..2000).map(|i| vec![Value::Int(i * 7 % 1000)]).collect();
    dbms.insert(U, "s", None, rows).unwrap();

    dbms.execute(
        Query::Index(IndexStatement::CreateIndex {
            table: "s".into(),
            name: "ix".into(),
            columns: vec!["a".into()],
        }),
        U,
    )
    .unwrap();

    let count = rows_of(
        dbms.select(
            U,
            &Selector::Aggregate(AggFunc::Count, ColumnRef::unqualified("a")),
            &["s".to_string()],
            &[],
        )
        .unwrap(),
    );
    assert_eq!(count, vec![vec![Value::Int(2000)]]);

    let conds = vec![
        WhereCond::Cmp {
            col: ColumnRef::unqualified("a"),
            op: CmpOp::Ge,
            expr: Expr::Value(Value::Int(100)),
        },
        WhereCond::Cmp {
            col: ColumnRef::unqualified("a"),
            op: CmpOp::Lt,
            expr: Expr::Value(Value::Int(120)),
        },
    ];

    let mut with_index = rows_of(
        dbms.select(U, &Selector::All, &["s".to_string()], &conds)
            .unwrap(),
    );
    dbms.set_index_mode(U, "s", "ix", false).unwrap();
    let mut without_index = rows_of(
        dbms.select(U, &Selector::All, &["s".to_string()], &conds)
            .unwrap(),
    );

    let key = |row: &Vec<Value>| match &row[0] {
        Value::Int(i) => *i,
        _ => unreachable!(),
    };
    with_index.sort_by_key(key);
    without_index.sort_by_key(key);
    assert_eq!(with_index, without_index);
    assert_eq!(with_index.len(), 40);
}

#[test]
fn test_varchar_shrink_refused_when_data_too_long() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "v", vec![field("s", DataType::Varchar(8), false)])
        .unwrap();
    dbms.insert(
        U,
        "v",
        None,
        vec![
            vec![Value::Str("1234567".into())],
            vec![Value::Str("abc".into())],
        ],
    )
    .unwrap();

    let result = dbms.execute(
        Query::Alter(AlterStatement::ChangeColumn {
            table: "v".into(),
            column: "s".into(),
            new_def: FieldDef {
                name: "s".into(),
                data_type: DataType::Varchar(4),
                not_null: false,
                default: None,
            },
        }),
        U,
    );
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));

    // table unchanged
    let rows = rows_of(
        dbms.select(U, &Selector::All, &["v".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&vec![Value::Str("1234567".into())]));
}

#[test]
fn test_update_is_idempotent() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Str("a".into())]])
        .unwrap();

    let set = vec![SetPair {
        col: "b".into(),
        value: Value::Str("zz".into()),
    }];
    dbms.update(U, "t", &set, &[eq("a", Value::Int(1))]).unwrap();
    let once = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    dbms.update(U, "t", &set, &[eq("a", Value::Int(1))]).unwrap();
    let twice = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(once, twice);
    assert_eq!(once, vec![vec![Value::Int(1), Value::Str("zz".into())]]);
}

#[test]
fn test_delete_then_reinsert_restores_select() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(
        U,
        "t",
        None,
        vec![
            vec![Value::Int(1), Value::Str("a".into())],
            vec![Value::Int(2), Value::Str("b".into())],
        ],
    )
    .unwrap();

    dbms.delete(U, "t", &[eq("a", Value::Int(1))]).unwrap();
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Str("a".into())]])
        .unwrap();

    let mut rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    rows.sort_by_key(|r| match &r[0] {
        Value::Int(i) => *i,
        _ => unreachable!(),
    });
    assert_eq!(
        rows,
        vec![
            vec![Value::Int(1), Value::Str("a".into())],
            vec![Value::Int(2), Value::Str("b".into())],
        ]
    );
}

#[test]
fn test_join_two_tables() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(
        U,
        "a",
        vec![field("id", DataType::Int, true), field("v", DataType::Int, false)],
    )
    .unwrap();
    dbms.create_table(
        U,
        "b",
        vec![field("id", DataType::Int, true), field("w", DataType::Int, false)],
    )
    .unwrap();
    dbms.insert(
        U,
        "a",
        None,
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Int(20)],
        ],
    )
    .unwrap();
    dbms.insert(
        U,
        "b",
        None,
        vec![
            vec![Value::Int(2), Value::Int(200)],
            vec![Value::Int(3), Value::Int(300)],
        ],
    )
    .unwrap();

    // select a.v, b.w from a, b where a.id = b.id
    let result = dbms
        .select(
            U,
            &Selector::Columns(vec![
                ColumnRef::qualified("a", "v"),
                ColumnRef::qualified("b", "w"),
            ]),
            &["a".to_string(), "b".to_string()],
            &[WhereCond::Cmp {
                col: ColumnRef::qualified("a", "id"),
                op: CmpOp::Eq,
                expr: Expr::Column(ColumnRef::qualified("b", "id")),
            }],
        )
        .unwrap();
    match result {
        QueryResult::ResultSet { headers, rows } => {
            assert_eq!(headers, vec!["a.v", "b.w"]);
            assert_eq!(rows, vec![vec![Value::Int(20), Value::Int(200)]]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_join_prunes_with_value_predicates() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "a", vec![field("x", DataType::Int, false)])
        .unwrap();
    dbms.create_table(U, "b", vec![field("y", DataType::Int, false)])
        .unwrap();
    dbms.insert(
        U,
        "a",
        None,
        vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
    )
    .unwrap();
    dbms.insert(U, "b", None, vec![vec![Value::Int(7)], vec![Value::Int(8)]])
        .unwrap();

    let rows = rows_of(
        dbms.select(
            U,
            &Selector::All,
            &["a".to_string(), "b".to_string()],
            &[qeq("a", "x", Value::Int(2)), qeq("b", "y", Value::Int(8))],
        )
        .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(2), Value::Int(8)]]);
}

#[test]
fn test_aggregates() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "s", vec![field("a", DataType::Int, false)])
        .unwrap();
    dbms.insert(
        U,
        "s",
        None,
        vec![
            vec![Value::Int(3)],
            vec![Value::Int(5)],
            vec![Value::Null],
            vec![Value::Int(10)],
        ],
    )
    .unwrap();

    let agg = |dbms: &mut DatabaseManager, func| {
        rows_of(
            dbms.select(
                U,
                &Selector::Aggregate(func, ColumnRef::unqualified("a")),
                &["s".to_string()],
                &[],
            )
            .unwrap(),
        )[0][0]
            .clone()
    };

    assert_eq!(agg(&mut dbms, AggFunc::Count), Value::Int(3));
    assert_eq!(agg(&mut dbms, AggFunc::Sum), Value::Int(18));
    assert_eq!(agg(&mut dbms, AggFunc::Min), Value::Int(3));
    assert_eq!(agg(&mut dbms, AggFunc::Max), Value::Int(10));
    assert_eq!(agg(&mut dbms, AggFunc::Avg), Value::Float(6.0));
}

#[test]
fn test_aggregate_empty_relation() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "s", vec![field("a", DataType::Int, false)])
        .unwrap();

    let agg = |dbms: &mut DatabaseManager, func| {
        rows_of(
            dbms.select(
                U,
                &Selector::Aggregate(func, ColumnRef::unqualified("a")),
                &["s".to_string()],
                &[],
            )
            .unwrap(),
        )[0][0]
            .clone()
    };

    assert_eq!(agg(&mut dbms, AggFunc::Count), Value::Int(0));
    assert_eq!(agg(&mut dbms, AggFunc::Sum), Value::Int(0));
    assert_eq!(agg(&mut dbms, AggFunc::Min), Value::Null);
    assert_eq!(agg(&mut dbms, AggFunc::Max), Value::Null);
    assert_eq!(agg(&mut dbms, AggFunc::Avg), Value::Null);
}

#[test]
fn test_aggregate_on_string_column_unsupported() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "s", vec![field("b", DataType::Varchar(4), false)])
        .unwrap();
    let result = dbms.select(
        U,
        &Selector::Aggregate(AggFunc::Sum, ColumnRef::unqualified("b")),
        &["s".to_string()],
        &[],
    );
    assert!(matches!(result, Err(DbError::Unsupported(_))));
}

#[test]
fn test_batch_stops_at_first_error() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);

    let batch = vec![
        Query::Table(TableStatement::Insert {
            table: "t".into(),
            columns: None,
            rows: vec![vec![Value::Int(1), Value::Null]],
        }),
        // duplicate primary key
        Query::Table(TableStatement::Insert {
            table: "t".into(),
            columns: None,
            rows: vec![vec![Value::Int(1), Value::Null]],
        }),
        // never runs
        Query::Table(TableStatement::Insert {
            table: "t".into(),
            columns: None,
            rows: vec![vec![Value::Int(2), Value::Null]],
        }),
    ];
    let results = dbms.run_batch(batch, U);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(results[1].is_err());

    let rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_desc_table() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);

    let result = dbms.desc_table(U, "t").unwrap();
    match result {
        QueryResult::ResultSet { headers, rows } => {
            assert_eq!(headers, vec!["Field", "Null", "Type", "Default"]);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0][0], Value::Str("a".into()));
            assert_eq!(rows[0][1], Value::Str("NO".into()));
            assert_eq!(rows[1][2], Value::Str("varchar(5)".into()));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_add_drop_column_through_statements() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Null]])
        .unwrap();

    dbms.execute(
        Query::Alter(AlterStatement::AddField {
            table: "t".into(),
            field: FieldDef {
                name: "c".into(),
                data_type: DataType::Int,
                not_null: false,
                default: Some(Value::Int(5)),
            },
        }),
        U,
    )
    .unwrap();

    let rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Null, Value::Int(5)]]);

    dbms.execute(
        Query::Alter(AlterStatement::DropColumn {
            table: "t".into(),
            column: "c".into(),
        }),
        U,
    )
    .unwrap();
    let rows = rows_of(
        dbms.select(U, &Selector::All, &["t".to_string()], &[])
            .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(1), Value::Null]]);
}

#[test]
fn test_rename_table_rewrites_foreign_keys() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Null]])
        .unwrap();
    dbms.create_table(
        U,
        "r",
        vec![
            field("x", DataType::Int, false),
            Field::ForeignKey {
                name: None,
                cols: vec!["x".into()],
                ref_table: "t".into(),
                ref_cols: vec!["a".into()],
            },
        ],
    )
    .unwrap();
    dbms.insert(U, "r", None, vec![vec![Value::Int(1)]]).unwrap();

    dbms.rename_table(U, "t", "t2").unwrap();
    let tables = dbms.show_tables(U).unwrap();
    assert!(tables.contains(&"t2".to_string()));
    assert!(!tables.contains(&"t".to_string()));

    // Cascade still follows the renamed target
    let n = dbms.delete(U, "t2", &[eq("a", Value::Int(1))]).unwrap();
    assert_eq!(n, 2);
    let rows = rows_of(
        dbms.select(U, &Selector::All, &["r".to_string()], &[])
            .unwrap(),
    );
    assert!(rows.is_empty());
}

#[test]
fn test_persistence_across_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let mut dbms = DatabaseManager::new(temp.path()).unwrap();
        dbms.create_database("d").unwrap();
        dbms.use_database(U, "d").unwrap();
        create_t(&mut dbms);
        dbms.insert(
            U,
            "t",
            None,
            vec![
                vec![Value::Int(1), Value::Str("hi".into())],
                vec![Value::Int(2), Value::Str("yo".into())],
            ],
        )
        .unwrap();
        dbms.flush().unwrap();
    }

    let mut dbms = DatabaseManager::new(temp.path()).unwrap();
    dbms.use_database(U, "d").unwrap();
    let rows = rows_of(
        dbms.select(
            U,
            &Selector::All,
            &["t".to_string()],
            &[eq("a", Value::Int(2))],
        )
        .unwrap(),
    );
    assert_eq!(rows, vec![vec![Value::Int(2), Value::Str("yo".into())]]);
}

#[test]
fn test_uncomparable_predicate_is_type_mismatch() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(U, "t", None, vec![vec![Value::Int(1), Value::Null]])
        .unwrap();

    let result = dbms.select(
        U,
        &Selector::All,
        &["t".to_string()],
        &[eq("a", Value::Str("one".into()))],
    );
    assert!(matches!(result, Err(DbError::TypeMismatch(_))));
}

#[test]
fn test_update_unique_violation_refused() {
    let (_temp, mut dbms) = setup();
    create_t(&mut dbms);
    dbms.insert(
        U,
        "t",
        None,
        vec![
            vec![Value::Int(1), Value::Null],
            vec![Value::Int(2), Value::Null],
        ],
    )
    .unwrap();

    let result = dbms.update(
        U,
        "t",
        &[SetPair {
            col: "a".into(),
            value: Value::Int(2),
        }],
        &[eq("a", Value::Int(1))],
    );
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));
}

#[test]
fn test_date_column_round_trip_and_range() {
    let (_temp, mut dbms) = setup();
    dbms.create_table(U, "ev", vec![field("day", DataType::Date, false)])
        .unwrap();
    dbms.insert(
        U,
        "ev",
        None,
        vec![
            vec![Value::Str("2024-01-15".into())],
            vec![Value::Str("2024-06-01".into())],
            vec![Value::Str("2023-12-31".into())],
        ],
    )
    .unwrap();

    let rows = rows_of(
        dbms.select(
            U,
            &Selector::All,
            &["ev".to_string()],
            &[WhereCond::Cmp {
                col: ColumnRef::unqualified("day"),
                op: CmpOp::Ge,
                expr: Expr::Value(Value::Str("2024-01-01".into())),
            }],
        )
        .unwrap(),
    );
    assert_eq!(rows.len(), 2);
}
