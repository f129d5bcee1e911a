//! Demo driver: seeds a small database and walks through the engine's
//! surface. The SQL parser lives in a separate front-end; this binary feeds
//! the engine prebuilt statements.

use reldb::ast::{
    AggFunc, CmpOp, ColumnRef, DBStatement, DataType, Expr, Field, FieldDef, Query, Selector,
    TableStatement, Value, WhereCond,
};
use reldb::db::{DatabaseManager, QueryResult};

fn field(name: &str, data_type: DataType, not_null: bool) -> Field {
    Field::Def(FieldDef {
        name: name.to_string(),
        data_type,
        not_null,
        default: None,
    })
}

fn print_result(result: &QueryResult) {
    match result {
        QueryResult::Empty => println!("ok"),
        QueryResult::RowsAffected(n) => println!("{} row(s)", n),
        QueryResult::ResultSet { headers, rows } => {
            println!("{}", headers.join(" | "));
            for row in rows {
                let cells: Vec<String> = row
                    .iter()
                    .map(|v| match v {
                        Value::Null => "NULL".to_string(),
                        Value::Int(i) => i.to_string(),
                        Value::Float(f) => f.to_string(),
                        Value::Str(s) => s.clone(),
                    })
                    .collect();
                println!("{}", cells.join(" | "));
            }
        }
    }
}

fn main() {
    let data_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./reldb-data".to_string());

    let mut dbms = match DatabaseManager::new(&data_dir) {
        Ok(dbms) => dbms,
        Err(e) => {
            eprintln!("failed to open data directory: {}", e);
            std::process::exit(1);
        }
    };

    let user = 0;
    let batch = vec![
        Query::Db(DBStatement::CreateDatabase("demo".into())),
        Query::Db(DBStatement::UseDatabase("demo".into())),
        Query::Table(TableStatement::CreateTable {
            name: "fruit".into(),
            fields: vec![
                field("id", DataType::Int, true),
                field("name", DataType::Varchar(32), false),
                field("price", DataType::Numeric(8, 2), false),
                Field::PrimaryKey(vec!["id".into()]),
            ],
        }),
        Query::Table(TableStatement::Insert {
            table: "fruit".into(),
            columns: None,
            rows: vec![
                vec![Value::Int(1), Value::Str("apple".into()), Value::Float(10.5)],
                vec![Value::Int(2), Value::Str("melon".into()), Value::Float(5.0)],
                vec![Value::Int(3), Value::Null, Value::Float(2.25)],
            ],
        }),
        Query::Table(TableStatement::Select {
            select: Selector::All,
            tables: vec!["fruit".into()],
            where_clause: vec![WhereCond::Cmp {
                col: ColumnRef::unqualified("price"),
                op: CmpOp::Gt,
                expr: Expr::Value(Value::Float(3.0)),
            }],
        }),
        Query::Table(TableStatement::Select {
            select: Selector::Aggregate(AggFunc::Count, ColumnRef::unqualified("name")),
            tables: vec!["fruit".into()],
            where_clause: vec![],
        }),
    ];

    for result in dbms.run_batch(batch, user) {
        match result {
            Ok(res) => print_result(&res),
            Err(e) => {
                eprintln!("error: {}", e);
                break;
            }
        }
    }
}
