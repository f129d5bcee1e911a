//! Statement AST consumed by the engine
//!
//! The SQL parser is an external collaborator; it produces these shapes.
//! `Value` and `DataType` double as the engine's literal and column-type
//! vocabulary and serialize into table metadata.

use serde::{Deserialize, Serialize};

/// A column's declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Char(usize),
    Varchar(usize),
    Date,
    /// precision, scale
    Numeric(u32, u32),
}

/// A literal data value as produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Reference to a column, optionally qualified by table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn unqualified(column: impl Into<String>) -> Self {
        Self {
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

/// Comparison operator of a WHERE term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Right-hand side of a comparison: a literal or another column
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Value),
    Column(ColumnRef),
}

/// One conjunct of a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub enum WhereCond {
    Cmp {
        col: ColumnRef,
        op: CmpOp,
        expr: Expr,
    },
    IsNull {
        col: ColumnRef,
        not: bool,
    },
}

/// Column definition inside CREATE TABLE / ALTER
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default: Option<Value>,
}

/// One field of a CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Def(FieldDef),
    PrimaryKey(Vec<String>),
    ForeignKey {
        name: Option<String>,
        cols: Vec<String>,
        ref_table: String,
        ref_cols: Vec<String>,
    },
}

/// SET assignment of an UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct SetPair {
    pub col: String,
    pub value: Value,
}

/// Aggregate function over a single column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// SELECT projection
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    All,
    Columns(Vec<ColumnRef>),
    Aggregate(AggFunc, ColumnRef),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SysStatement {
    ShowDatabases,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DBStatement {
    ShowTables,
    CreateDatabase(String),
    DropDatabase(String),
    UseDatabase(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableStatement {
    CreateTable {
        name: String,
        fields: Vec<Field>,
    },
    DropTable(String),
    DescTable(String),
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    },
    Delete {
        table: String,
        where_clause: Vec<WhereCond>,
    },
    Update {
        table: String,
        set: Vec<SetPair>,
        where_clause: Vec<WhereCond>,
    },
    Select {
        select: Selector,
        tables: Vec<String>,
        where_clause: Vec<WhereCond>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexStatement {
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
    },
    DropIndex {
        table: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterStatement {
    AddField {
        table: String,
        field: FieldDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    ChangeColumn {
        table: String,
        column: String,
        new_def: FieldDef,
    },
    RenameTable {
        table: String,
        new_name: String,
    },
    AddPrimaryKey {
        table: String,
        name: Option<String>,
        columns: Vec<String>,
    },
    DropPrimaryKey {
        table: String,
        name: Option<String>,
    },
    AddForeignKey {
        table: String,
        name: Option<String>,
        columns: Vec<String>,
        ref_table: String,
        ref_columns: Vec<String>,
    },
    DropForeignKey {
        table: String,
        name: String,
    },
}

/// A parsed statement of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Sys(SysStatement),
    Db(DBStatement),
    Table(TableStatement),
    Index(IndexStatement),
    Alter(AlterStatement),
}
