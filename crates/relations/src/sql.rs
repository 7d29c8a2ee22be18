//! Statement model and SQL generation
//!
//! The engine never talks SQL to a driver itself. It hands these statements to
//! a [`TableStore`](crate::store::TableStore); the SQL text is what a
//! relational store would execute and is used for statement logging.

use serde_json::{Map, Value};
use std::fmt;

/// A stored row: column name -> value
pub type Row = Map<String, Value>;

/// Equality condition on one column. A NULL value renders as `IS NULL`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub value: Value,
}

impl Condition {
    pub fn eq(column: &str, value: Value) -> Self {
        Self {
            column: column.to_string(),
            value,
        }
    }

    /// Conditions pairing `columns` with `values` positionally
    pub fn all_eq(columns: &[String], values: &[Value]) -> Vec<Condition> {
        columns
            .iter()
            .zip(values)
            .map(|(column, value)| Condition::eq(column, value.clone()))
            .collect()
    }

    /// Whether `row` satisfies this condition
    pub fn matches(&self, row: &Row) -> bool {
        match (&self.value, row.get(&self.column)) {
            (Value::Null, None) | (Value::Null, Some(Value::Null)) => true,
            (expected, Some(actual)) => expected == actual,
            (_, None) => false,
        }
    }
}

/// `SELECT columns FROM table WHERE filter`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub filter: Vec<Condition>,
}

/// Related rows reached through a relation table:
/// `SELECT table.columns FROM table INNER JOIN join_table ON on WHERE join_table.filter`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub join_table: String,
    /// (column of `table`, column of `join_table`)
    pub on: Vec<(String, String)>,
    /// Conditions on `join_table` columns
    pub filter: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub row: Row,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub filter: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filter: Vec<Condition>,
}

/// Statement categories, used by the statement log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Join,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            StatementKind::Select => "SELECT",
            StatementKind::Join => "SELECT JOIN",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        };
        write!(f, "{}", kind)
    }
}

/// Anything that renders to parameterised SQL
pub trait ToSql {
    fn kind(&self) -> StatementKind;

    /// Table the statement targets (the driving table for joins)
    fn table(&self) -> &str;

    /// Generate SQL with `$n` placeholders and return the bound parameters
    fn to_sql_with_params(&self) -> (String, Vec<Value>);
}

impl ToSql for SelectQuery {
    fn kind(&self) -> StatementKind {
        StatementKind::Select
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        build_where_clause(&mut sql, &mut params, None, &self.filter);
        (sql, params)
    }
}

impl ToSql for JoinQuery {
    fn kind(&self) -> StatementKind {
        StatementKind::Join
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{}.{}", self.table, c))
            .collect();
        sql.push_str(&columns.join(", "));
        sql.push_str(&format!(" FROM {} INNER JOIN {} ON ", self.table, self.join_table));

        for (i, (left, right)) in self.on.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            sql.push_str(&format!("{}.{} = {}.{}", self.table, left, self.join_table, right));
        }

        build_where_clause(&mut sql, &mut params, Some(&self.join_table), &self.filter);
        (sql, params)
    }
}

impl ToSql for InsertStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Insert
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let columns: Vec<&str> = self.row.keys().map(|k| k.as_str()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        (sql, self.row.values().cloned().collect())
    }
}

impl ToSql for UpdateStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Update
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let mut sql = format!("UPDATE {} SET ", self.table);
        let mut params = Vec::new();

        for (i, (column, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            params.push(value.clone());
            sql.push_str(&format!("{} = ${}", column, params.len()));
        }

        build_where_clause(&mut sql, &mut params, None, &self.filter);
        (sql, params)
    }
}

impl ToSql for DeleteStatement {
    fn kind(&self) -> StatementKind {
        StatementKind::Delete
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn to_sql_with_params(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        build_where_clause(&mut sql, &mut params, None, &self.filter);
        (sql, params)
    }
}

fn build_where_clause(
    sql: &mut String,
    params: &mut Vec<Value>,
    qualifier: Option<&str>,
    filter: &[Condition],
) {
    if filter.is_empty() {
        return;
    }

    sql.push_str(" WHERE ");
    for (i, condition) in filter.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        let column = match qualifier {
            Some(table) => format!("{}.{}", table, condition.column),
            None => condition.column.clone(),
        };
        if condition.value.is_null() {
            sql.push_str(&format!("{} IS NULL", column));
        } else {
            params.push(condition.value.clone());
            sql.push_str(&format!("{} = ${}", column, params.len()));
        }
    }
}
