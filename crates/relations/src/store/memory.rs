//! In-memory table store
//!
//! Keeps rows per table behind a `parking_lot` lock and records every
//! statement it executes. Used by tests and by embedders that want the
//! relationship engine without a database.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;

use super::TableStore;
use crate::error::{RelationError, RelationResult};
use crate::sql::{
    Condition, DeleteStatement, InsertStatement, JoinQuery, Row, SelectQuery, StatementKind, ToSql,
    UpdateStatement,
};

/// One executed statement as rendered SQL
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedStatement {
    pub kind: StatementKind,
    pub table: String,
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: StatementKind,
    table: String,
    message: String,
}

/// Table store holding all rows in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    log: Mutex<Vec<LoggedStatement>>,
    failures: Mutex<Vec<InjectedFailure>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing the statement log
    pub fn seed<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Value>,
    {
        let mut tables = self.tables.write();
        let target = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Value::Object(row) = row {
                target.push(row);
            }
        }
    }

    /// Snapshot of all rows of a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }

    /// All statements executed so far
    pub fn statements(&self) -> Vec<LoggedStatement> {
        self.log.lock().clone()
    }

    /// Number of executed statements of a kind against a table
    pub fn count(&self, kind: StatementKind, table: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|s| s.kind == kind && s.table == table)
            .count()
    }

    /// Number of read statements (plain and join selects) against a table
    pub fn reads(&self, table: &str) -> usize {
        self.count(StatementKind::Select, table) + self.count(StatementKind::Join, table)
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// Make the next statement of `kind` against `table` fail
    pub fn fail_next(&self, kind: StatementKind, table: &str, message: &str) {
        self.failures.lock().push(InjectedFailure {
            kind,
            table: table.to_string(),
            message: message.to_string(),
        });
    }

    fn record<S: ToSql>(&self, statement: &S) -> RelationResult<()> {
        {
            let mut failures = self.failures.lock();
            if let Some(pos) = failures
                .iter()
                .position(|f| f.kind == statement.kind() && f.table == statement.table())
            {
                let failure = failures.remove(pos);
                return Err(RelationError::storage(failure.message));
            }
        }

        let (sql, params) = statement.to_sql_with_params();
        self.log.lock().push(LoggedStatement {
            kind: statement.kind(),
            table: statement.table().to_string(),
            sql,
            params,
        });
        Ok(())
    }
}

fn matches_all(row: &Row, filter: &[Condition]) -> bool {
    filter.iter().all(|condition| condition.matches(row))
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

impl TableStore for MemoryStore {
    fn select(&self, query: &SelectQuery) -> RelationResult<Vec<Row>> {
        self.record(query)?;

        let tables = self.tables.read();
        let rows = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filter))
                    .map(|row| project(row, &query.columns))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn select_join(&self, query: &JoinQuery) -> RelationResult<Vec<Row>> {
        self.record(query)?;

        let tables = self.tables.read();
        let (Some(targets), Some(links)) =
            (tables.get(&query.table), tables.get(&query.join_table))
        else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for link in links.iter().filter(|link| matches_all(link, &query.filter)) {
            for target in targets {
                let joined = query
                    .on
                    .iter()
                    .all(|(left, right)| match (target.get(left), link.get(right)) {
                        (Some(l), Some(r)) => !l.is_null() && l == r,
                        _ => false,
                    });
                if joined {
                    results.push(project(target, &query.columns));
                }
            }
        }
        Ok(results)
    }

    fn insert(&self, statement: &InsertStatement) -> RelationResult<()> {
        self.record(statement)?;

        self.tables
            .write()
            .entry(statement.table.clone())
            .or_default()
            .push(statement.row.clone());
        Ok(())
    }

    fn update(&self, statement: &UpdateStatement) -> RelationResult<usize> {
        self.record(statement)?;

        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(&statement.table) else {
            return Ok(0);
        };

        let mut updated = 0;
        for row in rows.iter_mut().filter(|row| matches_all(row, &statement.filter)) {
            for (column, value) in &statement.assignments {
                row.insert(column.clone(), value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    fn delete(&self, statement: &DeleteStatement) -> RelationResult<usize> {
        self.record(statement)?;

        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(&statement.table) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| !matches_all(row, &statement.filter));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "line_items",
            vec![json!({"id": 5, "sku": "A"}), json!({"id": 6, "sku": "B"})],
        );
        store.seed("order_items", vec![json!({"order_id": 1, "item_id": 5})]);
        store
    }

    #[test]
    fn test_select_and_projection() {
        let store = store();
        let rows = store
            .select(&SelectQuery {
                table: "line_items".to_string(),
                columns: vec!["id".to_string()],
                filter: vec![Condition::eq("sku", json!("B"))],
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(6)));
        assert!(rows[0].get("sku").is_none());
        assert_eq!(store.count(StatementKind::Select, "line_items"), 1);
    }

    #[test]
    fn test_join() {
        let store = store();
        let rows = store
            .select_join(&JoinQuery {
                table: "line_items".to_string(),
                columns: vec!["id".to_string()],
                join_table: "order_items".to_string(),
                on: vec![("id".to_string(), "item_id".to_string())],
                filter: vec![Condition::eq("order_id", json!(1))],
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(5)));
        assert_eq!(store.reads("line_items"), 1);
    }

    #[test]
    fn test_update_and_delete_report_affected_rows() {
        let store = store();
        let updated = store
            .update(&UpdateStatement {
                table: "line_items".to_string(),
                assignments: vec![("sku".to_string(), json!("C"))],
                filter: vec![Condition::eq("id", json!(5))],
            })
            .unwrap();
        assert_eq!(updated, 1);

        let deleted = store
            .delete(&DeleteStatement {
                table: "line_items".to_string(),
                filter: vec![Condition::eq("sku", json!("C"))],
            })
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.row_count("line_items"), 1);
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let store = store();
        store.fail_next(StatementKind::Insert, "order_items", "constraint violated");

        let statement = InsertStatement {
            table: "order_items".to_string(),
            row: json!({"order_id": 1, "item_id": 6}).as_object().cloned().unwrap(),
        };
        assert!(matches!(store.insert(&statement), Err(RelationError::Storage(_))));
        assert!(store.insert(&statement).is_ok());
        assert_eq!(store.row_count("order_items"), 2);
        assert_eq!(store.statements().len(), 1);
    }
}
