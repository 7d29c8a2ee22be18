//! Statement logging decorator, installed when `log_statements` is enabled

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::TableStore;
use crate::error::RelationResult;
use crate::sql::{
    DeleteStatement, InsertStatement, JoinQuery, Row, SelectQuery, ToSql, UpdateStatement,
};

/// Wraps a store and logs every statement with its parameters and duration
#[derive(Debug, Clone)]
pub struct LoggingStore {
    inner: Arc<dyn TableStore>,
}

impl LoggingStore {
    pub fn new(inner: Arc<dyn TableStore>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn TableStore> {
        &self.inner
    }

    fn run<S: ToSql, T>(
        &self,
        statement: &S,
        f: impl FnOnce() -> RelationResult<T>,
    ) -> RelationResult<T> {
        let (sql, params) = statement.to_sql_with_params();
        let started = Instant::now();
        let result = f();
        match &result {
            Ok(_) => debug!(%sql, ?params, elapsed = ?started.elapsed(), "statement executed"),
            Err(err) => warn!(%sql, ?params, error = %err, "statement failed"),
        }
        result
    }
}

impl TableStore for LoggingStore {
    fn select(&self, query: &SelectQuery) -> RelationResult<Vec<Row>> {
        self.run(query, || self.inner.select(query))
    }

    fn select_join(&self, query: &JoinQuery) -> RelationResult<Vec<Row>> {
        self.run(query, || self.inner.select_join(query))
    }

    fn insert(&self, statement: &InsertStatement) -> RelationResult<()> {
        self.run(statement, || self.inner.insert(statement))
    }

    fn update(&self, statement: &UpdateStatement) -> RelationResult<usize> {
        self.run(statement, || self.inner.update(statement))
    }

    fn delete(&self, statement: &DeleteStatement) -> RelationResult<usize> {
        self.run(statement, || self.inner.delete(statement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Condition, StatementKind};
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_delegates_to_inner_store() {
        let memory = Arc::new(MemoryStore::new());
        memory.seed("orders", vec![json!({"id": 1}), json!({"id": 2})]);
        let store = LoggingStore::new(memory.clone());

        let rows = store
            .select(&SelectQuery {
                table: "orders".to_string(),
                columns: vec!["id".to_string()],
                filter: vec![Condition::eq("id", json!(2))],
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(memory.count(StatementKind::Select, "orders"), 1);

        memory.fail_next(StatementKind::Delete, "orders", "locked");
        let err = store
            .delete(&DeleteStatement {
                table: "orders".to_string(),
                filter: Vec::new(),
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "Storage error: locked");
        assert_eq!(memory.row_count("orders"), 2);
    }
}
