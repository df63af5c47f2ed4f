//! Find-and-modify query builder
//!
//! Describes "pick one row matching a filter, in a given order, and apply an
//! update to it" independently of SQL, so the task queue and the download
//! queue share the same claim primitive. Column names are static strings
//! owned by this crate; only values are bound as parameters.

use rusqlite::types::Value;

/// Tables that support find-and-modify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Tasks,
    Records,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Records => "catalog_records",
        }
    }
}

/// A single filter clause; clauses are combined with AND
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(&'static str, Value),
    IsNull(&'static str),
    /// Strictly less than; NULL never matches
    Before(&'static str, i64),
}

/// Sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc(&'static str),
    Desc(&'static str),
}

/// A column update
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(&'static str, Value),
    Unset(&'static str),
}

/// One atomic "find one row and update it" request
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndModify {
    pub table: Table,
    pub filter: Vec<Condition>,
    pub sort: Vec<Order>,
    pub update: Vec<Assignment>,
}

impl FindAndModify {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            filter: Vec::new(),
            sort: Vec::new(),
            update: Vec::new(),
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    /// Adds the condition only when `enabled` is true
    pub fn filter_if(self, enabled: bool, condition: Condition) -> Self {
        if enabled {
            self.filter(condition)
        } else {
            self
        }
    }

    pub fn sort(mut self, order: Order) -> Self {
        self.sort.push(order);
        self
    }

    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.update.push(Assignment::Set(column, value.into()));
        self
    }

    pub fn unset(mut self, column: &'static str) -> Self {
        self.update.push(Assignment::Unset(column));
        self
    }

    /// Renders the SELECT half: `columns` must start with `id`
    pub(crate) fn select_sql(&self, columns: &str) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT {} FROM {}", columns, self.table.name());
        let mut params = Vec::new();

        if !self.filter.is_empty() {
            let clauses: Vec<String> = self
                .filter
                .iter()
                .map(|condition| match condition {
                    Condition::Eq(column, value) => {
                        params.push(value.clone());
                        format!("{} = ?{}", column, params.len())
                    }
                    Condition::IsNull(column) => format!("{} IS NULL", column),
                    Condition::Before(column, limit) => {
                        params.push(Value::Integer(*limit));
                        format!("{} < ?{}", column, params.len())
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.sort.is_empty() {
            let keys: Vec<String> = self
                .sort
                .iter()
                .map(|order| match order {
                    Order::Asc(column) => format!("{} ASC", column),
                    Order::Desc(column) => format!("{} DESC", column),
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }

        sql.push_str(" LIMIT 1");
        (sql, params)
    }

    /// Renders the UPDATE half, targeting a single row id
    pub(crate) fn update_sql(&self, id: i64) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let assignments: Vec<String> = self
            .update
            .iter()
            .map(|assignment| match assignment {
                Assignment::Set(column, value) => {
                    params.push(value.clone());
                    format!("{} = ?{}", column, params.len())
                }
                Assignment::Unset(column) => format!("{} = NULL", column),
            })
            .collect();

        params.push(Value::Integer(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            self.table.name(),
            assignments.join(", "),
            params.len()
        );
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_sql_with_filter_and_sort() {
        let query = FindAndModify::new(Table::Tasks)
            .filter(Condition::IsNull("leased_at"))
            .filter(Condition::Before("created_at", 500))
            .filter(Condition::Eq("kind", Value::Text("CRAWL_DETAILS".into())))
            .sort(Order::Desc("priority"))
            .sort(Order::Asc("id"));

        let (sql, params) = query.select_sql("id, kind");

        assert_eq!(
            sql,
            "SELECT id, kind FROM tasks WHERE leased_at IS NULL AND created_at < ?1 \
             AND kind = ?2 ORDER BY priority DESC, id ASC LIMIT 1"
        );
        assert_eq!(
            params,
            vec![Value::Integer(500), Value::Text("CRAWL_DETAILS".into())]
        );
    }

    #[test]
    fn test_select_sql_without_filter() {
        let (sql, params) = FindAndModify::new(Table::Records).select_sql("id");
        assert_eq!(sql, "SELECT id FROM catalog_records LIMIT 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_filter_if_skips_disabled_condition() {
        let query = FindAndModify::new(Table::Records)
            .filter_if(false, Condition::Eq("price_micros", Value::Integer(0)));
        assert!(query.filter.is_empty());
    }

    #[test]
    fn test_update_sql() {
        let query = FindAndModify::new(Table::Tasks)
            .set("completed_at", 1_000i64)
            .unset("leased_at");

        let (sql, params) = query.update_sql(7);

        assert_eq!(
            sql,
            "UPDATE tasks SET completed_at = ?1, leased_at = NULL WHERE id = ?2"
        );
        assert_eq!(params, vec![Value::Integer(1_000), Value::Integer(7)]);
    }
}
