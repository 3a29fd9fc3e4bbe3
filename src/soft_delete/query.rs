//! Filtered SELECT builder
//!
//! Every repository read goes through [`Select`]. The builder owns the
//! liveness rules: the root table gets a `WHERE <alias>.deleted_at IS NULL`
//! clause, and every relationship traversal is rendered by its
//! [`ConfiguredRelationship`](super::ConfiguredRelationship) with a predicate
//! scoped to its own alias, so repeated appearances of one table are filtered
//! independently.

use std::collections::HashMap;

use duckdb::types::Value;

use super::registry::Schema;
use super::{liveness_predicate, QueryError, ReadOptions};

/// SQL join flavour for a relationship traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct JoinStep {
    from_alias: String,
    relationship: String,
    alias: String,
    kind: JoinKind,
}

/// A rendered statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Builder for reads against registered tables.
#[derive(Debug, Clone)]
pub struct Select<'s> {
    schema: &'s Schema,
    table: String,
    alias: String,
    columns: Vec<String>,
    joins: Vec<JoinStep>,
    filters: Vec<String>,
    params: Vec<Value>,
    order_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    options: ReadOptions,
}

impl<'s> Select<'s> {
    pub fn from(schema: &'s Schema, table: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            schema,
            table: table.into(),
            alias: alias.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            filters: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            options: ReadOptions::default(),
        }
    }

    pub fn column(mut self, expr: impl Into<String>) -> Self {
        self.columns.push(expr.into());
        self
    }

    pub fn columns<I, S>(mut self, exprs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(exprs.into_iter().map(Into::into));
        self
    }

    /// Traverse `relationship` from the table bound to `from_alias`.
    pub fn join(self, from_alias: &str, relationship: &str, alias: &str) -> Self {
        self.push_join(from_alias, relationship, alias, JoinKind::Inner)
    }

    pub fn left_join(self, from_alias: &str, relationship: &str, alias: &str) -> Self {
        self.push_join(from_alias, relationship, alias, JoinKind::Left)
    }

    fn push_join(mut self, from_alias: &str, relationship: &str, alias: &str, kind: JoinKind) -> Self {
        self.joins.push(JoinStep {
            from_alias: from_alias.to_string(),
            relationship: relationship.to_string(),
            alias: alias.to_string(),
            kind,
        });
        self
    }

    /// Add a condition; `?` placeholders bind `params` in order.
    pub fn filter<I>(mut self, condition: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.filters.push(condition.into());
        self.params.extend(params);
        self
    }

    /// Add a condition without parameters.
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.filters.push(condition.into());
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<BuiltQuery, QueryError> {
        if !self.schema.knows(&self.table) {
            return Err(QueryError::UnknownTable(self.table));
        }

        let filter_live = !self.options.include_deleted;
        let mut bound: HashMap<String, String> = HashMap::new();
        bound.insert(self.alias.clone(), self.table.clone());

        let mut join_clauses = Vec::new();
        for join in &self.joins {
            let parent_table = bound
                .get(&join.from_alias)
                .cloned()
                .ok_or_else(|| QueryError::UnknownAlias(join.from_alias.clone()))?;
            let rel = self
                .schema
                .relationship(&parent_table, &join.relationship)
                .ok_or_else(|| QueryError::UnknownRelationship {
                    table: parent_table.clone(),
                    relationship: join.relationship.clone(),
                })?;

            if bound.contains_key(&join.alias) {
                return Err(QueryError::DuplicateAlias(join.alias.clone()));
            }
            if let Some((link, secondary)) = rel.secondary_alias(&join.alias) {
                if bound.contains_key(&link) {
                    return Err(QueryError::DuplicateAlias(link));
                }
                bound.insert(link, secondary.to_string());
            }
            bound.insert(join.alias.clone(), rel.target().to_string());

            join_clauses.extend(rel.join_clauses(&join.from_alias, &join.alias, join.kind, filter_live));
        }

        let mut conditions = Vec::new();
        if filter_live && self.schema.is_soft_delete(&self.table) {
            conditions.push(liveness_predicate(&self.alias));
        }
        conditions.extend(self.filters.iter().map(|f| format!("({})", f)));

        let columns = if self.columns.is_empty() {
            format!("{}.*", self.alias)
        } else {
            self.columns.join(", ")
        };

        let mut sql = format!("SELECT {} FROM {} AS {}", columns, self.table, self.alias);
        for clause in &join_clauses {
            sql.push(' ');
            sql.push_str(clause);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        tracing::trace!("Built query: {}", sql);
        Ok(BuiltQuery {
            sql,
            params: self.params,
        })
    }
}
