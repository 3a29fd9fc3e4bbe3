//! Logical deletion for stored records
//!
//! A record is *live* while its `deleted_at` column is NULL and *deleted* once a
//! timestamp is set. Rows are never physically removed here.
//!
//! Filtering is explicit: every read path builds its statement through
//! [`Select`], which appends the liveness predicate for the root table and for
//! every relationship traversal whose target is soft-deletable. Which tables
//! are soft-deletable is declared up front in a [`ModelRegistry`] and frozen
//! into a [`Schema`] by [`ModelRegistry::configure`].

pub mod query;
pub mod registry;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use query::{BuiltQuery, JoinKind, Select};
pub use registry::{
    ConfiguredRelationship, Direction, FilterPlan, ModelRegistry, Relationship, Schema, Secondary,
};

/// Column carrying the deletion timestamp on every soft-deletable table.
pub const DELETED_AT: &str = "deleted_at";

/// Capability marker for record types that support logical deletion.
pub trait SoftDelete {
    /// Table the record type is stored in.
    const TABLE: &'static str;

    fn id(&self) -> i64;

    fn deleted_at(&self) -> Option<DateTime<Utc>>;

    fn set_deleted_at(&mut self, at: Option<DateTime<Utc>>);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    fn is_live(&self) -> bool {
        !self.is_deleted()
    }

    /// Mark the record deleted at `at`, or now when no time is given.
    fn delete(&mut self, at: Option<DateTime<Utc>>) {
        self.set_deleted_at(Some(at.unwrap_or_else(Utc::now)));
    }

    fn restore(&mut self) {
        self.set_deleted_at(None);
    }
}

/// Per-call read options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Skip per-query liveness filtering and return deleted rows too.
    pub include_deleted: bool,
}

impl ReadOptions {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn with_deleted() -> Self {
        Self {
            include_deleted: true,
        }
    }
}

/// The liveness predicate for a table alias.
pub fn liveness_predicate(alias: &str) -> String {
    format!("{}.{} IS NULL", alias, DELETED_AT)
}

/// Errors raised while assembling a filtered query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown relationship '{relationship}' on table '{table}'")]
    UnknownRelationship { table: String, relationship: String },

    #[error("Alias '{0}' is already used in this query")]
    DuplicateAlias(String),

    #[error("Alias '{0}' is not bound in this query")]
    UnknownAlias(String),
}
