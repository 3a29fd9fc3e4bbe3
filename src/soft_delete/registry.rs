//! Model and relationship declarations
//!
//! Tables are registered once at startup, either as soft-deletable (through the
//! [`SoftDelete`] marker) or as plain tables. Relationships between them are
//! declared with [`Relationship`] and resolved by [`ModelRegistry::configure`],
//! which decides for every relationship how the liveness predicate is applied
//! when it is traversed.

use std::collections::HashMap;
use std::fmt;

use super::query::JoinKind;
use super::{liveness_predicate, QueryError, SoftDelete, DELETED_AT};

/// Cardinality of a relationship, seen from its parent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Parent holds a foreign key to a single target row.
    ManyToOne,
    /// Target rows hold a foreign key back to the parent.
    OneToMany,
    /// Parent and target are linked through a secondary structure.
    ManyToMany,
}

/// Association structure of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Secondary {
    /// Plain association table with one foreign key to each side.
    Table {
        name: &'static str,
        parent_fk: &'static str,
        target_fk: &'static str,
    },
    /// Hand-written join fragment. `{parent}` and `{target}` are replaced with
    /// the aliases of the two ends. It is never rewritten automatically.
    Custom(String),
}

impl Secondary {
    pub fn table(name: &'static str, parent_fk: &'static str, target_fk: &'static str) -> Self {
        Secondary::Table {
            name,
            parent_fk,
            target_fk,
        }
    }

    pub fn custom(fragment: impl Into<String>) -> Self {
        Secondary::Custom(fragment.into())
    }
}

/// A declared association between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: &'static str,
    pub parent: &'static str,
    pub target: &'static str,
    pub direction: Direction,
    /// Column on the parent side of the join.
    pub local_column: &'static str,
    /// Column on the target side of the join.
    pub remote_column: &'static str,
    pub secondary: Option<Secondary>,
    /// Traverse without any liveness filtering, for edges that must also reach
    /// deleted rows (historical attachments and the like).
    pub skip_soft_delete: bool,
}

impl Relationship {
    /// `parent.foreign_key -> target.id`
    pub fn many_to_one(
        parent: &'static str,
        name: &'static str,
        foreign_key: &'static str,
        target: &'static str,
    ) -> Self {
        Self {
            name,
            parent,
            target,
            direction: Direction::ManyToOne,
            local_column: foreign_key,
            remote_column: "id",
            secondary: None,
            skip_soft_delete: false,
        }
    }

    /// `parent.id <- target.foreign_key`
    pub fn one_to_many(
        parent: &'static str,
        name: &'static str,
        target: &'static str,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            parent,
            target,
            direction: Direction::OneToMany,
            local_column: "id",
            remote_column: foreign_key,
            secondary: None,
            skip_soft_delete: false,
        }
    }

    /// `parent.id <- secondary -> target.id`
    pub fn many_to_many(
        parent: &'static str,
        name: &'static str,
        target: &'static str,
        secondary: Secondary,
    ) -> Self {
        Self {
            name,
            parent,
            target,
            direction: Direction::ManyToMany,
            local_column: "id",
            remote_column: "id",
            secondary: Some(secondary),
            skip_soft_delete: false,
        }
    }

    pub fn skip_soft_delete(mut self) -> Self {
        self.skip_soft_delete = true;
        self
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.parent, self.name)
    }
}

/// How liveness filtering is applied when a relationship is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPlan {
    /// No filtering: nothing on the path is soft-deletable, or the
    /// relationship opted out.
    Unfiltered,
    /// Predicate on the target alias, added per query unless the query
    /// includes deleted rows.
    PerQuery,
    /// Predicates fixed into the join conditions at configuration time.
    Baked { secondary: bool, target: bool },
    /// Secondary structure could not be inspected; the relationship author is
    /// responsible for the condition.
    Manual,
}

/// A relationship together with its resolved filtering plan.
#[derive(Debug, Clone)]
pub struct ConfiguredRelationship {
    relationship: Relationship,
    plan: FilterPlan,
}

impl ConfiguredRelationship {
    pub fn relationship(&self) -> &Relationship {
        &self.relationship
    }

    pub fn plan(&self) -> FilterPlan {
        self.plan
    }

    pub fn target(&self) -> &'static str {
        self.relationship.target
    }

    /// Alias used for the association table when traversing into `alias`.
    pub fn secondary_alias(&self, alias: &str) -> Option<(String, &'static str)> {
        match &self.relationship.secondary {
            Some(Secondary::Table { name, .. }) => Some((format!("{}_link", alias), *name)),
            _ => None,
        }
    }

    /// Render the join clauses that reach `alias` from `parent`.
    pub(crate) fn join_clauses(
        &self,
        parent: &str,
        alias: &str,
        kind: JoinKind,
        filter_live: bool,
    ) -> Vec<String> {
        let rel = &self.relationship;
        let keyword = kind.keyword();

        match &rel.secondary {
            Some(Secondary::Custom(fragment)) => vec![fragment
                .replace("{parent}", parent)
                .replace("{target}", alias)],
            Some(Secondary::Table {
                name,
                parent_fk,
                target_fk,
            }) => {
                let (baked_secondary, baked_target) = match self.plan {
                    FilterPlan::Baked { secondary, target } => (secondary, target),
                    _ => (false, false),
                };
                let link = format!("{}_link", alias);

                let mut primary = format!(
                    "{keyword} {name} AS {link} ON {link}.{parent_fk} = {parent}.{local}",
                    local = rel.local_column,
                );
                if baked_secondary {
                    primary.push_str(" AND ");
                    primary.push_str(&liveness_predicate(&link));
                }

                let mut secondary = format!(
                    "{keyword} {target} AS {alias} ON {alias}.{remote} = {link}.{target_fk}",
                    target = rel.target,
                    remote = rel.remote_column,
                );
                if baked_target {
                    secondary.push_str(" AND ");
                    secondary.push_str(&liveness_predicate(alias));
                }

                vec![primary, secondary]
            }
            None => {
                let mut clause = format!(
                    "{keyword} {target} AS {alias} ON {alias}.{remote} = {parent}.{local}",
                    target = rel.target,
                    remote = rel.remote_column,
                    local = rel.local_column,
                );
                let filtered = match self.plan {
                    FilterPlan::Baked { target, .. } => target,
                    FilterPlan::PerQuery => filter_live,
                    FilterPlan::Unfiltered | FilterPlan::Manual => false,
                };
                if filtered {
                    clause.push_str(" AND ");
                    clause.push_str(&liveness_predicate(alias));
                }
                vec![clause]
            }
        }
    }
}

/// Collects table and relationship declarations before configuration.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    tables: HashMap<&'static str, bool>,
    relationships: Vec<Relationship>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a soft-deletable record type.
    pub fn register<T: SoftDelete>(&mut self) -> &mut Self {
        self.tables.insert(T::TABLE, true);
        self
    }

    /// Register a table without a deletion timestamp.
    pub fn register_plain(&mut self, table: &'static str) -> &mut Self {
        self.tables.insert(table, false);
        self
    }

    pub fn relate(&mut self, relationship: Relationship) -> &mut Self {
        self.relationships.push(relationship);
        self
    }

    /// Resolve every declared relationship into its filtering plan.
    pub fn configure(&self) -> Result<Schema, QueryError> {
        let mut relationships: HashMap<&'static str, HashMap<&'static str, ConfiguredRelationship>> =
            HashMap::new();

        for rel in &self.relationships {
            let target_soft = self.soft(rel.target)?;
            self.soft(rel.parent)?;

            let plan = if rel.skip_soft_delete {
                FilterPlan::Unfiltered
            } else {
                match rel.direction {
                    Direction::ManyToOne if target_soft => FilterPlan::PerQuery,
                    Direction::OneToMany if target_soft => FilterPlan::Baked {
                        secondary: false,
                        target: true,
                    },
                    Direction::ManyToOne | Direction::OneToMany => FilterPlan::Unfiltered,
                    Direction::ManyToMany => match &rel.secondary {
                        Some(Secondary::Table { name, .. }) => {
                            let secondary_soft = self.soft(name)?;
                            if secondary_soft || target_soft {
                                FilterPlan::Baked {
                                    secondary: secondary_soft,
                                    target: target_soft,
                                }
                            } else {
                                FilterPlan::Unfiltered
                            }
                        }
                        Some(Secondary::Custom(_)) if target_soft => {
                            tracing::warn!(
                                "Filtering of deleted rows was skipped for relationship {}: secondary is not a plain table. \
                                 Add `{} IS NULL` to the join fragment yourself, or mark the relationship with \
                                 skip_soft_delete() to silence this warning",
                                rel,
                                DELETED_AT
                            );
                            FilterPlan::Manual
                        }
                        Some(Secondary::Custom(_)) | None => FilterPlan::Unfiltered,
                    },
                }
            };

            tracing::debug!("Configured relationship {} with plan {:?}", rel, plan);
            relationships.entry(rel.parent).or_default().insert(
                rel.name,
                ConfiguredRelationship {
                    relationship: rel.clone(),
                    plan,
                },
            );
        }

        Ok(Schema {
            tables: self.tables.clone(),
            relationships,
        })
    }

    fn soft(&self, table: &str) -> Result<bool, QueryError> {
        self.tables
            .get(table)
            .copied()
            .ok_or_else(|| QueryError::UnknownTable(table.to_string()))
    }
}

/// Frozen table and relationship metadata used by [`super::Select`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: HashMap<&'static str, bool>,
    /// parent table -> relationship name -> plan
    relationships: HashMap<&'static str, HashMap<&'static str, ConfiguredRelationship>>,
}

impl Schema {
    pub fn knows(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn is_soft_delete(&self, table: &str) -> bool {
        self.tables.get(table).copied().unwrap_or(false)
    }

    pub fn relationship(&self, table: &str, name: &str) -> Option<&ConfiguredRelationship> {
        self.relationships.get(table)?.get(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &ConfiguredRelationship> {
        self.relationships.values().flat_map(HashMap::values)
    }
}
