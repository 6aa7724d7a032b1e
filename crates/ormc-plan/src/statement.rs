//! Per-operation statement plans.

use serde::{Deserialize, Serialize};

use crate::slot::Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Persist,
    Find,
    /// Columns of one hierarchy level, used to load levels below the static type.
    FindLevel,
    Update,
    Erase,
    OptimisticErase,
    FindVersion,
    Query,
    EraseQuery,
    ContainerSelect,
    ContainerInsert,
    ContainerDeleteAll,
    ContainerUpdate,
    ContainerDelete,
    InverseSelect,
}

/// SQL text plus the images it binds: `params` in placeholder order and
/// `results` in select-list order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPlan {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<Slot>,
    pub results: Vec<Slot>,
}

impl StatementPlan {
    pub fn new(kind: StatementKind, sql: String, params: Vec<Slot>, results: Vec<Slot>) -> Self {
        StatementPlan {
            kind,
            sql,
            params,
            results,
        }
    }
}
