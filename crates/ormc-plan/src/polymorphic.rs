//! Polymorphic hierarchy layout.
//!
//! Every class in a polymorphic hierarchy knows its chain from the root and
//! its own discriminator value. Loading an object whose stored
//! discriminator names a deeper class continues level by level from there.

use serde::{Deserialize, Serialize};

use ormc_core::{ClassId, Model};

use crate::error::PlanError;
use crate::slot::Slot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolymorphicPlan {
    pub root: ClassId,
    /// Root first, this class last.
    pub chain: Vec<ClassId>,
    /// Position of this class in the chain; the root has depth 0.
    pub depth: usize,
    pub discriminator_value: String,
    /// The root table's discriminator column.
    pub discriminator: Slot,
}

impl PolymorphicPlan {
    pub fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// Levels strictly below `depth` in `other_chain`, which must extend
    /// this chain: the tables to visit when the dynamic type is deeper.
    pub fn extra_levels<'a>(&self, other_chain: &'a [ClassId]) -> &'a [ClassId] {
        other_chain.get(self.chain.len()..).unwrap_or(&[])
    }
}

pub(crate) fn polymorphic_plan(
    model: &Model,
    class: ClassId,
    discriminator: Slot,
) -> Result<PolymorphicPlan, PlanError> {
    let chain = model.hierarchy_chain(class)?;
    Ok(PolymorphicPlan {
        root: chain[0],
        depth: chain.len() - 1,
        discriminator_value: model.class(class)?.discriminator_value().to_string(),
        discriminator,
        chain,
    })
}
