//! The [`Model`]: a read-only registry of persistent classes.
//!
//! Classes are registered once during a build phase and addressed by
//! [`ClassId`] afterwards. Registration order is preserved, so every traversal
//! that iterates the model is a fixed function of its input.
//!
//! Ordering constraints between classes (a base before its derived classes, a
//! composite before the classes that embed it) are modeled as a `petgraph`
//! dependency graph and resolved with a stable topological sort.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ModelError};
use crate::id::ClassId;
use crate::types::{ClassKind, ContainerShape, ElementType, Member, MemberKind, PersistentClass};

/// Registry of persistent classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Model {
    classes: Vec<PersistentClass>,
    #[serde(skip)]
    names: HashMap<String, ClassId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a model from already-ordered classes (e.g. deserialized input).
    pub fn from_classes(classes: Vec<PersistentClass>) -> Result<Self, CoreError> {
        let mut model = Model::new();
        for class in classes {
            model.add_class(class)?;
        }
        Ok(model)
    }

    /// Registers a class and returns its id.
    pub fn add_class(&mut self, class: PersistentClass) -> Result<ClassId, CoreError> {
        if self.names.contains_key(&class.name) {
            return Err(CoreError::DuplicateClassName { name: class.name });
        }
        let id = ClassId(self.classes.len() as u32);
        self.names.insert(class.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    /// Rebuilds the name index after deserialization.
    pub fn reindex(&mut self) -> Result<(), CoreError> {
        self.names.clear();
        for (i, class) in self.classes.iter().enumerate() {
            if self
                .names
                .insert(class.name.clone(), ClassId(i as u32))
                .is_some()
            {
                return Err(CoreError::DuplicateClassName {
                    name: class.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn class(&self, id: ClassId) -> Result<&PersistentClass, CoreError> {
        self.classes
            .get(id.0 as usize)
            .ok_or(CoreError::ClassNotFound { id })
    }

    pub fn class_by_name(&self, name: &str) -> Option<ClassId> {
        self.names.get(name).copied()
    }

    /// All classes in registration order.
    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &PersistentClass)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, c)| (ClassId(i as u32), c))
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    // -----------------------------------------------------------------------
    // Hierarchy queries
    // -----------------------------------------------------------------------

    /// Root of the polymorphic hierarchy containing `id` (itself if not derived).
    pub fn root_of(&self, id: ClassId) -> Result<ClassId, CoreError> {
        Ok(self.hierarchy_chain(id)?[0])
    }

    /// Polymorphic chain from the root down to `id`, inclusive.
    pub fn hierarchy_chain(&self, id: ClassId) -> Result<Vec<ClassId>, CoreError> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(base) = self.class(current)?.base.filter(|b| b.polymorphic) {
            if chain.contains(&base.base) {
                break;
            }
            chain.push(base.base);
            current = base.base;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Whether `class` equals `ancestor` or derives from it polymorphically.
    pub fn is_same_or_derived(&self, class: ClassId, ancestor: ClassId) -> Result<bool, CoreError> {
        Ok(self.hierarchy_chain(class)?.contains(&ancestor))
    }

    /// Whether the class takes part in a polymorphic hierarchy.
    pub fn is_polymorphic(&self, id: ClassId) -> Result<bool, CoreError> {
        let root = self.root_of(id)?;
        Ok(self.class(root)?.polymorphic)
    }

    /// Direct polymorphic subclasses of `id`, in registration order.
    pub fn derived_of(&self, id: ClassId) -> Vec<ClassId> {
        self.classes()
            .filter(|(_, c)| c.base.is_some_and(|b| b.polymorphic && b.base == id))
            .map(|(cid, _)| cid)
            .collect()
    }

    /// The class owning the id member for `id` (the root for derived classes,
    /// the nearest reuse base declaring one otherwise).
    pub fn id_owner(&self, id: ClassId) -> Result<Option<ClassId>, CoreError> {
        let mut current = self.root_of(id)?;
        // Bounded walk: inheritance cycles are reported by dependency_order.
        for _ in 0..=self.len() {
            let class = self.class(current)?;
            if class.id_member().is_some() {
                return Ok(Some(current));
            }
            match class.base {
                Some(base) => current = base.base,
                None => break,
            }
        }
        Ok(None)
    }

    pub fn id_member(&self, id: ClassId) -> Result<Option<&Member>, CoreError> {
        match self.id_owner(id)? {
            Some(owner) => Ok(self.class(owner)?.id_member()),
            None => Ok(None),
        }
    }

    /// Version member, which always lives at the hierarchy root (or a reuse base).
    pub fn version_member(&self, id: ClassId) -> Result<Option<&Member>, CoreError> {
        let mut current = self.root_of(id)?;
        for _ in 0..=self.len() {
            let class = self.class(current)?;
            if let Some(m) = class.version_member() {
                return Ok(Some(m));
            }
            match class.base {
                Some(base) => current = base.base,
                None => break,
            }
        }
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Dependency ordering
    // -----------------------------------------------------------------------

    /// Builds the class dependency graph. An edge `a -> b` means `a` must be
    /// processed before `b`.
    pub fn dependency_graph(&self) -> Result<DiGraph<ClassId, (), u32>, CoreError> {
        let mut graph = DiGraph::<ClassId, (), u32>::with_capacity(self.len(), self.len());
        for (id, _) in self.classes() {
            graph.add_node(id);
        }
        for (id, class) in self.classes() {
            if let Some(base) = class.base {
                self.class(base.base)?;
                graph.add_edge(base.base.into(), id.into(), ());
            }
            for member in &class.members {
                for dep in member_composite_deps(member) {
                    self.class(dep)?;
                    graph.add_edge(dep.into(), id.into(), ());
                }
            }
        }
        Ok(graph)
    }

    /// Classes ordered so every base and embedded composite precedes its
    /// dependents. Ties resolve by registration order.
    pub fn dependency_order(&self) -> Result<Vec<ClassId>, ModelError> {
        let graph = self.dependency_graph()?;

        // Kahn's algorithm over an ordered ready set keeps the output stable.
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|n| {
                graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BTreeSet<u32> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i as u32)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(next) = ready.pop_first() {
            order.push(ClassId(next));
            for succ in graph.neighbors(NodeIndex::new(next as usize)) {
                let d = &mut in_degree[succ.index()];
                *d -= 1;
                if *d == 0 {
                    ready.insert(succ.index() as u32);
                }
            }
        }

        if order.len() != self.len() {
            let stuck = in_degree
                .iter()
                .position(|d| *d > 0)
                .map(|i| ClassId(i as u32))
                .unwrap_or(ClassId(0));
            let class = self.class(stuck)?;
            return Err(ModelError::DependencyCycle {
                class: class.name.clone(),
                location: class.location.clone(),
            });
        }
        Ok(order)
    }

    /// Object and view classes in dependency order.
    pub fn persistent_classes(&self) -> Result<Vec<ClassId>, ModelError> {
        let order = self.dependency_order()?;
        let mut out = Vec::with_capacity(order.len());
        for id in order {
            if self.class(id)?.kind != ClassKind::Composite {
                out.push(id);
            }
        }
        Ok(out)
    }
}

fn member_composite_deps(member: &Member) -> Vec<ClassId> {
    match &member.kind {
        MemberKind::Composite(c) => vec![*c],
        MemberKind::Container(ContainerShape { value, key, .. }) => [Some(value), key.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|e| match e {
                ElementType::Composite(c) => Some(*c),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
