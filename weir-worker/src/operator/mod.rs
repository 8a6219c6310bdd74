//! The operator graph runtime.
//!
//! Operators form a rooted tree, fixed for the lifetime of a plan version.
//! The tree is built exactly once per driver from the plan's declarative
//! operator descriptor, as an arena of operator nodes with parent/child
//! links by index. Tuple handling is strictly sequential and depth-first:
//! everything a tuple forwards is fully handled before the next tuple of
//! the partition is pulled.


use std::collections::HashMap;

use anyhow::{bail, Context, Result};

use weir_core::plan::OperatorDescriptor;

use crate::tuple::Tuple;

/// A node of an operator tree.
///
/// Operator business semantics are external to the coordination core; this
/// is the full contract a node must satisfy.
pub trait Operator: Send {
    /// Initialize this operator.
    ///
    /// Called exactly once, synchronously, before any tuple is handled.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Handle one tuple, optionally emitting tuples to forward to each of
    /// this node's children.
    fn handle_tuple(&mut self, tuple: &Tuple, collector: &mut Collector) -> Result<()>;
}

/// Collects the tuples an operator emits while handling one input tuple.
#[derive(Default)]
pub struct Collector {
    tuples: Vec<Tuple>,
}

impl Collector {
    /// Emit a tuple to be forwarded to each child of the emitting operator.
    pub fn emit(&mut self, tuple: Tuple) {
        self.tuples.push(tuple);
    }

    fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }
}

/// A type capable of building operator instances from their descriptors.
pub trait OperatorProvider: Send + Sync + 'static {
    /// Build the operator described by the given descriptor node.
    ///
    /// Child descriptors are handled by the tree builder; implementations
    /// only construct the single node they are given.
    fn build(&self, descriptor: &OperatorDescriptor) -> Result<Box<dyn Operator>>;
}

/// An operator factory function registered for one descriptor kind.
pub type OperatorFactory = Box<dyn Fn(&OperatorDescriptor) -> Result<Box<dyn Operator>> + Send + Sync>;

/// An operator provider dispatching on the descriptor kind over a set of
/// registered factories.
#[derive(Default)]
pub struct OperatorRegistry {
    factories: HashMap<String, OperatorFactory>,
}

impl OperatorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for the given operator kind.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&OperatorDescriptor) -> Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }
}

impl OperatorProvider for OperatorRegistry {
    fn build(&self, descriptor: &OperatorDescriptor) -> Result<Box<dyn Operator>> {
        match self.factories.get(&descriptor.kind) {
            Some(factory) => factory(descriptor).with_context(|| format!("error building operator of kind '{}'", descriptor.kind)),
            None => bail!("unknown operator kind '{}'", descriptor.kind),
        }
    }
}

/// A built operator tree: an arena of operator nodes with child links by
/// index, the root at index 0.
pub struct OperatorTree {
    nodes: Vec<Box<dyn Operator>>,
    children: Vec<Vec<usize>>,
}

impl OperatorTree {
    /// Build the tree described by the given root descriptor.
    pub fn build(provider: &dyn OperatorProvider, root: &OperatorDescriptor) -> Result<Self> {
        let mut tree = Self { nodes: Vec::new(), children: Vec::new() };
        build_node(provider, root, &mut tree)?;
        Ok(tree)
    }

    /// The number of operator nodes in this tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Initialize every operator of the tree, root first.
    ///
    /// Must complete before any tuple is dispatched.
    pub fn initialize(&mut self) -> Result<()> {
        for node in self.nodes.iter_mut() {
            node.initialize()?;
        }
        Ok(())
    }

    /// Hand one tuple to the root operator, forwarding everything it and
    /// its descendants emit, depth-first.
    pub fn dispatch(&mut self, tuple: &Tuple) -> Result<()> {
        self.dispatch_at(0, tuple)
    }

    fn dispatch_at(&mut self, idx: usize, tuple: &Tuple) -> Result<()> {
        let mut collector = Collector::default();
        self.nodes[idx].handle_tuple(tuple, &mut collector)?;
        let child_indexes = self.children[idx].clone();
        if child_indexes.is_empty() {
            return Ok(());
        }
        for emitted in collector.into_tuples() {
            for &child in child_indexes.iter() {
                self.dispatch_at(child, &emitted)?;
            }
        }
        Ok(())
    }
}

/// Recursively build one descriptor node and its children into the arena,
/// returning the node's index.
fn build_node(provider: &dyn OperatorProvider, descriptor: &OperatorDescriptor, tree: &mut OperatorTree) -> Result<usize> {
    let idx = tree.nodes.len();
    tree.nodes.push(provider.build(descriptor)?);
    tree.children.push(Vec::new());
    for child_descriptor in descriptor.children.iter() {
        let child_idx = build_node(provider, child_descriptor, tree)?;
        tree.children[idx].push(child_idx);
    }
    Ok(idx)
}
