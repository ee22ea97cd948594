//! Kernel definitions and the executable kernel trait.
//!
//! A `KernelDef` describes which nodes a kernel can run: operator type,
//! domain, the range of schema versions it implements, the provider it runs
//! on and the element types it accepts at each input/output slot. A
//! `KernelCreateInfo` pairs a definition with the factory that instantiates
//! the kernel for a concrete node.

use crate::ir::Node;
use crate::types::{AttributeValue, DataType, TensorValue};
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Inclusive range of operator schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    pub start: i64,

    /// Last version covered; `None` means open-ended.
    pub end: Option<i64>,
}

impl VersionRange {
    /// Versions `start..=end`.
    pub fn between(start: i64, end: i64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Versions `start..`.
    pub fn since(start: i64) -> Self {
        Self { start, end: None }
    }

    /// Check whether `version` is in range.
    pub fn contains(&self, version: i64) -> bool {
        version >= self.start && self.end.map_or(true, |end| version <= end)
    }

    /// Check whether two ranges share any version.
    pub fn overlaps(&self, other: &VersionRange) -> bool {
        let below_other_end = other.end.map_or(true, |end| self.start <= end);
        let other_below_end = self.end.map_or(true, |end| other.start <= end);
        below_other_end && other_below_end
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}+", self.start),
        }
    }
}

/// Position of a type-constrained argument on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgSlot {
    Input(usize),
    Output(usize),
}

/// Allowed element types for one argument slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConstraint {
    /// Constraint name (e.g. "T", "Tind").
    pub name: String,
    pub slot: ArgSlot,
    pub allowed: Vec<DataType>,
}

impl TypeConstraint {
    /// Whether this constraint and `other` accept a common element type.
    pub fn intersects(&self, other: &TypeConstraint) -> bool {
        self.allowed.iter().any(|t| other.allowed.contains(t))
    }
}

/// Static description of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDef {
    pub op_type: String,
    pub domain: String,
    pub version: VersionRange,
    pub provider: String,
    pub constraints: Vec<TypeConstraint>,
}

impl KernelDef {
    /// Check whether the definition accepts the given argument types.
    ///
    /// Slots missing from `inputs`/`outputs` (omitted optional arguments)
    /// satisfy any constraint.
    pub fn accepts_types(&self, inputs: &[DataType], outputs: &[DataType]) -> bool {
        self.constraints.iter().all(|constraint| {
            let actual = match constraint.slot {
                ArgSlot::Input(i) => inputs.get(i),
                ArgSlot::Output(i) => outputs.get(i),
            };
            actual.map_or(true, |dtype| constraint.allowed.contains(dtype))
        })
    }

    /// Whether this definition and `other` could both match the same node.
    ///
    /// Provider, domain and op type are compared by the registry key; this
    /// checks version overlap and that every constraint name they share
    /// admits a common type.
    pub fn conflicts_with(&self, other: &KernelDef) -> bool {
        if !self.version.overlaps(&other.version) {
            return false;
        }
        self.constraints.iter().all(|mine| {
            other
                .constraints
                .iter()
                .filter(|theirs| theirs.name == mine.name)
                .all(|theirs| mine.intersects(theirs))
        })
    }
}

impl fmt::Display for KernelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domain = if self.domain.is_empty() {
            "ai.onnx"
        } else {
            self.domain.as_str()
        };
        write!(
            f,
            "{}:{}:{} [{}]",
            domain, self.op_type, self.version, self.provider
        )?;
        for constraint in &self.constraints {
            let names: Vec<_> = constraint.allowed.iter().map(DataType::name).collect();
            write!(f, " {}={}", constraint.name, names.join("|"))?;
        }
        Ok(())
    }
}

/// Builder for [`KernelDef`].
///
/// ```ignore
/// let def = KernelDefBuilder::new("Gather", CPU_EXECUTION_PROVIDER)
///     .version_range(11, 12)
///     .type_constraint("Tind", ArgSlot::Input(1), &[DataType::I32, DataType::I64])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct KernelDefBuilder {
    def: KernelDef,
}

impl KernelDefBuilder {
    pub fn new(op_type: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            def: KernelDef {
                op_type: op_type.into(),
                domain: String::new(),
                version: VersionRange::since(1),
                provider: provider.into(),
                constraints: Vec::new(),
            },
        }
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.def.domain = domain.into();
        self
    }

    /// Cover schema versions `start..`.
    pub fn since_version(mut self, start: i64) -> Self {
        self.def.version = VersionRange::since(start);
        self
    }

    /// Cover schema versions `start..=end`.
    pub fn version_range(mut self, start: i64, end: i64) -> Self {
        self.def.version = VersionRange::between(start, end);
        self
    }

    pub fn version(mut self, version: VersionRange) -> Self {
        self.def.version = version;
        self
    }

    pub fn type_constraint(
        mut self,
        name: impl Into<String>,
        slot: ArgSlot,
        allowed: &[DataType],
    ) -> Self {
        self.def.constraints.push(TypeConstraint {
            name: name.into(),
            slot,
            allowed: allowed.to_vec(),
        });
        self
    }

    pub fn build(self) -> KernelDef {
        self.def
    }
}

/// Node information handed to kernel factories.
#[derive(Debug, Clone, Copy)]
pub struct KernelInfo<'a> {
    node: &'a Node,
}

impl<'a> KernelInfo<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn since_version(&self) -> i64 {
        self.node.since_version()
    }

    /// Integer attribute with a default.
    pub fn attr_int_or(&self, key: &str, default: i64) -> Result<i64> {
        match self.node.attribute(key) {
            None => Ok(default),
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute '{}' of node '{}' must be an int, got {:?}",
                key, self.node.name, other
            ))),
        }
    }

    /// Optional integer-list attribute.
    pub fn attr_ints(&self, key: &str) -> Result<Option<Vec<i64>>> {
        match self.node.attribute(key) {
            None => Ok(None),
            Some(AttributeValue::Ints(v)) => Ok(Some(v.clone())),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute '{}' of node '{}' must be a list of ints, got {:?}",
                key, self.node.name, other
            ))),
        }
    }
}

/// An instantiated kernel, ready to run on host buffers.
pub trait OpKernel: Send + Sync {
    /// Compute the node's outputs from its inputs.
    ///
    /// `inputs` holds one value per present input slot, in order.
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>>;
}

/// Factory that instantiates a kernel for a node.
pub type KernelFactory = Arc<dyn Fn(&KernelInfo<'_>) -> Result<Box<dyn OpKernel>> + Send + Sync>;

/// A kernel definition together with its factory.
#[derive(Clone)]
pub struct KernelCreateInfo {
    pub def: KernelDef,
    pub factory: KernelFactory,
}

impl KernelCreateInfo {
    pub fn new<F>(def: KernelDef, factory: F) -> Self
    where
        F: Fn(&KernelInfo<'_>) -> Result<Box<dyn OpKernel>> + Send + Sync + 'static,
    {
        Self {
            def,
            factory: Arc::new(factory),
        }
    }

    /// Instantiate the kernel for `node`.
    pub fn create(&self, node: &Node) -> Result<Box<dyn OpKernel>> {
        (self.factory)(&KernelInfo::new(node))
    }
}

impl fmt::Debug for KernelCreateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelCreateInfo")
            .field("def", &self.def)
            .finish_non_exhaustive()
    }
}
