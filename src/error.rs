//! Error types for model construction and sampling.
//!
//! Structural and usage errors are programming or model-definition
//! mistakes and are returned as `Err`. Numerical trouble inside a density
//! never reaches the caller of a ratio query: the stochastic node turns it
//! into a log probability of negative infinity.

use thiserror::Error;

use crate::node::NodeId;
use crate::value::ValueType;

/// The model graph is malformed.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StructuralError {
    #[error("adding edge {parent} -> {child} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
    },

    #[error("expected {expected} arguments, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("index {index} out of range in dimension {dimension} (length {length})")]
    IndexOutOfRange {
        index: usize,
        dimension: usize,
        length: usize,
    },

    #[error("offset {offset} out of range for a container of size {size}")]
    OffsetOutOfRange { offset: usize, size: usize },

    #[error("too many indices: {given} given for {dimensions} dimensions")]
    TooManyIndices { given: usize, dimensions: usize },

    #[error("dimension mismatch: expected {expected} dimensions, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("{elements} elements do not fit into a container of size {size}")]
    TooManyElements { elements: usize, size: usize },

    #[error("node {node} still has {references} references")]
    StillReferenced { node: NodeId, references: usize },

    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("node {parent} is not a parent of {child}")]
    NotAParent { parent: NodeId, child: NodeId },
}

/// An operation was called on a node in a state that does not allow it.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum UsageError {
    #[error("value of {0} is not available while touched and not updated")]
    Unresolved(NodeId),

    #[error("node {0} is already clamped")]
    AlreadyClamped(NodeId),

    #[error("node {0} is clamped and cannot be resampled")]
    Clamped(NodeId),

    #[error("node {0} is not a stochastic node")]
    NotStochastic(NodeId),

    #[error("node {0} is not a constant node")]
    NotConstant(NodeId),

    #[error("node {0} is not a container node")]
    NotContainer(NodeId),

    #[error("cannot shrink dimension {dimension} from {from} to {to}")]
    Shrink {
        dimension: usize,
        from: usize,
        to: usize,
    },

    #[error("the name {0:?} is not bound")]
    UnknownName(String),

    #[error("no move in the schedule carries weight")]
    NoMoves,

    #[error("initial state has zero probability")]
    ImpossibleState,
}

/// A density or sampler was asked for something outside its domain.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum NumericalError {
    #[error("invalid parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    #[error("value outside the support of {0}")]
    OutOfSupport(&'static str),

    #[error("{0} is not defined for this value type")]
    WrongType(&'static str),

    #[error("density evaluated to NaN")]
    NotANumber,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum DagError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Numerical(#[from] NumericalError),
}
impl DagError {
    pub fn is_structural(&self) -> bool {
        matches!(self, DagError::Structural(_))
    }
}
