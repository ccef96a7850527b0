//! Plate shapes and element-granular bookkeeping for container nodes.

use tinyset::Set64;

use crate::error::{DagError, StructuralError, UsageError};
use crate::node::{Dirty, NodeId};
use crate::value::{Value, ValueType};

/// Shape of a container, addressed in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plate {
    length: Vec<usize>,
}
impl Plate {
    pub fn new(length: Vec<usize>) -> Result<Self, StructuralError> {
        if length.is_empty() {
            return Err(StructuralError::DimensionMismatch {
                expected: 1,
                found: 0,
            });
        }
        Ok(Self { length })
    }
    pub fn vector(n: usize) -> Self {
        Self { length: vec![n] }
    }
    pub fn length(&self) -> &[usize] {
        &self.length
    }
    pub fn dimensions(&self) -> usize {
        self.length.len()
    }
    pub fn size(&self) -> usize {
        self.length.iter().product()
    }
    fn strides(length: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; length.len()];
        for d in (0..length.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * length[d + 1];
        }
        strides
    }
    /// Flat offset of `index`. A shorter index addresses the first element
    /// of the corresponding sub-block.
    pub fn offset(&self, index: &[usize]) -> Result<usize, StructuralError> {
        if index.len() > self.length.len() {
            return Err(StructuralError::TooManyIndices {
                given: index.len(),
                dimensions: self.length.len(),
            });
        }
        for (dimension, (&i, &length)) in index.iter().zip(&self.length).enumerate() {
            if i >= length {
                return Err(StructuralError::IndexOutOfRange {
                    index: i,
                    dimension,
                    length,
                });
            }
        }
        let strides = Self::strides(&self.length);
        Ok(index.iter().zip(&strides).map(|(i, s)| i * s).sum())
    }
    /// Inverse of [`offset`](Self::offset) for a full index.
    pub fn coordinates(&self, mut offset: usize) -> Result<Vec<usize>, StructuralError> {
        let size = self.size();
        if offset >= size {
            return Err(StructuralError::OffsetOutOfRange { offset, size });
        }
        // size > 0 here, so no stride is zero
        let strides = Self::strides(&self.length);
        Ok(strides
            .iter()
            .map(|s| {
                let c = offset / s;
                offset %= s;
                c
            })
            .collect())
    }
    /// Grows the plate to `length`, returning where each old flat offset lands.
    pub fn grow(&mut self, length: Vec<usize>) -> Result<Vec<usize>, DagError> {
        if length.len() != self.length.len() {
            return Err(StructuralError::DimensionMismatch {
                expected: self.length.len(),
                found: length.len(),
            }
            .into());
        }
        for (dimension, (&from, &to)) in self.length.iter().zip(&length).enumerate() {
            if to < from {
                return Err(UsageError::Shrink {
                    dimension,
                    from,
                    to,
                }
                .into());
            }
        }
        let grown = Plate { length };
        let mut moved = Vec::with_capacity(self.size());
        for offset in 0..self.size() {
            moved.push(grown.offset(&self.coordinates(offset)?)?);
        }
        *self = grown;
        Ok(moved)
    }
}

/// How a container has to be brought up to date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Refresh {
    All,
    Elements(Vec<usize>),
}

#[derive(Clone, Debug, Default)]
enum Stored {
    #[default]
    Nothing,
    Elements(Vec<(usize, Value)>),
    All(Vec<Value>),
}

/// Payload of a container node: an ordered plate of element nodes whose
/// values are mirrored into one vector value.
#[derive(Clone, Debug)]
pub struct ContainerNode {
    pub(crate) dirty: Dirty,
    plate: Plate,
    element_type: ValueType,
    elements: Vec<Option<NodeId>>,
    value: Value,
    stored: Stored,
    touched_elements: Set64<u32>,
    touch_all: bool,
}
impl ContainerNode {
    pub(crate) fn new(
        plate: Plate,
        element_type: ValueType,
        elements: Vec<Option<NodeId>>,
        values: Vec<Value>,
    ) -> Self {
        Self {
            dirty: Dirty::default(),
            plate,
            element_type,
            elements,
            value: Value::Vector(values),
            stored: Stored::Nothing,
            touched_elements: Set64::new(),
            touch_all: false,
        }
    }
    pub fn plate(&self) -> &Plate {
        &self.plate
    }
    pub fn element_type(&self) -> &ValueType {
        &self.element_type
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn elements(&self) -> &[Option<NodeId>] {
        &self.elements
    }
    pub fn element(&self, offset: usize) -> Option<NodeId> {
        self.elements.get(offset).copied().flatten()
    }
    /// Element nodes in slot order, each listed once.
    pub fn parents(&self) -> Vec<NodeId> {
        let mut parents: Vec<NodeId> = Vec::new();
        for e in self.elements.iter().flatten() {
            if !parents.contains(e) {
                parents.push(*e);
            }
        }
        parents
    }
    pub fn touched_elements(&self) -> Vec<usize> {
        let mut touched: Vec<usize> = self.touched_elements.iter().map(|i| i as usize).collect();
        touched.sort_unstable();
        touched
    }
    pub(crate) fn touch_all(&mut self) {
        self.touch_all = true;
    }
    pub(crate) fn touch_element(&mut self, offset: usize) {
        self.touched_elements.insert(offset as u32);
    }
    /// Records every slot held by `parent`.
    pub(crate) fn touch_parent(&mut self, parent: NodeId) {
        for (offset, e) in self.elements.iter().enumerate() {
            if *e == Some(parent) {
                self.touched_elements.insert(offset as u32);
            }
        }
    }
    pub(crate) fn refresh(&self) -> Refresh {
        if self.touch_all || self.touched_elements.len() == 0 {
            Refresh::All
        } else {
            Refresh::Elements(self.touched_elements())
        }
    }
    pub(crate) fn install_element(&mut self, offset: usize, value: Value) {
        let Some(xs) = self.value.as_vector_mut() else {
            return;
        };
        let old = std::mem::replace(&mut xs[offset], value);
        match &mut self.stored {
            Stored::All(_) => {}
            Stored::Elements(saved) => {
                if !saved.iter().any(|(i, _)| *i == offset) {
                    saved.push((offset, old));
                }
            }
            Stored::Nothing => self.stored = Stored::Elements(vec![(offset, old)]),
        }
    }
    pub(crate) fn install_all(&mut self, values: Vec<Value>) {
        let old = std::mem::replace(&mut self.value, Value::Vector(values));
        match std::mem::take(&mut self.stored) {
            Stored::All(first) => self.stored = Stored::All(first),
            Stored::Nothing => {
                if let Value::Vector(xs) = old {
                    self.stored = Stored::All(xs);
                }
            }
            // fold the partial rollback entries back into a full snapshot
            Stored::Elements(saved) => {
                if let Value::Vector(mut xs) = old {
                    for (i, v) in saved {
                        xs[i] = v;
                    }
                    self.stored = Stored::All(xs);
                }
            }
        }
    }
    /// Whether a rollback snapshot is pending.
    pub fn has_stored(&self) -> bool {
        !matches!(self.stored, Stored::Nothing)
    }
    fn clear_touched(&mut self) {
        self.touched_elements = Set64::new();
        self.touch_all = false;
    }
    pub(crate) fn keep(&mut self) {
        self.stored = Stored::Nothing;
        self.clear_touched();
    }
    pub(crate) fn restore(&mut self) {
        match std::mem::take(&mut self.stored) {
            Stored::Nothing => {}
            Stored::All(xs) => self.value = Value::Vector(xs),
            Stored::Elements(saved) => {
                if let Some(xs) = self.value.as_vector_mut() {
                    for (i, v) in saved {
                        xs[i] = v;
                    }
                }
            }
        }
        self.clear_touched();
    }
    pub(crate) fn set_slot(&mut self, offset: usize, node: NodeId) -> Option<NodeId> {
        std::mem::replace(&mut self.elements[offset], Some(node))
    }
    pub(crate) fn swap_parent(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut found = false;
        for (offset, e) in self.elements.iter_mut().enumerate() {
            if *e == Some(old) {
                *e = Some(new);
                self.touched_elements.insert(offset as u32);
                found = true;
            }
        }
        found
    }
    pub(crate) fn remap(&mut self, f: impl Fn(NodeId) -> NodeId) {
        for e in self.elements.iter_mut().flatten() {
            *e = f(*e);
        }
    }
    /// Grows the plate; existing elements keep their coordinates and new
    /// slots start empty.
    pub(crate) fn resize(&mut self, length: Vec<usize>) -> Result<(), DagError> {
        let moved = self.plate.grow(length)?;
        let size = self.plate.size();
        let mut elements = vec![None; size];
        let mut values = vec![self.element_type.default_value(); size];
        let old_values = match std::mem::replace(&mut self.value, Value::Vector(Vec::new())) {
            Value::Vector(xs) => xs,
            _ => Vec::new(),
        };
        for ((from, to), v) in moved.iter().enumerate().zip(old_values) {
            elements[*to] = self.elements[from];
            values[*to] = v;
        }
        self.elements = elements;
        self.value = Value::Vector(values);
        self.stored = Stored::Nothing;
        self.clear_touched();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn row_major_offsets() {
        let plate = Plate::new(vec![2, 3]).unwrap();
        assert_eq!(plate.size(), 6);
        assert_eq!(plate.offset(&[0, 0]).unwrap(), 0);
        assert_eq!(plate.offset(&[0, 2]).unwrap(), 2);
        assert_eq!(plate.offset(&[1, 0]).unwrap(), 3);
        assert_eq!(plate.offset(&[1, 2]).unwrap(), 5);
        assert_eq!(plate.offset(&[1]).unwrap(), 3);
        assert_eq!(plate.coordinates(4).unwrap(), vec![1, 1]);
        assert_eq!(
            plate.coordinates(6),
            Err(StructuralError::OffsetOutOfRange { offset: 6, size: 6 })
        );
    }

    #[test]
    fn empty_dimensions_have_no_coordinates() {
        let plate = Plate::new(vec![2, 0]).unwrap();
        assert_eq!(plate.size(), 0);
        assert_eq!(
            plate.coordinates(0),
            Err(StructuralError::OffsetOutOfRange { offset: 0, size: 0 })
        );
        assert!(plate.offset(&[0, 0]).is_err());

        let mut plate = Plate::new(vec![2, 0]).unwrap();
        assert_eq!(plate.grow(vec![2, 3]).unwrap(), Vec::<usize>::new());
        assert_eq!(plate.coordinates(5).unwrap(), vec![1, 2]);
    }

    #[test]
    fn offset_rejects_bad_indices() {
        let plate = Plate::new(vec![2, 3]).unwrap();
        assert_eq!(
            plate.offset(&[0, 3]),
            Err(StructuralError::IndexOutOfRange {
                index: 3,
                dimension: 1,
                length: 3
            })
        );
        assert_eq!(
            plate.offset(&[2, 0]),
            Err(StructuralError::IndexOutOfRange {
                index: 2,
                dimension: 0,
                length: 2
            })
        );
        assert_eq!(
            plate.offset(&[0, 0, 0]),
            Err(StructuralError::TooManyIndices {
                given: 3,
                dimensions: 2
            })
        );
        assert!(Plate::new(vec![]).is_err());
    }

    #[test]
    fn grow_preserves_coordinates() {
        let mut plate = Plate::new(vec![2, 2]).unwrap();
        let moved = plate.grow(vec![3, 4]).unwrap();
        // (0,0)->0 (0,1)->1 (1,0)->4 (1,1)->5
        assert_eq!(moved, vec![0, 1, 4, 5]);
        assert_eq!(plate.length(), &[3, 4]);
    }

    #[test]
    fn grow_rejects_shrinking() {
        let mut plate = Plate::new(vec![3, 3]).unwrap();
        assert_eq!(
            plate.grow(vec![3, 2]),
            Err(DagError::Usage(UsageError::Shrink {
                dimension: 1,
                from: 3,
                to: 2
            }))
        );
        assert!(plate.grow(vec![4]).is_err());
        assert_eq!(plate.length(), &[3, 3]);
    }

    #[test]
    fn partial_then_full_rollback() {
        let ids: Vec<Option<NodeId>> = (0..3).map(|i| Some(NodeId::new(i))).collect();
        let mut c = ContainerNode::new(
            Plate::vector(3),
            ValueType::Real,
            ids,
            vec![Value::Real(1.0), Value::Real(2.0), Value::Real(3.0)],
        );
        c.touch_parent(NodeId::new(1));
        assert_eq!(c.refresh(), Refresh::Elements(vec![1]));
        c.install_element(1, Value::Real(20.0));
        c.install_all(vec![Value::Real(10.0), Value::Real(21.0), Value::Real(30.0)]);
        c.restore();
        assert_eq!(c.value(), &Value::reals(&[1.0, 2.0, 3.0]));
        assert!(c.touched_elements().is_empty());
        assert!(!c.has_stored());
    }

    #[test]
    fn resize_moves_elements() {
        let ids: Vec<Option<NodeId>> = (0..4).map(|i| Some(NodeId::new(i))).collect();
        let mut c = ContainerNode::new(
            Plate::new(vec![2, 2]).unwrap(),
            ValueType::Real,
            ids,
            vec![1.0, 2.0, 3.0, 4.0].into_iter().map(Value::Real).collect(),
        );
        c.resize(vec![2, 3]).unwrap();
        assert_eq!(c.value(), &Value::reals(&[1.0, 2.0, 0.0, 3.0, 4.0, 0.0]));
        assert_eq!(c.element(3), Some(NodeId::new(2)));
        assert_eq!(c.element(2), None);
    }
}
