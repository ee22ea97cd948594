//! Core types for tensor shapes, values, and node attributes.

use crate::{Error, Result};
use half::f16;

/// Element types understood by the graph and the kernel registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    F32,
    F16,
    F64,
    I8,
    U8,
    I32,
    I64,
    Bool,
}

impl DataType {
    /// Size of this data type in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F64 | DataType::I64 => 8,
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
        }
    }

    /// Name used when spelling type constraints in kernel definitions.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::F32 => "float",
            DataType::F16 => "MLFloat16",
            DataType::F64 => "double",
            DataType::I8 => "int8",
            DataType::U8 => "uint8",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::Bool => "bool",
        }
    }

    /// Whether this is an integer type usable for indices.
    pub fn is_index_type(&self) -> bool {
        matches!(self, DataType::I32 | DataType::I64)
    }
}

/// A single dimension in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolicDim {
    /// Dimension known when the graph is built.
    Fixed(usize),

    /// Named symbolic dimension (e.g. "batch", "sequence").
    Named(String),

    /// Dimension with no information at all.
    Unknown,
}

impl SymbolicDim {
    /// Get the fixed value if available.
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            SymbolicDim::Fixed(n) => Some(*n),
            _ => None,
        }
    }
}

/// Tensor shape with support for static, symbolic and unknown shapes.
///
/// `Unknown` means not even the rank is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorShape {
    /// All dimensions are known.
    Static(Vec<usize>),

    /// Mix of fixed and symbolic dimensions (e.g. `[batch, 3, 64]`).
    Symbolic(Vec<SymbolicDim>),

    /// Rank and dimensions are unknown.
    Unknown,
}

impl TensorShape {
    /// Build a shape from per-dimension information, collapsing to `Static`
    /// when every dimension is fixed.
    pub fn from_dims(dims: Vec<SymbolicDim>) -> Self {
        if dims.iter().all(|d| d.as_fixed().is_some()) {
            TensorShape::Static(dims.iter().filter_map(SymbolicDim::as_fixed).collect())
        } else {
            TensorShape::Symbolic(dims)
        }
    }

    /// Scalar shape (rank 0).
    pub fn scalar() -> Self {
        TensorShape::Static(Vec::new())
    }

    /// Check if the shape is fully static.
    pub fn is_static(&self) -> bool {
        matches!(self, TensorShape::Static(_))
    }

    /// Check if the rank is unknown.
    pub fn is_unknown(&self) -> bool {
        matches!(self, TensorShape::Unknown)
    }

    /// Get static dimensions if available.
    pub fn as_static(&self) -> Option<&[usize]> {
        match self {
            TensorShape::Static(dims) => Some(dims),
            _ => None,
        }
    }

    /// Number of dimensions, if known.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            TensorShape::Static(dims) => Some(dims.len()),
            TensorShape::Symbolic(dims) => Some(dims.len()),
            TensorShape::Unknown => None,
        }
    }

    /// Per-dimension information, if the rank is known.
    pub fn dims(&self) -> Option<Vec<SymbolicDim>> {
        match self {
            TensorShape::Static(dims) => Some(dims.iter().map(|&d| SymbolicDim::Fixed(d)).collect()),
            TensorShape::Symbolic(dims) => Some(dims.clone()),
            TensorShape::Unknown => None,
        }
    }

    /// Information about one dimension.
    pub fn dim(&self, axis: usize) -> Option<SymbolicDim> {
        match self {
            TensorShape::Static(dims) => dims.get(axis).map(|&d| SymbolicDim::Fixed(d)),
            TensorShape::Symbolic(dims) => dims.get(axis).cloned(),
            TensorShape::Unknown => None,
        }
    }

    /// Value of one dimension if it is fixed.
    pub fn fixed_dim(&self, axis: usize) -> Option<usize> {
        self.dim(axis).and_then(|d| d.as_fixed())
    }

    /// Copy of this shape with one dimension replaced.
    pub fn with_dim(&self, axis: usize, dim: SymbolicDim) -> Result<TensorShape> {
        let mut dims = self.checked_dims(axis)?;
        dims[axis] = dim;
        Ok(TensorShape::from_dims(dims))
    }

    /// Copy of this shape with one dimension removed.
    pub fn without_dim(&self, axis: usize) -> Result<TensorShape> {
        let mut dims = self.checked_dims(axis)?;
        dims.remove(axis);
        Ok(TensorShape::from_dims(dims))
    }

    fn checked_dims(&self, axis: usize) -> Result<Vec<SymbolicDim>> {
        let dims = self
            .dims()
            .ok_or_else(|| Error::Shape("shape has unknown rank".to_string()))?;
        if axis >= dims.len() {
            return Err(Error::Shape(format!(
                "axis {} out of bounds for rank {}",
                axis,
                dims.len()
            )));
        }
        Ok(dims)
    }
}

/// Raw tensor data.
///
/// Separated from metadata (shape, dtype) so kernels can move elements
/// without caring about the element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I64(Vec<i64>),
    I32(Vec<i32>),
    U8(Vec<u8>),
    Bool(Vec<bool>),
}

impl TensorData {
    /// Get the number of elements in this tensor data.
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::Bool(v) => v.len(),
        }
    }

    /// Check if this tensor data is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the data type of this tensor data.
    pub fn dtype(&self) -> DataType {
        match self {
            TensorData::F32(_) => DataType::F32,
            TensorData::F16(_) => DataType::F16,
            TensorData::I64(_) => DataType::I64,
            TensorData::I32(_) => DataType::I32,
            TensorData::U8(_) => DataType::U8,
            TensorData::Bool(_) => DataType::Bool,
        }
    }

    /// Select elements by flat index, in order.
    ///
    /// Every index must be in bounds; callers compute them from shapes.
    pub fn take(&self, indices: &[usize]) -> TensorData {
        fn pick<T: Copy>(values: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().map(|&i| values[i]).collect()
        }

        match self {
            TensorData::F32(v) => TensorData::F32(pick(v, indices)),
            TensorData::F16(v) => TensorData::F16(pick(v, indices)),
            TensorData::I64(v) => TensorData::I64(pick(v, indices)),
            TensorData::I32(v) => TensorData::I32(pick(v, indices)),
            TensorData::U8(v) => TensorData::U8(pick(v, indices)),
            TensorData::Bool(v) => TensorData::Bool(pick(v, indices)),
        }
    }
}

/// A tensor value with data, static shape and element type.
///
/// Used for initializers (constants) and for the host buffers the reference
/// kernels read and write.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorValue {
    /// The raw tensor data.
    pub data: TensorData,

    /// The shape of the tensor (dimensions).
    pub shape: Vec<usize>,

    /// The data type of the tensor.
    pub dtype: DataType,
}

impl TensorValue {
    /// Create a new TensorValue.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the shape product.
    pub fn new(data: TensorData, shape: Vec<usize>) -> Self {
        match Self::try_new(data, shape) {
            Ok(value) => value,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a new TensorValue, checking that data and shape agree.
    pub fn try_new(data: TensorData, shape: Vec<usize>) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::Shape(format!(
                "Data length {} doesn't match shape {:?} (product = {})",
                data.len(),
                shape,
                expected_len
            )));
        }
        let dtype = data.dtype();
        Ok(Self { data, shape, dtype })
    }

    /// Create a scalar TensorValue (shape = []).
    pub fn scalar(data: TensorData) -> Self {
        Self::new(data, vec![])
    }

    /// Create a 1-D int64 tensor.
    pub fn from_i64s(values: Vec<i64>) -> Self {
        let len = values.len();
        Self::new(TensorData::I64(values), vec![len])
    }

    /// Get the number of elements in this tensor value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if this tensor value is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Try to get as i64 slice.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as f32 slice.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Integer values widened to i64, for int32 or int64 tensors.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::I64(v) => Some(v.clone()),
            TensorData::I32(v) => Some(v.iter().map(|&x| x as i64).collect()),
            _ => None,
        }
    }

    /// The value of a rank-0 int32 or int64 tensor.
    pub fn scalar_i64(&self) -> Option<i64> {
        if !self.shape.is_empty() {
            return None;
        }
        self.to_i64_vec().and_then(|v| v.first().copied())
    }

    /// Create a new TensorValue with a different shape (data unchanged).
    pub fn reshape(&self, new_shape: Vec<usize>) -> Result<Self> {
        Self::try_new(self.data.clone(), new_shape)
    }
}

/// Node attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(TensorValue),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl AttributeValue {
    /// The integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer list payload, if this is `Ints`.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttributeValue::Ints(v) => Some(v),
            _ => None,
        }
    }
}

impl TryFrom<AttributeValue> for f32 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Float(v) => Ok(v),
            _ => Err("Not a float".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for i64 {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Int(v) => Ok(v),
            _ => Err("Not an int".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for String {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::String(v) => Ok(v),
            _ => Err("Not a string".to_string()),
        }
    }
}

impl TryFrom<AttributeValue> for Vec<i64> {
    type Error = String;

    fn try_from(value: AttributeValue) -> std::result::Result<Self, Self::Error> {
        match value {
            AttributeValue::Ints(v) => Ok(v),
            _ => Err("Not an int array".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_value_take() {
        let value = TensorValue::new(
            TensorData::F32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            vec![2, 3],
        );
        let taken = value.data.take(&[5, 0, 3]);
        assert_eq!(taken, TensorData::F32(vec![6.0, 1.0, 4.0]));
    }

    #[test]
    fn test_tensor_value_reshape() {
        let value = TensorValue::new(TensorData::I64(vec![1, 2, 3, 4, 5, 6]), vec![2, 3]);
        let reshaped = value.reshape(vec![3, 2]).unwrap();
        assert_eq!(reshaped.shape, vec![3, 2]);
        assert!(value.reshape(vec![4]).is_err());
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_tensor_value_new_validates_shape() {
        TensorValue::new(TensorData::F32(vec![1.0, 2.0, 3.0]), vec![2, 2]);
    }

    #[test]
    fn test_scalar_i64_accepts_both_widths() {
        let wide = TensorValue::scalar(TensorData::I64(vec![-2]));
        let narrow = TensorValue::scalar(TensorData::I32(vec![7]));
        let vector = TensorValue::from_i64s(vec![1]);
        assert_eq!(wide.scalar_i64(), Some(-2));
        assert_eq!(narrow.scalar_i64(), Some(7));
        assert_eq!(vector.scalar_i64(), None);
    }

    #[test]
    fn test_tensor_shape_dims() {
        let shape = TensorShape::Symbolic(vec![
            SymbolicDim::Named("batch".to_string()),
            SymbolicDim::Fixed(3),
            SymbolicDim::Fixed(64),
        ]);
        assert!(!shape.is_static());
        assert_eq!(shape.ndim(), Some(3));
        assert_eq!(shape.fixed_dim(1), Some(3));
        assert_eq!(shape.fixed_dim(0), None);

        let slab = shape.with_dim(1, SymbolicDim::Fixed(1)).unwrap();
        assert_eq!(slab.fixed_dim(1), Some(1));
        assert_eq!(slab.dim(0), Some(SymbolicDim::Named("batch".to_string())));

        let squeezed = shape.without_dim(1).unwrap();
        assert_eq!(squeezed.ndim(), Some(2));
        assert!(shape.without_dim(3).is_err());
    }

    #[test]
    fn test_from_dims_collapses_to_static() {
        let shape = TensorShape::from_dims(vec![SymbolicDim::Fixed(2), SymbolicDim::Fixed(5)]);
        assert_eq!(shape, TensorShape::Static(vec![2, 5]));
        assert!(TensorShape::Unknown.dims().is_none());
    }
}
