//! Runtime value representation at the executor boundary
//!
//! The executor does not interpret tensor contents; it moves [`Value`]s
//! between slots, releases them on schedule, and reports their byte sizes to
//! the profiler and the memory-pattern recorder. Element access helpers
//! exist for the bundled host kernels and for tests.

use half::f16;

use crate::error::{ForgeResult, PlanForgeError};

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
    I32,
    I64,
}

impl DType {
    /// Size of one element in bytes
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
        }
    }
}

/// Dense tensor with row-major byte storage
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<i64>,
    data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor from raw bytes. The byte length must match
    /// `element_count * element_size`.
    pub fn from_bytes(dtype: DType, shape: Vec<i64>, data: Vec<u8>) -> ForgeResult<Self> {
        let expected = element_count(&shape) * dtype.element_size();
        if data.len() != expected {
            return Err(PlanForgeError::Internal(format!(
                "tensor byte length {} does not match shape {:?} ({} bytes expected)",
                data.len(),
                shape,
                expected
            )));
        }
        Ok(Tensor { dtype, shape, data })
    }

    /// Create an f32 tensor from a slice
    pub fn from_f32(shape: Vec<i64>, values: &[f32]) -> Self {
        debug_assert_eq!(element_count(&shape), values.len());
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Tensor {
            dtype: DType::F32,
            shape,
            data,
        }
    }

    /// Create an f16 tensor from f32 values
    pub fn from_f32_as_f16(shape: Vec<i64>, values: &[f32]) -> Self {
        debug_assert_eq!(element_count(&shape), values.len());
        let data = values
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        Tensor {
            dtype: DType::F16,
            shape,
            data,
        }
    }

    /// Scalar f32 tensor
    pub fn scalar_f32(value: f32) -> Self {
        Tensor::from_f32(vec![], &[value])
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode the tensor into f32 values. F16 is widened; integer dtypes
    /// are rejected.
    pub fn to_f32(&self) -> ForgeResult<Vec<f32>> {
        match self.dtype {
            DType::F32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()),
            DType::F16 => Ok(self
                .data
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect()),
            other => Err(PlanForgeError::Internal(format!(
                "cannot read {:?} tensor as f32",
                other
            ))),
        }
    }
}

/// A runtime value held in a frame slot: a tensor, or a non-tensor
/// (a sequence of tensors). Non-tensor feeds disable memory-pattern
/// generation for the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Sequence(Vec<Tensor>),
}

impl Value {
    pub fn is_tensor(&self) -> bool {
        matches!(self, Value::Tensor(_))
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            Value::Sequence(_) => None,
        }
    }

    /// Total payload size, used for profiling and memory accounting
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Value::Tensor(t) => t.size_in_bytes(),
            Value::Sequence(ts) => ts.iter().map(Tensor::size_in_bytes).sum(),
        }
    }
}

impl From<Tensor> for Value {
    fn from(t: Tensor) -> Self {
        Value::Tensor(t)
    }
}

fn element_count(shape: &[i64]) -> usize {
    shape.iter().map(|d| (*d).max(0) as usize).product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_roundtrip() {
        let t = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.element_count(), 4);
        assert_eq!(t.size_in_bytes(), 16);
        assert_eq!(t.to_f32().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_f16_widens_to_f32() {
        let t = Tensor::from_f32_as_f16(vec![3], &[0.5, -1.0, 2.0]);
        assert_eq!(t.size_in_bytes(), 6);
        assert_eq!(t.to_f32().unwrap(), vec![0.5, -1.0, 2.0]);
    }

    #[test]
    fn test_scalar_shape_is_empty() {
        let t = Tensor::scalar_f32(7.0);
        assert!(t.shape().is_empty());
        assert_eq!(t.element_count(), 1);
    }

    #[test]
    fn test_from_bytes_rejects_length_mismatch() {
        let err = Tensor::from_bytes(DType::F32, vec![2], vec![0u8; 7]);
        assert!(err.is_err());
    }

    #[test]
    fn test_value_size_accounts_sequences() {
        let a = Tensor::from_f32(vec![2], &[1.0, 2.0]);
        let b = Tensor::from_f32(vec![1], &[3.0]);
        let v = Value::Sequence(vec![a, b]);
        assert!(!v.is_tensor());
        assert_eq!(v.size_in_bytes(), 12);
    }
}
