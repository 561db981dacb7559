//! Host-side extraction of tensor values

use burn::tensor::{backend::Backend, Int, Tensor};

use crate::utils::error::{Result, ResultExt};
use crate::utils::metrics::argmax;

/// Row-major `[rows, cols]` float values
pub fn float_rows<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .training_context("Failed to read tensor data")?;
    Ok(values.chunks(cols.max(1)).map(<[f32]>::to_vec).collect())
}

/// Integer labels of a `[batch]` target tensor
pub fn labels<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    let values = tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .training_context("Failed to read label data")?;
    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
}

/// Predicted class per row of a `[batch, classes]` score tensor
pub fn argmax_rows<B: Backend>(scores: Tensor<B, 2>) -> Result<Vec<usize>> {
    Ok(float_rows(scores)?.iter().map(|row| argmax(row)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray;

    #[test]
    fn test_float_rows() {
        let device = Default::default();
        let t = Tensor::<B, 2>::from_floats([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &device);
        let rows = float_rows(t).unwrap();
        assert_eq!(rows, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_argmax_rows_prefers_lowest_index_on_tie() {
        let device = Default::default();
        let t = Tensor::<B, 2>::from_floats([[0.1, 0.7, 0.2], [0.4, 0.2, 0.4]], &device);
        assert_eq!(argmax_rows(t).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_labels() {
        let device = Default::default();
        let t = Tensor::<B, 1, Int>::from_data(TensorData::new(vec![2i64, 0, 3], [3]), &device);
        assert_eq!(labels(t).unwrap(), vec![2, 0, 3]);
    }
}
