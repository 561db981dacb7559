//! Backend selection
//!
//! NdArray (CPU) by default, CUDA when built with the `cuda` feature. Training
//! wraps the selected backend in `Autodiff`; evaluation and serving use it
//! directly.

use burn::backend::Autodiff;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Backend used by `Trainer::fit`
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device type of the selected backend
pub type DefaultDevice = <DefaultBackend as burn::tensor::backend::Backend>::Device;

pub fn default_device() -> DefaultDevice {
    DefaultDevice::default()
}

/// Human-readable name of the compiled-in backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_is_set() {
        assert!(!backend_name().is_empty());
        let _device = default_device();
    }
}
