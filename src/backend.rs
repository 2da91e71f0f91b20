//! Backend abstraction - device binding per compiled backend
//!
//! The default build trains on the NdArray (CPU) backend. Building with the
//! `cuda` feature swaps in the CUDA backend, which binds the `gpu` device kind.
//!
//! A process runs exactly one backend, so a `cuda` build serves `gpu` models
//! only and rejects `cpu` with `DeviceUnavailable`.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

use crate::model::DeviceKind;
use crate::utils::error::{HubError, Result};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (feature) or NdArray (default)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn::backend::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Backends that can resolve a requested [`DeviceKind`] into a concrete device
pub trait BindDevice: Backend {
    /// Resolve the device or fail with `DeviceUnavailable`
    fn bind_device(kind: DeviceKind) -> Result<Self::Device>;
}

impl BindDevice for burn::backend::NdArray {
    fn bind_device(kind: DeviceKind) -> Result<Self::Device> {
        match kind {
            DeviceKind::Cpu => Ok(burn::backend::ndarray::NdArrayDevice::Cpu),
            DeviceKind::Gpu => Err(HubError::DeviceUnavailable(
                "gpu requested but this build only has the CPU backend (enable the `cuda` feature)"
                    .to_string(),
            )),
        }
    }
}

#[cfg(feature = "cuda")]
impl BindDevice for burn_cuda::Cuda {
    fn bind_device(kind: DeviceKind) -> Result<Self::Device> {
        match kind {
            DeviceKind::Gpu => Ok(burn_cuda::CudaDevice::default()),
            DeviceKind::Cpu => Err(HubError::DeviceUnavailable(
                "cpu requested but this build binds the CUDA backend".to_string(),
            )),
        }
    }
}

impl<B: BindDevice> BindDevice for Autodiff<B> {
    fn bind_device(kind: DeviceKind) -> Result<Self::Device> {
        B::bind_device(kind)
    }
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(not(feature = "cuda"))]
    {
        "NdArray (CPU)"
    }
}
