//! Backend selection.
//!
//! CPU (`ndarray`) by default; the `wgpu` feature switches to the GPU backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(not(feature = "wgpu"))]
pub type DefaultBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type DefaultBackend = burn::backend::Wgpu;

/// Backend with gradient tracking, used for training.
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Short backend name for logs and checkpoint metadata.
pub fn backend_name() -> &'static str {
    if cfg!(feature = "wgpu") {
        "wgpu"
    } else {
        "ndarray"
    }
}
