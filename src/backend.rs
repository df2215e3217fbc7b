//! Backend abstraction - Multi-backend support
//!
//! Supports CUDA (GPU) and NdArray (CPU) backends. The device capability
//! descriptor is resolved once at startup and decides both the backend and
//! whether the float element is reduced to `f16`.

use burn::backend::Autodiff;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{LesionError, Result};

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("At least one backend (cuda or ndarray) must be enabled!");

/// Full-precision CPU training backend
#[cfg(feature = "ndarray")]
pub type CpuTrainingBackend = Autodiff<burn_ndarray::NdArray>;

/// Full-precision CUDA training backend
#[cfg(feature = "cuda")]
pub type CudaTrainingBackend = Autodiff<burn_cuda::Cuda>;

/// Reduced-precision CUDA training backend.
///
/// Every float tensor, weights and optimizer state included, is `f16`; there
/// is no `f32` master copy. Only selected when `device.mixed_precision` is set.
#[cfg(feature = "cuda")]
pub type CudaMixedPrecisionBackend = Autodiff<burn_cuda::Cuda<burn::tensor::f16, i32>>;

/// Kind of compute device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// General-purpose processor
    Cpu,
    /// NVIDIA GPU through CUDA
    Cuda,
}

impl Default for DeviceKind {
    fn default() -> Self {
        if cfg!(feature = "cuda") {
            DeviceKind::Cuda
        } else {
            DeviceKind::Cpu
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda"),
        }
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = LesionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "cuda" | "gpu" => Ok(DeviceKind::Cuda),
            other => Err(LesionError::Config(format!("Unknown device '{}'", other))),
        }
    }
}

/// Capabilities of the selected device, resolved once per run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub device_kind: DeviceKind,
    pub supports_mixed_precision: bool,
}

impl DeviceCapabilities {
    /// Resolve the capabilities for a requested device kind.
    ///
    /// A device whose backend was not compiled in is a configuration error.
    pub fn resolve(requested: DeviceKind) -> Result<Self> {
        let caps = match requested {
            DeviceKind::Cuda if cfg!(feature = "cuda") => Self {
                device_kind: DeviceKind::Cuda,
                supports_mixed_precision: true,
            },
            DeviceKind::Cpu if cfg!(feature = "ndarray") => Self::cpu(),
            other => {
                return Err(LesionError::Config(format!(
                    "Device '{}' requested but its backend is not compiled in (enable the '{}' feature)",
                    other,
                    match other {
                        DeviceKind::Cuda => "cuda",
                        DeviceKind::Cpu => "ndarray",
                    }
                )))
            }
        };

        info!(
            "Device resolved: {} (mixed precision supported: {})",
            caps.device_kind, caps.supports_mixed_precision
        );
        Ok(caps)
    }

    /// Capabilities of the CPU backend
    pub fn cpu() -> Self {
        Self {
            device_kind: DeviceKind::Cpu,
            supports_mixed_precision: false,
        }
    }

    /// Whether reduced-precision arithmetic is used for this run.
    ///
    /// Only a CUDA device that supports it ever enables mixed precision;
    /// everything else runs in full precision regardless of the request.
    pub fn use_mixed_precision(&self, requested: bool) -> bool {
        requested && self.device_kind == DeviceKind::Cuda && self.supports_mixed_precision
    }
}

/// Human-readable name of the backend serving `kind`
pub fn backend_name(kind: DeviceKind) -> &'static str {
    match kind {
        DeviceKind::Cuda => "CUDA (GPU)",
        DeviceKind::Cpu => "NdArray (CPU)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_never_uses_mixed_precision() {
        let caps = DeviceCapabilities::cpu();
        assert!(!caps.use_mixed_precision(true));
        assert!(!caps.use_mixed_precision(false));
    }

    #[test]
    fn test_cuda_mixed_precision_follows_request() {
        let caps = DeviceCapabilities {
            device_kind: DeviceKind::Cuda,
            supports_mixed_precision: true,
        };
        assert!(caps.use_mixed_precision(true));
        assert!(!caps.use_mixed_precision(false));

        let no_support = DeviceCapabilities {
            device_kind: DeviceKind::Cuda,
            supports_mixed_precision: false,
        };
        assert!(!no_support.use_mixed_precision(true));
    }

    #[test]
    fn test_backend_name_follows_device() {
        assert_eq!(backend_name(DeviceKind::Cpu), "NdArray (CPU)");
        assert_eq!(backend_name(DeviceKind::Cuda), "CUDA (GPU)");
    }

    #[test]
    fn test_device_kind_parse_and_display() {
        assert_eq!("CPU".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("gpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cuda);
        assert!("tpu".parse::<DeviceKind>().is_err());
        assert_eq!(DeviceKind::Cuda.to_string(), "cuda");
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_resolve_cpu() {
        let caps = DeviceCapabilities::resolve(DeviceKind::Cpu).unwrap();
        assert_eq!(caps, DeviceCapabilities::cpu());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_resolve_cuda_without_feature_is_config_error() {
        let err = DeviceCapabilities::resolve(DeviceKind::Cuda).unwrap_err();
        assert!(matches!(err, LesionError::Config(_)));
    }
}
