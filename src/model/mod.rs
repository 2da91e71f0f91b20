//! Model module containing the ResNet backbones and the adapter around them
//!
//! This module provides:
//! - ResNet-18/34/50 feature extractors with a replaceable linear head
//! - The closed set of backbone and device kinds accepted by the registry
//! - `BackboneAdapter`, which owns a classifier and its head binding

pub mod adapter;
pub mod resnet;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::HubError;

pub use adapter::{BackboneAdapter, HeadBinding};
pub use resnet::{Classifier, ResNet, ResNetConfig, DEFAULT_HEAD_CLASSES};

/// Supported backbone architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    Resnet18,
    Resnet34,
    Resnet50,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 3] = [
        BackboneKind::Resnet18,
        BackboneKind::Resnet34,
        BackboneKind::Resnet50,
    ];

    /// Network configuration for this kind
    pub fn config(&self) -> ResNetConfig {
        match self {
            BackboneKind::Resnet18 => ResNetConfig::new([2, 2, 2, 2]),
            BackboneKind::Resnet34 => ResNetConfig::new([3, 4, 6, 3]),
            BackboneKind::Resnet50 => ResNetConfig::new([3, 4, 6, 3]).with_bottleneck(true),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackboneKind::Resnet18 => "resnet18",
            BackboneKind::Resnet34 => "resnet34",
            BackboneKind::Resnet50 => "resnet50",
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackboneKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        BackboneKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| HubError::UnsupportedBackboneKind(s.to_string()))
    }
}

/// Device a model is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Gpu => write!(f, "gpu"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = HubError;

    /// Accepts `cpu`, `gpu` and CUDA-style names such as `cuda` or `cuda:0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "cpu" => Ok(DeviceKind::Cpu),
            "gpu" | "cuda" => Ok(DeviceKind::Gpu),
            other if other.starts_with("cuda:") => Ok(DeviceKind::Gpu),
            _ => Err(HubError::DeviceUnavailable(format!("unknown device '{}'", s))),
        }
    }
}

/// Whether forward passes record gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Train,
    #[default]
    Eval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backbone_kind_parsing() {
        assert_eq!("resnet18".parse::<BackboneKind>().unwrap(), BackboneKind::Resnet18);
        assert_eq!("ResNet50".parse::<BackboneKind>().unwrap(), BackboneKind::Resnet50);

        let err = "vgg16".parse::<BackboneKind>().unwrap_err();
        assert!(matches!(err, HubError::UnsupportedBackboneKind(ref name) if name == "vgg16"));
    }

    #[test]
    fn test_device_kind_parsing() {
        assert_eq!("cpu".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("cuda:0".parse::<DeviceKind>().unwrap(), DeviceKind::Gpu);
        assert!(matches!(
            "tpu".parse::<DeviceKind>(),
            Err(HubError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_kinds_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&BackboneKind::Resnet34).unwrap(), "\"resnet34\"");
        assert_eq!(serde_json::to_string(&DeviceKind::Gpu).unwrap(), "\"gpu\"");
        assert_eq!(BackboneKind::Resnet50.config().feature_dim(), 2048);
    }
}
