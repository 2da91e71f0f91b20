//! Backbone adapter
//!
//! Owns one [`Classifier`] on an autodiff backend together with the label set
//! bound to its head. Training code drives it through `forward` and
//! `apply_step`; inference code goes through the detached `infer` path.

use burn::{
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};

use super::{BackboneKind, Classifier, DeviceKind, Mode};
use crate::backend::BindDevice;
use crate::utils::error::{HubError, Result};

/// Label set and freeze flag bound by `initialize_head`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadBinding {
    pub label_set: Vec<String>,
    pub freeze_backbone: bool,
}

/// A backbone plus its classification head, bound to one device
#[derive(Debug, Clone)]
pub struct BackboneAdapter<B: AutodiffBackend> {
    kind: BackboneKind,
    device_kind: DeviceKind,
    device: B::Device,
    model: Classifier<B>,
    binding: Option<HeadBinding>,
    mode: Mode,
}

impl<B: AutodiffBackend + BindDevice> BackboneAdapter<B> {
    /// Build an untrained backbone with the default 1000-way head
    pub fn create(kind: BackboneKind, device_kind: DeviceKind) -> Result<Self> {
        let device = B::bind_device(device_kind)?;
        let model = Classifier::new(&kind.config(), &device);

        tracing::debug!(
            backbone = %kind,
            device = %device_kind,
            params = model.num_params(),
            "Created backbone"
        );

        Ok(Self {
            kind,
            device_kind,
            device,
            model,
            binding: None,
            mode: Mode::default(),
        })
    }
}

impl<B: AutodiffBackend> BackboneAdapter<B> {
    /// Independent copy for a training run; nothing done to it reaches `self`
    pub fn staged_copy(&self) -> Self {
        Self {
            kind: self.kind,
            device_kind: self.device_kind,
            device: self.device.clone(),
            model: self.model.deep_clone(),
            binding: self.binding.clone(),
            mode: self.mode,
        }
    }

    /// Replace the head with a `label_set.len()`-way layer and set the trainable set
    pub fn initialize_head(&mut self, label_set: Vec<String>, freeze_backbone: bool) -> Result<()> {
        if label_set.is_empty() {
            return Err(HubError::InvalidConfig("label set is empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = label_set.iter().find(|label| !seen.insert(label.as_str())) {
            return Err(HubError::InvalidConfig(format!(
                "label '{}' appears more than once",
                dup
            )));
        }

        self.model = self.model.clone().with_head(label_set.len(), &self.device);
        self.binding = Some(HeadBinding {
            label_set,
            freeze_backbone,
        });

        tracing::debug!(
            classes = self.model.num_classes(),
            freeze_backbone,
            trainable = self.trainable_parameter_count(),
            "Initialized head"
        );
        Ok(())
    }

    /// Logits for a batch
    ///
    /// In train mode the pass is recorded for backprop; a frozen backbone's
    /// features are detached so only the head sees gradients. In eval mode
    /// the detached model is used and the result carries no graph.
    pub fn forward(&self, batch: Tensor<B, 4>) -> Tensor<B, 2> {
        match self.mode {
            Mode::Train => {
                let features = self.model.backbone.forward(batch);
                let features = if self.is_frozen() {
                    features.detach()
                } else {
                    features
                };
                self.model.head.forward(features)
            }
            Mode::Eval => Tensor::from_inner(self.infer(batch.inner())),
        }
    }

    /// Logits computed on the inner backend, without gradient tracking
    pub fn infer(&self, batch: Tensor<B::InnerBackend, 4>) -> Tensor<B::InnerBackend, 2> {
        self.model.valid().forward(batch)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Backprop `loss` and apply one optimizer step to the trainable set
    pub fn apply_step<O>(&mut self, optimizer: &mut O, learning_rate: f64, loss: Tensor<B, 1>)
    where
        O: Optimizer<Classifier<B>, B>,
    {
        let grads = loss.backward();
        let grads = if self.is_frozen() {
            GradientsParams::from_grads(grads, &self.model.head)
        } else {
            GradientsParams::from_grads(grads, &self.model)
        };
        self.model = optimizer.step(learning_rate, self.model.clone(), grads);
    }

    /// Detached copy of the current weights
    pub fn snapshot(&self) -> Classifier<B::InnerBackend> {
        self.model.valid()
    }

    pub fn parameter_count(&self) -> usize {
        self.model.num_params()
    }

    /// Parameters the optimizer may update
    pub fn trainable_parameter_count(&self) -> usize {
        if self.is_frozen() {
            self.model.head.num_params()
        } else {
            self.model.num_params()
        }
    }

    pub fn label_set(&self) -> Option<&[String]> {
        self.binding.as_ref().map(|b| b.label_set.as_slice())
    }

    pub fn binding(&self) -> Option<&HeadBinding> {
        self.binding.as_ref()
    }

    pub fn is_frozen(&self) -> bool {
        self.binding.as_ref().is_some_and(|b| b.freeze_backbone)
    }

    pub fn kind(&self) -> BackboneKind {
        self.kind
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.device_kind
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn model(&self) -> &Classifier<B> {
        &self.model
    }
}
