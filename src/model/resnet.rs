//! ResNet backbones built with the Burn framework
//!
//! Implements the residual feature extractors (ResNet-18/34 with basic blocks,
//! ResNet-50 with bottleneck blocks). The classification head is kept outside
//! the backbone so it can be swapped per label set, see [`Classifier`].

use burn::{
    config::Config,
    module::{Module, RunningState},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::relu, backend::Backend, Tensor},
};

/// Channel expansion of the bottleneck block's last convolution
const BOTTLENECK_EXPANSION: usize = 4;

/// Number of outputs of a freshly created backbone head (ImageNet classes)
pub const DEFAULT_HEAD_CLASSES: usize = 1000;

/// Configuration for a ResNet backbone
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Number of residual blocks in each of the four stages
    pub blocks: [usize; 4],

    /// Use bottleneck blocks (ResNet-50 and deeper)
    #[config(default = "false")]
    pub bottleneck: bool,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,
}

impl ResNetConfig {
    /// Width of the pooled feature vector
    pub fn feature_dim(&self) -> usize {
        if self.bottleneck {
            512 * BOTTLENECK_EXPANSION
        } else {
            512
        }
    }

    /// Build the backbone on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let conv1 = conv(self.in_channels, 64, 7, 2, 3, device);
        let bn1 = BatchNormConfig::new(64).init(device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut layers = Vec::new();
        let mut channels = 64;
        for (stage, &count) in self.blocks.iter().enumerate() {
            let planes = 64 << stage;
            let stride = if stage == 0 { 1 } else { 2 };
            for index in 0..count {
                let block_stride = if index == 0 { stride } else { 1 };
                let block = if self.bottleneck {
                    ResidualBlock::bottleneck(channels, planes, block_stride, device)
                } else {
                    ResidualBlock::basic(channels, planes, block_stride, device)
                };
                channels = block.out_channels;
                layers.push(block);
            }
        }

        ResNet {
            conv1,
            bn1,
            maxpool,
            layers,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            feature_dim: channels,
        }
    }
}

/// Copy of `bn` whose running statistics are stored apart from the original's
///
/// Plain `clone` shares the running mean and variance, so training the clone
/// would move the original's statistics too.
fn unshared_norm<B: Backend>(bn: &BatchNorm<B, 2>) -> BatchNorm<B, 2> {
    BatchNorm {
        gamma: bn.gamma.clone(),
        beta: bn.beta.clone(),
        running_mean: RunningState::from_record(bn.running_mean.clone().into_record()),
        running_var: RunningState::from_record(bn.running_var.clone().into_record()),
        momentum: bn.momentum,
        epsilon: bn.epsilon,
    }
}

fn conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// 1x1 projection applied to the shortcut when shapes change
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: conv(in_channels, out_channels, 1, stride, 0, device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }

    fn deep_clone(&self) -> Self {
        Self {
            conv: self.conv.clone(),
            bn: unshared_norm(&self.bn),
        }
    }
}

/// A residual block; basic when `conv3` is absent, bottleneck otherwise
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub conv3: Option<Conv2d<B>>,
    pub bn3: Option<BatchNorm<B, 2>>,
    pub downsample: Option<Downsample<B>>,
    out_channels: usize,
}

impl<B: Backend> ResidualBlock<B> {
    /// Two 3x3 convolutions (ResNet-18/34)
    pub fn basic(in_channels: usize, planes: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != planes)
            .then(|| Downsample::new(in_channels, planes, stride, device));

        Self {
            conv1: conv(in_channels, planes, 3, stride, 1, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, 1, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: None,
            bn3: None,
            downsample,
            out_channels: planes,
        }
    }

    /// 1x1 reduce, 3x3, 1x1 expand (ResNet-50)
    pub fn bottleneck(
        in_channels: usize,
        planes: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let out_channels = planes * BOTTLENECK_EXPANSION;
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        Self {
            conv1: conv(in_channels, planes, 1, 1, 0, device),
            bn1: BatchNormConfig::new(planes).init(device),
            conv2: conv(planes, planes, 3, stride, 1, device),
            bn2: BatchNormConfig::new(planes).init(device),
            conv3: Some(conv(planes, out_channels, 1, 1, 0, device)),
            bn3: Some(BatchNormConfig::new(out_channels).init(device)),
            downsample,
            out_channels,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let mut out = self.bn2.forward(self.conv2.forward(out));

        if let (Some(conv3), Some(bn3)) = (&self.conv3, &self.bn3) {
            out = bn3.forward(conv3.forward(relu(out)));
        }

        relu(out + identity)
    }

    fn deep_clone(&self) -> Self {
        Self {
            conv1: self.conv1.clone(),
            bn1: unshared_norm(&self.bn1),
            conv2: self.conv2.clone(),
            bn2: unshared_norm(&self.bn2),
            conv3: self.conv3.clone(),
            bn3: self.bn3.as_ref().map(unshared_norm),
            downsample: self.downsample.as_ref().map(Downsample::deep_clone),
            out_channels: self.out_channels,
        }
    }
}

/// ResNet feature extractor: stem, residual stages and global average pooling
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub maxpool: MaxPool2d,
    pub layers: Vec<ResidualBlock<B>>,
    pub avgpool: AdaptiveAvgPool2d,
    feature_dim: usize,
}

impl<B: Backend> ResNet<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Feature tensor of shape [batch_size, feature_dim]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = relu(self.bn1.forward(self.conv1.forward(x)));
        let mut x = self.maxpool.forward(x);

        for layer in &self.layers {
            x = layer.forward(x);
        }

        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }

    /// Width of the feature vector fed to the head
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn deep_clone(&self) -> Self {
        Self {
            conv1: self.conv1.clone(),
            bn1: unshared_norm(&self.bn1),
            maxpool: self.maxpool.clone(),
            layers: self.layers.iter().map(ResidualBlock::deep_clone).collect(),
            avgpool: self.avgpool.clone(),
            feature_dim: self.feature_dim,
        }
    }
}

/// Backbone plus a replaceable linear head
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub backbone: ResNet<B>,
    pub head: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    /// Untrained backbone with the default 1000-way head
    pub fn new(config: &ResNetConfig, device: &B::Device) -> Self {
        let backbone = config.init(device);
        let head = LinearConfig::new(backbone.feature_dim(), DEFAULT_HEAD_CLASSES).init(device);
        Self { backbone, head }
    }

    /// Replace the head with a fresh `num_classes`-way linear layer
    pub fn with_head(self, num_classes: usize, device: &B::Device) -> Self {
        let head = LinearConfig::new(self.backbone.feature_dim(), num_classes).init(device);
        Self {
            backbone: self.backbone,
            head,
        }
    }

    /// Logits of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(x))
    }

    /// Number of outputs of the current head
    pub fn num_classes(&self) -> usize {
        self.head.weight.dims()[1]
    }

    /// Copy that shares no mutable state with `self`, batch norm statistics included
    pub fn deep_clone(&self) -> Self {
        Self {
            backbone: self.backbone.deep_clone(),
            head: self.head.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_resnet18_feature_shape() {
        let device = Default::default();
        let backbone = ResNetConfig::new([2, 2, 2, 2]).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let features = backbone.forward(input);

        assert_eq!(features.dims(), [2, 512]);
    }

    #[test]
    fn test_bottleneck_feature_dim() {
        let config = ResNetConfig::new([3, 4, 6, 3]).with_bottleneck(true);
        assert_eq!(config.feature_dim(), 2048);

        let device = Default::default();
        let block = ResidualBlock::<TestBackend>::bottleneck(64, 64, 1, &device);
        assert!(block.downsample.is_some());
        assert_eq!(block.out_channels, 256);
    }

    #[test]
    fn test_classifier_head_swap() {
        let device = Default::default();
        let config = ResNetConfig::new([1, 1, 1, 1]);
        let model = Classifier::<TestBackend>::new(&config, &device);
        assert_eq!(model.num_classes(), DEFAULT_HEAD_CLASSES);

        let model = model.with_head(3, &device);
        let logits = model.forward(Tensor::zeros([1, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [1, 3]);
    }

    #[test]
    fn test_deep_clone_keeps_running_stats_apart() {
        type AdBackend = burn::backend::Autodiff<NdArray>;

        let device = Default::default();
        let config = ResNetConfig::new([1, 1, 1, 1]);
        let model = Classifier::<AdBackend>::new(&config, &device);
        let mean = |m: &Classifier<AdBackend>| {
            m.backbone.bn1.running_mean.value_sync().into_data().to_vec::<f32>().unwrap()
        };
        let before = mean(&model);

        // Batch norm updates its running statistics on autodiff forward passes
        let copy = model.deep_clone();
        let input = Tensor::<AdBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let _ = copy.forward(input);

        assert_ne!(mean(&copy), before);
        assert_eq!(mean(&model), before);
    }
}
