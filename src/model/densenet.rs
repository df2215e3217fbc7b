//! DenseNet backbone
//!
//! Dense blocks concatenate every layer's output onto its input; transition
//! layers halve both channels and resolution in between. The default block
//! configuration `[6, 12, 24, 16]` with growth rate 32 is DenseNet-121.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{
            AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, AvgPool2d, AvgPool2dConfig, MaxPool2d,
            MaxPool2dConfig,
        },
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the DenseNet model
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Channels added by each dense layer
    #[config(default = "32")]
    pub growth_rate: usize,

    /// Dense layers per block
    #[config(default = "vec![6, 12, 24, 16]")]
    pub block_config: Vec<usize>,

    /// Channels produced by the stem
    #[config(default = "64")]
    pub num_init_features: usize,

    /// Bottleneck width multiplier
    #[config(default = "4")]
    pub bn_size: usize,

    /// Dropout before the classifier
    #[config(default = "0.0")]
    pub dropout_rate: f64,
}

impl DenseNetConfig {
    /// Channel count entering the classifier
    pub fn num_features(&self) -> usize {
        let mut channels = self.num_init_features;
        for (i, &layers) in self.block_config.iter().enumerate() {
            channels += layers * self.growth_rate;
            if i + 1 < self.block_config.len() {
                channels /= 2;
            }
        }
        channels
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        DenseNet::new(self, device)
    }
}

/// BN-ReLU-Conv1x1-BN-ReLU-Conv3x3 producing `growth_rate` new channels
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm1: BatchNorm<B, 2>,
    conv1: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> DenseLayer<B> {
    fn new(in_channels: usize, growth_rate: usize, bn_size: usize, device: &B::Device) -> Self {
        let inner = bn_size * growth_rate;
        Self {
            norm1: BatchNormConfig::new(in_channels).init(device),
            conv1: Conv2dConfig::new([in_channels, inner], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(inner).init(device),
            conv2: Conv2dConfig::new([inner, growth_rate], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.relu.forward(self.norm1.forward(x.clone()));
        let out = self.conv1.forward(out);
        let out = self.relu.forward(self.norm2.forward(out));
        let out = self.conv2.forward(out);
        Tensor::cat(vec![x, out], 1)
    }
}

/// BN-ReLU-Conv1x1-AvgPool halving channels and resolution
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    norm: BatchNorm<B, 2>,
    conv: Conv2d<B>,
    pool: AvgPool2d,
    relu: Relu,
}

impl<B: Backend> Transition<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.norm.forward(x));
        self.pool.forward(self.conv.forward(x))
    }
}

/// One dense block and the transition that follows it (absent after the last)
#[derive(Module, Debug)]
pub struct DenseStage<B: Backend> {
    layers: Vec<DenseLayer<B>>,
    transition: Option<Transition<B>>,
}

impl<B: Backend> DenseStage<B> {
    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for layer in &self.layers {
            x = layer.forward(x);
        }
        match &self.transition {
            Some(t) => t.forward(x),
            None => x,
        }
    }
}

/// DenseNet feature extractor plus linear classifier
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    stem_pool: MaxPool2d,
    stages: Vec<DenseStage<B>>,
    final_norm: BatchNorm<B, 2>,
    global_pool: AdaptiveAvgPool2d,
    relu: Relu,
    dropout: Dropout,
    /// Classifier head, replaced when fine-tuning
    pub classifier: Linear<B>,
}

impl<B: Backend> DenseNet<B> {
    pub fn new(config: &DenseNetConfig, device: &B::Device) -> Self {
        let stem_conv = Conv2dConfig::new([3, config.num_init_features], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let stem_norm = BatchNormConfig::new(config.num_init_features).init(device);
        let stem_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut channels = config.num_init_features;
        let mut stages = Vec::with_capacity(config.block_config.len());
        for (i, &num_layers) in config.block_config.iter().enumerate() {
            let layers = (0..num_layers)
                .map(|l| {
                    DenseLayer::new(
                        channels + l * config.growth_rate,
                        config.growth_rate,
                        config.bn_size,
                        device,
                    )
                })
                .collect();
            channels += num_layers * config.growth_rate;

            let transition = if i + 1 < config.block_config.len() {
                let t = Transition::new(channels, channels / 2, device);
                channels /= 2;
                Some(t)
            } else {
                None
            };
            stages.push(DenseStage { layers, transition });
        }

        Self {
            stem_conv,
            stem_norm,
            stem_pool,
            stages,
            final_norm: BatchNormConfig::new(channels).init(device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            classifier: LinearConfig::new(channels, config.num_classes).init(device),
        }
    }

    /// Pooled feature vector `[batch, num_features]`
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stem_conv.forward(x);
        let x = self.relu.forward(self.stem_norm.forward(x));
        let mut x = self.stem_pool.forward(x);

        for stage in &self.stages {
            x = stage.forward(x);
        }

        let x = self.relu.forward(self.final_norm.forward(x));
        let x = self.global_pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(x);
        self.classifier.forward(self.dropout.forward(x))
    }

    pub fn num_classes(&self) -> usize {
        self.classifier.weight.val().dims()[1]
    }

    /// Replace the classifier with a fresh layer of `num_classes` outputs
    pub fn replace_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        let in_features = self.classifier.weight.val().dims()[0];
        self.classifier = LinearConfig::new(in_features, num_classes).init(device);
        self
    }

    /// Stop gradients through everything but the classifier
    pub fn freeze_features(self) -> Self {
        Self {
            stem_conv: self.stem_conv.no_grad(),
            stem_norm: self.stem_norm.no_grad(),
            stages: self.stages.no_grad(),
            final_norm: self.final_norm.no_grad(),
            ..self
        }
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny() -> DenseNetConfig {
        DenseNetConfig::new(5)
            .with_growth_rate(4)
            .with_block_config(vec![2, 2])
            .with_num_init_features(8)
            .with_bn_size(2)
    }

    #[test]
    fn test_num_features_matches_densenet121() {
        assert_eq!(DenseNetConfig::new(1000).num_features(), 1024);
        // 8 + 2*4 = 16 -> 8, + 2*4 = 16
        assert_eq!(tiny().num_features(), 16);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: DenseNet<TestBackend> = tiny().init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(x).dims(), [2, 5]);
    }

    #[test]
    fn test_replace_head() {
        let device = Default::default();
        let model: DenseNet<TestBackend> = tiny().init(&device);
        assert_eq!(model.num_classes(), 5);
        let model = model.replace_head(7, &device);
        assert_eq!(model.num_classes(), 7);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(x).dims(), [1, 7]);
    }
}
