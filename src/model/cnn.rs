//! Compact CNN backbone
//!
//! Four Conv-BN-ReLU-MaxPool blocks followed by global average pooling and a
//! two-layer classifier. Much cheaper than DenseNet; useful for smoke runs on
//! CPU and small input sizes.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the compact CNN
#[derive(Config, Debug)]
pub struct LesionCnnConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Base number of convolutional filters, doubled per block
    #[config(default = "32")]
    pub base_filters: usize,

    /// Width of the hidden classifier layer
    #[config(default = "256")]
    pub hidden_size: usize,

    /// Dropout rate for regularization
    #[config(default = "0.3")]
    pub dropout_rate: f64,
}

impl LesionCnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LesionCnn<B> {
        LesionCnn::new(self, device)
    }
}

/// Conv2d, BatchNorm, ReLU, MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Compact CNN classifier
#[derive(Module, Debug)]
pub struct LesionCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    fc: Linear<B>,
    relu: Relu,
    dropout: Dropout,
    /// Classifier head, replaced when fine-tuning
    pub classifier: Linear<B>,
}

impl<B: Backend> LesionCnn<B> {
    pub fn new(config: &LesionCnnConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        // 3 -> base -> 2 base -> 4 base -> 8 base, halving resolution each time
        let widths = [3, base, base * 2, base * 4, base * 8];
        let blocks = widths
            .windows(2)
            .map(|w| ConvBlock::new(w[0], w[1], device))
            .collect();

        Self {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: LinearConfig::new(base * 8, config.hidden_size).init(device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            classifier: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
        }
    }

    pub fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 2> {
        for block in &self.blocks {
            x = block.forward(x);
        }

        // [B, C, H, W] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.relu.forward(self.fc.forward(x));
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
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
            blocks: self.blocks.no_grad(),
            fc: self.fc.no_grad(),
            ..self
        }
    }
}

#[cfg(all(test, feature = "ndarray"))]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model: LesionCnn<TestBackend> = LesionCnnConfig::new(7)
            .with_base_filters(4)
            .with_hidden_size(8)
            .init(&device);
        let x = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert_eq!(model.forward(x).dims(), [2, 7]);
        assert_eq!(model.num_classes(), 7);
    }

    #[test]
    fn test_replace_head_keeps_hidden_width() {
        let device = Default::default();
        let model: LesionCnn<TestBackend> = LesionCnnConfig::new(1000)
            .with_base_filters(4)
            .with_hidden_size(8)
            .init(&device);
        let model = model.replace_head(2, &device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(model.forward(x).dims(), [1, 2]);
    }
}
