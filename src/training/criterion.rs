//! Loss functions injected into the trainer and validator

use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::{backend::Backend, Int, Tensor};

/// Maps logits `[N, C]` and targets `[N]` to a scalar loss `[1]`
pub trait Criterion {
    fn loss<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1>;
}

/// Mean cross-entropy over the batch
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropy;

impl Criterion for CrossEntropy {
    fn loss<B: Backend>(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }
}
