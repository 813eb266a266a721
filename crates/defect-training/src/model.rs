//! Compact CNN classifier for defect images.
//!
//! Four conv blocks (conv, batch norm, ReLU, 2×2 max pool) with doubling
//! width, global average pooling, then a two-layer head.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use defect_core::ModelConfig;

#[derive(Config, Debug)]
pub struct DefectClassifierConfig {
    pub num_classes: usize,

    /// Filters in the first block; doubled by each following block
    #[config(default = "16")]
    pub base_filters: usize,

    #[config(default = "256")]
    pub hidden_size: usize,

    #[config(default = "0.2")]
    pub dropout: f64,

    #[config(default = "3")]
    pub in_channels: usize,
}

impl DefectClassifierConfig {
    pub fn from_model_config(num_classes: usize, model: &ModelConfig) -> Self {
        Self::new(num_classes)
            .with_base_filters(model.base_filters)
            .with_hidden_size(model.hidden_size)
            .with_dropout(model.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DefectClassifier<B> {
        DefectClassifier::new(self, device)
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct DefectClassifier<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    conv4: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    dropout: Dropout,
    fc2: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> DefectClassifier<B> {
    pub fn new(config: &DefectClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        Self {
            conv1: ConvBlock::new(config.in_channels, base, device),
            conv2: ConvBlock::new(base, base * 2, device),
            conv3: ConvBlock::new(base * 2, base * 4, device),
            conv4: ConvBlock::new(base * 4, base * 8, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(base * 8, config.hidden_size).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            fc2: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// `[N, C, H, W]` → logits `[N, num_classes]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Class probabilities.
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Keep the backbone, replace the output layer with a fresh one.
    pub fn with_head(mut self, num_classes: usize, device: &B::Device) -> Self {
        let [hidden, _] = self.fc2.weight.val().dims();
        self.fc2 = LinearConfig::new(hidden, num_classes).init(device);
        self.num_classes = num_classes;
        self
    }
}
