//! Assembly of the full encoder/decoder segmentation graph.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use vnet_layers::checks;

use crate::block::{DownStage, EndStage, UpStage};
use crate::config::VNetConfig;
use crate::error::{Error, Result};

/// Encoder filter progression; the decoder mirrors the first three in
/// reverse while consuming their skip connections.
pub(crate) const ENCODER_FILTERS: [usize; 4] = [16, 32, 64, 128];
pub(crate) const DECODER_FILTERS: [usize; 3] = [64, 32, 16];

/// 3D segmentation network with a deterministic convolutional encoder and a
/// variational (Flipout) decoder.
#[derive(Debug)]
pub struct SemiBayesianVNet {
    config: VNetConfig,
    encoder: Vec<DownStage>,
    decoder: Vec<UpStage>,
    head: EndStage,
}

impl SemiBayesianVNet {
    /// Builds the network according to `config`, drawing parameters from the
    /// caller's variable store.
    pub fn new(config: VNetConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let (_, _, _, in_channels) = config.input_shape;
        let mut encoder = Vec::with_capacity(ENCODER_FILTERS.len());
        let mut channels = in_channels;
        for (index, &filters) in ENCODER_FILTERS.iter().enumerate() {
            let stage = DownStage::new(
                &config,
                channels,
                filters,
                vb.pp(format!("down{}", index + 1)),
            )?;
            encoder.push(stage);
            channels = filters;
        }

        let mut decoder = Vec::with_capacity(DECODER_FILTERS.len());
        for (index, &filters) in DECODER_FILTERS.iter().enumerate() {
            let skip_channels = ENCODER_FILTERS[ENCODER_FILTERS.len() - 2 - index];
            let stage = UpStage::new(
                &config,
                channels,
                skip_channels,
                filters,
                vb.pp(format!("up{}", index + 1)),
            )?;
            decoder.push(stage);
            channels = filters;
        }

        let head = EndStage::new(&config, channels, vb.pp("end"))?;

        log::info!(
            "semi_bayesian_vnet init n_classes={} input_shape={:?} kernel_size={} activation={:?} padding={:?} divergence={}",
            config.n_classes,
            config.input_shape,
            config.kernel_size,
            config.activation,
            config.padding,
            if config.variational.divergence.is_some() { "set" } else { "unset" },
        );

        Ok(Self {
            config,
            encoder,
            decoder,
            head,
        })
    }

    pub fn config(&self) -> &VNetConfig {
        &self.config
    }

    /// Maps `(batch, channels, depth, height, width)` volumes to per-voxel
    /// class scores shaped `(batch, n_classes, depth, height, width)`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (declared_depth, declared_height, declared_width, in_channels) = self.config.input_shape;
        checks::expect_bcdhw("vnet.input", x, in_channels)?;
        let (_, _, depth, height, width) = x.dims5()?;
        if (depth, height, width) != (declared_depth, declared_height, declared_width) {
            return Err(Error::ShapeMismatch(format!(
                "expected {:?} spatial dimensions, got {:?}",
                (declared_depth, declared_height, declared_width),
                (depth, height, width)
            )));
        }

        let (bottom, upper) = self
            .encoder
            .split_last()
            .ok_or_else(|| Error::InvalidConfig("network has no encoder stages".into()))?;

        let mut skips = Vec::with_capacity(upper.len());
        let mut hidden = x.clone();
        for stage in upper {
            let (skip, pooled) = stage.forward(&hidden)?;
            skips.push(skip);
            hidden = pooled;
        }
        // The deepest stage's pooled output has no consumer.
        hidden = bottom.features(&hidden)?;

        for stage in &self.decoder {
            let skip = skips.pop().ok_or_else(|| {
                Error::ShapeMismatch("decoder stage without a skip connection".into())
            })?;
            hidden = stage.forward(&hidden, &skip)?;
        }

        self.head.forward(&hidden)
    }

    /// Sum of every stochastic layer's registered divergence term; a zero
    /// scalar when no divergence function is configured.
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let mut total = Tensor::zeros((), self.config.dtype, &self.config.device)?;
        for stage in &self.decoder {
            for layer in stage.stochastic_layers() {
                if let Some(term) = layer.kl_loss()? {
                    total = (total + term)?;
                }
            }
        }
        for layer in self.head.stochastic_layers() {
            if let Some(term) = layer.kl_loss()? {
                total = (total + term)?;
            }
        }
        Ok(total)
    }
}
