use candle_core::{Device, Module, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::dense::{Dense, LayerInit};
use super::{minibatches, progress_bar};
use crate::config::AutoencoderConfig;
use crate::error::{Error, Result};

// input -> hidden -> latent, one ReLU in between.
#[derive(Clone, Debug)]
pub struct Encoder {
    fc1: Dense,
    fc2: Dense,
}

impl Encoder {
    fn new(
        input_dim: usize,
        hidden_dim: usize,
        latent_dim: usize,
        init: LayerInit,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Encoder> {
        Ok(Encoder {
            fc1: Dense::new(input_dim, hidden_dim, init, rng, device)?,
            fc2: Dense::new(hidden_dim, latent_dim, init, rng, device)?,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.fc1.in_dim()
    }

    pub fn latent_dim(&self) -> usize {
        self.fc2.out_dim()
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = self.fc1.vars();
        vars.extend(self.fc2.vars());
        vars
    }
}

impl Module for Encoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.apply(&self.fc1)?.relu()?.apply(&self.fc2)
    }
}

// Mirror of the encoder: latent -> hidden -> input.
#[derive(Clone, Debug)]
pub struct Decoder {
    fc1: Dense,
    fc2: Dense,
}

impl Decoder {
    fn new(
        latent_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        init: LayerInit,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Decoder> {
        Ok(Decoder {
            fc1: Dense::new(latent_dim, hidden_dim, init, rng, device)?,
            fc2: Dense::new(hidden_dim, output_dim, init, rng, device)?,
        })
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = self.fc1.vars();
        vars.extend(self.fc2.vars());
        vars
    }
}

impl Module for Decoder {
    fn forward(&self, zs: &Tensor) -> candle_core::Result<Tensor> {
        zs.apply(&self.fc1)?.relu()?.apply(&self.fc2)
    }
}

pub struct Autoencoder {
    encoder: Encoder,
    decoder: Decoder,
    device: Device,
}

impl Autoencoder {
    pub fn new(input_dim: usize, config: &AutoencoderConfig, device: &Device) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Autoencoder::with_init(
            input_dim,
            config.hidden_dim,
            config.latent_dim,
            LayerInit::Uniform,
            &mut rng,
            device,
        )
    }

    pub fn zeros(
        input_dim: usize,
        hidden_dim: usize,
        latent_dim: usize,
        device: &Device,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(0);
        Autoencoder::with_init(
            input_dim,
            hidden_dim,
            latent_dim,
            LayerInit::Zeros,
            &mut rng,
            device,
        )
    }

    fn with_init(
        input_dim: usize,
        hidden_dim: usize,
        latent_dim: usize,
        init: LayerInit,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self> {
        let encoder = Encoder::new(input_dim, hidden_dim, latent_dim, init, rng, device)?;
        let decoder = Decoder::new(latent_dim, hidden_dim, input_dim, init, rng, device)?;
        Ok(Autoencoder {
            encoder,
            decoder,
            device: device.clone(),
        })
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = self.encoder.vars();
        vars.extend(self.decoder.vars());
        vars
    }

    // Returns (reconstruction, latent).
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let zs = xs.apply(&self.encoder)?;
        let recon = zs.apply(&self.decoder)?;
        Ok((recon, zs))
    }

    pub fn reconstruction_loss(&self, xs: &Tensor) -> Result<Tensor> {
        let (recon, _) = self.forward(xs)?;
        Ok(candle_nn::loss::mse(&recon, xs)?)
    }

    // Latent vectors for the whole matrix, detached from the graph.
    pub fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(xs.apply(&self.encoder)?.detach())
    }

    fn check_input(&self, xs: &Tensor) -> Result<usize> {
        let (n, d) = xs.dims2()?;
        if d != self.encoder.input_dim() {
            return Err(Error::shape_mismatch(
                ("n", self.encoder.input_dim()),
                (n, d),
            ));
        }
        if n == 0 {
            return Err(Error::EmptyInput("no embeddings to train on"));
        }
        Ok(n)
    }
}

// Minimize reconstruction MSE with Adam over shuffled minibatches for a fixed
// number of epochs. Returns the loss summed over batches for each epoch.
pub fn train_autoencoder(
    model: &Autoencoder,
    data: &Tensor,
    config: &AutoencoderConfig,
) -> Result<Vec<f32>> {
    let n = model.check_input(data)?;

    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut opt = AdamW::new(model.vars(), params)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let progress = progress_bar(config.epochs, "autoencoder");
    let mut losses = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let mut total_loss = 0.0_f32;
        let batches = minibatches(n, config.batch_size, &mut rng, model.device())?;
        let nbatches = batches.len();
        for batch in batches {
            let xs = data.index_select(&batch, 0)?;
            let loss = model.reconstruction_loss(&xs)?;
            opt.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()?;
        }
        progress.inc(1);
        debug!("autoencoder epoch {}: {} batches", epoch + 1, nbatches);
        info!(
            "Autoencoder epoch {}/{}, loss: {:.4}",
            epoch + 1,
            config.epochs,
            total_loss
        );
        losses.push(total_loss);
    }
    progress.finish_and_clear();

    Ok(losses)
}
