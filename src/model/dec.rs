// Deep Embedded Clustering (Xie, Girshick, Farhadi 2016). Refines the
// autoencoder's encoder together with a set of cluster centroids by
// self-training on a sharpened version of its own soft assignments.

use candle_core::{Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use log::{debug, info};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::autoencoder::Encoder;
use super::{array2_to_tensor, minibatches, progress_bar, tensor_to_array2};
use crate::config::{DecConfig, TargetUpdate};
use crate::error::{Error, Result};

// Added before taking logs so that underflowed probabilities stay finite.
const LOG_EPS: f64 = 1e-12;

pub struct DecModel<'a> {
    // Borrowed, not copied: DEC training updates the autoencoder's encoder.
    encoder: &'a Encoder,
    centroids: Var,
    alpha: f64,
}

impl<'a> DecModel<'a> {
    pub fn new(
        encoder: &'a Encoder,
        centroids: &Array2<f32>,
        alpha: f64,
        device: &Device,
    ) -> Result<Self> {
        let (nclusters, dim) = centroids.dim();
        if nclusters == 0 {
            return Err(Error::EmptyInput("no initial centroids"));
        }
        if dim != encoder.latent_dim() {
            return Err(Error::shape_mismatch(
                ("k", encoder.latent_dim()),
                (nclusters, dim),
            ));
        }

        let centroids = Var::from_tensor(&array2_to_tensor(centroids, device)?)?;
        Ok(DecModel {
            encoder,
            centroids,
            alpha,
        })
    }

    pub fn nclusters(&self) -> usize {
        self.centroids.dims()[0]
    }

    pub fn centroids(&self) -> Result<Array2<f32>> {
        tensor_to_array2(self.centroids.as_tensor())
    }

    fn vars(&self) -> Vec<Var> {
        let mut vars = self.encoder.vars();
        vars.push(self.centroids.clone());
        vars
    }

    // Returns (q, z): soft assignments and latent vectors.
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let zs = xs.apply(self.encoder)?;
        let q = soft_assignment(&zs, self.centroids.as_tensor(), self.alpha)?;
        Ok((q, zs))
    }

    // Soft assignments (detached) and their per-row arg-max.
    pub fn predict(&self, xs: &Tensor) -> Result<(Tensor, Vec<usize>)> {
        let (q, _) = self.forward(xs)?;
        let q = q.detach();
        let labels = q
            .argmax(1)?
            .to_vec1::<u32>()?
            .into_iter()
            .map(|label| label as usize)
            .collect();
        Ok((q, labels))
    }
}

// Student's t kernel between every latent vector and every centroid,
// normalized over centroids:
//   q_ij ∝ (1 + |z_i - μ_j|² / α)^(-(α + 1) / 2)
pub fn soft_assignment(zs: &Tensor, centroids: &Tensor, alpha: f64) -> Result<Tensor> {
    let diff = zs.unsqueeze(1)?.broadcast_sub(&centroids.unsqueeze(0)?)?;
    let dist2 = diff.sqr()?.sum(2)?;

    // never below 1, so the reciprocal is always finite
    let base = dist2.affine(1.0 / alpha, 1.0)?;
    let kernel = if alpha == 1.0 {
        base.recip()?
    } else {
        base.powf(-(alpha + 1.0) / 2.0)?
    };

    Ok(kernel.broadcast_div(&kernel.sum_keepdim(1)?)?)
}

// Square q, divide by each cluster's soft frequency, renormalize rows. The
// result is detached and serves as a fixed target for one step.
pub fn target_distribution(q: &Tensor) -> Result<Tensor> {
    let q = q.detach();
    let weight = q.sqr()?.broadcast_div(&q.sum_keepdim(0)?)?;
    Ok(weight.broadcast_div(&weight.sum_keepdim(1)?)?.detach())
}

// KL(p || q), summed over clusters and averaged over rows.
pub fn kl_divergence(p: &Tensor, q: &Tensor) -> Result<Tensor> {
    let (batch, _) = q.dims2()?;
    let log_p = p.affine(1.0, LOG_EPS)?.log()?;
    let log_q = q.affine(1.0, LOG_EPS)?.log()?;
    let kl = p.mul(&log_p.sub(&log_q)?)?.sum_all()?;
    Ok(kl.affine(1.0 / batch as f64, 0.0)?)
}

fn dataset_target(model: &DecModel, data: &Tensor) -> Result<Tensor> {
    let (q, _) = model.predict(data)?;
    target_distribution(&q)
}

// Adam over encoder parameters and centroids. With `TargetUpdate::Batch` the
// target is recomputed from each minibatch's own q at every step; with
// `TargetUpdate::Dataset` it is recomputed over all rows every `interval`
// epochs and sliced per batch. Returns the loss summed over batches per epoch.
pub fn train_dec(model: &DecModel, data: &Tensor, config: &DecConfig) -> Result<Vec<f32>> {
    let (n, d) = data.dims2()?;
    if d != model.encoder.input_dim() {
        return Err(Error::shape_mismatch(("n", model.encoder.input_dim()), (n, d)));
    }
    if n == 0 {
        return Err(Error::EmptyInput("no embeddings to train on"));
    }

    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut opt = AdamW::new(model.vars(), params)?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let progress = progress_bar(config.epochs, "dec");
    let mut target: Option<Tensor> = None;
    let mut losses = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        if let TargetUpdate::Dataset { interval } = config.target_update {
            if epoch % interval.max(1) == 0 {
                target = Some(dataset_target(model, data)?);
                debug!("dec epoch {}: recomputed dataset target", epoch + 1);
            }
        }

        let mut total_loss = 0.0_f32;
        for batch in minibatches(n, config.batch_size, &mut rng, data.device())? {
            let xs = data.index_select(&batch, 0)?;
            let (q, _) = model.forward(&xs)?;
            let p = match &target {
                Some(target) => target.index_select(&batch, 0)?,
                None => target_distribution(&q)?,
            };
            let loss = kl_divergence(&p, &q)?;
            opt.backward_step(&loss)?;
            total_loss += loss.to_scalar::<f32>()?;
        }
        progress.inc(1);
        info!(
            "DEC epoch {}/{}, loss: {:.4}",
            epoch + 1,
            config.epochs,
            total_loss
        );
        losses.push(total_loss);
    }
    progress.finish_and_clear();

    Ok(losses)
}
