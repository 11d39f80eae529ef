// Hyperparameters for each stage of the pipeline. Every training procedure
// receives its own struct; `PipelineConfig` only bundles them.

#[derive(Clone, Debug)]
pub struct AutoencoderConfig {
    pub hidden_dim: usize,
    pub latent_dim: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub seed: u64,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        AutoencoderConfig {
            hidden_dim: 256,
            latent_dim: 64,
            learning_rate: 1e-3,
            batch_size: 256,
            epochs: 20,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct KMeansConfig {
    pub nclusters: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f32,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        KMeansConfig {
            nclusters: 4,
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
            seed: 0,
        }
    }
}

/// When the DEC self-training target is recomputed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetUpdate {
    // From each minibatch's own soft assignments, every step.
    Batch,

    // Over the whole dataset, every `interval` epochs.
    Dataset { interval: usize },
}

#[derive(Clone, Debug)]
pub struct DecConfig {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,

    // Student's t degrees of freedom
    pub alpha: f64,

    pub target_update: TargetUpdate,
    pub seed: u64,
}

impl Default for DecConfig {
    fn default() -> Self {
        DecConfig {
            learning_rate: 1e-4,
            batch_size: 256,
            epochs: 10,
            alpha: 1.0,
            target_update: TargetUpdate::Batch,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TsneConfig {
    pub perplexity: f64,
    pub max_iter: usize,
    pub learning_rate: f64,
    pub early_exaggeration: f64,
    pub exaggeration_iters: usize,
    pub seed: u64,
}

impl Default for TsneConfig {
    fn default() -> Self {
        TsneConfig {
            perplexity: 30.0,
            max_iter: 1000,
            learning_rate: 200.0,
            early_exaggeration: 12.0,
            exaggeration_iters: 250,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub embed_chunk_size: usize,
    pub autoencoder: AutoencoderConfig,
    pub kmeans: KMeansConfig,
    pub dec: DecConfig,
    pub tsne: TsneConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            embed_chunk_size: 32,
            autoencoder: AutoencoderConfig::default(),
            kmeans: KMeansConfig::default(),
            dec: DecConfig::default(),
            tsne: TsneConfig::default(),
        }
    }
}

impl PipelineConfig {
    // Give every randomized stage its own stream derived from one base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.autoencoder.seed = seed;
        self.kmeans.seed = seed.wrapping_add(1);
        self.dec.seed = seed.wrapping_add(2);
        self.tsne.seed = seed.wrapping_add(3);
        self
    }
}
