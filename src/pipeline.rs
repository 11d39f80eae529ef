// The full run: embed, pretrain the autoencoder, seed centroids with
// k-means, refine with DEC, then score and project the result.

use candle_core::Tensor;
use itertools::Itertools;
use log::info;
use ndarray::{Array2, Axis};

use crate::config::PipelineConfig;
use crate::corpus::Document;
use crate::error::{Error, Result};
use crate::evaluate::{silhouette_score, tsne, Agreement};
use crate::kmeans::kmeans;
use crate::model::autoencoder::{train_autoencoder, Autoencoder};
use crate::model::dec::{train_dec, DecModel};
use crate::model::embedder::{embed_documents, Embedder};
use crate::model::tensor_to_array2;

pub struct PipelineResult {
    // arg-max of the final soft assignments
    pub clusters: Vec<usize>,

    // probability of the assigned cluster
    pub confidence: Vec<f32>,

    // [ndocuments, nclusters]
    pub soft_assignments: Array2<f32>,

    // [ndocuments, latent_dim], from the encoder after DEC training
    pub latent: Array2<f32>,

    pub initial_centroids: Array2<f32>,
    pub centroids: Array2<f32>,

    pub autoencoder_losses: Vec<f32>,
    pub dec_losses: Vec<f32>,

    pub silhouette: f64,

    // [ndocuments, 2]
    pub tsne: Array2<f32>,

    // only when reference labels are available
    pub agreement: Option<Agreement>,
}

/// Embed `documents` and cluster them. Reference labels are compared with
/// the clusters after the fact and never used for training.
pub fn run<E: Embedder + ?Sized>(
    config: &PipelineConfig,
    documents: &[Document],
    embedder: &E,
) -> Result<PipelineResult> {
    if documents.is_empty() {
        return Err(Error::EmptyInput("no documents"));
    }

    info!("Embedding {} documents", documents.len());
    let texts: Vec<&str> = documents.iter().map(|doc| doc.text.as_str()).collect();
    let embeddings = embed_documents(embedder, &texts, config.embed_chunk_size)?;

    let mut result = run_from_embeddings(config, &embeddings)?;

    let labels: Vec<usize> = documents.iter().map(|doc| doc.label).collect();
    let agreement = Agreement::new(&labels, &result.clusters)?;
    info!(
        "Purity: {:.4}, ARI: {:.4}, NMI: {:.4}",
        agreement.purity, agreement.adjusted_rand_index, agreement.normalized_mutual_info
    );
    result.agreement = Some(agreement);

    Ok(result)
}

/// Everything after the embedding stage, on a precomputed [n, d] matrix.
pub fn run_from_embeddings(config: &PipelineConfig, embeddings: &Tensor) -> Result<PipelineResult> {
    let (n, input_dim) = embeddings.dims2()?;
    if n == 0 {
        return Err(Error::EmptyInput("no embeddings"));
    }
    let device = embeddings.device();

    info!(
        "Training autoencoder: {} -> {} -> {}",
        input_dim, config.autoencoder.hidden_dim, config.autoencoder.latent_dim
    );
    let autoencoder = Autoencoder::new(input_dim, &config.autoencoder, device)?;
    let autoencoder_losses = train_autoencoder(&autoencoder, embeddings, &config.autoencoder)?;

    let latent = tensor_to_array2(&autoencoder.encode(embeddings)?)?;

    info!(
        "Initializing {} clusters with k-means ({} restarts)",
        config.kmeans.nclusters, config.kmeans.n_init
    );
    let initial = kmeans(&latent, &config.kmeans)?;
    info!("k-means inertia: {:.4}", initial.inertia);

    let dec = DecModel::new(autoencoder.encoder(), &initial.centroids, config.dec.alpha, device)?;
    info!("Training DEC with {} clusters", dec.nclusters());
    let dec_losses = train_dec(&dec, embeddings, &config.dec)?;

    let (q, clusters) = dec.predict(embeddings)?;
    let soft_assignments = tensor_to_array2(&q)?;
    let confidence: Vec<f32> = soft_assignments
        .axis_iter(Axis(0))
        .map(|row| row.iter().copied().fold(0.0_f32, f32::max))
        .collect();
    let centroids = dec.centroids()?;

    // the encoder has moved, so the latent vectors are recomputed
    let latent = tensor_to_array2(&autoencoder.encode(embeddings)?)?;

    let stability = Agreement::new(&initial.assignments, &clusters)?;
    info!(
        "Agreement with k-means initialization: ARI {:.4}, NMI {:.4}",
        stability.adjusted_rand_index, stability.normalized_mutual_info
    );

    let sizes = clusters.iter().counts();
    for (cluster, size) in sizes.iter().sorted() {
        info!("Cluster {}: {} documents", cluster, size);
    }

    let silhouette = silhouette_score(&latent, &clusters)?;
    info!("Silhouette Score: {:.4}", silhouette);

    info!("Projecting latent space with t-SNE");
    let projection = tsne(&latent, &config.tsne)?;

    Ok(PipelineResult {
        clusters,
        confidence,
        soft_assignments,
        latent,
        initial_centroids: initial.centroids,
        centroids,
        autoencoder_losses,
        dec_losses,
        silhouette,
        tsne: projection,
        agreement: None,
    })
}
