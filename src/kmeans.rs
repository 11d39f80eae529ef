// Initial DEC centroids: k-means in the latent space, k-means++ seeding and
// several restarts, keeping the lowest inertia.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::{KMeans, KMeansInit};
use log::debug;
use ndarray::{Array1, Array2};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use std::collections::HashSet;

use crate::config::KMeansConfig;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct KMeansResult {
    pub assignments: Vec<usize>,

    // [nclusters, ndims]
    pub centroids: Array2<f32>,

    // sum of squared distances to the assigned centroid
    pub inertia: f32,
}

fn distinct_rows(data: &Array2<f32>) -> usize {
    data.outer_iter()
        .map(|row| row.iter().map(|v| v.to_bits()).collect::<Vec<u32>>())
        .collect::<HashSet<_>>()
        .len()
}

fn inertia(data: &Array2<f32>, centroids: &Array2<f32>, assignments: &Array1<usize>) -> f32 {
    data.outer_iter()
        .zip(assignments.iter())
        .map(|(x, &j)| {
            x.iter()
                .zip(centroids.row(j).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
        })
        .sum()
}

/// Partition the rows of `data` into `config.nclusters` clusters, keeping the
/// best of `config.n_init` seeded restarts.
pub fn kmeans(data: &Array2<f32>, config: &KMeansConfig) -> Result<KMeansResult> {
    let k = config.nclusters;
    if k == 0 || data.nrows() < k {
        return Err(Error::TooFewPoints {
            points: data.nrows(),
            clusters: k,
        });
    }

    // k-means++ can only place as many centroids as there are distinct points
    let ndistinct = distinct_rows(data);
    if ndistinct < k {
        return Err(Error::TooFewPoints {
            points: ndistinct,
            clusters: k,
        });
    }

    let dataset = DatasetBase::from(data.clone());
    let rng = Xoshiro256Plus::seed_from_u64(config.seed);
    let model = KMeans::params_with_rng(k, rng)
        .n_runs(config.n_init.max(1))
        .max_n_iterations(config.max_iter as u64)
        .tolerance(config.tolerance)
        .init_method(KMeansInit::KMeansPlusPlus)
        .fit(&dataset)?;

    let centroids = model.centroids().clone();
    let assignments: Array1<usize> = model.predict(data);
    let inertia = inertia(data, &centroids, &assignments);
    debug!("k-means: {} clusters, inertia {:.4}", k, inertia);

    Ok(KMeansResult {
        assignments: assignments.to_vec(),
        centroids,
        inertia,
    })
}
