// Exact t-SNE. Quadratic in the number of points, which is fine for the
// corpus slices this tool clusters.

use log::{debug, trace};
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

use crate::config::TsneConfig;
use crate::error::{Error, Result};

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MIN_GAIN: f64 = 0.01;
const MIN_PROB: f64 = 1e-12;
const NDIMS: usize = 2;

fn squared_distances(data: &Array2<f64>) -> Array2<f64> {
    let n = data.nrows();
    let mut dists = Array2::<f64>::zeros((n, n));
    dists
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let xi = data.row(i);
            for (j, xj) in data.outer_iter().enumerate() {
                row[j] = xi
                    .iter()
                    .zip(xj.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
            }
        });
    dists
}

// Find the gaussian precision for row `i` whose conditional distribution
// has entropy ln(perplexity), by bisection on beta.
fn conditional_row(dists: &[f64], i: usize, target_entropy: f64, row: &mut [f64]) -> f64 {
    let mut beta = 1.0;
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum = 0.0;
        for (j, (p, &d)) in row.iter_mut().zip(dists).enumerate() {
            *p = if j == i { 0.0 } else { (-d * beta).exp() };
            sum += *p;
        }
        if sum == 0.0 {
            sum = MIN_PROB;
        }

        let mut weighted = 0.0;
        for (p, &d) in row.iter_mut().zip(dists) {
            *p /= sum;
            weighted += d * *p;
        }
        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - target_entropy;
        if diff.abs() <= PERPLEXITY_TOLERANCE {
            break;
        }

        if diff > 0.0 {
            lo = beta;
            beta = if hi.is_infinite() { beta * 2.0 } else { (beta + hi) / 2.0 };
        } else {
            hi = beta;
            beta = if lo.is_infinite() { beta / 2.0 } else { (beta + lo) / 2.0 };
        }
    }
    beta
}

fn joint_probabilities(dists: &Array2<f64>, perplexity: f64) -> Array2<f64> {
    let n = dists.nrows();
    let target_entropy = perplexity.ln();

    let mut conditional = Array2::<f64>::zeros((n, n));
    let betas: Vec<f64> = conditional
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(i, mut row)| {
            let dist_row = dists.row(i).to_vec();
            let mut buf = vec![0.0; n];
            let beta = conditional_row(&dist_row, i, target_entropy, &mut buf);
            row.assign(&ArrayView1::from(&buf[..]));
            beta
        })
        .collect();

    let mean_sigma = betas.iter().map(|b| (1.0 / b).sqrt()).sum::<f64>() / n as f64;
    debug!("t-SNE mean sigma: {:.4}", mean_sigma);

    let mut joint = &conditional + &conditional.t();
    let total = joint.sum();
    joint.mapv_inplace(|p| (p / total).max(MIN_PROB));
    joint
}

// Gradient of KL(P || Q) with respect to the embedding, plus the current KL.
fn gradient(p: &Array2<f64>, y: &Array2<f64>, exaggeration: f64) -> (Array2<f64>, f64) {
    let n = y.nrows();

    let mut num = squared_distances(y);
    num.mapv_inplace(|d| 1.0 / (1.0 + d));
    num.diag_mut().fill(0.0);
    let sum_num = num.sum().max(MIN_PROB);

    let mut grad = Array2::<f64>::zeros((n, NDIMS));
    grad.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut g)| {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = (num[[i, j]] / sum_num).max(MIN_PROB);
                let mult = 4.0 * (exaggeration * p[[i, j]] - q) * num[[i, j]];
                for k in 0..NDIMS {
                    g[k] += mult * (y[[i, k]] - y[[j, k]]);
                }
            }
        });

    let kl: f64 = p
        .indexed_iter()
        .filter(|&((i, j), _)| i != j)
        .map(|((i, j), &pij)| {
            let q = (num[[i, j]] / sum_num).max(MIN_PROB);
            pij * (pij / q).ln()
        })
        .sum();

    (grad, kl)
}

/// Project `data` to two dimensions.
pub fn tsne(data: &Array2<f32>, config: &TsneConfig) -> Result<Array2<f32>> {
    let n = data.nrows();
    if n == 0 {
        return Err(Error::EmptyInput("no points to project"));
    }
    if config.perplexity <= 0.0 || config.perplexity >= n as f64 {
        return Err(Error::InvalidPerplexity {
            perplexity: config.perplexity,
            points: n,
        });
    }

    let data = data.mapv(|v| v as f64);
    let p = joint_probabilities(&squared_distances(&data), config.perplexity);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut y = Array2::<f64>::from_shape_simple_fn((n, NDIMS), || {
        let z: f64 = StandardNormal.sample(&mut rng);
        1e-4 * z
    });
    let mut update = Array2::<f64>::zeros((n, NDIMS));
    let mut gains = Array2::<f64>::ones((n, NDIMS));

    for iter in 0..config.max_iter {
        let early = iter < config.exaggeration_iters;
        let exaggeration = if early { config.early_exaggeration } else { 1.0 };
        let momentum = if early { 0.5 } else { 0.8 };

        let (grad, kl) = gradient(&p, &y, exaggeration);

        ndarray::Zip::from(&mut gains)
            .and(&mut update)
            .and(&grad)
            .for_each(|gain, u, &g| {
                // steps that keep their direction grow
                *gain = if g * *u < 0.0 {
                    *gain + 0.2
                } else {
                    (*gain * 0.8).max(MIN_GAIN)
                };
                *u = momentum * *u - config.learning_rate * *gain * g;
            });
        y += &update;

        if (iter + 1) % 50 == 0 {
            trace!("t-SNE iteration {}: KL {:.4}", iter + 1, kl);
        }
    }

    // centre the embedding
    if let Some(mean) = y.mean_axis(Axis(0)) {
        y -= &mean;
    }

    Ok(y.mapv(|v| v as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::Normal;

    fn two_blobs(per_blob: usize) -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(5);
        let noise = Normal::new(0.0_f32, 0.5).unwrap();
        Array2::from_shape_fn((2 * per_blob, 10), |(i, _)| {
            let centre = if i < per_blob { 0.0 } else { 20.0 };
            centre + noise.sample(&mut rng)
        })
    }

    fn config() -> TsneConfig {
        TsneConfig {
            perplexity: 5.0,
            max_iter: 300,
            exaggeration_iters: 100,
            ..TsneConfig::default()
        }
    }

    #[test]
    fn test_tsne_keeps_blobs_apart() {
        let per_blob = 15;
        let data = two_blobs(per_blob);
        let y = tsne(&data, &config()).unwrap();
        assert_eq!(y.dim(), (2 * per_blob, 2));
        assert!(y.iter().all(|v| v.is_finite()));

        // every point's nearest neighbour in the projection is in its own blob
        for i in 0..y.nrows() {
            let mut best = (usize::MAX, f32::INFINITY);
            for j in 0..y.nrows() {
                if i == j {
                    continue;
                }
                let d = (y[[i, 0]] - y[[j, 0]]).powi(2) + (y[[i, 1]] - y[[j, 1]]).powi(2);
                if d < best.1 {
                    best = (j, d);
                }
            }
            assert_eq!(i < per_blob, best.0 < per_blob, "point {}", i);
        }
    }

    #[test]
    fn test_tsne_is_reproducible() {
        let data = two_blobs(6);
        let cfg = TsneConfig {
            perplexity: 3.0,
            max_iter: 50,
            ..TsneConfig::default()
        };
        assert_eq!(tsne(&data, &cfg).unwrap(), tsne(&data, &cfg).unwrap());
    }

    #[test]
    fn test_joint_probabilities_are_symmetric_and_normalized() {
        let data = two_blobs(5).mapv(|v| v as f64);
        let p = joint_probabilities(&squared_distances(&data), 3.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        for i in 0..10 {
            for j in 0..10 {
                assert!((p[[i, j]] - p[[j, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_perplexity_must_be_below_point_count() {
        let data = Array2::<f32>::zeros((10, 3));
        let cfg = TsneConfig {
            perplexity: 10.0,
            ..TsneConfig::default()
        };
        assert!(matches!(
            tsne(&data, &cfg),
            Err(Error::InvalidPerplexity { points: 10, .. })
        ));
    }
}
