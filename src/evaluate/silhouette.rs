use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use crate::error::{Error, Result};

fn euclidean(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// Mean silhouette coefficient over all points, using Euclidean distance.
///
/// Needs at least two clusters and at least one cluster with more than one
/// point. Points in singleton clusters contribute 0.
pub fn silhouette_score(data: &Array2<f32>, labels: &[usize]) -> Result<f64> {
    let n = data.nrows();
    if labels.len() != n {
        return Err(Error::shape_mismatch(n, labels.len()));
    }

    let nlabels = labels.iter().max().map_or(0, |&l| l + 1);
    let mut sizes = vec![0_usize; nlabels];
    for &l in labels {
        sizes[l] += 1;
    }
    let ndistinct = sizes.iter().filter(|&&s| s > 0).count();
    if ndistinct < 2 || ndistinct > n.saturating_sub(1) {
        return Err(Error::DegenerateClustering(format!(
            "silhouette needs 2 to {} distinct labels, found {}",
            n.saturating_sub(1),
            ndistinct
        )));
    }

    let total: f64 = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if sizes[own] <= 1 {
                return 0.0;
            }

            let mut sums = vec![0.0_f64; nlabels];
            for (j, x) in data.outer_iter().enumerate() {
                if j != i {
                    sums[labels[j]] += euclidean(data.row(i), x);
                }
            }

            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = sums
                .iter()
                .zip(&sizes)
                .enumerate()
                .filter(|&(l, (_, &size))| l != own && size > 0)
                .map(|(_, (&sum, &size))| sum / size as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .sum();

    Ok(total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_separated_blobs_score_near_one() {
        let data = array![
            [0.0_f32, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [10.0, 10.0],
            [10.1, 10.0],
            [10.0, 10.1]
        ];
        let score = silhouette_score(&data, &[0, 0, 0, 1, 1, 1]).unwrap();
        assert!(score > 0.9, "score = {}", score);
        assert!(score <= 1.0);
    }

    #[test]
    fn test_mixed_labels_score_low() {
        let data = array![
            [0.0_f32, 0.0],
            [0.1, 0.0],
            [10.0, 10.0],
            [10.1, 10.0]
        ];
        let score = silhouette_score(&data, &[0, 1, 0, 1]).unwrap();
        assert!(score < 0.0, "score = {}", score);
    }

    #[test]
    fn test_singletons_contribute_zero() {
        let data = array![[0.0_f32], [0.1], [5.0]];
        let score = silhouette_score(&data, &[0, 0, 1]).unwrap();

        // s_0 = s_1 = 1 - 0.1 / ~5, s_2 = 0
        let expected = (2.0 * (1.0 - 0.1 / 4.95) + 0.0) / 3.0;
        assert!((score - expected).abs() < 1e-3, "score = {}", score);
    }

    #[test]
    fn test_degenerate_label_counts_are_rejected() {
        let data = array![[0.0_f32], [1.0], [2.0]];
        assert!(matches!(
            silhouette_score(&data, &[0, 0, 0]),
            Err(Error::DegenerateClustering(_))
        ));
        assert!(matches!(
            silhouette_score(&data, &[0, 1, 2]),
            Err(Error::DegenerateClustering(_))
        ));
        assert!(silhouette_score(&data, &[0, 1]).is_err());
    }
}
