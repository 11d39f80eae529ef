// Agreement between predicted clusters and reference labels. None of these
// care how the clusters are numbered.

use ndarray::Array2;

use crate::error::{Error, Result};

/// Counts of documents per (label, cluster) pair, shape [nlabels, nclusters].
pub fn contingency(labels: &[usize], clusters: &[usize]) -> Result<Array2<u64>> {
    if labels.len() != clusters.len() {
        return Err(Error::shape_mismatch(labels.len(), clusters.len()));
    }
    if labels.is_empty() {
        return Err(Error::EmptyInput("no labels to compare"));
    }

    let nlabels = labels.iter().max().map_or(0, |&l| l + 1);
    let nclusters = clusters.iter().max().map_or(0, |&c| c + 1);
    let mut table = Array2::<u64>::zeros((nlabels, nclusters));
    for (&l, &c) in labels.iter().zip(clusters) {
        table[[l, c]] += 1;
    }
    Ok(table)
}

/// Fraction of documents whose cluster's most common label is their own.
pub fn purity(labels: &[usize], clusters: &[usize]) -> Result<f64> {
    let table = contingency(labels, clusters)?;
    let majority: u64 = table
        .columns()
        .into_iter()
        .map(|col| col.iter().copied().max().unwrap_or(0))
        .sum();
    Ok(majority as f64 / labels.len() as f64)
}

fn comb2(x: u64) -> f64 {
    let x = x as f64;
    x * (x - 1.0) / 2.0
}

pub fn adjusted_rand_index(labels: &[usize], clusters: &[usize]) -> Result<f64> {
    let table = contingency(labels, clusters)?;
    let n = labels.len() as u64;

    let sum_pairs: f64 = table.iter().map(|&c| comb2(c)).sum();
    let sum_rows: f64 = table.rows().into_iter().map(|r| comb2(r.sum())).sum();
    let sum_cols: f64 = table.columns().into_iter().map(|c| comb2(c.sum())).sum();

    let total = comb2(n);
    let expected = if total > 0.0 {
        sum_rows * sum_cols / total
    } else {
        0.0
    };
    let max_index = (sum_rows + sum_cols) / 2.0;

    // both partitions trivial (all one cluster, or all singletons)
    if (max_index - expected).abs() < f64::EPSILON {
        return Ok(1.0);
    }
    Ok((sum_pairs - expected) / (max_index - expected))
}

fn entropy<I: Iterator<Item = u64>>(counts: I, n: f64) -> f64 {
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Mutual information normalized by the arithmetic mean of the two entropies.
pub fn normalized_mutual_info(labels: &[usize], clusters: &[usize]) -> Result<f64> {
    let table = contingency(labels, clusters)?;
    let n = labels.len() as f64;

    let row_sums: Vec<u64> = table.rows().into_iter().map(|r| r.sum()).collect();
    let col_sums: Vec<u64> = table.columns().into_iter().map(|c| c.sum()).collect();

    let mut mi = 0.0;
    for ((i, j), &nij) in table.indexed_iter() {
        if nij == 0 {
            continue;
        }
        let nij = nij as f64;
        mi += nij / n * (n * nij / (row_sums[i] as f64 * col_sums[j] as f64)).ln();
    }

    let h_labels = entropy(row_sums.iter().copied(), n);
    let h_clusters = entropy(col_sums.iter().copied(), n);
    let denom = (h_labels + h_clusters) / 2.0;

    // one cluster and one label: identical partitions
    if denom <= 0.0 {
        return Ok(1.0);
    }
    Ok((mi / denom).clamp(0.0, 1.0))
}

#[derive(Clone, Debug)]
pub struct Agreement {
    pub purity: f64,
    pub adjusted_rand_index: f64,
    pub normalized_mutual_info: f64,
}

impl Agreement {
    pub fn new(labels: &[usize], clusters: &[usize]) -> Result<Agreement> {
        Ok(Agreement {
            purity: purity(labels, clusters)?,
            adjusted_rand_index: adjusted_rand_index(labels, clusters)?,
            normalized_mutual_info: normalized_mutual_info(labels, clusters)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contingency_counts() {
        let table = contingency(&[0, 0, 1, 1, 1], &[1, 1, 0, 0, 1]).unwrap();
        assert_eq!(table.dim(), (2, 2));
        assert_eq!(table[[0, 1]], 2);
        assert_eq!(table[[1, 0]], 2);
        assert_eq!(table[[1, 1]], 1);
        assert_eq!(table.sum(), 5);
    }

    #[test]
    fn test_relabeled_partition_is_perfect() {
        let labels = [0, 0, 1, 1, 2, 2];
        let clusters = [2, 2, 0, 0, 1, 1];
        let agreement = Agreement::new(&labels, &clusters).unwrap();
        assert!((agreement.purity - 1.0).abs() < 1e-12);
        assert!((agreement.adjusted_rand_index - 1.0).abs() < 1e-12);
        assert!((agreement.normalized_mutual_info - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_values() {
        // sklearn: adjusted_rand_score([0,0,1,1], [0,0,1,2]) = 0.5714...
        let ari = adjusted_rand_index(&[0, 0, 1, 1], &[0, 0, 1, 2]).unwrap();
        assert!((ari - 4.0 / 7.0).abs() < 1e-9, "ari = {}", ari);

        // sklearn: normalized_mutual_info_score([0,0,1,1], [0,0,1,2]) = 0.8
        let nmi = normalized_mutual_info(&[0, 0, 1, 1], &[0, 0, 1, 2]).unwrap();
        assert!((nmi - 0.8).abs() < 1e-9, "nmi = {}", nmi);

        let p = purity(&[0, 0, 1, 1], &[0, 0, 0, 1]).unwrap();
        assert!((p - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_independent_partitions_score_near_zero() {
        let labels = [0, 0, 1, 1];
        let clusters = [0, 1, 0, 1];
        let nmi = normalized_mutual_info(&labels, &clusters).unwrap();
        assert!(nmi.abs() < 1e-12);
        assert!(adjusted_rand_index(&labels, &clusters).unwrap() < 0.0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        assert!(contingency(&[0, 1], &[0]).is_err());
        assert!(purity(&[], &[]).is_err());
    }
}
