pub mod autoencoder;
pub mod dec;
mod dense;
pub mod embedder;

use candle_core::{DType, Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{Error, Result};

// Shuffle row indices and cut them into minibatches of at most `batch_size`.
pub(crate) fn minibatches(
    n: usize,
    batch_size: usize,
    rng: &mut StdRng,
    device: &Device,
) -> Result<Vec<Tensor>> {
    let mut order: Vec<u32> = (0..n as u32).collect();
    order.shuffle(rng);
    order
        .chunks(batch_size.max(1))
        .map(|chunk| Tensor::from_slice(chunk, chunk.len(), device).map_err(Error::from))
        .collect()
}

pub(crate) fn progress_bar(len: usize, msg: &'static str) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg:>12} [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    progress.set_message(msg);
    progress
}

pub fn tensor_to_array2(xs: &Tensor) -> Result<Array2<f32>> {
    let (n, d) = xs.dims2()?;
    let data = xs.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Array2::from_shape_vec((n, d), data).map_err(|err| Error::shape_mismatch((n, d), err))
}

pub fn array2_to_tensor(xs: &Array2<f32>, device: &Device) -> Result<Tensor> {
    let (n, d) = xs.dim();
    let data: Vec<f32> = xs.iter().cloned().collect();
    Ok(Tensor::from_vec(data, (n, d), device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_minibatches_cover_every_row_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let batches = minibatches(10, 4, &mut rng, &Device::Cpu).unwrap();
        assert_eq!(batches.len(), 3);

        let mut seen: Vec<u32> = batches
            .iter()
            .flat_map(|batch| batch.to_vec1::<u32>().unwrap())
            .collect();
        assert_eq!(batches[2].dims1().unwrap(), 2);
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_array_tensor_conversion_keeps_row_order() {
        let xs = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let t = array2_to_tensor(&xs, &Device::Cpu).unwrap();
        assert_eq!(t.dims2().unwrap(), (2, 3));
        assert_eq!(
            t.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]
        );
        assert_eq!(tensor_to_array2(&t).unwrap(), xs);
    }
}
