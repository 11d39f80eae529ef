use candle_core::{DType, Device, Module, Tensor, Var};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerInit {
    // U(-1/sqrt(fan_in), 1/sqrt(fan_in)) for weights and bias
    Uniform,
    Zeros,
}

// Fully connected layer, y = x W^T + b. Weight and bias are `Var`s, so a
// clone of the layer trains the same parameters.
#[derive(Clone, Debug)]
pub struct Dense {
    weight: Var,
    bias: Var,
}

impl Dense {
    pub fn new(
        in_dim: usize,
        out_dim: usize,
        init: LayerInit,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Dense> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::shape_mismatch("non-zero layer sizes", (in_dim, out_dim)));
        }

        let (weight, bias) = match init {
            LayerInit::Zeros => (
                Var::zeros((out_dim, in_dim), DType::F32, device)?,
                Var::zeros(out_dim, DType::F32, device)?,
            ),
            LayerInit::Uniform => {
                let bound = 1.0 / (in_dim as f32).sqrt();
                let w: Vec<f32> = (0..out_dim * in_dim)
                    .map(|_| rng.random_range(-bound..=bound))
                    .collect();
                let b: Vec<f32> = (0..out_dim)
                    .map(|_| rng.random_range(-bound..=bound))
                    .collect();
                (
                    Var::from_tensor(&Tensor::from_vec(w, (out_dim, in_dim), device)?)?,
                    Var::from_tensor(&Tensor::from_vec(b, out_dim, device)?)?,
                )
            }
        };

        Ok(Dense { weight, bias })
    }

    pub fn in_dim(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

impl Module for Dense {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.matmul(&self.weight.t()?)?.broadcast_add(&self.bias)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_dense_shapes_and_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = Dense::new(16, 4, LayerInit::Uniform, &mut rng, &Device::Cpu).unwrap();
        assert_eq!(layer.in_dim(), 16);
        assert_eq!(layer.out_dim(), 4);

        let bound = 0.25_f32 + 1e-6;
        let w = layer.weight.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(w.iter().all(|v| v.abs() <= bound));

        let xs = Tensor::ones((3, 16), DType::F32, &Device::Cpu).unwrap();
        let ys = layer.forward(&xs).unwrap();
        assert_eq!(ys.dims2().unwrap(), (3, 4));
    }

    #[test]
    fn test_dense_seeded_init_is_reproducible() {
        let a = Dense::new(8, 2, LayerInit::Uniform, &mut StdRng::seed_from_u64(9), &Device::Cpu)
            .unwrap();
        let b = Dense::new(8, 2, LayerInit::Uniform, &mut StdRng::seed_from_u64(9), &Device::Cpu)
            .unwrap();
        assert_eq!(
            a.weight.to_vec2::<f32>().unwrap(),
            b.weight.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_clone_shares_parameters() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = Dense::new(2, 2, LayerInit::Zeros, &mut rng, &Device::Cpu).unwrap();
        let copy = layer.clone();

        let ones = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
        layer.weight.set(&ones).unwrap();
        assert_eq!(
            copy.weight.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 1.0], vec![1.0, 1.0]]
        );
    }

    #[test]
    fn test_zero_sized_layer_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Dense::new(0, 2, LayerInit::Zeros, &mut rng, &Device::Cpu).is_err());
    }
}
