use crate::traits::*;
use ndarray::prelude::*;
use num_traits::{Float, FromPrimitive};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

impl<T> SampleOps for Array2<T>
where
    T: Float + FromPrimitive,
{
    type Mat = Self;
    type Scalar = T;

    fn runif_seeded(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((dd, nn), || {
            T::from_f64(rng.random::<f64>()).unwrap_or_else(T::zero)
        })
    }
}
