//! Random number kernels and the generator states they advance.
//!
//! A state is created once per node and reused on every call, so repeated
//! executions of the same graph continue one stream instead of replaying it.

use crate::error::{KernelError, Result};
use rand::distributions::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use refgraph_core::Element;

/// Generator and distribution behind a mask-generating node.
#[derive(Debug, Clone)]
pub struct BernoulliRngState {
    rng: StdRng,
    distribution: Bernoulli,
    seed: u64,
    probability: f64,
}

impl BernoulliRngState {
    /// Seeded generator producing `1` with probability `probability`.
    pub fn new(seed: u64, probability: f64) -> Result<Self> {
        let distribution = Bernoulli::new(probability).map_err(|e| {
            KernelError::invalid(format!("mask probability {probability} is invalid: {e}"))
        })?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            distribution,
            seed,
            probability,
        })
    }

    /// Seed the generator was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Probability of drawing a one.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    fn draw(&mut self) -> bool {
        self.distribution.sample(&mut self.rng)
    }
}

/// Generator behind a uniform random node.
#[derive(Debug, Clone)]
pub struct UniformRngState {
    rng: StdRng,
}

impl UniformRngState {
    /// Seeded when `seed` is given, otherwise drawn from system entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

/// Fill `out` with a 0/1 mask. Outside training every element is one.
pub fn generate_mask<T: Element>(out: &mut [T], state: &mut BernoulliRngState, training: bool) {
    for o in out.iter_mut() {
        *o = if training { T::from_bool(state.draw()) } else { T::one() };
    }
}

/// [`generate_mask`] with a throwaway generator, so equal seeds give equal
/// masks.
pub fn generate_mask_no_state<T: Element>(
    out: &mut [T],
    training: bool,
    seed: u64,
    probability: f64,
) -> Result<()> {
    let mut state = BernoulliRngState::new(seed, probability)?;
    generate_mask(out, &mut state, training);
    Ok(())
}

fn fill_uniform<T: Element>(out: &mut [T], min: f64, max: f64, rng: &mut StdRng) -> Result<()> {
    if min.is_nan() || max.is_nan() || min > max {
        return Err(KernelError::invalid(format!(
            "uniform range [{min}, {max}) is empty"
        )));
    }
    let ceiling = (min < max && max.is_finite()).then(|| largest_below::<T>(min, max));
    for o in out.iter_mut() {
        let unit: f64 = rng.gen();
        let value = T::from_f64(min + (max - min) * unit);
        *o = match ceiling {
            // narrow types can round a draw up onto `max`
            Some(ceiling) if value.to_f64() >= max => ceiling,
            _ => value,
        };
    }
    Ok(())
}

/// Largest `T` strictly below a finite `max`, or `min` when no such value
/// lies in the range.
fn largest_below<T: Element>(min: f64, max: f64) -> T {
    let mut gap = (max.abs() * f64::EPSILON / 4.0).max(f64::MIN_POSITIVE);
    while gap.is_finite() {
        let candidate = T::from_f64(max - gap);
        if candidate.to_f64() < max {
            return if candidate.to_f64() < min { T::from_f64(min) } else { candidate };
        }
        gap *= 2.0;
    }
    T::from_f64(min)
}

/// Fill `out` with values drawn uniformly from `[min, max)`.
pub fn random_uniform<T: Element>(
    out: &mut [T],
    min: f64,
    max: f64,
    state: &mut UniformRngState,
) -> Result<()> {
    fill_uniform(out, min, max, &mut state.rng)
}

/// [`random_uniform`] from a fresh generator seeded with `seed`.
pub fn random_uniform_with_fixed_seed<T: Element>(
    out: &mut [T],
    min: f64,
    max: f64,
    seed: u64,
) -> Result<()> {
    fill_uniform(out, min, max, &mut StdRng::seed_from_u64(seed))
}
