//! Genetic operators over recipe value vectors.
//!
//! All operators are pure functions of their inputs and an explicit RNG, so
//! a generation bred twice from the same seed and the same fitness values is
//! identical.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use synthq_core::RecipeSchema;

/// Which direction the experiment optimizes fitness in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitnessDirection {
    /// Higher fitness is fitter
    #[default]
    Maximize,
    /// Lower fitness is fitter
    Minimize,
}

impl FitnessDirection {
    /// Map a raw fitness so that a larger oriented value is always fitter.
    pub fn orient(&self, fitness: f64) -> f64 {
        match self {
            FitnessDirection::Maximize => fitness,
            FitnessDirection::Minimize => -fitness,
        }
    }
}

/// Survivor selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Probabilistic draw over softmaxed fitness, without replacement
    #[default]
    Softmax,
    /// Deterministic truncation to the best `count`
    TopK,
}

impl Selection {
    /// Select `count` indices from oriented fitness values.
    ///
    /// `temperature` only affects the softmax strategy.
    pub fn select<R: Rng>(
        &self,
        fitnesses: &[f64],
        count: usize,
        temperature: f64,
        rng: &mut R,
    ) -> Vec<usize> {
        match self {
            Selection::Softmax => softmax_draw(fitnesses, count, temperature, rng),
            Selection::TopK => top_k(fitnesses, count),
        }
    }
}

/// Softmax of `values` at the given temperature.
///
/// A high temperature flattens the distribution so less fit individuals
/// still stand a chance; a low temperature sharpens it towards the best.
pub fn softmax(values: &[f64], temperature: f64) -> Vec<f64> {
    // Shift by the max so the exponentials stay finite.
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| ((v - max) / temperature).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Draw `count` indices over softmaxed fitness, without replacement.
///
/// Each drawn index has its weight zeroed before the next draw. Once every
/// weight is zero the remaining draws fall back to a uniform distribution,
/// so over-drawing a small pool repeats rather than panics.
pub fn softmax_draw<R: Rng>(
    fitnesses: &[f64],
    count: usize,
    temperature: f64,
    rng: &mut R,
) -> Vec<usize> {
    let mut weights = softmax(fitnesses, temperature);
    let mut drawn = Vec::with_capacity(count);
    for _ in 0..count {
        normalize(&mut weights);
        let index = weighted_index(&weights, rng);
        drawn.push(index);
        weights[index] = 0.0;
    }
    drawn
}

fn normalize(weights: &mut [f64]) {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        let uniform = 1.0 / weights.len() as f64;
        for weight in weights.iter_mut() {
            *weight = uniform;
        }
        return;
    }
    for weight in weights.iter_mut() {
        *weight /= sum;
    }
}

fn weighted_index<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let mut spin = rng.gen::<f64>();
    for (index, weight) in weights.iter().enumerate() {
        spin -= weight;
        if spin <= 0.0 {
            return index;
        }
    }
    weights.len() - 1
}

/// Truncation selection: indices of the best `count` values, fittest first.
pub fn top_k(fitnesses: &[f64], count: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..fitnesses.len()).collect();
    indices.sort_by(|&a, &b| fitnesses[b].total_cmp(&fitnesses[a]));
    indices.truncate(count);
    indices
}

/// Uniform random parameter values within the schema's bounds.
pub fn seed_values<R: Rng>(schema: &RecipeSchema, rng: &mut R) -> Vec<f64> {
    schema
        .bounds
        .iter()
        .map(|bound| rng.gen_range(bound.min..=bound.max))
        .collect()
}

/// Per-locus blend crossover.
///
/// Each locus inherits from parent one (25%), parent two (25%), or a random
/// convex mix of both (50%).
pub fn crossover<R: Rng>(parent1: &[f64], parent2: &[f64], rng: &mut R) -> Vec<f64> {
    parent1
        .iter()
        .zip(parent2)
        .map(|(&a, &b)| {
            let draw = rng.gen::<f64>();
            if draw < 0.25 {
                a
            } else if draw < 0.5 {
                b
            } else {
                let mix = rng.gen::<f64>();
                mix * a + (1.0 - mix) * b
            }
        })
        .collect()
}

/// Per-locus Gaussian mutation.
///
/// Each locus gains zero-mean noise of standard deviation `per_locus_sd`
/// with probability `per_locus_rate`. Callers clip the result back into
/// schema bounds afterwards.
pub fn mutate<R: Rng>(values: &mut [f64], per_locus_rate: f64, per_locus_sd: f64, rng: &mut R) {
    let Ok(noise) = Normal::new(0.0, per_locus_sd) else {
        return;
    };
    for value in values.iter_mut() {
        if rng.gen::<f64>() < per_locus_rate {
            *value += noise.sample(rng);
        }
    }
}
