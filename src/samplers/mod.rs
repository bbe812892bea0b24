//! Positive and negative sampling for pairwise and triplet training.
//!
//! Two samplers are provided:
//!
//! - [`base::BaseSampler`] draws negatives directly from the item catalog;
//! - [`two_stage::TwoStageSampler`] draws a cheap candidate pool first and then
//!   resamples the final negatives using spread-out weights computed from the
//!   similarity between each user and each candidate.
//!
//! Both share the positive side: rows of the training set drawn uniformly or in
//! proportion to configured weights.
use ndarray::Array2;
use rand::distributions::{Distribution, Uniform, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use super::data::{Interaction, Interactions};
use super::{ItemId, SamplingError, UserId};

pub mod base;
pub mod two_stage;

/// Something that can score the similarity between users and items.
///
/// The similarity must be bounded to `[-1, 1]` (a cosine or an inner product
/// of vectors on the unit ball): the spread-out weights are only defined on
/// that domain.
pub trait Similarity {
    /// Dimensionality of the embedding space the similarities live in.
    fn embedding_dim(&self) -> usize;
    /// Return a `(user_ids.len(), item_ids.len())` matrix of similarities.
    fn similarity(&self, user_ids: &[UserId], item_ids: &[ItemId]) -> Array2<f32>;
}

/// Trait describing samplers that can produce full training batches.
pub trait Sampler {
    /// Number of rows in each batch.
    fn batch_size(&self) -> usize;
    /// Number of negatives drawn for every row.
    fn num_negatives(&self) -> usize;
    /// Number of positive rows available to sample from.
    fn num_interactions(&self) -> usize;
    /// Draw a batch of positive rows.
    fn positive_batch(&mut self) -> PositiveBatch;
    /// Draw a `(user_ids.len(), num_negatives)` matrix of negative items.
    fn negative_batch<S: Similarity + ?Sized>(
        &mut self,
        user_ids: &[UserId],
        similarity: &S,
    ) -> Result<Array2<ItemId>, SamplingError>;
    /// Draw positives, then negatives for the users in them.
    fn sample_batch<S: Similarity + ?Sized>(&mut self, similarity: &S) -> Result<Batch, SamplingError> {
        let positives = self.positive_batch();
        let negatives = self.negative_batch(&positives.user_ids, similarity)?;

        Ok(Batch {
            user_ids: positives.user_ids,
            item_ids: positives.item_ids,
            weights: positives.weights,
            negatives,
        })
    }
}

/// Configuration shared by all samplers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    batch_size: usize,
    num_negatives: usize,
    num_candidates: usize,
    strict_negative: bool,
    positive_weights: Option<Vec<f32>>,
    negative_weights: Option<Vec<f32>>,
    rng: XorShiftRng,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig::new()
    }
}

impl SamplerConfig {
    /// Build a new configuration with default values.
    pub fn new() -> Self {
        SamplerConfig {
            batch_size: 256,
            num_negatives: 10,
            num_candidates: 200,
            strict_negative: false,
            positive_weights: None,
            negative_weights: None,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
        }
    }

    /// Set the number of positive rows per batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of negatives drawn per positive row.
    pub fn num_negatives(mut self, num_negatives: usize) -> Self {
        self.num_negatives = num_negatives;
        self
    }

    /// Set the size of the first-stage candidate pool.
    pub fn num_candidates(mut self, num_candidates: usize) -> Self {
        self.num_candidates = num_candidates;
        self
    }

    /// Exclude items the user has already interacted with from the negatives.
    pub fn strict_negative(mut self, strict_negative: bool) -> Self {
        self.strict_negative = strict_negative;
        self
    }

    /// Set the positive sampling weights, either one per item or one per
    /// training row.
    pub fn positive_weights(mut self, weights: Vec<f32>) -> Self {
        self.positive_weights = Some(weights);
        self
    }

    /// Set the negative sampling weights, one per item.
    pub fn negative_weights(mut self, weights: Vec<f32>) -> Self {
        self.negative_weights = Some(weights);
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    fn validate(&self) -> Result<(), SamplingError> {
        for &(name, value) in &[
            ("batch_size", self.batch_size),
            ("num_negatives", self.num_negatives),
            ("num_candidates", self.num_candidates),
        ] {
            if value == 0 {
                return Err(SamplingError::configuration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// A categorical distribution over `0..len`, uniform unless weights are given.
#[derive(Clone, Debug)]
pub struct WeightDistribution {
    len: usize,
    weights: Option<Vec<f32>>,
    sampler: Categorical,
}

#[derive(Clone, Debug)]
enum Categorical {
    Uniform(Uniform<usize>),
    Weighted(WeightedIndex<f32>),
}

impl WeightDistribution {
    /// Uniform distribution over `0..len`.
    pub fn uniform(len: usize) -> Result<Self, SamplingError> {
        WeightDistribution::new(len, None)
    }

    /// Categorical distribution over `0..len`. The weights, if given, must
    /// have exactly `len` non-negative entries with a positive sum.
    pub fn new(len: usize, weights: Option<&[f32]>) -> Result<Self, SamplingError> {
        if len == 0 {
            return Err(SamplingError::configuration(
                "cannot sample from an empty support",
            ));
        }

        match weights {
            None => Ok(WeightDistribution {
                len,
                weights: None,
                sampler: Categorical::Uniform(Uniform::new(0, len)),
            }),
            Some(weights) => {
                if weights.len() != len {
                    return Err(SamplingError::configuration(format!(
                        "expected {} weights, got {}",
                        len,
                        weights.len()
                    )));
                }

                let index = WeightedIndex::new(weights).map_err(|err| {
                    SamplingError::configuration(format!("invalid sampling weights: {}", err))
                })?;

                Ok(WeightDistribution {
                    len,
                    weights: Some(weights.to_owned()),
                    sampler: Categorical::Weighted(index),
                })
            }
        }
    }

    /// Size of the support.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the support is empty. Always false for a constructed distribution.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unnormalised weight of `idx`; 1 for uniform distributions.
    pub fn weight(&self, idx: usize) -> f32 {
        self.weights.as_ref().map_or(1.0, |weights| weights[idx])
    }

    /// Whether all weights are equal.
    pub fn is_uniform(&self) -> bool {
        self.weights.is_none()
    }
}

impl Distribution<usize> for WeightDistribution {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        match self.sampler {
            Categorical::Uniform(ref uniform) => uniform.sample(rng),
            Categorical::Weighted(ref weighted) => weighted.sample(rng),
        }
    }
}

/// A batch of positive rows.
#[derive(Clone, Debug, PartialEq)]
pub struct PositiveBatch {
    /// User of each row.
    pub user_ids: Vec<UserId>,
    /// Positive item of each row.
    pub item_ids: Vec<ItemId>,
    /// Weight of each row.
    pub weights: Vec<f32>,
}

impl PositiveBatch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// A full training batch: positive rows plus their negatives.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// User of each row.
    pub user_ids: Vec<UserId>,
    /// Positive item of each row.
    pub item_ids: Vec<ItemId>,
    /// Weight of each row.
    pub weights: Vec<f32>,
    /// `(rows, num_negatives)` negative items.
    pub negatives: Array2<ItemId>,
}

impl Batch {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// Draws positive rows from the training set.
#[derive(Clone, Debug)]
pub struct PositiveBatchSource {
    interactions: Vec<Interaction>,
    distribution: WeightDistribution,
}

impl PositiveBatchSource {
    /// Build a source over `train`.
    ///
    /// `weights` may hold one entry per item, in which case each row takes the
    /// weight of its item, or one entry per training row.
    pub fn new(train: &Interactions, weights: Option<&[f32]>) -> Result<Self, SamplingError> {
        if train.is_empty() {
            return Err(SamplingError::configuration(
                "the training set has no interactions",
            ));
        }

        let row_weights = match weights {
            None => None,
            Some(weights) if weights.len() == train.len() => Some(weights.to_owned()),
            Some(weights) if weights.len() == train.num_items() => Some(
                train
                    .data()
                    .iter()
                    .map(|interaction| weights[interaction.item_id()])
                    .collect::<Vec<_>>(),
            ),
            Some(weights) => {
                return Err(SamplingError::configuration(format!(
                    "positive weights must have one entry per item ({}) or per row ({}), got {}",
                    train.num_items(),
                    train.len(),
                    weights.len()
                )))
            }
        };

        let distribution = WeightDistribution::new(train.len(), row_weights.as_deref())?;

        Ok(PositiveBatchSource {
            interactions: train.data().to_owned(),
            distribution,
        })
    }

    /// Draw `batch_size` rows with replacement.
    pub fn draw_positives<R: Rng>(&self, batch_size: usize, rng: &mut R) -> PositiveBatch {
        let mut batch = PositiveBatch {
            user_ids: Vec::with_capacity(batch_size),
            item_ids: Vec::with_capacity(batch_size),
            weights: Vec::with_capacity(batch_size),
        };

        for _ in 0..batch_size {
            let interaction = &self.interactions[self.distribution.sample(rng)];
            batch.user_ids.push(interaction.user_id());
            batch.item_ids.push(interaction.item_id());
            batch.weights.push(interaction.weight());
        }

        batch
    }

    /// Number of rows available.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no rows. Always false for a constructed source.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}
