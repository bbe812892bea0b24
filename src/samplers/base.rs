//! One-stage negative sampling.
//!
//! Negatives are drawn directly from the negative item distribution over the
//! whole catalog, ignoring the model. With `strict_negative`, each row draws
//! from that distribution restricted to items its user has not interacted
//! with.
use ndarray::Array2;
use rand::distributions::{Distribution, WeightedIndex};

use rand_xorshift::XorShiftRng;

use super::{PositiveBatch, PositiveBatchSource, Sampler, SamplerConfig, Similarity, WeightDistribution};
use crate::data::{InteractionMatrix, Interactions};
use crate::{ItemId, SamplingError, UserId};

/// Samples negatives independently of the model being trained.
#[derive(Clone, Debug)]
pub struct BaseSampler {
    batch_size: usize,
    num_negatives: usize,
    strict_negative: bool,
    positives: PositiveBatchSource,
    negatives: WeightDistribution,
    interactions: InteractionMatrix,
    rng: XorShiftRng,
}

impl BaseSampler {
    /// Build a sampler over `train`.
    pub fn new(train: &Interactions, config: SamplerConfig) -> Result<Self, SamplingError> {
        config.validate()?;

        let positives = PositiveBatchSource::new(train, config.positive_weights.as_deref())?;
        let negatives = WeightDistribution::new(train.num_items(), config.negative_weights.as_deref())?;

        tracing::info!(
            num_interactions = train.len() as u64,
            num_items = train.num_items() as u64,
            batch_size = config.batch_size as u64,
            num_negatives = config.num_negatives as u64,
            strict_negative = config.strict_negative,
            "base sampler initialized"
        );

        Ok(BaseSampler {
            batch_size: config.batch_size,
            num_negatives: config.num_negatives,
            strict_negative: config.strict_negative,
            positives,
            negatives,
            interactions: train.to_compressed(),
            rng: config.rng,
        })
    }

    /// Draw `batch_size` positive rows.
    pub fn draw_positives(&mut self, batch_size: usize) -> PositiveBatch {
        self.positives.draw_positives(batch_size, &mut self.rng)
    }

    /// Draw `num_negatives` items for every user in `user_ids`.
    pub fn draw_negatives(&mut self, user_ids: &[UserId]) -> Result<Array2<ItemId>, SamplingError> {
        let mut negatives = Array2::zeros((user_ids.len(), self.num_negatives));

        for (&user_id, mut row) in user_ids.iter().zip(negatives.outer_iter_mut()) {
            if !self.strict_negative {
                for negative in row.iter_mut() {
                    *negative = self.negatives.sample(&mut self.rng);
                }
                continue;
            }

            match self.user_negatives(user_id)? {
                Some(index) => {
                    for negative in row.iter_mut() {
                        *negative = index.sample(&mut self.rng);
                    }
                }
                None => {
                    tracing::debug!(
                        user_id = user_id as u64,
                        "no weighted non-positive items, drawing uniformly from the catalog"
                    );
                    let uniform = WeightDistribution::uniform(self.negatives.len())?;
                    for negative in row.iter_mut() {
                        *negative = uniform.sample(&mut self.rng);
                    }
                }
            }
        }

        Ok(negatives)
    }

    /// Negative weights with the user's positives zeroed, or `None` if no
    /// weight is left.
    fn user_negatives(&self, user_id: UserId) -> Result<Option<WeightedIndex<f32>>, SamplingError> {
        let mut weights: Vec<f32> = (0..self.negatives.len())
            .map(|item_id| self.negatives.weight(item_id))
            .collect();

        if let Some(user) = self.interactions.get_user(user_id) {
            for &item_id in user.item_ids {
                weights[item_id] = 0.0;
            }
        }

        if weights.iter().sum::<f32>() <= 0.0 {
            return Ok(None);
        }

        WeightedIndex::new(&weights).map(Some).map_err(|err| {
            SamplingError::configuration(format!("invalid negative weights: {}", err))
        })
    }
}

impl Sampler for BaseSampler {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn num_negatives(&self) -> usize {
        self.num_negatives
    }

    fn num_interactions(&self) -> usize {
        self.positives.len()
    }

    fn positive_batch(&mut self) -> PositiveBatch {
        let batch_size = self.batch_size;
        self.draw_positives(batch_size)
    }

    fn negative_batch<S: Similarity + ?Sized>(
        &mut self,
        user_ids: &[UserId],
        _similarity: &S,
    ) -> Result<Array2<ItemId>, SamplingError> {
        self.draw_negatives(user_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Interaction;

    fn train() -> Interactions {
        let mut data = Interactions::new(3, 6);

        for item_id in 0..5 {
            data.push(Interaction::new(0, item_id));
        }
        data.push(Interaction::new(1, 0));
        data.push(Interaction::new(2, 5));

        data
    }

    #[test]
    fn negatives_have_the_batch_shape() {
        let mut sampler = BaseSampler::new(
            &train(),
            SamplerConfig::new()
                .batch_size(4)
                .num_negatives(3)
                .from_seed([42; 16]),
        )
        .unwrap();

        let negatives = sampler.draw_negatives(&[0, 1, 2, 0]).unwrap();

        assert_eq!(negatives.shape(), &[4, 3]);
        assert!(negatives.iter().all(|&item_id| item_id < 6));
    }

    #[test]
    fn strict_negatives_skip_positives() {
        let mut sampler = BaseSampler::new(
            &train(),
            SamplerConfig::new()
                .num_negatives(20)
                .strict_negative(true)
                .from_seed([42; 16]),
        )
        .unwrap();

        let negatives = sampler.draw_negatives(&[0, 1]).unwrap();

        // User 0 interacted with everything but item 5.
        assert!(negatives.row(0).iter().all(|&item_id| item_id == 5));
        assert!(negatives.row(1).iter().all(|&item_id| item_id != 0));
    }

    #[test]
    fn strict_negatives_fall_back_to_the_catalog() {
        // Only items 0 and 1 carry weight, and user 0 interacted with both.
        let mut sampler = BaseSampler::new(
            &train(),
            SamplerConfig::new()
                .num_negatives(50)
                .strict_negative(true)
                .negative_weights(vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0])
                .from_seed([42; 16]),
        )
        .unwrap();

        let negatives = sampler.draw_negatives(&[0]).unwrap();

        assert!(negatives.iter().any(|&item_id| item_id >= 2));
    }

    #[test]
    fn negatives_follow_negative_weights() {
        let mut sampler = BaseSampler::new(
            &train(),
            SamplerConfig::new()
                .num_negatives(30)
                .negative_weights(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0])
                .from_seed([42; 16]),
        )
        .unwrap();

        let negatives = sampler.draw_negatives(&[1, 2]).unwrap();

        assert!(negatives.iter().all(|&item_id| item_id == 3));
    }

    #[test]
    fn sample_batch_ignores_the_model() {
        struct Unused;

        impl Similarity for Unused {
            fn embedding_dim(&self) -> usize {
                unreachable!()
            }
            fn similarity(&self, _: &[UserId], _: &[ItemId]) -> Array2<f32> {
                unreachable!()
            }
        }

        let mut sampler = BaseSampler::new(
            &train(),
            SamplerConfig::new()
                .batch_size(5)
                .num_negatives(2)
                .from_seed([42; 16]),
        )
        .unwrap();

        let batch = sampler.sample_batch(&Unused).unwrap();

        assert_eq!(batch.len(), 5);
        assert_eq!(batch.negatives.shape(), &[5, 2]);
    }
}
