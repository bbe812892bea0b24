use std::sync::Arc;

use ndarray::Array2;
use rayon::prelude::*;

use wyrm;
use wyrm::optim::{Optimizer as Optim, Optimizers};
use wyrm::{BoxedNode, DataInput, Variable};

use super::embedding_row;
use crate::samplers::{Sampler, Similarity};
use crate::{FittingError, ItemId, PredictionError, RankingModel, UserId};

/// Parameters of a model with user and item embeddings, able to build a
/// training graph of a fixed batch shape.
pub trait EmbeddingModelParameters {
    type Output: EmbeddingModel;
    fn embedding_dim(&self) -> usize;
    fn user_embedding(&self) -> &Arc<wyrm::HogwildParameter>;
    fn item_embedding(&self) -> &Arc<wyrm::HogwildParameter>;
    fn num_epochs(&self) -> usize;
    fn optimizer(&self) -> Optimizers;
    /// Weight applied to the summed per-row losses.
    fn loss_scale(&self, batch_size: usize, num_negatives: usize) -> f32;
    fn build(&self, batch_size: usize, num_negatives: usize) -> Self::Output;
    /// Score a single pair, or `None` if either id is out of range.
    fn predict_single(&self, user_id: UserId, item_id: ItemId) -> Option<f32>;
}

/// A training graph.
pub trait EmbeddingModel {
    /// Return the inputs of the graph:
    /// - users,
    /// - positive items,
    /// - one negative item input per negative sample.
    fn inputs(
        &self,
    ) -> (
        &Variable<wyrm::IndexInputNode>,
        &Variable<wyrm::IndexInputNode>,
        &[Variable<wyrm::IndexInputNode>],
    );
    /// The per-row loss node.
    fn loss(&mut self) -> &mut Variable<BoxedNode>;
}

pub fn fit_embedding_model<T: EmbeddingModelParameters + Sync, S: Sampler>(
    parameters: &T,
    sampler: &mut S,
) -> Result<f32, FittingError> {
    let num_interactions = sampler.num_interactions();

    if num_interactions == 0 {
        return Err(FittingError::NoInteractions);
    }

    let batch_size = sampler.batch_size();
    let num_negatives = sampler.num_negatives();
    let num_steps = (num_interactions / batch_size).max(1);
    let loss_scale = parameters.loss_scale(batch_size, num_negatives);

    let optimizer = parameters.optimizer();
    let mut model = parameters.build(batch_size, num_negatives);

    let mut epoch_loss = 0.0;

    for epoch in 0..parameters.num_epochs() {
        let mut loss_value = 0.0;

        for _ in 0..num_steps {
            let batch = sampler.sample_batch(parameters)?;

            {
                let (users, positives, negatives) = model.inputs();

                users.set_value(batch.user_ids.as_slice());
                positives.set_value(batch.item_ids.as_slice());

                for (column, negative) in negatives.iter().enumerate() {
                    let negative_ids = batch.negatives.column(column).to_vec();
                    negative.set_value(negative_ids.as_slice());
                }
            }

            let loss = model.loss();
            loss.forward();

            let step_loss = loss_scale * loss.value().iter().sum::<f32>();

            if !step_loss.is_finite() {
                return Err(FittingError::InvalidLossValue);
            }

            loss_value += step_loss;

            loss.backward(loss_scale);
            optimizer.step(loss.parameters());
        }

        epoch_loss = loss_value / num_steps as f32;

        tracing::info!(
            epoch = epoch as u64,
            loss = f64::from(epoch_loss),
            "finished epoch"
        );
    }

    Ok(epoch_loss)
}

impl<T: EmbeddingModelParameters> Similarity for T {
    fn embedding_dim(&self) -> usize {
        EmbeddingModelParameters::embedding_dim(self)
    }

    /// Cosine similarity between each user's embedding and each item's.
    fn similarity(&self, user_ids: &[UserId], item_ids: &[ItemId]) -> Array2<f32> {
        let user_embeddings = self.user_embedding().value();
        let item_embeddings = self.item_embedding().value();

        let items: Vec<Option<(&[f32], f32)>> = item_ids
            .iter()
            .map(|&item_id| {
                embedding_row(item_embeddings, item_id).map(|item| (item, norm(item)))
            })
            .collect();

        let mut similarities = Array2::zeros((user_ids.len(), item_ids.len()));

        for (&user_id, mut row) in user_ids.iter().zip(similarities.outer_iter_mut()) {
            let user = match embedding_row(user_embeddings, user_id) {
                Some(user) => user,
                None => continue,
            };
            let user_norm = norm(user);

            for (similarity, item) in row.iter_mut().zip(&items) {
                if let Some((item, item_norm)) = *item {
                    let denominator = user_norm * item_norm;
                    if denominator > 0.0 {
                        *similarity =
                            (wyrm::simd_dot(user, item) / denominator).max(-1.0).min(1.0);
                    }
                }
            }
        }

        similarities
    }
}

fn norm(x: &[f32]) -> f32 {
    wyrm::simd_dot(x, x).sqrt()
}

impl<T: EmbeddingModelParameters + Sync> RankingModel for T {
    fn predict(&self, pairs: &[(UserId, ItemId)]) -> Result<Vec<f32>, PredictionError> {
        pairs
            .par_iter()
            .map(|&(user_id, item_id)| {
                let prediction = self
                    .predict_single(user_id, item_id)
                    .ok_or(PredictionError::UnknownId)?;

                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue)
                }
            })
            .collect()
    }
}
