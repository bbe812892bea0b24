//! Two-stage negative sampling.
//!
//! Each training step runs three operations in order:
//!
//! 1. [`TwoStageSampler::draw_candidates`] draws a pool of candidate items from
//!    the negative item distribution, shared by the whole batch;
//! 2. [`TwoStageSampler::compute_weights`] turns a `(batch, pool)` matrix of
//!    user/candidate similarities into spread-out sampling weights;
//! 3. [`TwoStageSampler::draw_negatives`] draws the final negatives for every
//!    row from that row's own weights, optionally excluding the user's positives.
//!
//! The sampler tracks which of these has run and rejects calls made out of
//! order. The similarities must be bounded (cosine, or inner products on the
//! unit ball); they are *not* distances.
use std::mem;

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_distr::Beta;
use rand_xorshift::XorShiftRng;

use super::{PositiveBatch, PositiveBatchSource, Sampler, SamplerConfig, Similarity, WeightDistribution};
use crate::data::{InteractionMatrix, Interactions};
use crate::{ItemId, SamplingError, UserId};

/// Similarities at or above this are treated as degenerate and masked out.
const MAX_SIMILARITY: f32 = 0.99;
/// Rows whose strict-negative weights sum to at most this are reset.
const STRICT_NEGATIVE_EPSILON: f64 = 1e-10;
/// Log of the largest total weight a row may carry.
const MAX_LOG_WEIGHT: f64 = 700.0;

#[derive(Clone, Debug)]
enum StepState {
    Empty,
    CandidatesReady {
        candidates: Vec<ItemId>,
    },
    WeightsReady {
        candidates: Vec<ItemId>,
        weights: Array2<f64>,
    },
}

impl StepState {
    fn name(&self) -> &'static str {
        match *self {
            StepState::Empty => "empty",
            StepState::CandidatesReady { .. } => "candidates-ready",
            StepState::WeightsReady { .. } => "weights-ready",
        }
    }

    fn candidates(&self) -> Option<&[ItemId]> {
        match *self {
            StepState::Empty => None,
            StepState::CandidatesReady { ref candidates }
            | StepState::WeightsReady { ref candidates, .. } => Some(candidates),
        }
    }

    fn weights(&self) -> Option<&Array2<f64>> {
        match *self {
            StepState::WeightsReady { ref weights, .. } => Some(weights),
            _ => None,
        }
    }
}

/// Compute spread-out sampling weights for a `(rows, candidates)` matrix of
/// similarities in embedding dimension `dim`.
///
/// A single `beta ~ Beta((dim - 1) / 2, 1 / 2)` is drawn for the whole matrix.
/// Every returned row has a strictly positive sum.
pub fn spreadout_weights<R: Rng + ?Sized>(
    similarities: ArrayView2<f32>,
    dim: usize,
    rng: &mut R,
) -> Result<Array2<f64>, SamplingError> {
    if dim < 2 {
        return Err(SamplingError::configuration(format!(
            "spread-out weights need an embedding dimension of at least 2, got {}",
            dim
        )));
    }

    let beta = Beta::new((dim as f64 - 1.0) / 2.0, 0.5)
        .map_err(|err| SamplingError::configuration(format!("invalid Beta shape: {}", err)))?
        .sample(rng);

    Ok(spreadout_weights_with_beta(similarities, dim, beta))
}

/// [`spreadout_weights`] with a fixed `beta` draw.
///
/// For every entry with `0 < s < 0.99` the weight is
/// `exp(alpha * ln(1 - s^2) + ln(beta))` with `alpha = 1 - (dim - 1) / 2`;
/// all other entries get zero. Rows left with no weight become uniform.
pub fn spreadout_weights_with_beta(similarities: ArrayView2<f32>, dim: usize, beta: f64) -> Array2<f64> {
    let alpha = 1.0 - (dim as f64 - 1.0) / 2.0;
    let log_beta = beta.ln();

    let mut weights = Array2::zeros(similarities.dim());

    for (mut weight_row, similarity_row) in weights.outer_iter_mut().zip(similarities.outer_iter()) {
        let mut max_log_weight = std::f64::NEG_INFINITY;

        for (weight, &similarity) in weight_row.iter_mut().zip(similarity_row.iter()) {
            *weight = if similarity > 0.0 && similarity < MAX_SIMILARITY {
                let similarity = f64::from(similarity);
                let log_weight = alpha * (1.0 - similarity * similarity).ln() + log_beta;
                max_log_weight = max_log_weight.max(log_weight);
                log_weight
            } else {
                std::f64::NEG_INFINITY
            };
        }

        // A constant shift leaves the row's categorical distribution
        // unchanged; the limit keeps the row sum below exp(MAX_LOG_WEIGHT).
        let limit = MAX_LOG_WEIGHT - (weight_row.len().max(1) as f64).ln();
        let shift = if max_log_weight > limit {
            max_log_weight - limit
        } else {
            0.0
        };

        weight_row.mapv_inplace(|log_weight| (log_weight - shift).exp());

        if weight_row.sum() == 0.0 {
            weight_row.fill(1.0);
        }
    }

    weights
}

/// Two-stage negative sampler.
///
/// Not safe to share between concurrent training steps: every stateful
/// operation takes `&mut self`.
#[derive(Clone, Debug)]
pub struct TwoStageSampler {
    batch_size: usize,
    num_negatives: usize,
    num_candidates: usize,
    strict_negative: bool,
    positives: PositiveBatchSource,
    negatives: WeightDistribution,
    interactions: InteractionMatrix,
    rng: XorShiftRng,
    state: StepState,
}

impl TwoStageSampler {
    /// Build a sampler over `train`.
    pub fn new(train: &Interactions, config: SamplerConfig) -> Result<Self, SamplingError> {
        config.validate()?;

        let positives = PositiveBatchSource::new(train, config.positive_weights.as_deref())?;
        let negatives = WeightDistribution::new(train.num_items(), config.negative_weights.as_deref())?;

        tracing::info!(
            num_interactions = train.len() as u64,
            num_items = train.num_items() as u64,
            batch_size = config.batch_size as u64,
            num_candidates = config.num_candidates as u64,
            num_negatives = config.num_negatives as u64,
            strict_negative = config.strict_negative,
            "two-stage sampler initialized"
        );

        Ok(TwoStageSampler {
            batch_size: config.batch_size,
            num_negatives: config.num_negatives,
            num_candidates: config.num_candidates,
            strict_negative: config.strict_negative,
            positives,
            negatives,
            interactions: train.to_compressed(),
            rng: config.rng,
            state: StepState::Empty,
        })
    }

    /// Size of the candidate pool drawn by [`Sampler::negative_batch`].
    pub fn num_candidates(&self) -> usize {
        self.num_candidates
    }

    /// Draw `batch_size` positive rows.
    pub fn draw_positives(&mut self, batch_size: usize) -> PositiveBatch {
        self.positives.draw_positives(batch_size, &mut self.rng)
    }

    /// Draw `pool_size` candidates with replacement from the negative item
    /// distribution, replacing any candidates or weights from a previous step.
    pub fn draw_candidates(&mut self, pool_size: usize) -> Result<&[ItemId], SamplingError> {
        if pool_size == 0 {
            return Err(SamplingError::configuration("pool size must be positive"));
        }

        let candidates = (0..pool_size)
            .map(|_| self.negatives.sample(&mut self.rng))
            .collect();

        self.state = StepState::CandidatesReady { candidates };

        self.candidates()
            .ok_or_else(|| SamplingError::precondition("draw candidates", "empty"))
    }

    /// Use an explicit candidate pool for this step instead of drawing one.
    pub fn set_candidates(&mut self, candidates: Vec<ItemId>) -> Result<(), SamplingError> {
        if candidates.is_empty() {
            return Err(SamplingError::configuration("pool size must be positive"));
        }

        if let Some(&item_id) = candidates.iter().find(|&&item_id| item_id >= self.negatives.len()) {
            return Err(SamplingError::configuration(format!(
                "candidate item {} is outside the catalog of {} items",
                item_id,
                self.negatives.len()
            )));
        }

        self.state = StepState::CandidatesReady { candidates };

        Ok(())
    }

    /// The candidates of the current step, if drawn.
    pub fn candidates(&self) -> Option<&[ItemId]> {
        self.state.candidates()
    }

    /// The candidate weights of the current step, if computed.
    pub fn candidate_weights(&self) -> Option<&Array2<f64>> {
        self.state.weights()
    }

    /// Compute spread-out weights for the current candidates from a
    /// `(rows, num_candidates)` matrix of user/candidate similarities.
    pub fn compute_weights(
        &mut self,
        similarities: ArrayView2<f32>,
        dim: usize,
    ) -> Result<&Array2<f64>, SamplingError> {
        let candidates = match mem::replace(&mut self.state, StepState::Empty) {
            StepState::CandidatesReady { candidates } | StepState::WeightsReady { candidates, .. } => {
                candidates
            }
            StepState::Empty => {
                return Err(SamplingError::precondition("compute weights", "empty"));
            }
        };

        if similarities.ncols() != candidates.len() {
            let reason = format!(
                "similarities have {} columns but there are {} candidates",
                similarities.ncols(),
                candidates.len()
            );
            self.state = StepState::CandidatesReady { candidates };
            return Err(SamplingError::configuration(reason));
        }

        let weights = match spreadout_weights(similarities, dim, &mut self.rng) {
            Ok(weights) => weights,
            Err(err) => {
                self.state = StepState::CandidatesReady { candidates };
                return Err(err);
            }
        };

        self.state = StepState::WeightsReady { candidates, weights };

        self.candidate_weights()
            .ok_or_else(|| SamplingError::precondition("compute weights", "empty"))
    }

    /// Draw `num_negatives` items per row of `user_ids` from the current
    /// candidates, in proportion to each row's weights.
    ///
    /// Consumes the current step: candidates must be drawn again afterwards.
    pub fn draw_negatives(&mut self, user_ids: &[UserId]) -> Result<Array2<ItemId>, SamplingError> {
        let (candidates, weights) = match self.state {
            StepState::WeightsReady {
                ref candidates,
                ref weights,
            } => (candidates, weights),
            ref state => return Err(SamplingError::precondition("draw negatives", state.name())),
        };

        if user_ids.len() != self.batch_size {
            return Err(SamplingError::configuration(format!(
                "expected {} users, got {}",
                self.batch_size,
                user_ids.len()
            )));
        }

        if weights.nrows() != user_ids.len() {
            return Err(SamplingError::configuration(format!(
                "candidate weights have {} rows but there are {} users",
                weights.nrows(),
                user_ids.len()
            )));
        }

        let mut negatives = Array2::zeros((user_ids.len(), self.num_negatives));

        for (&user_id, row_weights, mut row_negatives) in
            izip!(user_ids, weights.outer_iter(), negatives.outer_iter_mut())
        {
            let row_weights = if self.strict_negative {
                strict_negative_weights(&self.interactions, user_id, candidates, row_weights)
            } else {
                row_weights.to_vec()
            };

            let index = WeightedIndex::new(&row_weights).map_err(|err| {
                SamplingError::configuration(format!("invalid candidate weights: {}", err))
            })?;

            let mut row_rng = XorShiftRng::seed_from_u64(self.rng.gen());

            for negative in row_negatives.iter_mut() {
                *negative = candidates[index.sample(&mut row_rng)];
            }
        }

        self.state = StepState::Empty;

        Ok(negatives)
    }
}

fn strict_negative_weights(
    interactions: &InteractionMatrix,
    user_id: UserId,
    candidates: &[ItemId],
    weights: ArrayView1<f64>,
) -> Vec<f64> {
    let is_positive: Vec<bool> = candidates
        .iter()
        .map(|&item_id| interactions.contains(user_id, item_id))
        .collect();

    let masked: Vec<f64> = izip!(weights.iter(), &is_positive)
        .map(|(&weight, &positive)| if positive { 0.0 } else { weight })
        .collect();

    if masked.iter().sum::<f64>() > STRICT_NEGATIVE_EPSILON {
        return masked;
    }

    if is_positive.iter().all(|&positive| positive) {
        tracing::debug!(
            user_id = user_id as u64,
            "every candidate is a positive, drawing uniformly from the pool"
        );
        return vec![1.0; candidates.len()];
    }

    tracing::debug!(
        user_id = user_id as u64,
        "no weight left after masking positives, drawing uniformly from non-positives"
    );

    is_positive
        .iter()
        .map(|&positive| if positive { 0.0 } else { 1.0 })
        .collect()
}

impl Sampler for TwoStageSampler {
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
        similarity: &S,
    ) -> Result<Array2<ItemId>, SamplingError> {
        let pool_size = self.num_candidates;
        let candidates = self.draw_candidates(pool_size)?.to_owned();

        let similarities = similarity.similarity(user_ids, &candidates);
        self.compute_weights(similarities.view(), similarity.embedding_dim())?;

        self.draw_negatives(user_ids)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ndarray::{arr2, Array2};
    use proptest::prelude::*;

    use super::*;
    use crate::data::Interaction;

    fn catalog(num_users: usize, num_items: usize) -> Interactions {
        let mut data = Interactions::new(num_users, num_items);

        for user_id in 0..num_users {
            data.push(Interaction::new(user_id, user_id % num_items));
        }

        data
    }

    fn sampler(train: &Interactions, config: SamplerConfig) -> TwoStageSampler {
        TwoStageSampler::new(train, config.from_seed([42; 16])).unwrap()
    }

    struct ConstantSimilarity(f32);

    impl Similarity for ConstantSimilarity {
        fn embedding_dim(&self) -> usize {
            16
        }
        fn similarity(&self, user_ids: &[UserId], item_ids: &[ItemId]) -> Array2<f32> {
            Array2::from_elem((user_ids.len(), item_ids.len()), self.0)
        }
    }

    #[test]
    fn masks_degenerate_similarities() {
        let mut rng = XorShiftRng::seed_from_u64(0);
        let similarities = arr2(&[[0.5_f32, -0.2, 0.995, 0.3]]);

        let weights = spreadout_weights(similarities.view(), 20, &mut rng).unwrap();

        assert!(weights[(0, 0)] > 0.0);
        assert_eq!(weights[(0, 1)], 0.0);
        assert_eq!(weights[(0, 2)], 0.0);
        assert!(weights[(0, 3)] > 0.0);
        // No uniform fallback: the masked entries stay at zero.
        assert!(weights.row(0).sum() > 0.0);
    }

    #[test]
    fn weights_follow_the_beta_kernel() {
        let similarities = arr2(&[[0.5_f32, 0.3]]);
        let beta = 0.8;
        let dim = 20;

        let weights = spreadout_weights_with_beta(similarities.view(), dim, beta);

        let alpha = 1.0 - (dim as f64 - 1.0) / 2.0;
        for (col, &similarity) in [0.5_f32, 0.3].iter().enumerate() {
            let similarity = f64::from(similarity);
            let expected = (alpha * (1.0 - similarity * similarity).ln() + beta.ln()).exp();
            let actual = weights[(0, col)];
            assert!(
                ((actual - expected) / expected).abs() < 1e-9,
                "expected {}, got {}",
                expected,
                actual
            );
        }
    }

    #[test]
    fn fully_masked_rows_become_uniform() {
        let mut rng = XorShiftRng::seed_from_u64(0);
        let similarities = arr2(&[[1.0_f32, 1.0, 1.0, 1.0], [0.5, 1.0, 1.0, 1.0]]);

        let weights = spreadout_weights(similarities.view(), 20, &mut rng).unwrap();

        assert_eq!(weights.row(0).to_vec(), vec![1.0; 4]);
        assert!(weights[(1, 0)] > 0.0);
        assert_eq!(weights[(1, 1)], 0.0);
    }

    #[test]
    fn large_dimensions_stay_finite() {
        let mut rng = XorShiftRng::seed_from_u64(5);
        let similarities = arr2(&[[0.98_f32, 0.1, 0.5]]);

        let weights = spreadout_weights(similarities.view(), 1024, &mut rng).unwrap();

        assert!(weights.iter().all(|weight| weight.is_finite()));
        assert!(weights[(0, 0)] > weights[(0, 2)]);
        assert!(weights[(0, 2)] >= weights[(0, 1)]);
    }

    #[test]
    fn wide_rows_near_the_mask_have_finite_sums() {
        let train = catalog(4, 20_000);
        let mut sampler = sampler(
            &train,
            SamplerConfig::new()
                .batch_size(1)
                .num_negatives(5)
                .num_candidates(20_000),
        );

        sampler.draw_candidates(20_000).unwrap();
        let weights = sampler
            .compute_weights(Array2::from_elem((1, 20_000), 0.98).view(), 1024)
            .unwrap();

        let row_sum = weights.row(0).sum();
        assert!(row_sum.is_finite() && row_sum > 0.0, "row sum {}", row_sum);

        let negatives = sampler.draw_negatives(&[0]).unwrap();
        assert_eq!(negatives.dim(), (1, 5));
    }

    #[test]
    fn each_row_draws_from_its_own_weights() {
        let train = catalog(4, 20);
        let mut sampler = sampler(
            &train,
            SamplerConfig::new().batch_size(2).num_negatives(25),
        );

        let candidates = vec![10, 11, 12, 13, 14];
        sampler.set_candidates(candidates.clone()).unwrap();

        // One unmasked column per row: 0 for the first, 3 for the second.
        let similarities = arr2(&[
            [0.5_f32, -0.1, 0.0, -0.3, 0.995],
            [-0.2, 0.0, 1.0, 0.5, -0.7],
        ]);
        sampler.compute_weights(similarities.view(), 16).unwrap();

        let negatives = sampler.draw_negatives(&[0, 1]).unwrap();

        assert!(negatives.row(0).iter().all(|&item_id| item_id == candidates[0]));
        assert!(negatives.row(1).iter().all(|&item_id| item_id == candidates[3]));
    }

    #[test]
    fn rejects_dimension_below_two() {
        let mut rng = XorShiftRng::seed_from_u64(0);
        let similarities = arr2(&[[0.5_f32]]);

        assert!(spreadout_weights(similarities.view(), 1, &mut rng).is_err());
    }

    #[test]
    fn strict_negatives_exclude_user_positives() {
        let mut train = catalog(3, 10);
        train.push(Interaction::new(0, 6));
        train.push(Interaction::new(0, 8));

        let mut sampler = sampler(
            &train,
            SamplerConfig::new()
                .batch_size(3)
                .num_negatives(2)
                .num_candidates(5)
                .strict_negative(true),
        );

        let candidates = vec![5, 6, 7, 8, 9];
        let allowed: HashSet<ItemId> = [5, 7, 9].iter().cloned().collect();

        for _ in 0..200 {
            sampler.set_candidates(candidates.clone()).unwrap();
            sampler
                .compute_weights(Array2::from_elem((3, 5), 0.5_f32).view(), 20)
                .unwrap();
            let negatives = sampler.draw_negatives(&[0, 1, 2]).unwrap();

            assert_eq!(negatives.dim(), (3, 2));
            for &item_id in negatives.row(0).iter() {
                assert!(allowed.contains(&item_id), "drew positive {}", item_id);
            }
        }
    }

    #[test]
    fn strict_negatives_fall_back_to_non_positives() {
        let mut train = catalog(1, 4);
        train.push(Interaction::new(0, 1));

        let mut sampler = sampler(
            &train,
            SamplerConfig::new()
                .batch_size(1)
                .num_negatives(50)
                .strict_negative(true),
        );

        // Only the positive candidate carries weight.
        sampler.set_candidates(vec![1, 2, 3]).unwrap();
        sampler
            .compute_weights(arr2(&[[0.5_f32, -0.5, 1.0]]).view(), 8)
            .unwrap();
        let negatives = sampler.draw_negatives(&[0]).unwrap();

        assert!(negatives.iter().all(|&item_id| item_id == 2 || item_id == 3));
        assert!(negatives.iter().any(|&item_id| item_id == 2));
        assert!(negatives.iter().any(|&item_id| item_id == 3));
    }

    #[test]
    fn all_positive_candidates_draw_from_the_pool() {
        let train = catalog(1, 4);

        let mut sampler = sampler(
            &train,
            SamplerConfig::new()
                .batch_size(1)
                .num_negatives(8)
                .strict_negative(true),
        );

        sampler.set_candidates(vec![0, 0]).unwrap();
        sampler
            .compute_weights(arr2(&[[0.5_f32, 0.5]]).view(), 8)
            .unwrap();
        let negatives = sampler.draw_negatives(&[0]).unwrap();

        assert!(negatives.iter().all(|&item_id| item_id == 0));
    }

    #[test]
    fn operations_must_run_in_order() {
        let train = catalog(4, 10);
        let mut sampler = sampler(&train, SamplerConfig::new().batch_size(2).num_candidates(4));

        match sampler.draw_negatives(&[0, 1]) {
            Err(SamplingError::StatePrecondition { state, .. }) => assert_eq!(state, "empty"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(sampler
            .compute_weights(Array2::zeros((2, 4)).view(), 8)
            .is_err());

        sampler.draw_candidates(4).unwrap();
        match sampler.draw_negatives(&[0, 1]) {
            Err(SamplingError::StatePrecondition { state, .. }) => {
                assert_eq!(state, "candidates-ready")
            }
            other => panic!("unexpected {:?}", other),
        }

        sampler
            .compute_weights(Array2::from_elem((2, 4), 0.5).view(), 8)
            .unwrap();
        sampler.draw_negatives(&[0, 1]).unwrap();

        // The step has been consumed.
        assert!(sampler.candidates().is_none());
        assert!(sampler.draw_negatives(&[0, 1]).is_err());
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let train = catalog(4, 10);
        let mut sampler = sampler(&train, SamplerConfig::new().batch_size(2).num_candidates(4));

        assert!(sampler.draw_candidates(0).is_err());

        sampler.draw_candidates(4).unwrap();
        match sampler.compute_weights(Array2::zeros((2, 3)).view(), 8) {
            Err(SamplingError::InvalidConfiguration { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        // A failed weighting keeps the candidates.
        assert_eq!(sampler.candidates().map(|c| c.len()), Some(4));

        sampler
            .compute_weights(Array2::from_elem((2, 4), 0.5).view(), 8)
            .unwrap();
        match sampler.draw_negatives(&[0, 1, 2]) {
            Err(SamplingError::InvalidConfiguration { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_candidates_outside_the_catalog() {
        let train = catalog(2, 5);
        let mut sampler = sampler(&train, SamplerConfig::new());

        assert!(sampler.set_candidates(vec![1, 5]).is_err());
        assert!(sampler.set_candidates(Vec::new()).is_err());
    }

    #[test]
    fn candidates_follow_negative_weights() {
        let train = catalog(2, 6);
        let mut sampler = sampler(
            &train,
            SamplerConfig::new().negative_weights(vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0]),
        );

        let candidates = sampler.draw_candidates(100).unwrap();

        assert_eq!(candidates.len(), 100);
        assert!(candidates.iter().all(|&item_id| item_id == 1 || item_id == 3));
    }

    #[test]
    fn successive_candidate_draws_are_independent() {
        let train = catalog(2, 1000);
        let mut sampler = sampler(&train, SamplerConfig::new());

        let first = sampler.draw_candidates(50).unwrap().to_owned();
        let second = sampler.draw_candidates(50).unwrap().to_owned();

        assert_ne!(first, second);
    }

    #[test]
    fn same_seed_reproduces_batches() {
        let train = catalog(20, 50);
        let config = SamplerConfig::new()
            .batch_size(8)
            .num_negatives(3)
            .num_candidates(10);

        let mut first = sampler(&train, config.clone());
        let mut second = sampler(&train, config);

        for _ in 0..5 {
            let similarity = ConstantSimilarity(0.4);
            assert_eq!(
                first.sample_batch(&similarity).unwrap(),
                second.sample_batch(&similarity).unwrap()
            );
        }
    }

    #[test]
    fn full_step_through_the_sampler_trait() {
        let train = catalog(20, 50);
        let mut sampler = sampler(
            &train,
            SamplerConfig::new()
                .batch_size(8)
                .num_negatives(3)
                .num_candidates(10),
        );

        let batch = sampler.sample_batch(&ConstantSimilarity(0.2)).unwrap();

        assert_eq!(batch.len(), 8);
        assert_eq!(batch.negatives.dim(), (8, 3));
        assert!(batch.negatives.iter().all(|&item_id| item_id < 50));
    }

    fn similarity_matrix() -> impl Strategy<Value = Array2<f32>> {
        (1_usize..6, 1_usize..8).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(-1.5_f32..1.5, rows * cols).prop_map(move |values| {
                Array2::from_shape_vec((rows, cols), values).unwrap()
            })
        })
    }

    fn wide_similarity_matrix() -> impl Strategy<Value = Array2<f32>> {
        (1_usize..3, 1_usize..5000, 0.9_f32..0.99, -0.2_f32..0.99).prop_map(
            |(rows, cols, high, low)| {
                Array2::from_shape_fn((rows, cols), |(row, col)| {
                    if (row + col) % 7 == 0 {
                        low
                    } else {
                        high
                    }
                })
            },
        )
    }

    proptest! {
        #[test]
        fn prop_rows_have_positive_sums(
            similarities in similarity_matrix(),
            dim in 2_usize..4096,
            seed in any::<u64>()
        ) {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let weights = spreadout_weights(similarities.view(), dim, &mut rng).unwrap();

            for row in weights.outer_iter() {
                let row_sum = row.sum();
                prop_assert!(row_sum.is_finite() && row_sum > 0.0);
                prop_assert!(row.iter().all(|weight| weight.is_finite() && *weight >= 0.0));
            }
        }

        #[test]
        fn prop_wide_rows_have_finite_sums(
            similarities in wide_similarity_matrix(),
            dim in 2_usize..4096,
            seed in any::<u64>()
        ) {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let weights = spreadout_weights(similarities.view(), dim, &mut rng).unwrap();

            for row in weights.outer_iter() {
                let row_sum = row.sum();
                prop_assert!(row_sum.is_finite() && row_sum > 0.0, "row sum {}", row_sum);
                prop_assert!(WeightedIndex::new(row.iter()).is_ok());
            }
        }

        #[test]
        fn prop_masked_entries_are_zero(
            similarities in similarity_matrix(),
            dim in 2_usize..128,
            seed in any::<u64>()
        ) {
            let mut rng = XorShiftRng::seed_from_u64(seed);
            let weights = spreadout_weights(similarities.view(), dim, &mut rng).unwrap();

            for (weight_row, similarity_row) in weights.outer_iter().zip(similarities.outer_iter()) {
                let any_valid = similarity_row.iter().any(|&s| s > 0.0 && s < 0.99);
                if !any_valid {
                    continue;
                }
                for (&weight, &similarity) in weight_row.iter().zip(similarity_row.iter()) {
                    if !(similarity > 0.0 && similarity < 0.99) {
                        prop_assert_eq!(weight, 0.0);
                    }
                }
            }
        }

        #[test]
        fn prop_negatives_come_from_the_pool(
            seed in any::<[u8; 16]>(),
            similarity in -1.0_f32..1.0,
            strict in any::<bool>()
        ) {
            let mut train = catalog(6, 30);
            train.push(Interaction::new(0, 3));
            train.push(Interaction::new(1, 4));

            let mut sampler = TwoStageSampler::new(
                &train,
                SamplerConfig::new()
                    .batch_size(4)
                    .num_negatives(5)
                    .num_candidates(7)
                    .strict_negative(strict)
                    .from_seed(seed),
            ).unwrap();

            let user_ids = [0, 1, 2, 3];
            let candidates = sampler.draw_candidates(7).unwrap().to_owned();
            sampler
                .compute_weights(Array2::from_elem((4, 7), similarity).view(), 16)
                .unwrap();
            let negatives = sampler.draw_negatives(&user_ids).unwrap();

            for (&user_id, row) in user_ids.iter().zip(negatives.outer_iter()) {
                let all_positive = candidates
                    .iter()
                    .all(|&item_id| train.to_compressed().contains(user_id, item_id));

                for &item_id in row.iter() {
                    prop_assert!(candidates.contains(&item_id));
                    if strict && !all_positive {
                        prop_assert!(!train.to_compressed().contains(user_id, item_id));
                    }
                }
            }
        }
    }
}
