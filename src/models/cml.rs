//! Collaborative Metric Learning.
//!
//! Users and items are embedded in a shared Euclidean space. A user is
//! pulled towards the items they interacted with and pushed away from
//! sampled negatives by the summed triplet loss
//! ```text
//! sum_j relu(margin + |u - p|^2 - |u - n_j|^2)
//! ```
//! Predictions are Euclidean distances: lower means more relevant.
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use wyrm;
use wyrm::optim::Optimizers;
use wyrm::{Arr, BoxedNode, Variable};

use super::embedding_model::{fit_embedding_model, EmbeddingModel, EmbeddingModelParameters};
use super::{embedding_init, embedding_row, pretrained, retain_width, Optimizer};
use crate::losses::sum_triplet_loss;
use crate::samplers::{Sampler, Similarity};
use crate::{FittingError, ItemId, PredictionError, RankingModel, UserId};

/// Hyperparameters describing the CML model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_users: usize,
    num_items: usize,
    embedding_dim: usize,
    margin: f32,
    learning_rate: f32,
    l2_penalty: f32,
    optimizer: Optimizer,
    rng: XorShiftRng,
    num_epochs: usize,
    #[serde(skip)]
    user_embedding_init: Option<Arr>,
    #[serde(skip)]
    item_embedding_init: Option<Arr>,
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Hyperparameters {
            num_users,
            num_items,
            embedding_dim: 20,
            margin: 1.0,
            learning_rate: 0.05,
            l2_penalty: 0.0,
            optimizer: Optimizer::Adagrad,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
            num_epochs: 10,
            user_embedding_init: None,
            item_embedding_init: None,
        }
    }

    /// Set the embedding dimensionality.
    ///
    /// Pretrained embeddings of a different width are discarded.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        retain_width(&mut self.user_embedding_init, embedding_dim);
        retain_width(&mut self.item_embedding_init, embedding_dim);
        self
    }

    /// Set the triplet loss margin.
    pub fn margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
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

    /// Start from pretrained user embeddings of shape
    /// `(num_users, embedding_dim)`.
    pub fn user_embedding_init(mut self, init: Arr) -> Result<Self, FittingError> {
        let shape = (self.num_users, self.embedding_dim);
        self.user_embedding_init = Some(pretrained("user embedding", init, shape)?);
        Ok(self)
    }

    /// Start from pretrained item embeddings of shape
    /// `(num_items, embedding_dim)`.
    pub fn item_embedding_init(mut self, init: Arr) -> Result<Self, FittingError> {
        let shape = (self.num_items, self.embedding_dim);
        self.item_embedding_init = Some(pretrained("item embedding", init, shape)?);
        Ok(self)
    }

    fn build_params(mut self) -> Parameters {
        let user_embedding = match self.user_embedding_init.take() {
            Some(init) => init,
            None => embedding_init(self.num_users, self.embedding_dim, &mut self.rng),
        };
        let item_embedding = match self.item_embedding_init.take() {
            Some(init) => init,
            None => embedding_init(self.num_items, self.embedding_dim, &mut self.rng),
        };
        let user_embedding = Arc::new(wyrm::HogwildParameter::new(user_embedding));
        let item_embedding = Arc::new(wyrm::HogwildParameter::new(item_embedding));

        Parameters {
            hyper: self,
            user_embedding,
            item_embedding,
        }
    }

    /// Build the CML model.
    pub fn build(self) -> CollaborativeMetricLearning {
        CollaborativeMetricLearning {
            params: self.build_params(),
        }
    }
}

#[derive(Debug)]
struct Parameters {
    hyper: Hyperparameters,
    user_embedding: Arc<wyrm::HogwildParameter>,
    item_embedding: Arc<wyrm::HogwildParameter>,
}

impl Clone for Parameters {
    fn clone(&self) -> Self {
        Parameters {
            hyper: self.hyper.clone(),
            user_embedding: Arc::new(self.user_embedding.as_ref().clone()),
            item_embedding: Arc::new(self.item_embedding.as_ref().clone()),
        }
    }
}

impl EmbeddingModelParameters for Parameters {
    type Output = Model;
    fn embedding_dim(&self) -> usize {
        self.hyper.embedding_dim
    }
    fn user_embedding(&self) -> &Arc<wyrm::HogwildParameter> {
        &self.user_embedding
    }
    fn item_embedding(&self) -> &Arc<wyrm::HogwildParameter> {
        &self.item_embedding
    }
    fn num_epochs(&self) -> usize {
        self.hyper.num_epochs
    }
    fn optimizer(&self) -> Optimizers {
        self.hyper
            .optimizer
            .build(self.hyper.learning_rate, self.hyper.l2_penalty)
    }
    fn loss_scale(&self, _batch_size: usize, _num_negatives: usize) -> f32 {
        1.0
    }
    fn build(&self, batch_size: usize, num_negatives: usize) -> Model {
        let user_embeddings = wyrm::ParameterNode::shared(self.user_embedding.clone());
        let item_embeddings = wyrm::ParameterNode::shared(self.item_embedding.clone());

        let users = wyrm::IndexInputNode::new(&vec![0; batch_size]);
        let positives = wyrm::IndexInputNode::new(&vec![0; batch_size]);
        let negatives: Vec<_> = (0..num_negatives)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; batch_size]))
            .collect();

        let user_vectors = user_embeddings.index(&users).boxed();
        let positive_vectors = item_embeddings.index(&positives).boxed();
        let negative_vectors: Vec<_> = negatives
            .iter()
            .map(|negative| item_embeddings.index(negative).boxed())
            .collect();

        let loss = sum_triplet_loss(
            &user_vectors,
            &positive_vectors,
            &negative_vectors,
            self.hyper.margin,
        );

        Model {
            users,
            positives,
            negatives,
            loss,
        }
    }
    fn predict_single(&self, user_id: UserId, item_id: ItemId) -> Option<f32> {
        let user = embedding_row(self.user_embedding.value(), user_id)?;
        let item = embedding_row(self.item_embedding.value(), item_id)?;

        let squared_distance: f32 = user
            .iter()
            .zip(item)
            .map(|(u, i)| (u - i) * (u - i))
            .sum();

        Some(squared_distance.sqrt())
    }
}

struct Model {
    users: Variable<wyrm::IndexInputNode>,
    positives: Variable<wyrm::IndexInputNode>,
    negatives: Vec<Variable<wyrm::IndexInputNode>>,
    loss: Variable<BoxedNode>,
}

impl EmbeddingModel for Model {
    fn inputs(
        &self,
    ) -> (
        &Variable<wyrm::IndexInputNode>,
        &Variable<wyrm::IndexInputNode>,
        &[Variable<wyrm::IndexInputNode>],
    ) {
        (&self.users, &self.positives, &self.negatives)
    }
    fn loss(&mut self) -> &mut Variable<BoxedNode> {
        &mut self.loss
    }
}

/// Collaborative Metric Learning model.
#[derive(Debug, Clone)]
pub struct CollaborativeMetricLearning {
    params: Parameters,
}

impl CollaborativeMetricLearning {
    /// Fit the model, drawing batches from `sampler`.
    ///
    /// Returns the mean loss of the last epoch.
    pub fn fit<S: Sampler>(&mut self, sampler: &mut S) -> Result<f32, FittingError> {
        fit_embedding_model(&self.params, sampler)
    }

    /// Dimensionality of the embeddings.
    pub fn embedding_dim(&self) -> usize {
        self.params.hyper.embedding_dim
    }
}

impl Similarity for CollaborativeMetricLearning {
    fn embedding_dim(&self) -> usize {
        Similarity::embedding_dim(&self.params)
    }

    fn similarity(&self, user_ids: &[UserId], item_ids: &[ItemId]) -> ndarray::Array2<f32> {
        self.params.similarity(user_ids, item_ids)
    }
}

impl RankingModel for CollaborativeMetricLearning {
    /// Euclidean distance between each user and item.
    fn predict(&self, pairs: &[(UserId, ItemId)]) -> Result<Vec<f32>, PredictionError> {
        self.params.predict(pairs)
    }
}
