//! Logistic matrix factorization.
//!
//! The model estimates user and item embeddings plus user and item biases,
//! scoring a pair as
//! ```text
//! y = u . i + b_u + b_i
//! ```
//! and trains with the pairwise logistic loss
//! `-ln sigmoid(y_pos) - sum_j ln sigmoid(-y_neg_j)`, averaged over the
//! `batch_size * (1 + num_negatives)` scored pairs of a batch.
use std::sync::Arc;

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use wyrm;
use wyrm::optim::Optimizers;
use wyrm::{Arr, BoxedNode, Variable};

use super::embedding_model::{fit_embedding_model, EmbeddingModel, EmbeddingModelParameters};
use super::{embedding_init, embedding_row, pretrained, retain_width, Optimizer};
use crate::losses::logit_pairwise_loss;
use crate::samplers::{Sampler, Similarity};
use crate::{FittingError, ItemId, PredictionError, RankingModel, UserId};

/// Hyperparameters describing the logistic factorization model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_users: usize,
    num_items: usize,
    embedding_dim: usize,
    learning_rate: f32,
    l2_penalty: f32,
    optimizer: Optimizer,
    rng: XorShiftRng,
    num_epochs: usize,
    #[serde(skip)]
    user_embedding_init: Option<Arr>,
    #[serde(skip)]
    item_embedding_init: Option<Arr>,
    #[serde(skip)]
    user_bias_init: Option<Arr>,
    #[serde(skip)]
    item_bias_init: Option<Arr>,
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Hyperparameters {
            num_users,
            num_items,
            embedding_dim: 20,
            learning_rate: 0.05,
            l2_penalty: 0.0,
            optimizer: Optimizer::Adam,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
            num_epochs: 10,
            user_embedding_init: None,
            item_embedding_init: None,
            user_bias_init: None,
            item_bias_init: None,
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

    /// Start from pretrained user biases of shape `(num_users, 1)`.
    pub fn user_bias_init(mut self, init: Arr) -> Result<Self, FittingError> {
        let shape = (self.num_users, 1);
        self.user_bias_init = Some(pretrained("user bias", init, shape)?);
        Ok(self)
    }

    /// Start from pretrained item biases of shape `(num_items, 1)`.
    pub fn item_bias_init(mut self, init: Arr) -> Result<Self, FittingError> {
        let shape = (self.num_items, 1);
        self.item_bias_init = Some(pretrained("item bias", init, shape)?);
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
        let user_biases = self
            .user_bias_init
            .take()
            .unwrap_or_else(|| Arr::zeros((self.num_users, 1)));
        let item_biases = self
            .item_bias_init
            .take()
            .unwrap_or_else(|| Arr::zeros((self.num_items, 1)));
        let user_biases = Arc::new(wyrm::HogwildParameter::new(user_biases));
        let item_biases = Arc::new(wyrm::HogwildParameter::new(item_biases));

        Parameters {
            hyper: self,
            user_embedding,
            item_embedding,
            user_biases,
            item_biases,
        }
    }

    /// Build the logistic factorization model.
    pub fn build(self) -> LogitMatrixFactorization {
        LogitMatrixFactorization {
            params: self.build_params(),
        }
    }
}

#[derive(Debug)]
struct Parameters {
    hyper: Hyperparameters,
    user_embedding: Arc<wyrm::HogwildParameter>,
    item_embedding: Arc<wyrm::HogwildParameter>,
    user_biases: Arc<wyrm::HogwildParameter>,
    item_biases: Arc<wyrm::HogwildParameter>,
}

impl Clone for Parameters {
    fn clone(&self) -> Self {
        Parameters {
            hyper: self.hyper.clone(),
            user_embedding: Arc::new(self.user_embedding.as_ref().clone()),
            item_embedding: Arc::new(self.item_embedding.as_ref().clone()),
            user_biases: Arc::new(self.user_biases.as_ref().clone()),
            item_biases: Arc::new(self.item_biases.as_ref().clone()),
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
    fn loss_scale(&self, batch_size: usize, num_negatives: usize) -> f32 {
        1.0 / (batch_size * (1 + num_negatives)) as f32
    }
    fn build(&self, batch_size: usize, num_negatives: usize) -> Model {
        let user_embeddings = wyrm::ParameterNode::shared(self.user_embedding.clone());
        let item_embeddings = wyrm::ParameterNode::shared(self.item_embedding.clone());
        let user_biases = wyrm::ParameterNode::shared(self.user_biases.clone());
        let item_biases = wyrm::ParameterNode::shared(self.item_biases.clone());

        let users = wyrm::IndexInputNode::new(&vec![0; batch_size]);
        let positives = wyrm::IndexInputNode::new(&vec![0; batch_size]);
        let negatives: Vec<_> = (0..num_negatives)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; batch_size]))
            .collect();

        let user_vectors = user_embeddings.index(&users);
        let user_bias = user_biases.index(&users);

        let score = |items: &Variable<wyrm::IndexInputNode>| -> Variable<BoxedNode> {
            let item_vectors = item_embeddings.index(items);
            let item_bias = item_biases.index(items);

            (user_vectors.vector_dot(&item_vectors) + user_bias.clone() + item_bias).boxed()
        };

        let positive_scores = score(&positives);
        let negative_scores: Vec<_> = negatives.iter().map(|negative| score(negative)).collect();

        let loss = logit_pairwise_loss(&positive_scores, &negative_scores);

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
        let user_bias = embedding_row(self.user_biases.value(), user_id)?[0];
        let item_bias = embedding_row(self.item_biases.value(), item_id)?[0];

        Some(wyrm::simd_dot(user, item) + user_bias + item_bias)
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

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic matrix factorization model.
#[derive(Debug, Clone)]
pub struct LogitMatrixFactorization {
    params: Parameters,
}

impl LogitMatrixFactorization {
    /// Fit the model, drawing batches from `sampler`.
    ///
    /// Returns the mean loss of the last epoch.
    pub fn fit<S: Sampler>(&mut self, sampler: &mut S) -> Result<f32, FittingError> {
        fit_embedding_model(&self.params, sampler)
    }

    /// Probability that each user interacts with each item.
    pub fn predict_proba(&self, pairs: &[(UserId, ItemId)]) -> Result<Vec<f32>, PredictionError> {
        Ok(self.predict(pairs)?.into_iter().map(sigmoid).collect())
    }

    /// Whether each pair is predicted to be an interaction.
    pub fn predict_binary(
        &self,
        pairs: &[(UserId, ItemId)],
    ) -> Result<Vec<bool>, PredictionError> {
        Ok(self.predict(pairs)?.into_iter().map(|y| y > 0.0).collect())
    }

    /// Dimensionality of the embeddings.
    pub fn embedding_dim(&self) -> usize {
        self.params.hyper.embedding_dim
    }
}

impl Similarity for LogitMatrixFactorization {
    fn embedding_dim(&self) -> usize {
        Similarity::embedding_dim(&self.params)
    }

    fn similarity(&self, user_ids: &[UserId], item_ids: &[ItemId]) -> Array2<f32> {
        self.params.similarity(user_ids, item_ids)
    }
}

impl RankingModel for LogitMatrixFactorization {
    /// Logit `u . i + b_u + b_i` of each pair.
    fn predict(&self, pairs: &[(UserId, ItemId)]) -> Result<Vec<f32>, PredictionError> {
        self.params.predict(pairs)
    }
}
