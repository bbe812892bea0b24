//! Models module.
//!
//! - [`cml::CollaborativeMetricLearning`] embeds users and items in a shared
//!   metric space and trains with a summed triplet loss;
//! - [`logistic::LogitMatrixFactorization`] scores pairs by inner product plus
//!   biases and trains with a pairwise logistic loss.
//!
//! Both are fitted against any [`Sampler`](crate::samplers::Sampler).
use rand::Rng;
use rand_distr::StandardNormal;

use wyrm::optim::Optimizers;
use wyrm::Arr;

use crate::FittingError;

pub mod cml;
mod embedding_model;
pub mod logistic;

/// Optimizer used to train the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

impl Optimizer {
    fn build(&self, learning_rate: f32, l2_penalty: f32) -> Optimizers {
        match *self {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(learning_rate)
                    .l2_penalty(l2_penalty),
            ),
            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(learning_rate)
                    .l2_penalty(l2_penalty),
            ),
        }
    }
}

fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> Arr {
    let std_dev = 1.0 / cols as f64;
    Arr::zeros((rows, cols)).map(|_| (rng.sample::<f64, _>(StandardNormal) * std_dev) as f32)
}

/// Use `init` as the initial value of `parameter` if it has the `expected` shape.
fn pretrained(
    parameter: &'static str,
    init: Arr,
    expected: (usize, usize),
) -> Result<Arr, FittingError> {
    let actual = (init.shape()[0], init.shape()[1]);

    if actual != expected {
        return Err(FittingError::InvalidParameterShape {
            parameter,
            expected,
            actual,
        });
    }

    Ok(init)
}

/// Keep a pretrained embedding only if it is `embedding_dim` wide.
fn retain_width(init: &mut Option<Arr>, embedding_dim: usize) {
    if init.as_ref().map_or(false, |init| init.shape()[1] != embedding_dim) {
        *init = None;
    }
}

/// The `idx`-th row of a row-major embedding matrix.
fn embedding_row(embeddings: &Arr, idx: usize) -> Option<&[f32]> {
    let dim = embeddings.shape()[1];

    embeddings
        .as_slice()
        .and_then(|values| values.get(idx * dim..(idx + 1) * dim))
}
