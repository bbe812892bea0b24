#![warn(missing_docs)]
//! # cml
//!
//! `cml` implements embedding-based recommender models trained on implicit
//! feedback: Collaborative Metric Learning (CML), which places users and items
//! in a shared metric space and trains with a triplet loss, and Logistic Matrix
//! Factorization, which trains inner products plus biases with a pairwise
//! logistic loss.
//!
//! Negatives for both come from a [`samplers::Sampler`]. The
//! [`samplers::two_stage::TwoStageSampler`] first draws a cheap pool of
//! candidate items and then resamples the final negatives per user, weighting
//! each candidate by a spread-out kernel of its similarity to the user and
//! optionally excluding items the user has already interacted with.
//!
//! ## Example
//!
//! ```rust
//! # extern crate cml;
//! use cml::data::{Interaction, Interactions};
//! use cml::models::cml::Hyperparameters;
//! use cml::samplers::two_stage::TwoStageSampler;
//! use cml::samplers::SamplerConfig;
//! use cml::RankingModel;
//!
//! let data = Interactions::from(
//!     (0..50)
//!         .map(|user_id| Interaction::new(user_id, user_id % 20))
//!         .collect::<Vec<_>>(),
//! );
//!
//! let config = SamplerConfig::new()
//!     .batch_size(16)
//!     .num_negatives(4)
//!     .num_candidates(20)
//!     .strict_negative(true)
//!     .from_seed([42; 16]);
//! let mut sampler = TwoStageSampler::new(&data, config).unwrap();
//!
//! let mut model = Hyperparameters::new(data.num_users(), data.num_items())
//!     .embedding_dim(8)
//!     .num_epochs(2)
//!     .from_seed([7; 16])
//!     .build();
//!
//! let loss = model.fit(&mut sampler).unwrap();
//! let distances = model.predict(&[(0, 0), (0, 1)]).unwrap();
//!
//! println!("Loss {}, distances {:?}", loss, distances);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
extern crate ndarray;
extern crate rand;
extern crate rand_distr;
extern crate rand_xorshift;
extern crate rayon;
extern crate serde;
extern crate tracing;

extern crate wyrm;

pub mod data;
pub mod losses;
pub mod models;
pub mod samplers;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;

/// Sampling error types.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum SamplingError {
    /// Sizes, weights or shapes that cannot be sampled from.
    #[fail(display = "Invalid sampler configuration: {}.", reason)]
    InvalidConfiguration {
        /// What was wrong.
        reason: String,
    },
    /// A sampling step was run before the steps it depends on.
    #[fail(display = "Cannot {} while the sampler is {}.", operation, state)]
    StatePrecondition {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the sampler was in.
        state: &'static str,
    },
}

impl SamplingError {
    fn configuration<T: Into<String>>(reason: T) -> Self {
        SamplingError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    fn precondition(operation: &'static str, state: &'static str) -> Self {
        SamplingError::StatePrecondition { operation, state }
    }
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No interactions were given.
    #[fail(display = "No interactions were supplied.")]
    NoInteractions,
    /// The sampler could not produce a batch.
    #[fail(display = "Sampling failed: {}", _0)]
    Sampling(#[cause] SamplingError),
    /// The loss became non-finite.
    #[fail(display = "Invalid loss value: non-finite or not a number.")]
    InvalidLossValue,
    /// Initial parameter values of the wrong shape.
    #[fail(
        display = "Invalid {} shape: expected {:?}, got {:?}.",
        parameter, expected, actual
    )]
    InvalidParameterShape {
        /// Which parameter was being initialized.
        parameter: &'static str,
        /// The shape the model needs.
        expected: (usize, usize),
        /// The shape that was given.
        actual: (usize, usize),
    },
}

impl From<SamplingError> for FittingError {
    fn from(err: SamplingError) -> Self {
        FittingError::Sampling(err)
    }
}

/// Prediction error types.
#[derive(Debug, Clone, PartialEq, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// A user or item id outside the fitted catalog.
    #[fail(display = "Unknown user or item id.")]
    UnknownId,
}

/// Trait describing models that can score `(user, item)` pairs.
pub trait RankingModel {
    /// Score each `(user_id, item_id)` pair.
    fn predict(&self, pairs: &[(UserId, ItemId)]) -> Result<Vec<f32>, PredictionError>;
}
