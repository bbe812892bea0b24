//! Loss functions built as `wyrm` graph nodes.
//!
//! All losses return a `(batch_size, 1)` node holding one loss term per
//! batch row; calling `backward(weight)` on it trains on `weight` times the
//! sum of those terms.
use wyrm::{BoxedNode, Variable};

/// Row-wise squared Euclidean distance between two `(batch_size, dim)` nodes.
pub fn squared_distance(a: &Variable<BoxedNode>, b: &Variable<BoxedNode>) -> Variable<BoxedNode> {
    let difference = (a.clone() - b.clone()).boxed();
    difference.vector_dot(&difference).boxed()
}

/// Triplet loss summed over negatives:
/// `sum_j relu(margin + |u - p|^2 - |u - n_j|^2)`.
///
/// `negatives` holds one `(batch_size, dim)` node per negative sample.
pub fn sum_triplet_loss(
    user: &Variable<BoxedNode>,
    positive: &Variable<BoxedNode>,
    negatives: &[Variable<BoxedNode>],
    margin: f32,
) -> Variable<BoxedNode> {
    let positive_distance = squared_distance(user, positive);

    let terms: Vec<_> = negatives
        .iter()
        .map(|negative| {
            let negative_distance = squared_distance(user, negative);
            (margin + positive_distance.clone() - negative_distance)
                .relu()
                .boxed()
        })
        .collect();

    sum_terms(terms).unwrap_or_else(|| (positive_distance.clone() - positive_distance).boxed())
}

/// Pairwise logistic loss:
/// `-ln sigmoid(y_pos) - sum_j ln sigmoid(-y_neg_j)`.
///
/// Scores are `(batch_size, 1)` nodes, one per negative sample in
/// `negative_scores`. Normalising by `batch_size * (1 + num_negatives)` is
/// left to the backward weight.
pub fn logit_pairwise_loss(
    positive_scores: &Variable<BoxedNode>,
    negative_scores: &[Variable<BoxedNode>],
) -> Variable<BoxedNode> {
    let mut terms = Vec::with_capacity(negative_scores.len() + 1);
    terms.push(neg_log_sigmoid(positive_scores));

    for negative in negative_scores {
        terms.push(neg_log_sigmoid(&(-negative.clone()).boxed()));
    }

    let positive_term = terms[0].clone();
    sum_terms(terms).unwrap_or(positive_term)
}

/// `-ln sigmoid(x)` as the softplus `relu(-x) + ln(1 + exp(-|x|))`, finite
/// for any finite `x`.
pub fn neg_log_sigmoid(x: &Variable<BoxedNode>) -> Variable<BoxedNode> {
    let negated = (-x.clone()).boxed();
    let magnitude = (x.relu() + negated.relu()).boxed();

    (negated.relu() + (1.0 + (-magnitude).exp()).ln()).boxed()
}

fn sum_terms(terms: Vec<Variable<BoxedNode>>) -> Option<Variable<BoxedNode>> {
    let mut terms = terms.into_iter();
    let first = terms.next()?;

    Some(terms.fold(first, |total, term| (total + term).boxed()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyrm::{Arr, InputNode};

    fn input(rows: usize, cols: usize, values: Vec<f32>) -> Variable<BoxedNode> {
        InputNode::new(Arr::from_shape_vec((rows, cols), values).unwrap()).boxed()
    }

    fn values(node: &Variable<BoxedNode>) -> Vec<f32> {
        node.forward();
        node.value().iter().cloned().collect()
    }

    #[test]
    fn squared_distance_is_row_wise() {
        let a = input(2, 2, vec![0.0, 0.0, 1.0, 1.0]);
        let b = input(2, 2, vec![3.0, 4.0, 1.0, 2.0]);

        assert_eq!(values(&squared_distance(&a, &b)), vec![25.0, 1.0]);
    }

    #[test]
    fn triplet_loss_is_zero_for_separated_negatives() {
        let user = input(1, 2, vec![0.0, 0.0]);
        let positive = input(1, 2, vec![0.1, 0.0]);
        let negatives = vec![input(1, 2, vec![5.0, 0.0]), input(1, 2, vec![0.0, 5.0])];

        let loss = sum_triplet_loss(&user, &positive, &negatives, 1.0);

        assert_eq!(values(&loss), vec![0.0]);
    }

    #[test]
    fn triplet_loss_sums_violations() {
        let user = input(1, 2, vec![0.0, 0.0]);
        let positive = input(1, 2, vec![1.0, 0.0]);
        // Distances: positive 1, negatives 0.25 and 4.
        let negatives = vec![input(1, 2, vec![0.5, 0.0]), input(1, 2, vec![2.0, 0.0])];

        let loss = sum_triplet_loss(&user, &positive, &negatives, 1.0);

        // relu(1 + 1 - 0.25) + relu(1 + 1 - 4)
        let value = values(&loss)[0];
        assert!((value - 1.75).abs() < 1e-6, "got {}", value);
    }

    fn softplus(x: f32) -> f32 {
        x.max(0.0) + (1.0 + (-x.abs()).exp()).ln()
    }

    #[test]
    fn neg_log_sigmoid_is_finite_for_large_logits() {
        let logits = vec![-50.0, -20.0, 0.0, 20.0, 50.0];
        let loss = values(&neg_log_sigmoid(&input(5, 1, logits.clone())));

        for (&actual, &logit) in loss.iter().zip(&logits) {
            let expected = softplus(-logit);
            assert!(actual.is_finite(), "-ln sigmoid({}) = {}", logit, actual);
            assert!(
                (actual - expected).abs() <= 1e-3 * expected.max(1.0),
                "-ln sigmoid({}): {} != {}",
                logit,
                actual,
                expected
            );
        }
    }

    #[test]
    fn logit_loss_survives_saturated_scores() {
        let positive = input(2, 1, vec![-20.0, 50.0]);
        let negatives = vec![input(2, 1, vec![50.0, -20.0])];

        let loss = values(&logit_pairwise_loss(&positive, &negatives));

        // -ln sigmoid(y_pos) - ln sigmoid(-y_neg) = softplus(-y_pos) + softplus(y_neg)
        let expected = vec![softplus(20.0) + softplus(50.0), softplus(-50.0) + softplus(-20.0)];

        for (actual, expected) in loss.iter().zip(expected.iter()) {
            assert!(actual.is_finite());
            assert!(
                (actual - expected).abs() <= 1e-3 * expected.max(1.0),
                "{} != {}",
                actual,
                expected
            );
        }
    }

    #[test]
    fn logit_loss_matches_closed_form() {
        let positive = input(2, 1, vec![2.0, -1.0]);
        let negatives = vec![input(2, 1, vec![-3.0, 0.5])];

        let loss = values(&logit_pairwise_loss(&positive, &negatives));

        let log_sigmoid = |x: f32| -(1.0 + (-x).exp()).ln();
        let expected = vec![
            -log_sigmoid(2.0) - log_sigmoid(3.0),
            -log_sigmoid(-1.0) - log_sigmoid(-0.5),
        ];

        for (actual, expected) in loss.iter().zip(expected.iter()) {
            assert!((actual - expected).abs() < 1e-4, "{} != {}", actual, expected);
        }
    }
}
