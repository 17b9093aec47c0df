use ndarray::{Array2, ArrayView2, Axis};

/// Row-wise softmax, shifted by the row max for stability.
pub fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut out = logits.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    out
}

/// Class-weighted cross-entropy. Returns the loss (weighted mean over the
/// batch, divided by the summed sample weights) and its gradient w.r.t. the
/// logits.
pub fn weighted_cross_entropy(logits: ArrayView2<f32>, labels: &[usize], class_weights: &[f32]) -> (f32, Array2<f32>) {
    let probs = softmax(logits);
    let mut grad = probs.clone();
    let mut total = 0f32;
    let mut weight_sum = 0f32;
    for (i, &y) in labels.iter().enumerate() {
        let w = class_weights.get(y).copied().unwrap_or(1.0);
        let p = probs[[i, y]].max(1e-12);
        total += -w * p.ln();
        weight_sum += w;
        grad[[i, y]] -= 1.0;
        grad.row_mut(i).mapv_inplace(|g| g * w);
    }
    if weight_sum <= 0.0 {
        return (0.0, Array2::zeros(logits.raw_dim()));
    }
    grad.mapv_inplace(|g| g / weight_sum);
    (total / weight_sum, grad)
}

pub fn argmax_rows(scores: ArrayView2<f32>) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            let mut best = 0;
            for (j, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let p = softmax(array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]].view());
        for row in p.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((p[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn uniform_logits_give_log_k() {
        let logits = Array2::<f32>::zeros((4, 3));
        let (loss, _) = weighted_cross_entropy(logits.view(), &[0, 1, 2, 0], &[1.0, 1.0, 1.0]);
        assert!((loss - 3f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn weights_normalise_by_sample_weight_sum() {
        // Identical logits per row, so the loss is the same per sample and
        // any weighting must leave the mean unchanged.
        let logits = array![[2.0, 0.0], [0.0, 2.0]];
        let (unweighted, _) = weighted_cross_entropy(logits.view(), &[0, 1], &[1.0, 1.0]);
        let (weighted, _) = weighted_cross_entropy(logits.view(), &[0, 1], &[0.1, 5.0]);
        assert!((unweighted - weighted).abs() < 1e-6);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let logits = array![[0.3, -0.2, 0.9], [0.1, 0.4, -0.7]];
        let labels = [2, 0];
        let weights = [0.5, 1.0, 0.25];
        let (_, grad) = weighted_cross_entropy(logits.view(), &labels, &weights);
        let eps = 1e-3;
        for i in 0..2 {
            for j in 0..3 {
                let mut up = logits.clone();
                up[[i, j]] += eps;
                let mut down = logits.clone();
                down[[i, j]] -= eps;
                let (lu, _) = weighted_cross_entropy(up.view(), &labels, &weights);
                let (ld, _) = weighted_cross_entropy(down.view(), &labels, &weights);
                let numeric = (lu - ld) / (2.0 * eps);
                assert!((numeric - grad[[i, j]]).abs() < 1e-3, "({i},{j}) {numeric} vs {}", grad[[i, j]]);
            }
        }
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax_rows(array![[1.0, 1.0], [0.0, 2.0]].view()), vec![0, 1]);
    }
}
