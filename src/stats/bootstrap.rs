use rand::Rng;

/// A same-size resample drawn with replacement: row indices into the
/// original sample. Lives only for one estimator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapDraw {
    indices: Vec<usize>,
}

impl BootstrapDraw {
    /// Draw `n` indices uniformly from `0..n`.
    pub fn draw<R: Rng>(n: usize, rng: &mut R) -> Self {
        let indices = (0..n).map(|_| rng.random_range(0..n)).collect();
        Self { indices }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Gather `values` at the drawn rows.
    pub fn apply<T: Copy>(&self, values: &[T]) -> Vec<T> {
        self.indices.iter().map(|&i| values[i]).collect()
    }
}

/// Mean and population (ddof = 0) standard deviation. `(NaN, NaN)` when empty.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn draw_keeps_sample_size() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for n in [1, 2, 17, 1000] {
            for _ in 0..5 {
                let draw = BootstrapDraw::draw(n, &mut rng);
                assert_eq!(draw.len(), n);
                assert!(draw.indices().iter().all(|&i| i < n));
            }
        }
    }

    #[test]
    fn empty_draw() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert!(BootstrapDraw::draw(0, &mut rng).is_empty());
    }

    #[test]
    fn draw_repeats_rows() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let draw = BootstrapDraw::draw(200, &mut rng);
        let mut seen = draw.indices().to_vec();
        seen.sort_unstable();
        seen.dedup();
        // Expected unique fraction is 1 - 1/e ≈ 0.63.
        assert!(seen.len() < 180, "unique rows {}", seen.len());
    }

    #[test]
    fn population_std() {
        let (m, s) = mean_std(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(m, 2.0);
        assert_abs_diff_eq!(s, (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
    }
}
