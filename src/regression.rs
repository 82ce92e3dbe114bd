// MOBATCH REGRESSION
// TWO FITTING STRATEGIES, NOTHING ELSE:
//   ORDINARY LEAST SQUARES (BATCH, WITH INTERCEPT)
//   PASSIVE-AGGRESSIVE PA-I REGRESSION (ONLINE, EPSILON-INSENSITIVE)
//
// BOTH ARE DETERMINISTIC: SAME ROWS IN THE SAME ORDER, SAME MODEL.

#[derive(Clone, Debug, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn zeros(n_features: usize) -> Self {
        Self {
            intercept: 0.0,
            coefficients: vec![0.0; n_features],
        }
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        self.intercept
            + self.coefficients.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
    }
}

// RELATIVE PIVOT TOLERANCE. A COLUMN WHOSE RESIDUAL VARIANCE FALLS BELOW
// THIS FRACTION OF ITS OWN VARIANCE IS COLLINEAR AND GETS COEFFICIENT 0.
const PIVOT_TOL: f64 = 1e-10;

/// Least squares with intercept.
///
/// Columns are centred, then the normal equations are solved by a Cholesky
/// factorisation that skips linearly dependent columns. Rank-deficient input
/// (a single row, constant columns) degrades to the mean label as intercept
/// instead of failing. Returns `None` only for empty or ragged input.
pub fn fit_ols(rows: &[Vec<f64>], labels: &[f64]) -> Option<LinearModel> {
    if rows.is_empty() || rows.len() != labels.len() {
        return None;
    }
    let n = rows[0].len();
    if rows.iter().any(|r| r.len() != n) {
        return None;
    }
    let count = rows.len() as f64;

    let mut x_mean = vec![0.0; n];
    for r in rows {
        for (m, v) in x_mean.iter_mut().zip(r) {
            *m += v;
        }
    }
    x_mean.iter_mut().for_each(|m| *m /= count);
    let y_mean = labels.iter().sum::<f64>() / count;

    // CENTRED NORMAL EQUATIONS: A = Xc'Xc, b = Xc'yc
    let mut a = vec![vec![0.0; n]; n];
    let mut b = vec![0.0; n];
    for (r, &y) in rows.iter().zip(labels) {
        let yc = y - y_mean;
        for i in 0..n {
            let xi = r[i] - x_mean[i];
            b[i] += xi * yc;
            for j in 0..=i {
                a[i][j] += xi * (r[j] - x_mean[j]);
            }
        }
    }

    let coefficients = solve_spd(&a, &b);
    let intercept = y_mean
        - coefficients.iter().zip(&x_mean).map(|(w, m)| w * m).sum::<f64>();
    Some(LinearModel { intercept, coefficients })
}

// CHOLESKY ON THE LOWER TRIANGLE OF A, SKIPPING DEPENDENT COLUMNS.
// SKIPPED COLUMNS KEEP COEFFICIENT 0.
fn solve_spd(a: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut active: Vec<usize> = Vec::with_capacity(n);
    // l[r] IS ROW r OF L RESTRICTED TO ACTIVE COLUMNS
    let mut l: Vec<Vec<f64>> = Vec::with_capacity(n);

    for j in 0..n {
        let diag = a[j][j];
        if !(diag > 0.0) || !diag.is_finite() {
            continue;
        }
        let mut row = Vec::with_capacity(active.len() + 1);
        for (r, &k) in active.iter().enumerate() {
            let dot: f64 = (0..r).map(|s| row[s] * l[r][s]).sum();
            row.push((a[j][k] - dot) / l[r][r]);
        }
        let residual = diag - row.iter().map(|v| v * v).sum::<f64>();
        if residual <= PIVOT_TOL * diag {
            continue;
        }
        row.push(residual.sqrt());
        active.push(j);
        l.push(row);
    }

    let m = active.len();
    // FORWARD: L z = b_active
    let mut z = vec![0.0; m];
    for r in 0..m {
        let dot: f64 = (0..r).map(|s| l[r][s] * z[s]).sum();
        z[r] = (b[active[r]] - dot) / l[r][r];
    }
    // BACKWARD: L' w = z
    let mut w = vec![0.0; m];
    for r in (0..m).rev() {
        let dot: f64 = (r + 1..m).map(|s| l[s][r] * w[s]).sum();
        w[r] = (z[r] - dot) / l[r][r];
    }

    let mut coefficients = vec![0.0; n];
    for (r, &k) in active.iter().enumerate() {
        coefficients[k] = w[r];
    }
    coefficients
}

// --- PASSIVE-AGGRESSIVE ---

/// PA-I regressor with epsilon-insensitive loss. The intercept is treated
/// as a weight on a constant feature of 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassiveAggressive {
    pub c: f64,
    pub epsilon: f64,
}

impl PassiveAggressive {
    pub fn new(c: f64, epsilon: f64) -> Self {
        Self { c, epsilon }
    }

    pub fn update(&self, model: &mut LinearModel, x: &[f64], y: f64) {
        let residual = y - model.predict(x);
        let loss = residual.abs() - self.epsilon;
        if loss <= 0.0 {
            return;
        }
        let sq_norm = x.iter().map(|v| v * v).sum::<f64>() + 1.0;
        let tau = (loss / sq_norm).min(self.c) * residual.signum();
        if !tau.is_finite() {
            return;
        }
        for (w, v) in model.coefficients.iter_mut().zip(x) {
            *w += tau * v;
        }
        model.intercept += tau;
    }

    // FRESH MODEL, ONE STEP. NO HISTORY IS REPLAYED.
    pub fn fit_one(&self, x: &[f64], y: f64) -> LinearModel {
        let mut model = LinearModel::zeros(x.len());
        self.update(&mut model, x, y);
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn ols_recovers_exact_line() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..10).map(|i| 3.0 + 2.0 * i as f64).collect();
        let m = fit_ols(&rows, &labels).unwrap();
        assert!(close(m.intercept, 3.0));
        assert!(close(m.coefficients[0], 2.0));
    }

    #[test]
    fn ols_recovers_plane() {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..6 {
            for j in 0..4 {
                let (x1, x2) = (i as f64, (j * j) as f64);
                rows.push(vec![x1, x2]);
                labels.push(1.5 - 0.5 * x1 + 0.25 * x2);
            }
        }
        let m = fit_ols(&rows, &labels).unwrap();
        assert!(close(m.intercept, 1.5));
        assert!(close(m.coefficients[0], -0.5));
        assert!(close(m.coefficients[1], 0.25));
    }

    #[test]
    fn ols_single_row_is_mean_label() {
        let m = fit_ols(&[vec![4096.0, 1024.0, 35.0, 1750.0]], &[0.0025]).unwrap();
        assert!(close(m.intercept, 0.0025));
        assert!(m.coefficients.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn ols_collinear_column_gets_zero() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let labels: Vec<f64> = (0..8).map(|i| 1.0 + i as f64).collect();
        let m = fit_ols(&rows, &labels).unwrap();
        assert!(close(m.coefficients[0], 1.0));
        assert_eq!(m.coefficients[1], 0.0);
        assert!(close(m.intercept, 1.0));
    }

    #[test]
    fn ols_rejects_empty_and_ragged() {
        assert!(fit_ols(&[], &[]).is_none());
        assert!(fit_ols(&[vec![1.0], vec![1.0, 2.0]], &[1.0, 2.0]).is_none());
        assert!(fit_ols(&[vec![1.0]], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn pa_passive_inside_epsilon() {
        let pa = PassiveAggressive::new(0.1, 0.5);
        let m = pa.fit_one(&[1.0, 2.0], 0.3);
        assert_eq!(m, LinearModel::zeros(2));
    }

    #[test]
    fn pa_step_is_capped_by_c() {
        let pa = PassiveAggressive::new(0.1, 0.0);
        // LOSS 100, ||x||^2 + 1 = 2 -> UNCAPPED STEP 50, CAPPED TO 0.1
        let m = pa.fit_one(&[1.0], 100.0);
        assert!(close(m.coefficients[0], 0.1));
        assert!(close(m.intercept, 0.1));
    }

    #[test]
    fn pa_uncapped_step_lands_on_epsilon_tube() {
        let pa = PassiveAggressive::new(10.0, 0.0);
        let x = [1.0, 1.0];
        let m = pa.fit_one(&x, 0.3);
        assert!(close(m.predict(&x), 0.3));
    }

    #[test]
    fn pa_negative_residual_moves_down() {
        let pa = PassiveAggressive::new(1.0, 0.0);
        let m = pa.fit_one(&[1.0], -0.2);
        assert!(m.intercept < 0.0);
        assert!(m.coefficients[0] < 0.0);
    }
}
