// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extended Kalman filter for OD and growth rate.
//!
//! State is `[od_1 … od_n, rate]` with the multiplicative growth model
//! `od_i ← od_i · rate`, `rate ← rate`, and an identity observation on the
//! ODs. The rate state is the per-sample growth multiplier; callers convert
//! it to per-hour units. A dosing event discontinuously changes OD, so the
//! OD process variance is inflated for a few steps afterwards instead of
//! letting the filter read dilution as death.

/// Multiplier applied to OD process variance after a dosing event.
const DOSING_INFLATION: f64 = 1000.0;

#[derive(Debug, Clone)]
pub struct GrowthEkf {
    /// `[od_1 … od_n, rate]`
    state: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    od_process_variance: f64,
    rate_process_variance: f64,
    observation_variance: f64,
    /// Remaining steps with inflated OD process variance.
    inflation_steps: u32,
}

impl GrowthEkf {
    pub fn new(
        initial_ods: &[f64],
        od_process_variance: f64,
        rate_process_variance: f64,
        observation_variance: f64,
    ) -> Self {
        let n = initial_ods.len();
        let mut state = initial_ods.to_vec();
        state.push(1.0); // start from zero growth
        let mut covariance = vec![vec![0.0; n + 1]; n + 1];
        for (i, row) in covariance.iter_mut().enumerate() {
            row[i] = if i < n { 1e-4 } else { 1e-8 };
        }
        Self {
            state,
            covariance,
            od_process_variance,
            rate_process_variance,
            observation_variance,
            inflation_steps: 0,
        }
    }

    fn n_ods(&self) -> usize {
        self.state.len() - 1
    }

    /// Per-sample growth multiplier (state's last component).
    pub fn rate(&self) -> f64 {
        *self.state.last().unwrap_or(&1.0)
    }

    /// Filtered OD estimates.
    pub fn ods(&self) -> &[f64] {
        &self.state[..self.state.len() - 1]
    }

    /// Per-hour exponential growth rate at `samples_per_second`.
    pub fn growth_rate_per_hour(&self, samples_per_second: f64) -> f64 {
        self.rate().max(f64::MIN_POSITIVE).ln() * 3600.0 * samples_per_second
    }

    /// Inflate OD process variance for `steps` updates (dosing event seen).
    pub fn scale_od_variance_for_steps(&mut self, steps: u32) {
        self.inflation_steps = self.inflation_steps.max(steps);
    }

    /// One predict/update cycle against observed ODs.
    pub fn update(&mut self, observations: &[f64]) {
        let n = self.n_ods();
        debug_assert_eq!(observations.len(), n);
        let rate = self.rate();

        // -- predict --
        // Jacobian F: dod_i'/dod_i = rate, dod_i'/drate = od_i, drate'/drate = 1
        let mut f = vec![vec![0.0; n + 1]; n + 1];
        for i in 0..n {
            f[i][i] = rate;
            f[i][n] = self.state[i];
        }
        f[n][n] = 1.0;

        for value in self.state.iter_mut().take(n) {
            *value *= rate;
        }

        let od_q = if self.inflation_steps > 0 {
            self.inflation_steps -= 1;
            self.od_process_variance * DOSING_INFLATION
        } else {
            self.od_process_variance
        };

        let fp = mat_mul(&f, &self.covariance);
        let mut predicted = mat_mul_transpose(&fp, &f);
        for (i, row) in predicted.iter_mut().enumerate() {
            row[i] += if i < n { od_q } else { self.rate_process_variance };
        }

        // -- update (H = [I 0]) --
        // S = P_oo + R, K = P[:, :n] S⁻¹ computed per-od since R is diagonal
        let mut innovation = vec![0.0; n];
        for i in 0..n {
            innovation[i] = observations[i] - self.state[i];
        }

        // Sequential scalar updates: valid for a diagonal R.
        let mut covariance = predicted;
        for i in 0..n {
            let s = covariance[i][i] + self.observation_variance;
            if s <= 0.0 {
                continue;
            }
            let gain: Vec<f64> = (0..=n).map(|r| covariance[r][i] / s).collect();
            let residual = innovation[i];
            for (r, g) in gain.iter().enumerate() {
                self.state[r] += g * residual;
            }
            let old = covariance.clone();
            for r in 0..=n {
                for c in 0..=n {
                    covariance[r][c] = old[r][c] - gain[r] * old[i][c];
                }
            }
            // Keep the innovation consistent with the moved state for the
            // remaining scalar updates.
            for (j, inn) in innovation.iter_mut().enumerate().take(n) {
                if j > i {
                    *inn = observations[j] - self.state[j];
                }
            }
        }
        self.covariance = covariance;
    }
}

fn mat_mul(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a.len();
    let mut out = vec![vec![0.0; n]; n];
    for r in 0..n {
        for k in 0..n {
            let av = a[r][k];
            if av == 0.0 {
                continue;
            }
            for c in 0..n {
                out[r][c] += av * b[k][c];
            }
        }
    }
    out
}

/// `a · bᵀ`
fn mat_mul_transpose(a: &[Vec<f64>], b: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = a.len();
    let mut out = vec![vec![0.0; n]; n];
    for r in 0..n {
        for c in 0..n {
            let mut acc = 0.0;
            for k in 0..n {
                acc += a[r][k] * b[c][k];
            }
            out[r][c] = acc;
        }
    }
    out
}

#[cfg(test)]
#[path = "ekf_tests.rs"]
mod tests;
