use crate::error::NumericError;
use crate::settings::SolverSettings;
use crate::traits::{DynamicalSystem, Steppable};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Counters collected while integrating one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub rhs_evaluations: usize,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    tmp: Vec<f64>,
}

impl RK4 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for RK4 {
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<(), NumericError> {
        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1)?;

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k2)?;

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * 0.5;
        }
        system.apply(t0 + dt * 0.5, &self.tmp, &mut self.k3)?;

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4)?;

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] += dt / 6.0 * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
        Ok(())
    }
}

/// Tsitouras 5/4 Solver (fixed step, 5th order update).
pub struct Tsit5 {
    k: [Vec<f64>; 6],
    tmp: Vec<f64>,
}

impl Tsit5 {
    const C: [f64; 6] = [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0];
    const A: [[f64; 5]; 6] = [
        [0.0, 0.0, 0.0, 0.0, 0.0],
        [0.161, 0.0, 0.0, 0.0, 0.0],
        [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0],
        [2.897153057105493, -6.359448489975075, 4.3622954328695815, 0.0, 0.0],
        [
            5.325864828439257,
            -11.748883564062828,
            7.4955393428898365,
            -0.09249506636175525,
            0.0,
        ],
        [
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.028269050394068383,
        ],
    ];
    // b coefficients (5th order)
    const B: [f64; 6] = [
        0.09646076681806523,
        0.01,
        0.4798896504144996,
        1.379008574103742,
        -3.290069515436081,
        2.324710524099774,
    ];

    pub fn new(dim: usize) -> Self {
        Self {
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
        }
    }
}

impl Steppable for Tsit5 {
    fn step(
        &mut self,
        system: &impl DynamicalSystem,
        t: &mut f64,
        state: &mut [f64],
        dt: f64,
    ) -> Result<(), NumericError> {
        let t0 = *t;

        system.apply(t0, state, &mut self.k[0])?;
        for s in 1..6 {
            for i in 0..state.len() {
                let mut acc = 0.0;
                for (j, a) in Self::A[s][..s].iter().enumerate() {
                    acc += a * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * acc;
            }
            system.apply(t0 + Self::C[s] * dt, &self.tmp, &mut self.k[s])?;
        }

        // Update State
        for i in 0..state.len() {
            let mut acc = 0.0;
            for (s, b) in Self::B.iter().enumerate() {
                acc += b * self.k[s][i];
            }
            state[i] += dt * acc;
        }

        *t = t0 + dt;
        Ok(())
    }
}

// --- Dormand–Prince 5(4) ---

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
// The embedded error estimate is 4th order.
const ERROR_ESTIMATOR_ORDER: f64 = 4.0;
const ERROR_EXPONENT: f64 = -1.0 / (ERROR_ESTIMATOR_ORDER + 1.0);

const DP_C: [f64; 6] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0];
const DP_A: [[f64; 5]; 6] = [
    [0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
    ],
];
const DP_B: [f64; 6] = [
    35.0 / 384.0,
    0.0,
    500.0 / 1113.0,
    125.0 / 192.0,
    -2187.0 / 6784.0,
    11.0 / 84.0,
];
const DP_E: [f64; 7] = [
    -71.0 / 57600.0,
    0.0,
    71.0 / 16695.0,
    -71.0 / 1920.0,
    17253.0 / 339200.0,
    -22.0 / 525.0,
    1.0 / 40.0,
];
// Quartic continuous extension: y(t + x*h) = y + h * K^T P [x, x^2, x^3, x^4].
const DP_P: [[f64; 4]; 7] = [
    [
        1.0,
        -8048581381.0 / 2820520608.0,
        8663915743.0 / 2820520608.0,
        -12715105075.0 / 11282082432.0,
    ],
    [0.0, 0.0, 0.0, 0.0],
    [
        0.0,
        131558114200.0 / 32700410799.0,
        -68118460800.0 / 10900136933.0,
        87487479700.0 / 32700410799.0,
    ],
    [
        0.0,
        -1754552775.0 / 470086768.0,
        14199869525.0 / 1410260304.0,
        -10690763975.0 / 1880347072.0,
    ],
    [
        0.0,
        127303824393.0 / 49829197408.0,
        -318862633887.0 / 49829197408.0,
        701980252875.0 / 199316789632.0,
    ],
    [
        0.0,
        -282668133.0 / 205662961.0,
        2019193451.0 / 616988883.0,
        -1453857185.0 / 822651844.0,
    ],
    [
        0.0,
        40617522.0 / 29380423.0,
        -110615467.0 / 29380423.0,
        69997945.0 / 29380423.0,
    ],
];

/// Samples produced by an adaptive run, one per requested evaluation time.
#[derive(Debug, Clone)]
pub struct DenseRun {
    pub samples: Vec<DVector<f64>>,
    pub stats: IntegrationStats,
}

/// Adaptive Dormand–Prince 5(4) integrator with step-size control and
/// dense output at caller-requested times.
pub struct DormandPrince {
    settings: SolverSettings,
    k: [Vec<f64>; 7],
    f: Vec<f64>,
    y_tmp: Vec<f64>,
    y_new: Vec<f64>,
}

impl DormandPrince {
    pub fn new(dim: usize, settings: SolverSettings) -> Self {
        Self {
            settings,
            k: std::array::from_fn(|_| vec![0.0; dim]),
            f: vec![0.0; dim],
            y_tmp: vec![0.0; dim],
            y_new: vec![0.0; dim],
        }
    }

    /// Integrates from `(t0, y0)` towards `t_bound` and returns the solution
    /// at each time in `t_eval` (ascending, within `[t0, t_bound]`).
    ///
    /// Integration stops as soon as the last evaluation time is covered.
    pub fn integrate(
        &mut self,
        system: &impl DynamicalSystem,
        t0: f64,
        y0: &[f64],
        t_bound: f64,
        t_eval: &[f64],
    ) -> Result<DenseRun, NumericError> {
        let mut stats = IntegrationStats::default();
        let mut samples = Vec::with_capacity(t_eval.len());
        let mut next = 0usize;

        let mut t = t0;
        let mut y = y0.to_vec();
        system.apply(t, &y, &mut self.f)?;
        stats.rhs_evaluations += 1;

        while next < t_eval.len() && t_eval[next] <= t {
            samples.push(DVector::from_column_slice(&y));
            next += 1;
        }
        if next == t_eval.len() {
            return Ok(DenseRun { samples, stats });
        }

        let mut h_abs = match self.settings.first_step {
            Some(h) => h.min(t_bound - t0),
            None => self.initial_step(system, t, &y, t_bound, &mut stats)?,
        };
        let mut attempts = 0usize;

        while next < t_eval.len() && t < t_bound {
            let min_step = 10.0 * spacing(t);
            if h_abs > self.settings.max_step {
                h_abs = self.settings.max_step;
            } else if h_abs < min_step {
                h_abs = min_step;
            }

            let mut step_rejected = false;
            let (t_new, h) = loop {
                if attempts >= self.settings.max_steps {
                    return Err(NumericError::MaxStepsExceeded {
                        max_steps: self.settings.max_steps,
                        t,
                    });
                }
                attempts += 1;

                if h_abs < min_step {
                    return Err(NumericError::StepSizeTooSmall { t });
                }

                let mut t_new = t + h_abs;
                if t_new > t_bound {
                    t_new = t_bound;
                }
                let h = t_new - t;
                h_abs = h.abs();

                self.stages(system, t, &y, h)?;
                stats.rhs_evaluations += 6;

                let error_norm = self.error_norm(h, &y);
                if error_norm < 1.0 {
                    let mut factor = if error_norm == 0.0 {
                        MAX_FACTOR
                    } else {
                        MAX_FACTOR.min(SAFETY * error_norm.powf(ERROR_EXPONENT))
                    };
                    if step_rejected {
                        factor = factor.min(1.0);
                    }
                    h_abs *= factor;
                    break (t_new, h);
                }

                h_abs *= MIN_FACTOR.max(SAFETY * error_norm.powf(ERROR_EXPONENT));
                step_rejected = true;
                stats.rejected_steps += 1;
            };

            if self.y_new.iter().any(|v| !v.is_finite()) {
                return Err(NumericError::NonFiniteState { t: t_new });
            }

            if next < t_eval.len() && t_eval[next] <= t_new {
                let q = self.interpolant();
                while next < t_eval.len() && t_eval[next] <= t_new {
                    let x = (t_eval[next] - t) / h;
                    samples.push(dense_value(&q, &y, h, x));
                    next += 1;
                }
            }

            t = t_new;
            y.copy_from_slice(&self.y_new);
            self.f.copy_from_slice(&self.k[6]);
            stats.accepted_steps += 1;
        }

        Ok(DenseRun { samples, stats })
    }

    fn stages(
        &mut self,
        system: &impl DynamicalSystem,
        t: f64,
        y: &[f64],
        h: f64,
    ) -> Result<(), NumericError> {
        let n = y.len();
        self.k[0].copy_from_slice(&self.f);

        for s in 1..6 {
            for i in 0..n {
                let mut acc = 0.0;
                for (j, a) in DP_A[s][..s].iter().enumerate() {
                    acc += a * self.k[j][i];
                }
                self.y_tmp[i] = y[i] + h * acc;
            }
            system.apply(t + DP_C[s] * h, &self.y_tmp, &mut self.k[s])?;
        }

        for i in 0..n {
            let mut acc = 0.0;
            for (s, b) in DP_B.iter().enumerate() {
                acc += b * self.k[s][i];
            }
            self.y_new[i] = y[i] + h * acc;
        }

        // FSAL: the derivative at the new point is the 7th stage.
        system.apply(t + h, &self.y_new, &mut self.k[6])
    }

    fn error_norm(&self, h: f64, y: &[f64]) -> f64 {
        let n = y.len();
        if n == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for i in 0..n {
            let mut err = 0.0;
            for (s, e) in DP_E.iter().enumerate() {
                err += e * self.k[s][i];
            }
            let scale = self.settings.atol + y[i].abs().max(self.y_new[i].abs()) * self.settings.rtol;
            let r = h * err / scale;
            sum += r * r;
        }
        (sum / n as f64).sqrt()
    }

    /// Q = K^T P, an n x 4 matrix of polynomial coefficients for the last step.
    fn interpolant(&self) -> DMatrix<f64> {
        let n = self.f.len();
        let k = DMatrix::from_fn(n, 7, |i, s| self.k[s][i]);
        let p = DMatrix::from_fn(7, 4, |s, j| DP_P[s][j]);
        k * p
    }

    fn initial_step(
        &self,
        system: &impl DynamicalSystem,
        t0: f64,
        y0: &[f64],
        t_bound: f64,
        stats: &mut IntegrationStats,
    ) -> Result<f64, NumericError> {
        let interval_length = (t_bound - t0).abs();
        let n = y0.len();
        if n == 0 {
            return Ok(interval_length);
        }
        let rtol = self.settings.rtol;
        let atol = self.settings.atol;

        let scale: Vec<f64> = y0.iter().map(|v| atol + v.abs() * rtol).collect();
        let d0 = rms(y0.iter().zip(&scale).map(|(v, s)| v / s));
        let d1 = rms(self.f.iter().zip(&scale).map(|(v, s)| v / s));

        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        let h0 = h0.min(interval_length);

        let y1: Vec<f64> = y0.iter().zip(&self.f).map(|(y, f)| y + h0 * f).collect();
        let mut f1 = vec![0.0; n];
        system.apply(t0 + h0, &y1, &mut f1)?;
        stats.rhs_evaluations += 1;

        let d2 = rms(
            f1.iter()
                .zip(&self.f)
                .zip(&scale)
                .map(|((a, b), s)| (a - b) / s),
        ) / h0;

        let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / (ERROR_ESTIMATOR_ORDER + 1.0))
        };

        Ok((100.0 * h0)
            .min(h1)
            .min(interval_length)
            .min(self.settings.max_step))
    }
}

fn dense_value(q: &DMatrix<f64>, y_old: &[f64], h: f64, x: f64) -> DVector<f64> {
    let poly = DVector::from_vec(vec![x, x * x, x * x * x, x * x * x * x]);
    DVector::from_column_slice(y_old) + (q * poly) * h
}

fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let mut count = 0usize;
    let mut sum = 0.0;
    for v in values {
        sum += v * v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

/// Distance from `t` to the next representable f64 in the forward direction.
fn spacing(t: f64) -> f64 {
    if t == 0.0 {
        return f64::from_bits(1);
    }
    let bits = t.to_bits();
    let next = if t > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    };
    (next - t).abs()
}
