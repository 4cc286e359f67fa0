//! Kernel DMD: Koopman regression in the dual (kernel) formulation.
//!
//! With `n` training windows, kernel matrices `K_X`, `K_Y` and regularization
//! `γ`, the estimator is `(1/n) U Vᵀ` acting on the training outputs:
//!
//! ```text
//! ŷ(x) = k(x, X) U Vᵀ Y / n
//! ```
//!
//! Reduced-rank regression takes `U` from the generalized eigenproblem
//! `K_Y K_X u / n = σ² (K_X + nγ I) u`, normalized so that
//! `Uᵀ (K_X²/n + γ K_X) U = I`, and `V = K_X U`. Principal-component
//! regression uses the leading eigenvectors of `K_X`.

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::estimators::{
    KoopmanEstimator, ReducedOperator, Regression, SvdSolver, check_input_width, check_observable_rows,
    validate_low_rank,
};
use crate::kernels::Kernel;
use crate::logging::NUMERICS_TARGET;
use crate::math::{cholesky_factor, m_orthonormalize, sorted_symmetric_eigen};

const NAME: &str = "KernelDMD";

/// Eigenvalues of `K_X` below this fraction of the largest are treated as zero.
const EIG_REL_TOL: f64 = 1e-12;

/// Columns whose `M`-norm drops below this fraction after projection are dependent.
const GRAM_SCHMIDT_REL_TOL: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDmd {
    pub kernel: Kernel,
    pub rank: usize,
    pub tikhonov_reg: f64,
    #[serde(default)]
    pub regression: Regression,
    #[serde(default)]
    pub svd_solver: SvdSolver,
    /// Seed of the randomized solver's sketch.
    #[serde(default)]
    pub seed: u64,
    fitted: Option<DualFit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DualFit {
    inputs: DMatrix<f64>,
    outputs: DMatrix<f64>,
    /// `U / sqrt(n)`
    u: DMatrix<f64>,
    /// `V / sqrt(n)`
    v: DMatrix<f64>,
    /// `Vᵀ K_Y V / n`
    output_gram: DMatrix<f64>,
    train_risk: f64,
    operator: ReducedOperator,
}

impl KernelDmd {
    pub fn new(kernel: Kernel, rank: usize, tikhonov_reg: f64) -> Self {
        Self {
            kernel,
            rank,
            tikhonov_reg,
            regression: Regression::default(),
            svd_solver: SvdSolver::default(),
            seed: 0,
            fitted: None,
        }
    }

    pub fn with_regression(mut self, regression: Regression) -> Self {
        self.regression = regression;
        self
    }

    pub fn with_svd_solver(mut self, svd_solver: SvdSolver) -> Self {
        self.svd_solver = svd_solver;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn fitted(&self) -> Result<&DualFit, AppError> {
        self.fitted.as_ref().ok_or_else(|| AppError::not_fitted(NAME))
    }

    fn validate(&self, n: usize) -> Result<(), AppError> {
        validate_low_rank(NAME, self.rank, self.tikhonov_reg, n)?;
        self.kernel.validate()?;
        if let SvdSolver::Randomized { n_oversamples, .. } = self.svd_solver {
            if self.rank + n_oversamples > n {
                return Err(AppError::data(format!(
                    "{NAME}: rank + n_oversamples = {} exceeds the number of training windows {n}.",
                    self.rank + n_oversamples
                )));
            }
        }
        Ok(())
    }
}

impl KoopmanEstimator for KernelDmd {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, batch: &ContextBatch) -> Result<(), AppError> {
        let x = batch.inputs();
        let y = batch.outputs();
        let n = batch.len();
        self.validate(n)?;

        let k_x = self.kernel.gram_sym(x)?;
        let k_y = self.kernel.gram_sym(y)?;
        let alpha = n as f64 * self.tikhonov_reg;

        let (u, v) = match (self.regression, self.svd_solver) {
            (Regression::ReducedRank, SvdSolver::Full) => rrr_full(&k_x, &k_y, self.rank, self.tikhonov_reg)?,
            (
                Regression::ReducedRank,
                SvdSolver::Randomized {
                    iterated_power,
                    n_oversamples,
                },
            ) => {
                let sketch = gaussian_sketch(n, self.rank + n_oversamples, self.seed);
                rrr_randomized(&k_x, &k_y, self.rank, self.tikhonov_reg, iterated_power, sketch)?
            }
            (Regression::PrincipalComponent, SvdSolver::Full) => {
                let (values, vectors) = sorted_symmetric_eigen(&k_x)?;
                pcr_from_eigen(&values, &vectors, self.rank, alpha)?
            }
            (
                Regression::PrincipalComponent,
                SvdSolver::Randomized {
                    iterated_power,
                    n_oversamples,
                },
            ) => {
                let sketch = gaussian_sketch(n, self.rank + n_oversamples, self.seed);
                let (values, vectors) = randomized_eigen(&k_x, iterated_power, sketch)?;
                pcr_from_eigen(&values, &vectors, self.rank, alpha)?
            }
        };

        let sqrt_n = (n as f64).sqrt();
        let u = u / sqrt_n;
        let v = v / sqrt_n;

        let transfer = v.transpose() * self.kernel.gram_apply(y, x, &u)?;
        let readout = v.transpose() * y;
        let k_y_v = &k_y * &v;
        let output_gram = v.transpose() * &k_y_v;

        let d = u.transpose() * &k_x;
        let train_risk = kernel_risk(&self.kernel.diag(y), &k_y_v, &d, &output_gram)?;

        let operator = ReducedOperator::new(transfer, readout)?;
        tracing::debug!(
            n,
            rank = u.ncols(),
            regression = ?self.regression,
            solver = ?self.svd_solver,
            train_risk,
            "fitted kernel DMD"
        );

        self.fitted = Some(DualFit {
            inputs: x.clone(),
            outputs: y.clone(),
            u,
            v,
            output_gram,
            train_risk,
            operator,
        });
        Ok(())
    }

    fn operator(&self) -> Result<&ReducedOperator, AppError> {
        Ok(&self.fitted()?.operator)
    }

    fn embed(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        check_input_width(NAME, fit.inputs.ncols(), inputs)?;
        self.kernel.gram_apply(inputs, &fit.inputs, &fit.u)
    }

    fn embed_left(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        check_input_width(NAME, fit.outputs.ncols(), inputs)?;
        self.kernel.gram_apply(inputs, &fit.outputs, &fit.v)
    }

    fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        check_observable_rows(NAME, fit.v.nrows(), values)?;
        Ok(fit.v.transpose() * values)
    }

    fn risk(&self, batch: Option<&ContextBatch>) -> Result<f64, AppError> {
        let fit = self.fitted()?;
        let Some(batch) = batch else {
            return Ok(fit.train_risk);
        };
        check_input_width(NAME, fit.inputs.ncols(), batch.inputs())?;
        check_input_width(NAME, fit.outputs.ncols(), batch.outputs())?;

        let c = self.kernel.gram_apply(batch.outputs(), &fit.outputs, &fit.v)?;
        let d = self
            .kernel
            .gram_apply(batch.inputs(), &fit.inputs, &fit.u)?
            .transpose();
        kernel_risk(&self.kernel.diag(batch.outputs()), &c, &d, &fit.output_gram)
    }
}

/// `mean k(y, y) − 2 tr(C D)/m + tr(Dᵀ E D)/m` with `C = K_yY V'`,
/// `D = U'ᵀ K_Xx` and `E = V'ᵀ K_Y V'`.
fn kernel_risk(
    diag_yy: &DVector<f64>,
    c: &DMatrix<f64>,
    d: &DMatrix<f64>,
    e: &DMatrix<f64>,
) -> Result<f64, AppError> {
    let m = diag_yy.len();
    if m == 0 {
        return Err(AppError::data("Cannot evaluate the risk on an empty batch."));
    }
    let m_f = m as f64;
    let cross = c.component_mul(&d.transpose()).sum();
    let quad = (e * d).component_mul(d).sum();
    let risk = diag_yy.sum() / m_f - 2.0 * cross / m_f + quad / m_f;
    if !risk.is_finite() {
        return Err(AppError::numeric("Non-finite risk."));
    }
    Ok(risk)
}

fn gaussian_sketch(n: usize, cols: usize, seed: u64) -> DMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut omega = DMatrix::<f64>::from_fn(n, cols, |_, _| rng.sample(StandardNormal));
    for mut col in omega.column_iter_mut() {
        let norm = col.norm();
        if norm > 0.0 {
            col /= norm;
        }
    }
    omega
}

/// Leading eigenpairs of `k_x` above the relative cutoff.
fn positive_spectrum(values: &DVector<f64>) -> usize {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    values.iter().take_while(|&&v| v > EIG_REL_TOL * max).count()
}

fn clamp_rank(requested: usize, available: usize) -> Result<usize, AppError> {
    if available == 0 {
        return Err(AppError::numeric(format!(
            "{NAME}: the kernel matrix is numerically zero."
        )));
    }
    if available < requested {
        tracing::warn!(target: NUMERICS_TARGET, requested, available, "rank too high; reducing");
    }
    Ok(requested.min(available))
}

fn normalize_columns(u: &mut DMatrix<f64>, k_x: &DMatrix<f64>, tikhonov_reg: f64) -> Result<DMatrix<f64>, AppError> {
    let n = k_x.nrows() as f64;
    let mut v = k_x * &*u;
    for j in 0..u.ncols() {
        let kx_u = v.column(j);
        let norm_sq = kx_u.norm_squared() / n + tikhonov_reg * u.column(j).dot(&kx_u);
        if !(norm_sq > 0.0 && norm_sq.is_finite()) {
            return Err(AppError::numeric(format!(
                "{NAME}: degenerate direction {j} while normalizing the projector."
            )));
        }
        let scale = norm_sq.sqrt();
        u.column_mut(j).apply(|x| *x /= scale);
        v.column_mut(j).apply(|x| *x /= scale);
    }
    Ok(v)
}

/// Dense reduced-rank regression. Returns unscaled `(U, V)`.
fn rrr_full(
    k_x: &DMatrix<f64>,
    k_y: &DMatrix<f64>,
    rank: usize,
    tikhonov_reg: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), AppError> {
    let n = k_x.nrows();
    let alpha = n as f64 * tikhonov_reg;

    let (lambda, e) = sorted_symmetric_eigen(k_x)?;
    let keep = positive_spectrum(&lambda);
    let r = clamp_rank(rank, keep)?;

    // In the basis E_k, with c = (Λ(Λ + α))^{-1/2} w, the generalized problem
    // becomes the symmetric one  D E_kᵀ K_Y E_k D w = n σ² w,  D = (Λ/(Λ + α))^{1/2}.
    let e_k = e.columns(0, keep).into_owned();
    let p: Vec<f64> = (0..keep).map(|i| (lambda[i] / (lambda[i] + alpha)).sqrt()).collect();
    let mut h = e_k.transpose() * k_y * &e_k;
    for i in 0..keep {
        for j in 0..keep {
            h[(i, j)] *= p[i] * p[j];
        }
    }

    let (_, w) = sorted_symmetric_eigen(&h)?;
    let mut c = w.columns(0, r).into_owned();
    for (i, mut row) in c.row_iter_mut().enumerate() {
        row /= (lambda[i] * (lambda[i] + alpha)).sqrt();
    }

    let mut u = e_k * c;
    let v = normalize_columns(&mut u, k_x, tikhonov_reg)?;
    Ok((u, v))
}

/// Randomized reduced-rank regression with `powers` power iterations on the
/// sketch `omega` (`n × (rank + oversamples)`).
fn rrr_randomized(
    k_x: &DMatrix<f64>,
    k_y: &DMatrix<f64>,
    rank: usize,
    tikhonov_reg: f64,
    powers: usize,
    mut omega: DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>), AppError> {
    let n = k_x.nrows();
    let n_f = n as f64;
    let alpha = n_f * tikhonov_reg;

    let regularized = k_x + DMatrix::<f64>::identity(n, n) * alpha;
    let chol = cholesky_factor(&regularized)?;

    for _ in 0..powers {
        let ky_omega = k_y * &omega;
        omega = &ky_omega - chol.solve(&ky_omega) * alpha;
    }
    let ky_omega = k_y * &omega;
    let omega = chol.solve(&ky_omega);

    let q = m_orthonormalize(
        &omega,
        |v| {
            let kv = k_x * v;
            (k_x * &kv) / n_f + kv * tikhonov_reg
        },
        GRAM_SCHMIDT_REL_TOL,
    );
    let r = clamp_rank(rank, q.ncols())?;

    let c = k_x * &q;
    let (s, evecs) = sorted_symmetric_eigen(&(c.transpose() * k_y * &c))?;
    let u = q * evecs.columns(0, r);
    let v = k_x * &u;

    // Residual of  K_Y V / n = σ² (V + α U).
    let sigma_sq: Vec<f64> = (0..r).map(|i| s[i] / (n_f * n_f)).collect();
    let mut residual = k_y * &v / n_f;
    for j in 0..r {
        let rhs = (v.column(j) + u.column(j) * alpha) * sigma_sq[j];
        let mut col = residual.column_mut(j);
        col -= rhs;
    }
    let l1 = residual
        .column_iter()
        .map(|c| c.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0_f64, f64::max);
    if l1 > 1e-6 {
        tracing::warn!(target: NUMERICS_TARGET, l1, "randomized solver: residual of the generalized eigenproblem is large");
    }

    Ok((u, v))
}

/// Leading eigenpairs of `k_x` from a randomized range finder.
fn randomized_eigen(
    k_x: &DMatrix<f64>,
    powers: usize,
    omega: DMatrix<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), AppError> {
    let mut q = (k_x * omega).qr().q();
    for _ in 0..powers {
        q = (k_x * &q).qr().q();
    }
    let projected = q.transpose() * k_x * &q;
    let (values, vectors) = sorted_symmetric_eigen(&projected)?;
    Ok((values, q * vectors))
}

/// Principal-component regression from eigenpairs of `K_X`.
///
/// `U = E_r (Λ_r + α)^{-1} sqrt(n)`, `V = E_r sqrt(n)`.
fn pcr_from_eigen(
    values: &DVector<f64>,
    vectors: &DMatrix<f64>,
    rank: usize,
    alpha: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), AppError> {
    let n = vectors.nrows() as f64;
    let r = clamp_rank(rank, positive_spectrum(values))?;
    let v = vectors.columns(0, r) * n.sqrt();
    let mut u = v.clone();
    for (j, mut col) in u.column_iter_mut().enumerate() {
        col /= values[j] + alpha;
    }
    Ok((u, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Trajectory;

    fn linear_system_batch(n: usize) -> ContextBatch {
        // x_{t+1} = A x_t with eigenvalues 0.9 ± 0.2i.
        let mut rows = vec![vec![1.0, 0.5]];
        for t in 0..n {
            let x = &rows[t];
            rows.push(vec![0.9 * x[0] - 0.2 * x[1], 0.2 * x[0] + 0.9 * x[1]]);
        }
        ContextBatch::from_trajectory(&Trajectory::from_rows(&rows).unwrap(), 2).unwrap()
    }

    fn scattered_batch(n: usize, seed: u64) -> ContextBatch {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows: Vec<Vec<f64>> = (0..=n)
            .map(|_| vec![rng.gen_range(-3.0..3.0), rng.gen_range(-3.0..3.0)])
            .collect();
        ContextBatch::from_trajectory(&Trajectory::from_rows(&rows).unwrap(), 2).unwrap()
    }

    fn assert_linear_spectrum(est: &KernelDmd) {
        let evals = est.eigvals().unwrap();
        assert_eq!(evals.len(), 2);
        for l in &evals {
            assert!((l.re - 0.9).abs() < 1e-6, "{l}");
            assert!((l.im.abs() - 0.2).abs() < 1e-6, "{l}");
        }
    }

    #[test]
    fn full_rrr_recovers_linear_dynamics() {
        let batch = linear_system_batch(30);
        let mut est = KernelDmd::new(Kernel::Linear, 2, 1e-12);
        est.fit(&batch).unwrap();
        assert_linear_spectrum(&est);

        let pred = est.predict(&batch).unwrap();
        assert!((pred - batch.outputs()).norm() < 1e-6);
    }

    #[test]
    fn modes_of_an_output_coordinate_select_its_column() {
        let batch = linear_system_batch(30);
        let mut est = KernelDmd::new(Kernel::Linear, 2, 1e-12);
        est.fit(&batch).unwrap();

        let modes = est.modes().unwrap();
        let own = est.modes_of(batch.outputs()).unwrap();
        assert!((own - &modes).norm() < 1e-12);
        let first = batch.outputs().columns(0, 1).into_owned();
        let first_modes = est.modes_of(&first).unwrap();
        assert!((first_modes - modes.columns(0, 1).into_owned()).norm() < 1e-12);
        assert!(est.modes_of(&DMatrix::zeros(3, 1)).is_err());
    }

    #[test]
    fn eig_evaluates_left_and_right_eigenfunctions() {
        let batch = linear_system_batch(30);
        let mut est = KernelDmd::new(Kernel::Linear, 2, 1e-12);
        est.fit(&batch).unwrap();

        let eig = est.eig(Some(&batch), None).unwrap();
        assert_eq!(eig.values, est.eigvals().unwrap());
        assert_eq!(eig.left.unwrap().shape(), (batch.len(), 2));
        assert!(eig.right.is_none());
        assert!(est.left_spectral_error(&batch).unwrap().is_finite());
        assert!(KernelDmd::new(Kernel::Linear, 2, 0.0).eig(Some(&batch), None).is_err());
    }

    #[test]
    fn randomized_rrr_recovers_linear_dynamics() {
        let batch = linear_system_batch(30);
        let mut est = KernelDmd::new(Kernel::Linear, 2, 1e-12)
            .with_svd_solver(SvdSolver::Randomized {
                iterated_power: 2,
                n_oversamples: 3,
            })
            .with_seed(11);
        est.fit(&batch).unwrap();
        assert_linear_spectrum(&est);
    }

    #[test]
    fn pcr_recovers_linear_dynamics() {
        let batch = linear_system_batch(30);
        for solver in [
            SvdSolver::Full,
            SvdSolver::Randomized {
                iterated_power: 2,
                n_oversamples: 3,
            },
        ] {
            let mut est = KernelDmd::new(Kernel::Linear, 2, 1e-12)
                .with_regression(Regression::PrincipalComponent)
                .with_svd_solver(solver);
            est.fit(&batch).unwrap();
            assert_linear_spectrum(&est);
        }
    }

    #[test]
    fn full_rank_rrr_reduces_to_kernel_ridge_regression() {
        let train = scattered_batch(12, 5);
        let test = scattered_batch(4, 6);
        let kernel = Kernel::Rbf { length_scale: 1.0 };
        let gamma = 1e-2;

        let mut est = KernelDmd::new(kernel, train.len(), gamma);
        est.fit(&train).unwrap();
        let pred = est.predict(&test).unwrap();

        let n = train.len();
        let k_x = kernel.gram_sym(train.inputs()).unwrap();
        let reg = k_x + DMatrix::<f64>::identity(n, n) * (n as f64 * gamma);
        let coef = reg.lu().solve(train.outputs()).unwrap();
        let krr = kernel.gram(test.inputs(), train.inputs()).unwrap() * coef;

        assert!((pred - krr).norm() < 1e-6);
    }

    #[test]
    fn risk_matches_explicit_residual_for_linear_kernel() {
        let train = scattered_batch(20, 1);
        let test = scattered_batch(7, 2);
        let mut est = KernelDmd::new(Kernel::Linear, 1, 1e-3);
        est.fit(&train).unwrap();

        let resid_train = (train.outputs() - est.predict(&train).unwrap()).norm_squared() / train.len() as f64;
        assert!((est.risk(None).unwrap() - resid_train).abs() < 1e-9);

        let resid_test = (test.outputs() - est.predict(&test).unwrap()).norm_squared() / test.len() as f64;
        assert!((est.risk(Some(&test)).unwrap() - resid_test).abs() < 1e-9);
    }

    #[test]
    fn randomized_fit_is_reproducible() {
        let batch = scattered_batch(40, 3);
        let build = || {
            KernelDmd::new(Kernel::Rbf { length_scale: 1.5 }, 4, 1e-6)
                .with_svd_solver(SvdSolver::Randomized {
                    iterated_power: 1,
                    n_oversamples: 5,
                })
                .with_seed(99)
        };
        let mut a = build();
        let mut b = build();
        a.fit(&batch).unwrap();
        b.fit(&batch).unwrap();
        assert_eq!(a.eigvals().unwrap(), b.eigvals().unwrap());
        assert_eq!(a.predict(&batch).unwrap(), b.predict(&batch).unwrap());
    }

    #[test]
    fn forecast_equals_iterated_prediction() {
        let batch = scattered_batch(30, 8);
        let mut est = KernelDmd::new(Kernel::Rbf { length_scale: 2.0 }, 5, 1e-4);
        est.fit(&batch).unwrap();
        for t in 1..4 {
            let direct = est.predict_steps(&batch, t).unwrap();
            let spectral = est.forecast(&batch, t).unwrap();
            assert!((direct - spectral).norm() < 1e-6);
        }
    }

    #[test]
    fn unfitted_and_invalid_configurations_fail() {
        let batch = scattered_batch(10, 4);
        let est = KernelDmd::new(Kernel::Linear, 2, 1e-6);
        let err = est.predict(&batch).unwrap_err();
        assert_eq!(err.message(), "KernelDMD must be fitted first.");
        assert!(est.eigvals().is_err());
        assert!(est.risk(None).is_err());

        assert!(KernelDmd::new(Kernel::Linear, 0, 1e-6).fit(&batch).is_err());
        assert!(KernelDmd::new(Kernel::Linear, 2, -1.0).fit(&batch).is_err());
        let mut too_wide = KernelDmd::new(Kernel::Linear, 6, 1e-6).with_svd_solver(SvdSolver::Randomized {
            iterated_power: 1,
            n_oversamples: 5,
        });
        assert!(too_wide.fit(&batch).is_err());
    }
}
