//! Affine calibration fit (raw device coordinates → screen coordinates).
//!
//! The fit treats points as **row vectors**: with `M_raw` holding one row
//! `[raw.x, raw.y, 1]` per sample and `M_screen` one row
//! `[screen.x, screen.y, 1]`, it solves `M_raw · T ≈ M_screen` in the
//! least-squares sense. The third column of `T` is pinned to `[0, 0, 1]ᵀ`
//! (no perspective).
//!
//! The returned [`Transform`] is `Tᵀ`, which acts on column vectors exactly
//! like the device property does. Both fitting modes go through the same
//! row-vector layout before transposition, so translation always lands in
//! the last column of the returned matrix.
//!
//! Fit quality is `-log10(Σ residual²)`; larger is tighter. A perfect fit is
//! clamped to [`MAX_QUALITY`] instead of evaluating `log10(0)`.

use log::debug;
use nalgebra::DMatrix;
use thiserror::Error;
use touchcal_core::{Mat3, Real, SamplePair, Transform};

/// Minimum number of pairs that determines an affine map.
pub const MIN_SAMPLES: usize = 3;
/// Quality below this should be reported to the user as marginal.
pub const MARGINAL_QUALITY: Real = 3.0;
/// Quality reported for a (numerically) exact fit.
pub const MAX_QUALITY: Real = 30.0;

/// Singular values below `RANK_TOL * σ_max` count as zero.
const RANK_TOL: Real = 1e-10;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AffineError {
    #[error("need at least {min} sample pairs, got {got}")]
    InsufficientSamples { got: usize, min: usize },
    #[error("sample matrix is rank deficient (rank {rank}, need {needed}); targets may be collinear")]
    SingularMatrix { rank: usize, needed: usize },
    #[error("sample pair {index} has a non-finite coordinate")]
    NonFiniteSample { index: usize },
    #[error("least-squares solve failed: {0}")]
    SolveFailed(&'static str),
}

/// Result of an affine fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineFit {
    /// Forward map raw → screen (column-vector convention).
    pub transform: Transform,
    /// `-log10` of the residual sum, clamped to [`MAX_QUALITY`].
    pub quality: Real,
    /// Sum of squared residuals over both axes.
    pub residual: Real,
}

impl AffineFit {
    pub fn is_marginal(&self) -> bool {
        self.quality < MARGINAL_QUALITY
    }
}

/// Convert a residual sum into a quality score.
pub fn quality_from_residual(residual: Real) -> Real {
    if residual <= Real::powf(10.0, -MAX_QUALITY) {
        return MAX_QUALITY;
    }
    -residual.log10()
}

/// Entry point for affine calibration fits.
#[derive(Debug, Clone, Copy)]
pub struct AffineSolver;

/// Fit a raw → screen transform.
///
/// With `disable_rotation` the axes are fitted independently and the result
/// has no x↔y mixing.
pub fn fit_affine(pairs: &[SamplePair], disable_rotation: bool) -> Result<AffineFit, AffineError> {
    if disable_rotation {
        AffineSolver::axis_aligned(pairs)
    } else {
        AffineSolver::full(pairs)
    }
}

impl AffineSolver {
    /// Unconstrained affine fit (scale, rotation, shear, translation).
    pub fn full(pairs: &[SamplePair]) -> Result<AffineFit, AffineError> {
        check_samples(pairs)?;
        let n = pairs.len();

        let mut m_raw = DMatrix::<Real>::zeros(n, 3);
        let mut m_screen = DMatrix::<Real>::zeros(n, 3);
        for (i, p) in pairs.iter().enumerate() {
            m_raw[(i, 0)] = p.raw.x;
            m_raw[(i, 1)] = p.raw.y;
            m_raw[(i, 2)] = 1.0;
            m_screen[(i, 0)] = p.screen.x;
            m_screen[(i, 1)] = p.screen.y;
            m_screen[(i, 2)] = 1.0;
        }

        let solved = least_squares(&m_raw, &m_screen)?;

        let mut t = Mat3::zeros();
        for r in 0..3 {
            for c in 0..2 {
                t[(r, c)] = solved[(r, c)];
            }
        }
        t[(2, 2)] = 1.0;

        let residual = sum_sq_residual(&m_raw, &t, &m_screen);
        let quality = quality_from_residual(residual);
        debug!("full affine fit: n={n} residual={residual:e} quality={quality:.2}");

        Ok(AffineFit {
            transform: Transform::from_matrix(t.transpose()),
            quality,
            residual,
        })
    }

    /// Per-axis fit: `screen.x = a·raw.x + e`, `screen.y = d·raw.y + f`.
    pub fn axis_aligned(pairs: &[SamplePair]) -> Result<AffineFit, AffineError> {
        check_samples(pairs)?;

        let (a, e, res_x) = fit_axis(pairs.iter().map(|p| (p.raw.x, p.screen.x)))?;
        let (d, f, res_y) = fit_axis(pairs.iter().map(|p| (p.raw.y, p.screen.y)))?;

        #[rustfmt::skip]
        let t = Mat3::new(
            a,   0.0, 0.0,
            0.0, d,   0.0,
            e,   f,   1.0,
        );

        let quality = quality_from_residual(res_x).min(quality_from_residual(res_y));
        debug!(
            "axis-aligned fit: n={} residual=({res_x:e}, {res_y:e}) quality={quality:.2}",
            pairs.len()
        );

        Ok(AffineFit {
            transform: Transform::from_matrix(t.transpose()),
            quality,
            residual: res_x + res_y,
        })
    }
}

/// Euclidean distance between each screen target and its fitted raw sample.
pub fn residuals(transform: &Transform, pairs: &[SamplePair]) -> Vec<Real> {
    pairs
        .iter()
        .map(|p| (transform.apply(&p.raw) - p.screen).norm())
        .collect()
}

fn check_samples(pairs: &[SamplePair]) -> Result<(), AffineError> {
    if pairs.len() < MIN_SAMPLES {
        return Err(AffineError::InsufficientSamples {
            got: pairs.len(),
            min: MIN_SAMPLES,
        });
    }
    // SVD does not terminate on NaN input.
    let finite = |p: &SamplePair| {
        [p.screen.x, p.screen.y, p.raw.x, p.raw.y]
            .iter()
            .all(|v| v.is_finite())
    };
    if let Some(index) = pairs.iter().position(|p| !finite(p)) {
        return Err(AffineError::NonFiniteSample { index });
    }
    Ok(())
}

/// Solve `[u, 1] · [scale; offset] ≈ v` for one axis.
fn fit_axis(samples: impl Iterator<Item = (Real, Real)>) -> Result<(Real, Real, Real), AffineError> {
    let samples: Vec<(Real, Real)> = samples.collect();
    let n = samples.len();

    let mut a = DMatrix::<Real>::zeros(n, 2);
    let mut b = DMatrix::<Real>::zeros(n, 1);
    for (i, &(u, v)) in samples.iter().enumerate() {
        a[(i, 0)] = u;
        a[(i, 1)] = 1.0;
        b[(i, 0)] = v;
    }

    let x = least_squares(&a, &b)?;
    let residual = (&a * &x - &b).norm_squared();
    Ok((x[(0, 0)], x[(1, 0)], residual))
}

/// Least-squares solve of `A · X ≈ B` via SVD, rejecting rank-deficient `A`.
fn least_squares(a: &DMatrix<Real>, b: &DMatrix<Real>) -> Result<DMatrix<Real>, AffineError> {
    let needed = a.ncols();
    let svd = a.clone().svd(true, true);

    let sigma_max = svd.singular_values.max();
    let eps = sigma_max * RANK_TOL;
    let rank = svd.rank(eps);
    if rank < needed {
        debug!(
            "rank-deficient design matrix: singular values {:?}",
            svd.singular_values.as_slice()
        );
        return Err(AffineError::SingularMatrix { rank, needed });
    }

    svd.solve(b, eps).map_err(AffineError::SolveFailed)
}

fn sum_sq_residual(m_raw: &DMatrix<Real>, t: &Mat3, m_screen: &DMatrix<Real>) -> Real {
    let mut total = 0.0;
    for i in 0..m_raw.nrows() {
        for c in 0..2 {
            let pred = m_raw[(i, 0)] * t[(0, c)]
                + m_raw[(i, 1)] * t[(1, c)]
                + m_raw[(i, 2)] * t[(2, c)];
            let d = pred - m_screen[(i, c)];
            total += d * d;
        }
    }
    total
}
