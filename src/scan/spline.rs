use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone, PartialEq)]
pub enum SplineError {
    TooFewPoints(usize),
    NonFinite,
    DuplicateAbscissa(f64),
    Singular,
}

impl std::fmt::Display for SplineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints(count) => write!(f, "at least 3 samples are needed, got {}", count),
            Self::NonFinite => write!(f, "samples must be finite"),
            Self::DuplicateAbscissa(x) => write!(f, "parameter {} is sampled twice", x),
            Self::Singular => write!(f, "spline system is singular"),
        }
    }
}

impl std::error::Error for SplineError {}

/// Natural cubic spline through a set of samples.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivative at each knot, zero at both ends.
    second: Vec<f64>,
}

impl CubicSpline {
    pub fn natural(samples: &[(f64, f64)]) -> Result<Self, SplineError> {
        if samples.len() < 3 {
            return Err(SplineError::TooFewPoints(samples.len()));
        }
        if samples.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(SplineError::NonFinite);
        }
        let mut samples = samples.to_vec();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(pair) = samples.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(SplineError::DuplicateAbscissa(pair[0].0));
        }
        let (xs, ys): (Vec<f64>, Vec<f64>) = samples.into_iter().unzip();
        let n = xs.len();
        let h = xs.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();

        // interior knots only, the natural boundary pins both ends to zero
        let m = n - 2;
        let mut matrix = DMatrix::<f64>::zeros(m, m);
        let mut rhs = DVector::<f64>::zeros(m);
        for row in 0..m {
            let i = row + 1;
            matrix[(row, row)] = 2. * (h[i - 1] + h[i]);
            if row > 0 {
                matrix[(row, row - 1)] = h[i - 1];
            }
            if row + 1 < m {
                matrix[(row, row + 1)] = h[i];
            }
            rhs[row] = 6. * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
        }
        let interior = matrix.lu().solve(&rhs).ok_or(SplineError::Singular)?;
        let mut second = vec![0.; n];
        second[1..n - 1].copy_from_slice(interior.as_slice());
        Ok(Self { xs, ys, second })
    }

    pub fn range(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Value of the spline at `x`, `None` outside the sampled range.
    pub fn evaluate(&self, x: f64) -> Option<f64> {
        let (low, high) = self.range();
        if !(low..=high).contains(&x) {
            return None;
        }
        let i = self
            .xs
            .windows(2)
            .position(|pair| x <= pair[1])
            .unwrap_or(self.xs.len() - 2);
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let (m0, m1) = (self.second[i], self.second[i + 1]);
        let h = x1 - x0;
        let (a, b) = (x1 - x, x - x0);
        Some(
            m0 * a.powi(3) / (6. * h)
                + m1 * b.powi(3) / (6. * h)
                + (y0 / h - m0 * h / 6.) * a
                + (y1 / h - m1 * h / 6.) * b,
        )
    }

    /// Smallest value over a dense grid of step `resolution` spanning the
    /// sampled range, both ends included. Returns `(x, value)`.
    pub fn minimum(&self, resolution: f64) -> (f64, f64) {
        let (low, high) = self.range();
        let count = ((high - low) / resolution).floor() as usize;
        (0..=count)
            .map(|k| (low + k as f64 * resolution).min(high))
            .chain(std::iter::once(high))
            .filter_map(|x| self.evaluate(x).map(|value| (x, value)))
            .fold((low, f64::INFINITY), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            })
    }
}
