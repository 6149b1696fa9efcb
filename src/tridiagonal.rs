use anyhow::Result;

/// Pivots smaller than this in magnitude are replaced by it (sign kept).
pub const PIVOT_EPSILON: f64 = 1e-10;

/// Thomas-algorithm solver for tridiagonal systems.
///
/// Row `i` reads `lower[i] * x[i-1] + main[i] * x[i] + upper[i] * x[i+1] = rhs[i]`;
/// `lower[0]` and `upper[n-1]` are ignored. The modified upper diagonal and
/// right-hand side live in the solver so repeated solves of one size never allocate.
#[derive(Debug, Clone, Default)]
pub struct TridiagonalSolver {
    modified_upper: Vec<f64>,
    modified_rhs: Vec<f64>,
}

#[inline(always)]
fn safe_pivot(pivot: f64) -> f64 {
    if pivot.abs() < PIVOT_EPSILON {
        if pivot >= 0.0 { PIVOT_EPSILON } else { -PIVOT_EPSILON }
    } else {
        pivot
    }
}

impl TridiagonalSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        TridiagonalSolver {
            modified_upper: vec![0.0; n],
            modified_rhs: vec![0.0; n],
        }
    }

    /// Solves the system into `out`. All slices must share one length.
    pub fn solve_into(
        &mut self,
        lower: &[f64],
        main: &[f64],
        upper: &[f64],
        rhs: &[f64],
        out: &mut [f64],
    ) -> Result<()> {
        let n = main.len();
        if lower.len() != n || upper.len() != n || rhs.len() != n || out.len() != n {
            anyhow::bail!(
                "Tridiagonal length mismatch: lower={}, main={}, upper={}, rhs={}, out={}.",
                lower.len(), n, upper.len(), rhs.len(), out.len()
            );
        }
        if n == 0 {
            return Ok(());
        }
        if self.modified_upper.len() < n {
            self.modified_upper.resize(n, 0.0);
            self.modified_rhs.resize(n, 0.0);
        }
        let c_prime = &mut self.modified_upper[..n];
        let d_prime = &mut self.modified_rhs[..n];

        // Forward sweep
        let inv_pivot = 1.0 / safe_pivot(main[0]);
        c_prime[0] = upper[0] * inv_pivot;
        d_prime[0] = rhs[0] * inv_pivot;
        for k in 1..n {
            let l_k = lower[k];
            let inv_denominator = 1.0 / safe_pivot(main[k] - l_k * c_prime[k - 1]);
            c_prime[k] = upper[k] * inv_denominator;
            d_prime[k] = (rhs[k] - l_k * d_prime[k - 1]) * inv_denominator;
        }

        // Back substitution
        out[n - 1] = d_prime[n - 1];
        for k in (0..n - 1).rev() {
            out[k] = d_prime[k] - c_prime[k] * out[k + 1];
        }
        Ok(())
    }

    /// Allocating form of [`solve_into`](Self::solve_into).
    pub fn solve(&mut self, lower: &[f64], main: &[f64], upper: &[f64], rhs: &[f64]) -> Result<Vec<f64>> {
        let mut out = vec![0.0; main.len()];
        self.solve_into(lower, main, upper, rhs, &mut out)?;
        Ok(out)
    }
}
