//! Black-box minimizers over a dense parameter vector.
//!
//! The estimators only expose `f(params) -> scalar`, so every technique
//! here is derivative-free at the interface; the quasi-Newton methods
//! build their gradients by finite differences internally.

mod lbfgs;
mod powell;

pub use lbfgs::{minimize_lbfgs, minimize_lbfgsb};
pub use powell::minimize_powell;

use crate::{Error, Result};

/// Hard cap on optimizer iterations when the caller does not set one.
pub const DEFAULT_MAX_ITER: usize = 15000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Technique {
    Powell,
    Lbfgs,
    LbfgsB,
}

impl std::str::FromStr for Technique {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Powell" => Ok(Technique::Powell),
            "LBFGS" => Ok(Technique::Lbfgs),
            "LBFGSB" => Ok(Technique::LbfgsB),
            other => Err(Error::UnknownOptimization(other.to_string())),
        }
    }
}

/// Minimizes `func` over `x` in place; returns the final function value
/// and the number of iterations taken.
pub fn minimize<F>(technique: Technique, func: F, x: &mut [f64]) -> (f64, usize)
where
    F: FnMut(&[f64]) -> f64,
{
    match technique {
        Technique::Powell => minimize_powell(func, x, 1e-4, 1e-6, 0),
        Technique::Lbfgs => minimize_lbfgs(func, x, 1e-8, 1e-7, 0),
        Technique::LbfgsB => minimize_lbfgsb(func, x, None, 1e-8, 1e-8, 0),
    }
}

#[cfg(test)]
pub(crate) fn rosenbrock(x: &[f64]) -> f64 {
    let mut f = 0.0;
    for i in 0..x.len() - 1 {
        f += 100.0 * (x[i + 1] - x[i] * x[i]).powi(2) + (1.0 - x[i]).powi(2);
    }
    f
}

#[cfg(test)]
mod test {
    use super::{minimize, rosenbrock, Technique};

    #[test]
    fn every_technique_solves_rosenbrock() {
        for technique in [Technique::Powell, Technique::Lbfgs, Technique::LbfgsB] {
            let mut evals = 0usize;
            let mut x = vec![-1.2, 1.0, 0.8];
            let (f, _) = minimize(
                technique,
                |x| {
                    evals += 1;
                    rosenbrock(x)
                },
                &mut x,
            );
            assert!(f < 1e-6, "{technique:?} stopped at f = {f}");
            for v in &x {
                assert!((v - 1.0).abs() <= 1e-2, "{technique:?} ended at {x:?}");
            }
            assert!(evals < 200_000, "{technique:?} used {evals} evaluations");
        }
    }
}
