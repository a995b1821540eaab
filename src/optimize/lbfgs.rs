//! Limited-memory BFGS with finite-difference gradients, plus a
//! bound-constrained variant via gradient projection.
//!
//! The estimators expose no analytic gradient, so derivatives are
//! forward differences with a fixed step. History depth follows the
//! usual m = 10.

const HISTORY: usize = 10;
const MAX_BACKTRACKS: usize = 40;
const ARMIJO_C1: f64 = 1e-4;

/// Unconstrained limited-memory BFGS.
pub fn minimize_lbfgs<F>(
    mut func: F,
    x: &mut [f64],
    step: f64,
    eps: f64,
    max_iter: usize,
) -> (f64, usize)
where
    F: FnMut(&[f64]) -> f64,
{
    lbfgs_core(&mut func, x, None, step, eps, max_iter)
}

/// Box-constrained limited-memory BFGS; `bounds` pairs are inclusive and
/// may be infinite. Without bounds this is the unconstrained method with
/// its own default tolerances.
pub fn minimize_lbfgsb<F>(
    mut func: F,
    x: &mut [f64],
    bounds: Option<&[(f64, f64)]>,
    step: f64,
    eps: f64,
    max_iter: usize,
) -> (f64, usize)
where
    F: FnMut(&[f64]) -> f64,
{
    lbfgs_core(&mut func, x, bounds, step, eps, max_iter)
}

fn lbfgs_core<F>(
    func: &mut F,
    x: &mut [f64],
    bounds: Option<&[(f64, f64)]>,
    step: f64,
    eps: f64,
    max_iter: usize,
) -> (f64, usize)
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x.len();
    let max_iter = if max_iter == 0 {
        super::DEFAULT_MAX_ITER
    } else {
        max_iter
    };

    project(x, bounds);
    let mut f = func(x);
    let mut g = fd_gradient(func, x, f, step);

    // (s, y, 1 / y.s) triples, newest last.
    let mut history: Vec<(Vec<f64>, Vec<f64>, f64)> = Vec::with_capacity(HISTORY);
    let mut num_iter = 0;

    while num_iter < max_iter {
        num_iter += 1;

        if projected_grad_norm(x, &g, bounds) <= eps * f.abs().max(1.0) {
            break;
        }

        let mut dir = two_loop_direction(&g, &history);
        zero_bound_directions(x, &g, &mut dir, bounds);

        let mut dg: f64 = dir.iter().zip(g.iter()).map(|(d, g)| d * g).sum();
        if !(dg < 0.0) {
            // Not a descent direction: restart from steepest descent.
            history.clear();
            for (d, gv) in dir.iter_mut().zip(g.iter()) {
                *d = -gv;
            }
            zero_bound_directions(x, &g, &mut dir, bounds);
            dg = dir.iter().zip(g.iter()).map(|(d, g)| d * g).sum();
            if !(dg < 0.0) {
                break;
            }
        }

        // Backtracking Armijo line search on the projected path.
        let mut alpha = if history.is_empty() {
            (1.0 / dir.iter().map(|d| d * d).sum::<f64>().sqrt()).min(1.0)
        } else {
            1.0
        };
        let x_prev = x.to_vec();
        let f_prev = f;
        let mut found = false;
        for _ in 0..MAX_BACKTRACKS {
            for i in 0..n {
                x[i] = x_prev[i] + alpha * dir[i];
            }
            project(x, bounds);
            let f_new = func(x);
            if f_new <= f_prev + ARMIJO_C1 * alpha * dg {
                f = f_new;
                found = true;
                break;
            }
            alpha *= 0.5;
        }
        if !found {
            x.copy_from_slice(&x_prev);
            break;
        }

        let g_new = fd_gradient(func, x, f, step);
        let s: Vec<f64> = x.iter().zip(x_prev.iter()).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
        let ys: f64 = y.iter().zip(s.iter()).map(|(y, s)| y * s).sum();
        if ys > 1e-12 {
            if history.len() == HISTORY {
                history.remove(0);
            }
            history.push((s, y, 1.0 / ys));
        }
        g = g_new;

        // Relative function-value convergence.
        if (f_prev - f).abs() <= 1e-14 * (f_prev.abs() + f.abs() + 1e-20) {
            break;
        }
    }

    (f, num_iter)
}

/// Classic two-loop recursion returning `-H g`.
fn two_loop_direction(g: &[f64], history: &[(Vec<f64>, Vec<f64>, f64)]) -> Vec<f64> {
    let mut q = g.to_vec();
    let mut alphas = vec![0.0; history.len()];
    for (k, (s, y, rho)) in history.iter().enumerate().rev() {
        let alpha = rho * s.iter().zip(q.iter()).map(|(s, q)| s * q).sum::<f64>();
        alphas[k] = alpha;
        for (qv, yv) in q.iter_mut().zip(y.iter()) {
            *qv -= alpha * yv;
        }
    }

    if let Some((s, y, _)) = history.last() {
        let ys: f64 = y.iter().zip(s.iter()).map(|(y, s)| y * s).sum();
        let yy: f64 = y.iter().map(|y| y * y).sum();
        if yy > 0.0 {
            let gamma = ys / yy;
            for qv in q.iter_mut() {
                *qv *= gamma;
            }
        }
    }

    for (k, (s, y, rho)) in history.iter().enumerate() {
        let beta = rho * y.iter().zip(q.iter()).map(|(y, q)| y * q).sum::<f64>();
        for (qv, sv) in q.iter_mut().zip(s.iter()) {
            *qv += (alphas[k] - beta) * sv;
        }
    }

    for qv in q.iter_mut() {
        *qv = -*qv;
    }
    q
}

fn fd_gradient<F>(func: &mut F, x: &mut [f64], f: f64, step: f64) -> Vec<f64>
where
    F: FnMut(&[f64]) -> f64,
{
    let mut g = vec![0.0; x.len()];
    for i in 0..x.len() {
        let saved = x[i];
        x[i] = saved + step;
        g[i] = (func(x) - f) / step;
        x[i] = saved;
    }
    g
}

fn project(x: &mut [f64], bounds: Option<&[(f64, f64)]>) {
    if let Some(bounds) = bounds {
        for (v, &(lo, hi)) in x.iter_mut().zip(bounds.iter()) {
            *v = v.clamp(lo, hi);
        }
    }
}

/// Drops descent components that push an active bound further out.
fn zero_bound_directions(x: &[f64], g: &[f64], dir: &mut [f64], bounds: Option<&[(f64, f64)]>) {
    let _ = g;
    if let Some(bounds) = bounds {
        for i in 0..x.len() {
            let (lo, hi) = bounds[i];
            if (x[i] <= lo && dir[i] < 0.0) || (x[i] >= hi && dir[i] > 0.0) {
                dir[i] = 0.0;
            }
        }
    }
}

/// Infinity norm of the gradient restricted to free coordinates.
fn projected_grad_norm(x: &[f64], g: &[f64], bounds: Option<&[(f64, f64)]>) -> f64 {
    let mut norm: f64 = 0.0;
    for i in 0..x.len() {
        let mut gi = g[i];
        if let Some(bounds) = bounds {
            let (lo, hi) = bounds[i];
            if (x[i] <= lo && gi > 0.0) || (x[i] >= hi && gi < 0.0) {
                gi = 0.0;
            }
        }
        norm = norm.max(gi.abs());
    }
    norm
}

#[cfg(test)]
mod test {
    use super::{minimize_lbfgs, minimize_lbfgsb};
    use crate::optimize::rosenbrock;

    #[test]
    fn solves_a_quadratic_quickly() {
        let mut x = vec![4.0, -3.0];
        let (f, iters) = minimize_lbfgs(
            |x| (x[0] - 2.0).powi(2) + 10.0 * (x[1] - 1.0).powi(2),
            &mut x,
            1e-8,
            1e-9,
            0,
        );
        assert!(f < 1e-8, "f = {f} after {iters} iterations");
        assert!((x[0] - 2.0).abs() < 1e-3);
        assert!((x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn follows_the_rosenbrock_valley() {
        let mut x = vec![-1.2, 1.0, 0.8];
        let (f, _) = minimize_lbfgs(rosenbrock, &mut x, 1e-8, 1e-9, 0);
        assert!(f < 1e-7);
        for v in &x {
            assert!((v - 1.0).abs() < 1e-3, "ended at {x:?}");
        }
    }

    #[test]
    fn respects_box_bounds() {
        let bounds = [(0.5, 2.0), (-1.0, 0.25)];
        let mut x = vec![1.5, -0.8];
        let (_, _) = minimize_lbfgsb(
            |x| (x[0] + 1.0).powi(2) + (x[1] - 1.0).powi(2),
            &mut x,
            Some(&bounds),
            1e-8,
            1e-9,
            0,
        );
        // The unconstrained optimum (-1, 1) lies outside the box; the
        // minimizer must stop at the nearest face.
        assert!((x[0] - 0.5).abs() < 1e-6, "x = {x:?}");
        assert!((x[1] - 0.25).abs() < 1e-6, "x = {x:?}");
    }
}
