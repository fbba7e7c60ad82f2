// src/solver.rs
//
// Relaxation solver for the 2D Laplace equation with mixed boundary
// conditions:
//  - Dirichlet: cells listed in a Region are stamped once before the loop
//    and excluded from the interior update for the whole solve.
//  - Neumann: zero normal derivative on the four outer edges, enforced by
//    copying the adjacent interior row/column onto each edge after every
//    sweep.
//
// The update is a Jacobi sweep: every output cell reads only the previous
// sweep's field, so the interior loop is row-parallel without colouring and
// the result is independent of scheduling.
//
// Known quirk, kept on purpose: the edge copy runs unconditionally after the
// interior update, so a pin placed on the outer edge is overwritten by the
// Neumann copy within the first sweep. Callers that need edge electrodes to
// survive must re-stamp them between solves.

use crate::grid::Grid2D;
use crate::region::Region;
use crate::scalar_field::ScalarField2D;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    /// Grid too small to admit an interior update.
    #[error("grid {nx}x{ny} too small for an interior update (need at least 3x3)")]
    InvalidDimension { nx: usize, ny: usize },

    /// A region references a cell outside the grid.
    #[error("region cell ({i}, {j}) outside grid bounds {nx}x{ny}")]
    InvalidCoordinate {
        i: usize,
        j: usize,
        nx: usize,
        ny: usize,
    },

    /// Non-positive iteration cap.
    #[error("max_iterations must be at least 1")]
    InvalidParameter,
}

/// How the sweep loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStopReason {
    /// Max pointwise change of a sweep fell below the tolerance.
    Converged,
    /// Loop ran to the iteration cap.
    IterationCap,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    /// Sweeps actually performed.
    pub sweeps: usize,

    /// Max pointwise change of the last completed sweep
    /// (0.0 when no interior cell was free to update).
    pub last_max_change: f64,

    /// How the loop terminated.
    pub stop_reason: SolveStopReason,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolveSettings {
    /// Hard cap on the number of sweeps.
    pub max_iterations: usize,

    /// Early-exit threshold on the per-sweep max pointwise change.
    ///
    /// A non-positive value never satisfies `max_change < tolerance`, so the
    /// loop deterministically runs to `max_iterations`. That is a valid way
    /// to force full-iteration execution, not an input error.
    pub tolerance: f64,
}

impl Default for SolveSettings {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            tolerance: 1e-5,
        }
    }
}

impl SolveSettings {
    /// Optional: configure via env vars so runs can be tuned without recompiling.
    pub fn from_env() -> Self {
        fn get_usize(name: &str) -> Option<usize> {
            std::env::var(name)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
        }
        fn get_f64(name: &str) -> Option<f64> {
            std::env::var(name)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
        }

        let mut cfg = Self::default();
        if let Some(v) = get_usize("LAPLACE_RELAX_MAX_ITERS") {
            cfg.max_iterations = v.max(1);
        }
        if let Some(v) = get_f64("LAPLACE_RELAX_TOL") {
            cfg.tolerance = v;
        }
        cfg
    }
}

// ---------------------------
// Progress logging (opt-in via env var)
// ---------------------------

#[inline]
fn relax_log_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var("LAPLACE_RELAX_LOG").is_ok())
}

#[inline]
fn relax_log_stride() -> usize {
    static STRIDE: OnceLock<usize> = OnceLock::new();
    *STRIDE.get_or_init(|| {
        std::env::var("LAPLACE_RELAX_LOG_EVERY")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(100)
            .max(1)
    })
}

// ---------------------------
// Validation and Dirichlet setup
// ---------------------------

fn validate(
    grid: &Grid2D,
    regions: &[(Region, f64)],
    settings: &SolveSettings,
) -> Result<(), SolveError> {
    if grid.nx < 3 || grid.ny < 3 {
        return Err(SolveError::InvalidDimension {
            nx: grid.nx,
            ny: grid.ny,
        });
    }
    if settings.max_iterations == 0 {
        return Err(SolveError::InvalidParameter);
    }
    for (region, _) in regions {
        for &(i, j) in &region.cells {
            if !grid.contains(i, j) {
                return Err(SolveError::InvalidCoordinate {
                    i,
                    j,
                    nx: grid.nx,
                    ny: grid.ny,
                });
            }
        }
    }
    Ok(())
}

/// Stamp the fixed potentials into `phi` and build the pinned-cell mask.
///
/// List order is significant: later pairs overwrite earlier ones where
/// regions overlap.
fn stamp_dirichlet(phi: &mut ScalarField2D, regions: &[(Region, f64)]) -> Vec<bool> {
    let mut pinned = vec![false; phi.grid.n_cells()];
    for (region, potential) in regions {
        for &(i, j) in &region.cells {
            let id = phi.grid.idx(i, j);
            phi.data[id] = *potential;
            pinned[id] = true;
        }
    }
    pinned
}

// ---------------------------
// Sweep mechanics
// ---------------------------

/// One Jacobi sweep: five-point average of the four axis neighbours, read
/// from the pre-sweep field, written into `next`. Pinned cells and the outer
/// frame keep their copied values.
///
/// Returns the max |next - phi| over the cells updated here. The per-row
/// maxima are reduced with f64::max, which is associative, so the result
/// does not depend on rayon's scheduling.
fn jacobi_sweep(phi: &ScalarField2D, next: &mut ScalarField2D, pinned: &[bool]) -> f64 {
    let nx = phi.grid.nx;
    let ny = phi.grid.ny;

    next.data.copy_from_slice(&phi.data);

    let phi_ro: &[f64] = &phi.data;

    next.data
        .par_chunks_mut(ny)
        .enumerate()
        .map(|(i, row)| {
            if i == 0 || i + 1 == nx {
                return 0.0f64;
            }
            let base = i * ny;
            let mut max_abs: f64 = 0.0;

            for j in 1..(ny - 1) {
                let id = base + j;
                if pinned[id] {
                    continue;
                }

                let jm = phi_ro[id - 1];
                let jp = phi_ro[id + 1];
                let im = phi_ro[id - ny];
                let ip = phi_ro[id + ny];

                let phi_new = 0.25 * (ip + im + jp + jm);
                row[j] = phi_new;
                max_abs = max_abs.max((phi_new - phi_ro[id]).abs());
            }
            max_abs
        })
        .reduce(|| 0.0f64, f64::max)
}

/// Copy the adjacent interior row/column onto each outer edge (zero normal
/// derivative). Rows first, then columns, so the corners take the column
/// copy of an already-copied row value. Applied unconditionally: an edge
/// cell that happens to be pinned is overwritten here.
fn apply_neumann_edges(data: &mut [f64], nx: usize, ny: usize) {
    // Row 0 <- row 1, row nx-1 <- row nx-2.
    data.copy_within(ny..2 * ny, 0);
    data.copy_within((nx - 2) * ny..(nx - 1) * ny, (nx - 1) * ny);

    // Column 0 <- column 1, column ny-1 <- column ny-2.
    for i in 0..nx {
        let base = i * ny;
        data[base] = data[base + 1];
        data[base + ny - 1] = data[base + ny - 2];
    }
}

// ---------------------------
// Entry points
// ---------------------------

/// Solve the Laplace problem and report how the loop terminated.
///
/// Each call is a pure function of its inputs: the field is allocated and
/// zero-filled here, and nothing carries over between calls, so identical
/// arguments produce bit-identical output.
pub fn solve_with_report(
    grid: Grid2D,
    regions: &[(Region, f64)],
    settings: &SolveSettings,
) -> Result<(ScalarField2D, SolveReport), SolveError> {
    validate(&grid, regions, settings)?;

    let mut phi = ScalarField2D::new(grid);
    let mut next = ScalarField2D::new(grid);

    let pinned = stamp_dirichlet(&mut phi, regions);

    let log_enabled = relax_log_enabled();
    let log_stride = relax_log_stride();

    let mut sweeps = 0usize;
    let mut last_max_change = 0.0f64;
    let mut stop_reason = SolveStopReason::IterationCap;

    for sweep in 1..=settings.max_iterations {
        let max_change = jacobi_sweep(&phi, &mut next, &pinned);
        apply_neumann_edges(&mut next.data, grid.nx, grid.ny);
        std::mem::swap(&mut phi.data, &mut next.data);

        sweeps = sweep;
        last_max_change = max_change;

        if log_enabled && sweep % log_stride == 0 {
            eprintln!("[relax] sweep={} max_change={:.3e}", sweep, max_change);
        }

        if max_change < settings.tolerance {
            stop_reason = SolveStopReason::Converged;
            break;
        }
    }

    Ok((
        phi,
        SolveReport {
            sweeps,
            last_max_change,
            stop_reason,
        },
    ))
}

/// Convenience wrapper for call sites that only need the field.
pub fn solve(
    grid: Grid2D,
    regions: &[(Region, f64)],
    settings: &SolveSettings,
) -> Result<ScalarField2D, SolveError> {
    let (phi, _) = solve_with_report(grid, regions, settings)?;
    Ok(phi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_grid_without_interior() {
        let settings = SolveSettings::default();
        let err = solve(Grid2D::new(2, 5), &[], &settings).unwrap_err();
        assert_eq!(err, SolveError::InvalidDimension { nx: 2, ny: 5 });
        let err = solve(Grid2D::new(5, 1), &[], &settings).unwrap_err();
        assert_eq!(err, SolveError::InvalidDimension { nx: 5, ny: 1 });
    }

    #[test]
    fn rejects_out_of_bounds_region_cell() {
        let settings = SolveSettings::default();
        let regions = vec![(Region::from_cells(vec![(1, 1), (5, 0)]), 1.0)];
        let err = solve(Grid2D::new(5, 5), &regions, &settings).unwrap_err();
        assert_eq!(
            err,
            SolveError::InvalidCoordinate {
                i: 5,
                j: 0,
                nx: 5,
                ny: 5
            }
        );
    }

    #[test]
    fn rejects_zero_iteration_cap() {
        let settings = SolveSettings {
            max_iterations: 0,
            tolerance: 1e-5,
        };
        let err = solve(Grid2D::new(5, 5), &[], &settings).unwrap_err();
        assert_eq!(err, SolveError::InvalidParameter);
    }

    #[test]
    fn overlapping_regions_take_the_later_potential() {
        let regions = vec![
            (Region::from_cells(vec![(1, 1)]), 3.0),
            (Region::from_cells(vec![(1, 1)]), 7.0),
        ];
        let settings = SolveSettings {
            max_iterations: 200,
            tolerance: 1e-9,
        };
        let phi = solve(Grid2D::new(5, 5), &regions, &settings).unwrap();
        assert_eq!(phi.at(1, 1), 7.0);
    }

    #[test]
    fn non_positive_tolerance_runs_to_the_cap() {
        let settings = SolveSettings {
            max_iterations: 7,
            tolerance: 0.0,
        };
        let (_, report) = solve_with_report(Grid2D::new(5, 5), &[], &settings).unwrap();
        assert_eq!(report.sweeps, 7);
        assert_eq!(report.stop_reason, SolveStopReason::IterationCap);
        assert_eq!(report.last_max_change, 0.0);
    }
}
