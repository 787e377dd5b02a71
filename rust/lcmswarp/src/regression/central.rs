// --------------------------------------------------------------------------------
// Central regression: best y-bin path through an x/y histogram of mass errors
// --------------------------------------------------------------------------------

use super::{
    CalibrationFunction,
    RegressionPoint,
};
use crate::errors::RegressionError;
use crate::mixture::fit_univariate;
use crate::options::CentralRegressionOptions;
use crate::{
    finite_range,
    EPSILON,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

/// Deviation assumed for x-bins with too few points to estimate one.
pub const NOMINAL_BIN_STD: f64 = 0.1;

/// Piecewise-constant ppm shift, one value per x-bin.
///
/// Predictions outside the fitted x range use the first or last bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentralRegression {
    x_range: (f64, f64),
    shifts: Vec<f64>,
    bin_stds: Vec<f64>,
}

/// Grid of y-bin scores per x-bin.
struct ScoreGrid {
    num_y_bins: usize,
    scores: Vec<f64>,
}

impl ScoreGrid {
    fn get(&self, x_bin: usize, y_bin: usize) -> f64 {
        self.scores[x_bin * self.num_y_bins + y_bin]
    }
}

impl CentralRegression {
    /// Fits the shift curve with y-bins spanning `[-tolerance, tolerance]`.
    ///
    /// ```
    /// use lcmswarp::regression::{CentralRegression, RegressionPoint};
    /// use lcmswarp::options::CentralRegressionOptions;
    ///
    /// let points: Vec<RegressionPoint> =
    ///     (0..100).map(|i| RegressionPoint::new(i as f64, 3.0)).collect();
    /// let options = CentralRegressionOptions::default();
    /// let fit = CentralRegression::fit(&points, &options, 20.0).unwrap();
    /// assert!(fit.shifts().iter().all(|s| *s == 0.0));
    /// ```
    pub fn fit(
        points: &[RegressionPoint],
        options: &CentralRegressionOptions,
        tolerance: f64,
    ) -> Result<Self, RegressionError> {
        let points: Vec<RegressionPoint> = points
            .iter()
            .filter(|p| p.x.is_finite() && p.mass_error.is_finite())
            .copied()
            .collect();
        let x_range = finite_range(points.iter().map(|p| p.x)).ok_or(RegressionError::NoPoints)?;
        let num_x_bins = options.num_x_bins.max(1);
        let num_y_bins = options.num_y_bins.max(1);

        // Constant mass error carries no shape to follow.
        let (y_min, y_max) =
            finite_range(points.iter().map(|p| p.mass_error)).unwrap_or((0.0, 0.0));
        if y_max - y_min <= EPSILON {
            debug!("Constant mass error, central regression is flat");
            return Ok(Self {
                x_range,
                shifts: vec![0.0; num_x_bins],
                bin_stds: vec![NOMINAL_BIN_STD; num_x_bins],
            });
        }

        let mut bins: Vec<Vec<f64>> = vec![Vec::new(); num_x_bins];
        for point in points.iter() {
            bins[x_bin_of(point.x, x_range, num_x_bins)].push(point.mass_error);
        }

        let tolerance = tolerance.abs().max(EPSILON);
        let y_step = 2.0 * tolerance / num_y_bins as f64;
        let y_centers: Vec<f64> = (0..num_y_bins)
            .map(|j| -tolerance + (j as f64 + 0.5) * y_step)
            .collect();

        let mut bin_stds = Vec::with_capacity(num_x_bins);
        let mut scored = vec![false; num_x_bins];
        let mut scores = vec![0.0; num_x_bins * num_y_bins];
        for (x_bin, values) in bins.iter().enumerate() {
            if values.len() < options.min_points_per_bin.max(1) {
                bin_stds.push(NOMINAL_BIN_STD);
                continue;
            }
            scored[x_bin] = true;
            let std = fit_univariate(values, tolerance / 3.0).std;
            let std = if std > EPSILON { std } else { NOMINAL_BIN_STD };
            bin_stds.push(std);
            for (y_bin, center) in y_centers.iter().enumerate() {
                scores[x_bin * num_y_bins + y_bin] = values
                    .iter()
                    .map(|y| {
                        let z = ((y - center).abs() / std).min(options.outlier_z);
                        -0.5 * z * z
                    })
                    .sum();
            }
        }

        if !scored.contains(&true) {
            debug!(
                "No x-bin holds {} points, central regression is flat",
                options.min_points_per_bin
            );
            return Ok(Self {
                x_range,
                shifts: vec![0.0; num_x_bins],
                bin_stds,
            });
        }

        let grid = ScoreGrid { num_y_bins, scores };
        let path = best_y_path(&grid, num_x_bins, options.num_jumps);
        let shifts = (0..num_x_bins)
            .map(|x_bin| y_centers[path[nearest_scored(&scored, x_bin)]])
            .collect();

        Ok(Self {
            x_range,
            shifts,
            bin_stds,
        })
    }

    pub fn shifts(&self) -> &[f64] {
        &self.shifts
    }

    /// Deviation used for each x-bin while scoring.
    pub fn bin_stds(&self) -> &[f64] {
        &self.bin_stds
    }

    pub fn x_range(&self) -> (f64, f64) {
        self.x_range
    }
}

impl CalibrationFunction for CentralRegression {
    fn predict(&self, x: f64) -> f64 {
        if self.shifts.is_empty() {
            return 0.0;
        }
        self.shifts[x_bin_of(x, self.x_range, self.shifts.len())]
    }
}

fn x_bin_of(x: f64, x_range: (f64, f64), num_bins: usize) -> usize {
    let span = x_range.1 - x_range.0;
    if span <= EPSILON || !x.is_finite() {
        return 0;
    }
    let bin = ((x - x_range.0) / span * num_bins as f64).floor();
    if bin <= 0.0 {
        0
    } else {
        (bin as usize).min(num_bins - 1)
    }
}

/// Closest x-bin that was scored, the lower one on ties. At least one bin
/// must be scored.
fn nearest_scored(scored: &[bool], x_bin: usize) -> usize {
    (0..scored.len())
        .filter(|&i| scored[i])
        .min_by_key(|&i| i.abs_diff(x_bin))
        .unwrap_or(x_bin)
}

/// Highest scoring sequence of y-bins, one per x-bin, moving at most
/// `num_jumps` y-bins between neighbours.
///
/// Predecessors are visited from the same y-bin outwards and ties keep the
/// closest. The final bin prefers the y-bin closest to zero on ties.
fn best_y_path(grid: &ScoreGrid, num_x_bins: usize, num_jumps: usize) -> Vec<usize> {
    let ny = grid.num_y_bins;
    let mut cumulative = vec![0.0; num_x_bins * ny];
    let mut previous = vec![0usize; num_x_bins * ny];

    cumulative[..ny].copy_from_slice(&grid.scores[..ny]);
    for x_bin in 1..num_x_bins {
        for y_bin in 0..ny {
            let mut best = (y_bin, cumulative[(x_bin - 1) * ny + y_bin]);
            for offset in 1..=num_jumps.min(ny) {
                let neighbours = [y_bin.checked_sub(offset), Some(y_bin + offset)];
                for candidate in neighbours.into_iter().flatten() {
                    if candidate >= ny {
                        continue;
                    }
                    let score = cumulative[(x_bin - 1) * ny + candidate];
                    if score > best.1 {
                        best = (candidate, score);
                    }
                }
            }
            cumulative[x_bin * ny + y_bin] = best.1 + grid.get(x_bin, y_bin);
            previous[x_bin * ny + y_bin] = best.0;
        }
    }

    let last = num_x_bins - 1;
    let middle = (ny - 1) as f64 / 2.0;
    let mut end = 0;
    for y_bin in 1..ny {
        let score = cumulative[last * ny + y_bin];
        let best = cumulative[last * ny + end];
        let closer = (y_bin as f64 - middle).abs() < (end as f64 - middle).abs();
        if score > best || (score == best && closer) {
            end = y_bin;
        }
    }

    let mut path = vec![0; num_x_bins];
    path[last] = end;
    for x_bin in (1..num_x_bins).rev() {
        path[x_bin - 1] = previous[x_bin * ny + path[x_bin]];
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Distribution;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use statrs::distribution::Normal;

    fn options() -> CentralRegressionOptions {
        CentralRegressionOptions {
            num_x_bins: 10,
            num_y_bins: 40,
            num_jumps: 40,
            min_points_per_bin: 3,
            outlier_z: 3.0,
        }
    }

    #[test]
    fn test_constant_error_gives_zero_shifts() {
        let points: Vec<RegressionPoint> = (0..50)
            .map(|i| RegressionPoint::new(400.0 + i as f64, -2.0))
            .collect();
        let fit = CentralRegression::fit(&points, &options(), 20.0).unwrap();
        assert_eq!(fit.shifts(), vec![0.0; 10].as_slice());
        assert_eq!(fit.predict(1000.0), 0.0);
    }

    #[test]
    fn test_follows_step_in_error() {
        // Left half sits at -5 ppm, right half at +5 ppm.
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.5).unwrap();
        let points: Vec<RegressionPoint> = (0..400)
            .map(|i| {
                let x = i as f64 / 4.0;
                let y = if x < 50.0 { -5.0 } else { 5.0 };
                RegressionPoint::new(x, y + noise.sample(&mut rng))
            })
            .collect();
        let fit = CentralRegression::fit(&points, &options(), 20.0).unwrap();
        // Bin width is 1 ppm, centers sit at half-integers.
        assert!((fit.predict(10.0) + 5.0).abs() <= 0.5 + 1e-9, "{:?}", fit.shifts());
        assert!((fit.predict(90.0) - 5.0).abs() <= 0.5 + 1e-9, "{:?}", fit.shifts());
        // Clamped outside the fitted range.
        assert_eq!(fit.predict(-100.0), fit.predict(0.0));
        assert_eq!(fit.predict(1e6), fit.predict(99.75));
    }

    #[test]
    fn test_sparse_bins_copy_neighbours() {
        // Only the first x-bin has enough points to be scored.
        let mut points: Vec<RegressionPoint> =
            (0..10).map(|i| RegressionPoint::new(0.1 * i as f64, 4.2)).collect();
        points.push(RegressionPoint::new(9.0, -3.0));
        points.push(RegressionPoint::new(10.0, -3.0));
        let fit = CentralRegression::fit(&points, &options(), 20.0).unwrap();
        let first = fit.shifts()[0];
        assert!((first - 4.5).abs() < 1e-9, "{:?}", fit.shifts());
        assert!(fit.shifts().iter().all(|s| *s == first));
        assert_eq!(fit.bin_stds()[5], NOMINAL_BIN_STD);
    }

    #[test]
    fn test_no_points() {
        let res = CentralRegression::fit(&[], &options(), 20.0);
        assert_eq!(res, Err(RegressionError::NoPoints));
    }
}
