//! Normal + uniform mixture fits by expectation-maximization.
//!
//! Match errors are a blend of true matches, roughly normal around a small
//! offset, and chance matches spread evenly over the tolerance window. The
//! fits here separate the two, giving the deviation of the true matches and
//! the probability that a match is true.

use crate::{
    finite_range,
    EPSILON,
};
use serde::{
    Deserialize,
    Serialize,
};
use statrs::distribution::{
    Continuous,
    Normal,
};

pub const MAX_EM_ITERATIONS: usize = 16;
const CONVERGENCE_TOLERANCE: f64 = 1e-6;
/// Fewer samples than this are not worth fitting.
const MIN_EM_SAMPLES: usize = 3;
const INITIAL_NORMAL_PROBABILITY: f64 = 0.5;

/// Density of the true-match component, 0 when the parameters do not
/// describe a normal distribution.
fn normal_density(value: f64, mean: f64, std: f64) -> f64 {
    Normal::new(mean, std).map_or(0.0, |normal| normal.pdf(value))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnivariateFit {
    pub normal_probability: f64,
    pub uniform_density: f64,
    pub mean: f64,
    pub std: f64,
}

impl UnivariateFit {
    fn nominal(std: f64) -> Self {
        Self {
            normal_probability: INITIAL_NORMAL_PROBABILITY,
            uniform_density: 1.0,
            mean: 0.0,
            std,
        }
    }
}

/// Joint fit over (ppm mass error, NET error) with independent dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixtureFit {
    pub normal_probability: f64,
    pub uniform_density: f64,
    pub mean_mass: f64,
    pub std_mass: f64,
    pub mean_net: f64,
    pub std_net: f64,
}

impl MixtureFit {
    /// Zero means, the given deviations and an even split between the
    /// components. Used when there is nothing to fit.
    pub fn nominal(std_mass: f64, std_net: f64) -> Self {
        Self {
            normal_probability: INITIAL_NORMAL_PROBABILITY,
            uniform_density: 1.0,
            mean_mass: 0.0,
            std_mass,
            mean_net: 0.0,
            std_net,
        }
    }

    /// Density of the true-match component at the given errors.
    pub fn normal_density(&self, mass_error: f64, net_error: f64) -> f64 {
        normal_density(mass_error, self.mean_mass, self.std_mass)
            * normal_density(net_error, self.mean_net, self.std_net)
    }

    /// Full mixture density.
    pub fn likelihood(&self, mass_error: f64, net_error: f64) -> f64 {
        self.normal_probability * self.normal_density(mass_error, net_error)
            + (1.0 - self.normal_probability) * self.uniform_density
    }
}

/// Fits a normal + uniform mixture to one-dimensional samples.
///
/// The normal component starts at mean 0 with `initial_std`. When the
/// samples are too few, constant, or the deviation collapses, the
/// corresponding parameter keeps its starting value.
///
/// ```
/// use lcmswarp::mixture::fit_univariate;
///
/// let fit = fit_univariate(&[1.0, 1.0, 1.0, 1.0], 0.1);
/// assert_eq!(fit.mean, 1.0);
/// assert_eq!(fit.std, 0.1);
/// ```
pub fn fit_univariate(values: &[f64], initial_std: f64) -> UnivariateFit {
    let mut fit = UnivariateFit::nominal(initial_std);
    let Some((low, high)) = finite_range(values.iter().copied()) else {
        return fit;
    };
    let span = high - low;
    if span <= EPSILON {
        fit.mean = low;
        fit.normal_probability = 1.0;
        return fit;
    }
    fit.uniform_density = 1.0 / span;
    if values.len() < MIN_EM_SAMPLES {
        return fit;
    }

    let n = values.len() as f64;
    let mut responsibilities = vec![0.0; values.len()];
    for _ in 0..MAX_EM_ITERATIONS {
        let Ok(component) = Normal::new(fit.mean, fit.std) else {
            break;
        };
        for (r, &v) in responsibilities.iter_mut().zip(values) {
            let normal = fit.normal_probability * component.pdf(v);
            let uniform = (1.0 - fit.normal_probability) * fit.uniform_density;
            let total = normal + uniform;
            *r = if total > 0.0 { normal / total } else { 0.0 };
        }

        let weight: f64 = responsibilities.iter().sum();
        if weight <= EPSILON {
            break;
        }
        let mean = responsibilities
            .iter()
            .zip(values)
            .map(|(r, v)| r * v)
            .sum::<f64>()
            / weight;
        let variance = responsibilities
            .iter()
            .zip(values)
            .map(|(r, v)| r * (v - mean).powi(2))
            .sum::<f64>()
            / weight;
        let std = variance.sqrt();
        let std = if std > EPSILON { std } else { fit.std };
        let probability = (weight / n).min(1.0);

        let converged = (mean - fit.mean).abs() < CONVERGENCE_TOLERANCE
            && (std - fit.std).abs() < CONVERGENCE_TOLERANCE
            && (probability - fit.normal_probability).abs() < CONVERGENCE_TOLERANCE;
        fit.mean = mean;
        fit.std = std;
        fit.normal_probability = probability;
        if converged {
            break;
        }
    }
    fit
}

/// Fits the joint mass/NET mixture over paired errors.
///
/// `initial` holds the starting `(std_mass, std_net)`, which also stand in
/// for any dimension that cannot be estimated. Extra samples in the longer
/// slice are ignored.
pub fn fit_mass_net(mass_errors: &[f64], net_errors: &[f64], initial: (f64, f64)) -> MixtureFit {
    let mut fit = MixtureFit::nominal(initial.0, initial.1);
    let len = mass_errors.len().min(net_errors.len());
    let (mass_errors, net_errors) = (&mass_errors[..len], &net_errors[..len]);
    let (Some(mass_range), Some(net_range)) = (
        finite_range(mass_errors.iter().copied()),
        finite_range(net_errors.iter().copied()),
    ) else {
        return fit;
    };

    // A constant dimension keeps its value as the mean and stays out of the
    // fit, the other dimension is still fitted.
    let mass_span = mass_range.1 - mass_range.0;
    let net_span = net_range.1 - net_range.0;
    let fit_mass = mass_span > EPSILON;
    let fit_net = net_span > EPSILON;
    if !fit_mass {
        fit.mean_mass = mass_range.0;
    }
    if !fit_net {
        fit.mean_net = net_range.0;
    }
    match (fit_mass, fit_net) {
        (false, false) => {
            fit.uniform_density = 1.0;
            fit.normal_probability = 1.0;
            return fit;
        }
        (true, true) => fit.uniform_density = 1.0 / (mass_span * net_span),
        (true, false) => fit.uniform_density = 1.0 / mass_span,
        (false, true) => fit.uniform_density = 1.0 / net_span,
    }
    if len < MIN_EM_SAMPLES {
        return fit;
    }

    let n = len as f64;
    let mut responsibilities = vec![0.0; len];
    for _ in 0..MAX_EM_ITERATIONS {
        // Only the fitted dimensions need a usable normal component.
        let mass_component = Normal::new(fit.mean_mass, fit.std_mass).ok().filter(|_| fit_mass);
        let net_component = Normal::new(fit.mean_net, fit.std_net).ok().filter(|_| fit_net);
        if (fit_mass && mass_component.is_none()) || (fit_net && net_component.is_none()) {
            break;
        }
        for (i, r) in responsibilities.iter_mut().enumerate() {
            let mut normal = fit.normal_probability;
            if let Some(component) = &mass_component {
                normal *= component.pdf(mass_errors[i]);
            }
            if let Some(component) = &net_component {
                normal *= component.pdf(net_errors[i]);
            }
            let uniform = (1.0 - fit.normal_probability) * fit.uniform_density;
            let total = normal + uniform;
            *r = if total > 0.0 { normal / total } else { 0.0 };
        }

        let weight: f64 = responsibilities.iter().sum();
        if weight <= EPSILON {
            break;
        }
        let weighted_moments = |values: &[f64], fallback_std: f64| {
            let mean = responsibilities
                .iter()
                .zip(values)
                .map(|(r, v)| r * v)
                .sum::<f64>()
                / weight;
            let variance = responsibilities
                .iter()
                .zip(values)
                .map(|(r, v)| r * (v - mean).powi(2))
                .sum::<f64>()
                / weight;
            let std = variance.sqrt();
            (mean, if std > EPSILON { std } else { fallback_std })
        };

        let previous = fit;
        if fit_mass {
            (fit.mean_mass, fit.std_mass) = weighted_moments(mass_errors, previous.std_mass);
        }
        if fit_net {
            (fit.mean_net, fit.std_net) = weighted_moments(net_errors, previous.std_net);
        }
        fit.normal_probability = (weight / n).min(1.0);

        let converged = (fit.mean_mass - previous.mean_mass).abs() < CONVERGENCE_TOLERANCE
            && (fit.std_mass - previous.std_mass).abs() < CONVERGENCE_TOLERANCE
            && (fit.mean_net - previous.mean_net).abs() < CONVERGENCE_TOLERANCE
            && (fit.std_net - previous.std_net).abs() < CONVERGENCE_TOLERANCE
            && (fit.normal_probability - previous.normal_probability).abs()
                < CONVERGENCE_TOLERANCE;
        if converged {
            break;
        }
    }
    fit
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distributions::Distribution;
    use rand::{
        Rng,
        SeedableRng,
    };
    use rand_chacha::ChaCha8Rng;

    fn gaussian(rng: &mut ChaCha8Rng, mean: f64, std: f64) -> f64 {
        Normal::new(mean, std).unwrap().sample(rng)
    }

    #[test]
    fn test_univariate_recovers_normal_component() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut values: Vec<f64> = (0..800).map(|_| gaussian(&mut rng, 1.5, 2.0)).collect();
        values.extend((0..200).map(|_| rng.gen_range(-20.0..20.0)));

        let fit = fit_univariate(&values, 5.0);
        assert!((fit.mean - 1.5).abs() < 0.4, "{fit:?}");
        assert!((fit.std - 2.0).abs() < 0.6, "{fit:?}");
        assert!(fit.normal_probability > 0.6 && fit.normal_probability < 0.95, "{fit:?}");
    }

    #[test]
    fn test_univariate_too_few_samples() {
        let fit = fit_univariate(&[1.0, 2.0], 0.1);
        assert_eq!(fit.std, 0.1);
        assert_eq!(fit.mean, 0.0);
    }

    #[test]
    fn test_mass_net_recovers_both_deviations() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut mass = Vec::new();
        let mut net = Vec::new();
        for _ in 0..1000 {
            mass.push(gaussian(&mut rng, 0.0, 3.0));
            net.push(gaussian(&mut rng, 0.0, 0.01));
        }
        for _ in 0..300 {
            mass.push(rng.gen_range(-20.0..20.0));
            net.push(rng.gen_range(-0.2..0.2));
        }
        let fit = fit_mass_net(&mass, &net, (10.0, 0.05));
        assert!((fit.std_mass - 3.0).abs() < 1.0, "{fit:?}");
        assert!((fit.std_net - 0.01).abs() < 0.004, "{fit:?}");
        assert!(fit.normal_probability > 0.6, "{fit:?}");
    }

    #[test]
    fn test_unusable_deviation_leaves_only_uniform() {
        let fit = MixtureFit {
            std_mass: 0.0,
            ..MixtureFit::nominal(3.0, 0.01)
        };
        assert_eq!(fit.normal_density(0.0, 0.0), 0.0);
        assert_eq!(fit.likelihood(0.0, 0.0), 0.5);

        let fit = fit_univariate(&[-1.0, 0.0, 0.5, 1.0, 2.0], 0.0);
        assert_eq!(fit.std, 0.0);
        assert_eq!(fit.mean, 0.0);
    }

    #[test]
    fn test_mass_net_constant_mass_dimension() {
        let mass = vec![0.0; 50];
        let net: Vec<f64> = (0..50).map(|i| (i as f64 - 25.0) * 1e-4).collect();
        let fit = fit_mass_net(&mass, &net, (4.0, 0.02));
        assert_eq!(fit.std_mass, 4.0);
        assert_eq!(fit.mean_mass, 0.0);
        assert!(fit.std_net.is_finite() && fit.std_net > 0.0);
        assert!(fit.likelihood(0.0, 0.0).is_finite());
    }
}
