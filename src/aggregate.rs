use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Collects raw samples into a compact, mergeable intermediate form.
///
/// An `Aggregate` stores only what is needed to derive statistics later (counts,
/// running moments, extremes). Turning it into final numbers is the job of a
/// [`crate::report::Report`], which is built from the aggregate with `From`.
///
/// # Implementor notes
/// - `merge` must be associative and commutative, so that partial aggregates
///   can be combined in any order with the same result (up to floating point
///   rounding).
/// - Do not compute final statistics here.
///
/// # Example
/// ```rust
/// use comparo::Aggregate;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Total(f64);
///
/// impl Aggregate for Total {
///     type Sample = f64;
///
///     fn new() -> Self {
///         Total(0.0)
///     }
///
///     fn consume(&mut self, sample: &f64) {
///         self.0 += sample;
///     }
///
///     fn merge(&mut self, other: Self) {
///         self.0 += other.0;
///     }
/// }
///
/// let mut total = Total::new();
/// total.aggregate(&[1.0, 2.0]);
/// assert_eq!(total, Total(3.0));
/// ```
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialEq + Debug + Clone,
{
    /// The sample type this aggregate summarizes.
    type Sample;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple samples into the current instance.
    fn aggregate(&mut self, samples: &[Self::Sample]) {
        samples.iter().for_each(|s| self.consume(s));
    }

    /// Incorporate a single sample into the aggregate.
    fn consume(&mut self, sample: &Self::Sample);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

/// Running moments and extremes of a stream of values.
///
/// Uses Welford's update for numerically stable variance, and Chan's formula to
/// merge two summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sum of squared deviations from the mean.
    pub m2: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Summary {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Aggregate for Summary {
    type Sample = f64;

    fn new() -> Self {
        Summary::default()
    }

    fn consume(&mut self, sample: &f64) {
        let x = *sample;
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
        self.min = self.min.min(x);
        self.max = self.max.max(x);
    }

    fn merge(&mut self, other: Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other;
            return;
        }
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let n = n1 + n2;
        let delta = other.mean - self.mean;
        self.mean += delta * n2 / n;
        self.m2 += other.m2 + delta * delta * n1 * n2 / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}
