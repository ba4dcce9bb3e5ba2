//! Shrink-to-fit policy for auto-fit text regions.

/// Font shrinking parameters shared by the Rust policy and the script
/// embedded in composed documents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoFitPolicy {
    pub step_px: f64,
    pub floor_px: f64,
    pub max_iterations: u32,
}

impl Default for AutoFitPolicy {
    fn default() -> Self {
        Self {
            step_px: 1.0,
            floor_px: 10.0,
            max_iterations: 24,
        }
    }
}

impl AutoFitPolicy {
    /// Shrink from `start_px` until `overflows` reports a fit.
    ///
    /// Never goes below the floor and never calls `overflows` more than
    /// `max_iterations` times. If the region still overflows when a bound is
    /// hit, the last size tried is returned.
    pub fn fit(&self, start_px: f64, mut overflows: impl FnMut(f64) -> bool) -> f64 {
        let mut size = start_px;
        for _ in 0..self.max_iterations {
            if !overflows(size) {
                return size;
            }
            let next = size - self.step_px;
            if next < self.floor_px {
                return size;
            }
            size = next;
        }
        size
    }

    pub(crate) fn script_constants(&self) -> String {
        format!(
            "var maxIters = {}; var minSize = {}; var step = {};",
            self.max_iterations, self.floor_px, self.step_px
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinks_until_text_fits() {
        let policy = AutoFitPolicy::default();
        let mut tried = Vec::new();
        let size = policy.fit(22.0, |size| {
            tried.push(size);
            size > 14.0
        });
        assert_eq!(size, 14.0);
        assert_eq!(tried.first(), Some(&22.0));
        assert_eq!(tried.last(), Some(&14.0));
    }

    #[test]
    fn fitting_text_is_left_alone() {
        let policy = AutoFitPolicy::default();
        assert_eq!(policy.fit(22.0, |_| false), 22.0);
    }

    #[test]
    fn never_drops_below_floor() {
        let policy = AutoFitPolicy::default();
        let mut calls = 0;
        let size = policy.fit(22.0, |_| {
            calls += 1;
            true
        });
        assert_eq!(size, 10.0);
        assert_eq!(calls, 13);
    }

    #[test]
    fn stops_after_iteration_bound() {
        let policy = AutoFitPolicy::default();
        let mut calls = 0u32;
        let size = policy.fit(200.0, |_| {
            calls += 1;
            true
        });
        assert_eq!(calls, policy.max_iterations);
        assert_eq!(size, 176.0);
    }
}
