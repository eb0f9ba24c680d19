//! Predicates deciding whether a task fires at a given monitor invocation.
//!
//! Conditions are pure functions of `(iteration, global_step)`: they are
//! evaluated from scratch at every call and never memoize anything.
use crate::errors::{MonitorError, Result};
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(u64, u64) -> bool + Send + Sync;

/// Run condition of a task.
///
/// The variants are not checked when built directly: a zero period never
/// fires and invalid growing intervals are clamped. The constructors
/// [`Condition::periodic`], [`Condition::periodic_step`] and
/// [`Condition::growing`] reject them instead.
#[derive(Clone, Default)]
pub enum Condition {
    /// Fires at every invocation
    #[default]
    Always,
    /// Fires when `iteration % period == 0`
    Periodic(u64),
    /// Fires when `global_step % period == 0`
    PeriodicStep(u64),
    /// Fires at `start`, then after intervals growing geometrically:
    /// `start + i0`, `start + i0 + i1`, ... with `i(k+1) = min(i(k) * growth, max_interval)`
    Growing {
        /// First firing iteration
        start: u64,
        /// First interval
        init_interval: f64,
        /// Interval growth factor
        growth: f64,
        /// Upper bound of the interval
        max_interval: f64,
    },
    /// User predicate over `(iteration, global_step)`
    Custom(Arc<Predicate>),
}

impl Condition {
    /// Fires every `period` iterations: at `period`, `2 * period`, ...
    pub fn periodic(period: u64) -> Result<Self> {
        if period == 0 {
            return Err(MonitorError::InvalidConfigError(
                "period should be greater than 0".to_string(),
            ));
        }
        Ok(Condition::Periodic(period))
    }

    /// Fires every `period` optimizer steps
    pub fn periodic_step(period: u64) -> Result<Self> {
        if period == 0 {
            return Err(MonitorError::InvalidConfigError(
                "step period should be greater than 0".to_string(),
            ));
        }
        Ok(Condition::PeriodicStep(period))
    }

    /// Fires at iterations separated by geometrically growing intervals
    pub fn growing(
        start: u64,
        init_interval: f64,
        growth: f64,
        max_interval: f64,
    ) -> Result<Self> {
        if !(init_interval >= 1. && growth >= 1. && max_interval >= init_interval) {
            return Err(MonitorError::InvalidConfigError(format!(
                "invalid growing interval: init={}, growth={}, max={}",
                init_interval, growth, max_interval
            )));
        }
        Ok(Condition::Growing {
            start,
            init_interval,
            growth,
            max_interval,
        })
    }

    /// Fires when the given predicate over `(iteration, global_step)` holds
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(u64, u64) -> bool + Send + Sync + 'static,
    {
        Condition::Custom(Arc::new(predicate))
    }

    /// Evaluates the condition
    pub fn evaluate(&self, iteration: u64, global_step: u64) -> bool {
        match self {
            Condition::Always => true,
            Condition::Periodic(period) => *period > 0 && iteration % period == 0,
            Condition::PeriodicStep(period) => *period > 0 && global_step % period == 0,
            Condition::Growing {
                start,
                init_interval,
                growth,
                max_interval,
            } => {
                let mut next = *start as f64;
                let mut interval = *init_interval;
                let iteration = iteration as f64;
                while next < iteration {
                    next += interval.floor().max(1.);
                    interval = (interval * growth).min(*max_interval);
                }
                next == iteration
            }
            Condition::Custom(predicate) => predicate(iteration, global_step),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Always => write!(f, "Always"),
            Condition::Periodic(p) => write!(f, "Periodic({p})"),
            Condition::PeriodicStep(p) => write!(f, "PeriodicStep({p})"),
            Condition::Growing {
                start,
                init_interval,
                growth,
                max_interval,
            } => write!(
                f,
                "Growing(start={start}, init={init_interval}, growth={growth}, max={max_interval})"
            ),
            Condition::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firings(condition: &Condition, n: u64) -> Vec<u64> {
        (1..=n).filter(|i| condition.evaluate(*i, *i)).collect()
    }

    #[test]
    fn test_periodic_fires_floor_i_over_n_times() {
        for period in 1..8 {
            let cond = Condition::periodic(period).unwrap();
            for n in 0..40 {
                let fired = firings(&cond, n);
                assert_eq!(fired.len() as u64, n / period);
                assert!(fired.iter().enumerate().all(|(k, i)| *i == (k as u64 + 1) * period));
            }
        }
        assert_eq!(firings(&Condition::Periodic(10), 35), vec![10, 20, 30]);
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(Condition::periodic(0).is_err());
        assert!(Condition::periodic_step(0).is_err());
        assert!(!Condition::Periodic(0).evaluate(3, 3));
    }

    #[test]
    fn test_periodic_step_uses_global_step() {
        let cond = Condition::periodic_step(100).unwrap();
        assert!(cond.evaluate(1, 200));
        assert!(!cond.evaluate(100, 150));
    }

    #[test]
    fn test_growing_interval() {
        let cond = Condition::growing(1, 1., 2., 8.).unwrap();
        // intervals 1, 2, 4, 8, 8, ...
        assert_eq!(firings(&cond, 40), vec![1, 2, 4, 8, 16, 24, 32, 40]);
        // stateless: same answers whatever the evaluation order
        assert!(cond.evaluate(24, 0));
        assert!(!cond.evaluate(3, 0));
        assert!(cond.evaluate(24, 0));
        assert!(Condition::growing(1, 0.5, 2., 8.).is_err());
        assert!(Condition::growing(1, 2., 0.5, 8.).is_err());
    }

    #[test]
    fn test_custom() {
        let cond = Condition::custom(|it, step| it > 3 && step % 2 == 0);
        assert_eq!(firings(&cond, 8), vec![4, 6, 8]);
        assert_eq!(format!("{:?}", cond), "Custom");
    }

    #[test]
    fn test_default_is_always() {
        assert_eq!(firings(&Condition::default(), 5), vec![1, 2, 3, 4, 5]);
    }
}
