use crate::config::PeriodConfig;
use crate::layout::PeriodClass;

/// Period-count and period-length policy
///
/// `days_to_periods` must return at least 1. `days_per_period` returns whole-day
/// lengths for `periods` periods; the partitioner adds whatever the lengths fall
/// short of the cycle span to the last period.
pub trait PeriodPolicy {
    fn days_to_periods(&self, span_days: f64, class: PeriodClass) -> usize;

    fn days_per_period(&self, periods: usize, span_days: f64) -> Vec<u32>;
}

/// Splits a cycle into periods of roughly a nominal number of days each
#[derive(Debug, Clone, PartialEq)]
pub struct NominalPolicy {
    weekly_days: f64,
    biweekly_days: f64,
}

impl NominalPolicy {
    pub fn new(weekly_days: f64, biweekly_days: f64) -> Self {
        Self {
            weekly_days,
            biweekly_days,
        }
    }

    pub fn from_config(config: &PeriodConfig) -> Self {
        Self::new(config.weekly_days, config.biweekly_days)
    }
}

impl Default for NominalPolicy {
    fn default() -> Self {
        Self::from_config(&PeriodConfig::default())
    }
}

impl PeriodPolicy for NominalPolicy {
    fn days_to_periods(&self, span_days: f64, class: PeriodClass) -> usize {
        let nominal = match class {
            PeriodClass::Wk => self.weekly_days,
            PeriodClass::Biwk => self.biweekly_days,
        };
        let n = (span_days / nominal).round();
        if n.is_finite() && n >= 1.0 {
            n as usize
        } else {
            1
        }
    }

    /// Equal whole-day lengths of `floor(span) / periods` days
    fn days_per_period(&self, periods: usize, span_days: f64) -> Vec<u32> {
        let periods = periods.max(1);
        let whole_days = span_days.max(0.0).floor() as u32;
        vec![whole_days / periods as u32; periods]
    }
}
