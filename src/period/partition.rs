use super::policy::PeriodPolicy;
use crate::anneal::AnnealCycle;
use crate::config::UpperClosure;
use crate::error::{RefError, Result};
use crate::layout::{PeriodClass, PeriodLabel};
use crate::observation::Observation;
use serde::Serialize;

/// One contiguous sub-interval of an anneal cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Period {
    pub label: PeriodLabel,
    pub begin: f64,
    pub end: f64,
    /// Whether `end` itself belongs to the period (last period only)
    pub closed_end: bool,
}

impl Period {
    pub fn length(&self) -> f64 {
        self.end - self.begin
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.begin && (t < self.end || (self.closed_end && t == self.end))
    }
}

/// Observations grouped by the period they fall in
#[derive(Debug, Clone)]
pub struct Assignment<'o> {
    pub buckets: Vec<(Period, Vec<&'o Observation>)>,
    /// Observations outside the cycle
    pub unassigned: Vec<&'o Observation>,
}

impl<'o> Assignment<'o> {
    pub fn empty_periods(&self) -> impl Iterator<Item = &Period> {
        self.buckets
            .iter()
            .filter(|(_, members)| members.is_empty())
            .map(|(period, _)| period)
    }

    pub fn assigned_count(&self) -> usize {
        self.buckets.iter().map(|(_, members)| members.len()).sum()
    }
}

/// Splits anneal cycles into periods and assigns observations to them
pub struct PeriodPartitioner<'p> {
    policy: &'p dyn PeriodPolicy,
    closure: UpperClosure,
}

impl<'p> PeriodPartitioner<'p> {
    pub fn new(policy: &'p dyn PeriodPolicy, closure: UpperClosure) -> Self {
        Self { policy, closure }
    }

    pub fn closure(&self) -> UpperClosure {
        self.closure
    }

    /// Contiguous periods exactly covering `cycle`
    ///
    /// Lengths come from the policy; the last period absorbs the difference
    /// between their sum and the cycle span, so coverage is exact.
    pub fn partition(&self, cycle: &AnnealCycle, class: PeriodClass) -> Result<Vec<Period>> {
        let span = cycle.span_days();
        let count = self.policy.days_to_periods(span, class).max(1);
        let lengths = self.policy.days_per_period(count, span);
        if lengths.len() != count {
            return Err(RefError::PolicyMismatch {
                expected: count,
                got: lengths.len(),
            });
        }

        let mut lengths: Vec<f64> = lengths.into_iter().map(f64::from).collect();
        let whole: f64 = lengths.iter().sum();
        if let Some(last) = lengths.last_mut() {
            *last += span - whole;
        }

        let mut periods = Vec::with_capacity(count);
        let mut begin = cycle.begin;
        for (i, length) in lengths.iter().enumerate() {
            let is_last = i + 1 == count;
            let end = if is_last { cycle.end } else { begin + length };
            let label = PeriodLabel::new(class, i as u32 + 1);
            if begin >= end {
                return Err(RefError::PolicyOverrun {
                    label,
                    begin,
                    end: cycle.end,
                });
            }
            periods.push(Period {
                label,
                begin,
                end,
                closed_end: is_last && self.closure == UpperClosure::InclusiveFinal,
            });
            begin = end;
        }

        tracing::debug!(
            "{} cycle [{:.5}, {:.5}) split into {} periods",
            class,
            cycle.begin,
            cycle.end,
            count
        );
        Ok(periods)
    }

    /// Place each observation in the single period containing its timestamp
    pub fn assign<'o>(&self, observations: &'o [Observation], periods: &[Period]) -> Assignment<'o> {
        let mut buckets: Vec<(Period, Vec<&'o Observation>)> =
            periods.iter().map(|p| (*p, Vec::new())).collect();
        let mut unassigned = Vec::new();

        for obs in observations {
            match locate(periods, obs.timestamp()) {
                Some(idx) => buckets[idx].1.push(obs),
                None => unassigned.push(obs),
            }
        }

        for (_, members) in &mut buckets {
            members.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
        }

        Assignment {
            buckets,
            unassigned,
        }
    }
}

/// Index of the period containing `t`; `periods` must be sorted and contiguous
fn locate(periods: &[Period], t: f64) -> Option<usize> {
    let idx = periods.partition_point(|p| p.end <= t);
    if idx < periods.len() && periods[idx].contains(t) {
        return Some(idx);
    }
    match periods.last() {
        Some(last) if last.contains(t) => Some(periods.len() - 1),
        _ => None,
    }
}
