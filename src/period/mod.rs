//! Period partitioning of anneal cycles
//!
//! An anneal cycle `[begin, end)` is cut into `N` contiguous periods whose count
//! and whole-day lengths come from a [`PeriodPolicy`]. The last period absorbs
//! any remainder so the periods cover the cycle exactly. Each observation then
//! lands in exactly one period, and [`Separator`] moves the frames into
//! `biases/<mode>/<wkNN>` and `darks/<wkNN>` folders.
//!
//! # Boundary convention
//!
//! Periods are half-open `[begin, end)`. With [`UpperClosure::InclusiveFinal`]
//! (the default) the last period also contains the cycle end, so a cycle taken
//! from the frames' own time extent keeps its latest frame.
//!
//! [`UpperClosure::InclusiveFinal`]: crate::config::UpperClosure::InclusiveFinal

mod partition;
mod policy;
mod separate;

pub use partition::{Assignment, Period, PeriodPartitioner};
pub use policy::{NominalPolicy, PeriodPolicy};
pub use separate::{frames_at_root, relocate, EmptyPeriodSeverity, SeparationSummary, Separator};
