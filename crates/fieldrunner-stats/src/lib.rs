//! fieldrunner-stats: cohort statistics for grading scripts
//!
//! Pure computation shared by the script facade:
//!
//! - [`widen`]: the range-expansion DSL (`"d(1,4)=t"` → `d1=t1 … d4=t4`)
//! - [`counter`]: single-pass count/sum/min/max/avg/sd
//! - [`fitter`]: ordinary least squares line fitting
//! - [`distribution`]: fixed-bin histograms
//! - [`series`]: paired (x, y) collections with an attached fitter
//! - [`stats`]: one counter per named field, exportable as tables and series
//!
//! Aggregators are fed either explicitly (`add`) or from the student a run is
//! currently processing ([`Aggregator::add_field`] through a [`FieldSource`]).

pub mod counter;
pub mod distribution;
pub mod error;
pub mod fitter;
pub mod numeric;
pub mod series;
pub mod source;
pub mod stats;
pub mod widen;

pub use counter::{StatCounter, StatSummary, STAT_HEADERS};
pub use distribution::{Distribution, DistributionSnapshot, MAX_BINS};
pub use error::{StatsError, StatsResult};
pub use fitter::{Limits, Linear, LineFitter, Point};
pub use numeric::{format_number, js_round, round_to, NO_LIMIT};
pub use series::PairedSeries;
pub use source::{Aggregator, Attachment, FieldSource};
pub use stats::{integral_range, NamedCounterSet, StatRow, StatSeries, StatTable};
pub use widen::{
    separate_names_and_aliases, widen_fields, widen_labeled_fields, FieldList, NamesAndAliases,
    MAX_WIDENED_FIELDS,
};

/// fieldrunner-stats version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
