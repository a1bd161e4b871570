//! Histogram with fixed, labeled bins.

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};
use crate::source::{Aggregator, Attachment, FieldSource};

/// Upper bound on the number of bins one distribution may allocate.
pub const MAX_BINS: usize = 10_000;

// Slack so that `end` itself is a label despite float error in `i * step`.
const LABEL_EPSILON: f64 = 0.000_001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSnapshot {
    pub labels: Vec<f64>,
    pub data: Vec<u64>,
    pub n: u64,
}

#[derive(Debug, Clone)]
pub struct Distribution {
    field_name: String,
    autoadd: bool,
    attachment: Attachment,
    labels: Vec<f64>,
    data: Vec<u64>,
    n: u64,
}

impl Distribution {
    /// Bins labeled `i * step` for `i = start, start + 1, …` while the label
    /// does not exceed `end`. A zero step means 1.
    pub fn new(
        field_name: impl Into<String>,
        start: f64,
        end: f64,
        step: f64,
        autoadd: bool,
    ) -> StatsResult<Self> {
        let step = if step == 0.0 { 1.0 } else { step };
        if !(step > 0.0) || !step.is_finite() {
            return Err(StatsError::InvalidStep(step));
        }

        let mut labels = Vec::new();
        if start.is_finite() && end.is_finite() {
            let mut i = start;
            while i * step <= end + LABEL_EPSILON {
                if labels.len() >= MAX_BINS {
                    return Err(StatsError::TooManyBins { max: MAX_BINS });
                }
                labels.push(i * step);
                i += 1.0;
            }
        } else if end == f64::INFINITY && !start.is_nan() {
            return Err(StatsError::TooManyBins { max: MAX_BINS });
        }

        let data = vec![0; labels.len()];
        Ok(Self {
            field_name: field_name.into(),
            autoadd,
            attachment: Attachment::default(),
            labels,
            data,
            n: 0,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Count `x` in the nearest bin; ties go to the lower-indexed bin.
    /// NaN, and any value when there are no bins, is ignored.
    pub fn add(&mut self, x: f64) -> f64 {
        if x.is_nan() {
            return x;
        }
        let mut nearest = None;
        let mut min_dist = f64::INFINITY;
        for (i, label) in self.labels.iter().enumerate() {
            let d = (label - x).abs();
            if d < min_dist {
                min_dist = d;
                nearest = Some(i);
            }
        }
        if let Some(i) = nearest {
            self.data[i] += 1;
            self.n += 1;
        }
        x
    }

    pub fn get(&self) -> DistributionSnapshot {
        DistributionSnapshot {
            labels: self.labels.clone(),
            data: self.data.clone(),
            n: self.n,
        }
    }

    /// Read this aggregator's fields from `source` and add them.
    pub fn pull(&mut self, source: &mut dyn FieldSource) -> StatsResult<f64> {
        self.attachment.ensure()?;
        let x = source.get_double(&self.field_name, f64::NAN);
        Ok(self.add(x))
    }
}

impl Aggregator for Distribution {
    fn autoadd(&self) -> bool {
        self.autoadd
    }

    fn add_field(&mut self, source: &mut dyn FieldSource) -> StatsResult<()> {
        self.pull(source).map(|_| ())
    }

    fn detach(&mut self) {
        self.attachment.detach();
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.field_name.len()
            + self.labels.len() * std::mem::size_of::<f64>()
            + self.data.len() * std::mem::size_of::<u64>()
    }
}
