//! The seam between aggregators and the student currently being graded.

use crate::error::{StatsError, StatsResult};

/// Numeric read access to the current student's fields.
///
/// Implementations resolve aliases and document prefixes and may record a
/// diagnostic when a value cannot be read as a number; they never fail.
pub trait FieldSource {
    /// Read `name` as a number, returning `default` when missing or invalid.
    fn get_double(&mut self, name: &str, default: f64) -> f64;
}

/// Behaviour shared by every aggregator kind.
pub trait Aggregator {
    /// Whether the run feeds this aggregator before each student's program.
    fn autoadd(&self) -> bool;

    /// Pull this aggregator's configured fields from `source`.
    fn add_field(&mut self, source: &mut dyn FieldSource) -> StatsResult<()>;

    /// Detach from the run; later field pulls fail with [`StatsError::Detached`].
    fn detach(&mut self);

    /// Approximate bytes held, including heap buffers. Constant time.
    fn footprint(&self) -> usize;
}

/// Tracks whether an aggregator is still bound to a live run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attachment {
    detached: bool,
}

impl Attachment {
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn is_attached(&self) -> bool {
        !self.detached
    }

    /// Fail with [`StatsError::Detached`] once the run has ended.
    pub fn ensure(&self) -> StatsResult<()> {
        if self.detached {
            Err(StatsError::Detached)
        } else {
            Ok(())
        }
    }
}
