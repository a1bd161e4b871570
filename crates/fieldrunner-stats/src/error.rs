//! Error types for the aggregation library.

/// Errors produced by aggregators.
///
/// Messages are shown verbatim to script authors, so they name the script
/// parameter rather than the Rust one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    #[error("Can not use tools anymore")]
    Detached,

    #[error("Parameters 'start' and 'end' must be integers.")]
    NonIntegerRange,

    #[error("distribution step must be positive, got {0}")]
    InvalidStep(f64),

    #[error("distribution would need more than {max} bins")]
    TooManyBins { max: usize },

    #[error("range expands to more than {max} fields")]
    RangeTooLarge { max: usize },
}

/// Result type for aggregation operations.
pub type StatsResult<T> = std::result::Result<T, StatsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_script_facing() {
        assert_eq!(StatsError::Detached.to_string(), "Can not use tools anymore");
        assert!(StatsError::NonIntegerRange.to_string().contains("'start'"));
        assert!(StatsError::TooManyBins { max: 10 }.to_string().contains("10"));
    }
}
