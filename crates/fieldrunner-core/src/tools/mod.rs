//! The facade scripts call into.
//!
//! Scripts see two objects: `tools`, bound to one student, and `gtools`,
//! shared by the whole run. Each capability is a trait here; the JS prelude
//! is only a proxy that forwards calls to [`crate::host::ToolHost`].
//!
//! - [`FieldAccess`]: typed reads and writes of the bound student's fields
//! - [`OutputSink`]: printed output and non-fatal diagnostics
//! - [`Aggregation`]: aggregator factories and per-student feeding

pub mod args;
pub mod arena;
pub mod common;
pub mod global;
pub mod output;
pub mod student;

use fieldrunner_stats::{FieldList, FieldSource};
use serde_json::Value;

use crate::envelope::Diagnostic;
use crate::error::ToolResult;

pub use args::Args;
pub use arena::{AggregatorArena, Handle};
pub use global::GlobalState;
pub use output::FacadeState;
pub use student::{NoRecord, StudentState, StudentView};

/// Default "do not persist" floor of `setInt`.
pub const SET_INT_FLOOR: f64 = -1_000_000_000.0;

/// Default "do not persist" floor of `setDouble`.
pub const SET_DOUBLE_FLOOR: f64 = -1e100;

/// Typed access to one student's fields.
///
/// Getters never fail: unreadable values fall back to the default and record
/// a diagnostic. Setters fail only on invalid arguments.
pub trait FieldAccess {
    fn get_double(&mut self, field: &str, default: f64) -> f64;
    fn get_int(&mut self, field: &str, default: f64) -> f64;
    fn get_string(&mut self, field: &str, default: &str) -> String;
    fn get_value(&self, field: &str) -> Option<Value>;
    fn set_string(&mut self, field: &str, content: &Value) -> ToolResult<()>;
    /// Values at or below `floor` clear the field instead.
    fn set_int(&mut self, field: &str, content: &Value, floor: f64) -> ToolResult<()>;
    /// Values at or below `floor` clear the field instead.
    fn set_double(&mut self, field: &str, content: &Value, floor: f64) -> ToolResult<()>;
}

pub trait OutputSink {
    fn print(&mut self, parts: &[String]);
    fn println(&mut self, parts: &[String]);
    fn output(&self) -> &str;
    fn clear_output(&mut self);
    fn report_error(&mut self, msg: String);
    fn errors(&self) -> &[Diagnostic];
}

/// Aggregators of one run, addressed by [`Handle`].
pub trait Aggregation {
    fn create_fitter(&mut self, x_name: &str, y_name: &str, autoadd: bool) -> Handle;
    fn create_distribution(
        &mut self,
        field: &str,
        start: f64,
        end: f64,
        step: f64,
        autoadd: bool,
    ) -> ToolResult<Handle>;
    fn create_xy(&mut self, x_name: &str, y_name: &str, autoadd: bool) -> Handle;
    fn create_stat_counter(
        &mut self,
        name: &str,
        fields: &FieldList,
        autoadd: bool,
    ) -> ToolResult<Handle>;
    /// Feed every registered autoadd aggregator from `source`.
    fn add_to_datas(&mut self, source: &mut dyn FieldSource) -> ToolResult<()>;
    fn detach_all(&mut self);
}
