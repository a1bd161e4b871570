//! Ordinary least squares fit of `y = a + b·x`.

use serde::{Deserialize, Serialize};

use crate::error::StatsResult;
use crate::numeric::round_to;
use crate::source::{Aggregator, Attachment, FieldSource};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Intercept `a` and slope `b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub a: f64,
    pub b: f64,
}

/// Observed ranges of both coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub n: u64,
}

#[derive(Debug, Clone)]
pub struct LineFitter {
    x_name: String,
    y_name: String,
    autoadd: bool,
    attachment: Attachment,
    n: u64,
    sum_x: f64,
    sum_x2: f64,
    sum_xy: f64,
    sum_y: f64,
    sum_y2: f64,
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
    // Unrounded coefficients, cleared by every accepted point.
    cached: Option<Linear>,
}

impl LineFitter {
    pub fn new(x_name: impl Into<String>, y_name: impl Into<String>, autoadd: bool) -> Self {
        Self {
            x_name: x_name.into(),
            y_name: y_name.into(),
            autoadd,
            attachment: Attachment::default(),
            n: 0,
            sum_x: 0.0,
            sum_x2: 0.0,
            sum_xy: 0.0,
            sum_y: 0.0,
            sum_y2: 0.0,
            min_x: 1e100,
            max_x: -1e100,
            min_y: 1e100,
            max_y: -1e100,
            cached: None,
        }
    }

    /// Registry key `x_y`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.x_name, self.y_name)
    }

    /// Add a point; points with a NaN coordinate are returned but not counted.
    pub fn add(&mut self, x: f64, y: f64) -> Point {
        if !x.is_nan() && !y.is_nan() {
            self.n += 1;
            self.sum_x += x;
            self.sum_x2 += x * x;
            self.sum_xy += x * y;
            self.sum_y += y;
            self.sum_y2 += y * y;
            self.min_x = self.min_x.min(x);
            self.max_x = self.max_x.max(x);
            self.min_y = self.min_y.min(y);
            self.max_y = self.max_y.max(y);
            self.cached = None;
        }
        Point { x, y }
    }

    fn raw(&mut self) -> Linear {
        if let Some(ab) = self.cached {
            return ab;
        }
        let n = self.n as f64;
        let div = n * self.sum_x2 - self.sum_x * self.sum_x;
        let ab = Linear {
            a: (self.sum_y * self.sum_x2 - self.sum_x * self.sum_xy) / div,
            b: (n * self.sum_xy - self.sum_x * self.sum_y) / div,
        };
        self.cached = Some(ab);
        ab
    }

    /// Coefficients, optionally rounded. `b` uses `a`'s precision unless given.
    pub fn ab(&mut self, a_decimals: Option<i32>, b_decimals: Option<i32>) -> Linear {
        let raw = self.raw();
        Linear {
            a: round_to(raw.a, a_decimals),
            b: round_to(raw.b, b_decimals.or(a_decimals)),
        }
    }

    pub fn f(&mut self, x: f64) -> f64 {
        let ab = self.raw();
        ab.a + ab.b * x
    }

    pub fn limits(&self) -> Limits {
        Limits {
            min_x: self.min_x,
            max_x: self.max_x,
            min_y: self.min_y,
            max_y: self.max_y,
            n: self.n,
        }
    }

    pub fn r2(&self) -> f64 {
        let n = self.n as f64;
        let ssxx = self.sum_x2 - self.sum_x * self.sum_x / n;
        let ssyy = self.sum_y2 - self.sum_y * self.sum_y / n;
        let ssxy = self.sum_xy - self.sum_x * self.sum_y / n;
        (ssxy * ssxy) / (ssxx * ssyy)
    }

    pub fn r(&self) -> f64 {
        self.r2().sqrt()
    }

    pub fn r2_string(&self, decimals: Option<i32>) -> String {
        format!("r² = {}", crate::format_number(round_to(self.r2(), decimals)))
    }

    pub fn r_string(&self, decimals: Option<i32>) -> String {
        format!("r = {}", crate::format_number(round_to(self.r(), decimals)))
    }

    /// Two points of the fitted line at the observed x extremes.
    pub fn line(&mut self, x_decimals: Option<i32>, y_decimals: Option<i32>) -> [Point; 2] {
        let y_decimals = y_decimals.or(x_decimals);
        let x1 = round_to(self.min_x, x_decimals);
        let x2 = round_to(self.max_x, x_decimals);
        let y1 = round_to(self.f(x1), y_decimals);
        let y2 = round_to(self.f(x2), y_decimals);
        [Point { x: x1, y: y1 }, Point { x: x2, y: y2 }]
    }

    /// Read this aggregator's fields from `source` and add them.
    pub fn pull(&mut self, source: &mut dyn FieldSource) -> StatsResult<Point> {
        self.attachment.ensure()?;
        let x = source.get_double(&self.x_name, f64::NAN);
        let y = source.get_double(&self.y_name, f64::NAN);
        Ok(self.add(x, y))
    }
}

impl Aggregator for LineFitter {
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
        std::mem::size_of::<Self>() + self.x_name.len() + self.y_name.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatsError;
    use crate::source::testing::MapSource;

    fn fitted() -> LineFitter {
        let mut f = LineFitter::new("x", "y", true);
        f.add(1.0, 2.0);
        f.add(2.0, 4.0);
        f.add(3.0, 6.0);
        f
    }

    #[test]
    fn test_fit_exact_line() {
        let mut f = fitted();
        let ab = f.ab(None, None);
        assert!((ab.b - 2.0).abs() < 1e-9);
        assert!(ab.a.abs() < 1e-9);
        assert!((f.r2() - 1.0).abs() < 1e-9);
        assert!((f.f(10.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_is_per_call() {
        let mut f = LineFitter::new("x", "y", true);
        f.add(0.0, 1.0);
        f.add(3.0, 2.0);
        let rounded = f.ab(Some(1), None);
        assert_eq!(rounded.b, 0.3);
        let raw = f.ab(None, None);
        assert!((raw.b - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(f.ab(Some(2), Some(0)).b, 0.0);
    }

    #[test]
    fn test_nan_points_ignored() {
        let mut f = fitted();
        let p = f.add(f64::NAN, 1.0);
        assert!(p.x.is_nan());
        assert_eq!(f.limits().n, 3);
        assert_eq!(f.limits().min_x, 1.0);
        assert_eq!(f.limits().max_y, 6.0);
    }

    #[test]
    fn test_line_spans_observed_x() {
        let mut f = fitted();
        let [p1, p2] = f.line(Some(0), None);
        assert_eq!((p1.x, p1.y), (1.0, 2.0));
        assert_eq!((p2.x, p2.y), (3.0, 6.0));
        assert_eq!(f.r2_string(Some(2)), "r² = 1");
        assert_eq!(f.r_string(Some(2)), "r = 1");
    }

    #[test]
    fn test_add_field_reads_source_until_detached() {
        let mut f = LineFitter::new("x", "y", true);
        let mut src = MapSource::with(&[("x", 1.0), ("y", 5.0)]);
        f.add_field(&mut src).unwrap();
        assert_eq!(f.limits().n, 1);
        assert_eq!(f.key(), "x_y");

        f.detach();
        assert_eq!(f.add_field(&mut src), Err(StatsError::Detached));
    }
}
