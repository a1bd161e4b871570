//! Paired (x, y) observations with a fitter over the same data.

use crate::error::StatsResult;
use crate::fitter::{LineFitter, Point};
use crate::source::{Aggregator, Attachment, FieldSource};

#[derive(Debug, Clone)]
pub struct PairedSeries {
    x_name: String,
    y_name: String,
    autoadd: bool,
    attachment: Attachment,
    points: Vec<Point>,
    fitter: LineFitter,
}

impl PairedSeries {
    pub fn new(x_name: impl Into<String>, y_name: impl Into<String>, autoadd: bool) -> Self {
        let x_name = x_name.into();
        let y_name = y_name.into();
        let fitter = LineFitter::new(x_name.clone(), y_name.clone(), true);
        Self {
            x_name,
            y_name,
            autoadd,
            attachment: Attachment::default(),
            points: Vec::new(),
            fitter,
        }
    }

    pub fn key(&self) -> String {
        format!("{}_{}", self.x_name, self.y_name)
    }

    /// Keep the pair unless a coordinate is NaN.
    pub fn add(&mut self, x: f64, y: f64) -> Point {
        let point = Point { x, y };
        if !x.is_nan() && !y.is_nan() {
            self.points.push(point);
            self.fitter.add(x, y);
        }
        point
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn fitter(&self) -> &LineFitter {
        &self.fitter
    }

    pub fn fitter_mut(&mut self) -> &mut LineFitter {
        &mut self.fitter
    }

    /// Read this aggregator's fields from `source` and add them.
    pub fn pull(&mut self, source: &mut dyn FieldSource) -> StatsResult<Point> {
        self.attachment.ensure()?;
        let x = source.get_double(&self.x_name, f64::NAN);
        let y = source.get_double(&self.y_name, f64::NAN);
        Ok(self.add(x, y))
    }
}

impl Aggregator for PairedSeries {
    fn autoadd(&self) -> bool {
        self.autoadd
    }

    fn add_field(&mut self, source: &mut dyn FieldSource) -> StatsResult<()> {
        self.pull(source).map(|_| ())
    }

    fn detach(&mut self) {
        self.attachment.detach();
        self.fitter.detach();
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.x_name.len()
            + self.y_name.len()
            + self.points.len() * std::mem::size_of::<Point>()
            + self.fitter.footprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatsError;
    use crate::source::testing::MapSource;

    #[test]
    fn test_footprint_counts_kept_points() {
        let mut s = PairedSeries::new("x", "y", false);
        let empty = s.footprint();
        s.add(1.0, 2.0);
        s.add(f64::NAN, 2.0);
        assert_eq!(s.footprint(), empty + std::mem::size_of::<Point>());
    }

    #[test]
    fn test_series_feeds_its_fitter() {
        let mut xy = PairedSeries::new("a", "b", true);
        xy.add(1.0, 3.0);
        xy.add(2.0, 5.0);
        xy.add(f64::NAN, 1.0);
        assert_eq!(xy.points().len(), 2);
        assert_eq!(xy.fitter().limits().n, 2);
        let ab = xy.fitter_mut().ab(Some(3), None);
        assert_eq!((ab.a, ab.b), (1.0, 2.0));
    }

    #[test]
    fn test_detach_covers_inner_fitter() {
        let mut xy = PairedSeries::new("a", "b", true);
        let mut src = MapSource::with(&[("a", 1.0), ("b", 2.0)]);
        xy.add_field(&mut src).unwrap();
        xy.detach();
        assert_eq!(xy.add_field(&mut src), Err(StatsError::Detached));
        assert_eq!(xy.fitter_mut().add_field(&mut src), Err(StatsError::Detached));
    }
}
