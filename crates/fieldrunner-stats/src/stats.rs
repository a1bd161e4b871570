//! One [`StatCounter`] per named field.

use std::collections::HashMap;

use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::counter::{StatCounter, StatSummary, STAT_HEADERS};
use crate::error::{StatsError, StatsResult};
use crate::numeric::{round_to, NO_LIMIT};
use crate::source::{Aggregator, Attachment, FieldSource};
use crate::widen::{
    separate_names_and_aliases, widen_fields, widen_labeled_fields, FieldList, MAX_WIDENED_FIELDS,
};

/// A stats table: `headers[0]` is blank, each row starts with its label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatTable {
    pub headers: Vec<String>,
    pub matrix: Vec<StatRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub label: String,
    pub values: Vec<f64>,
}

impl Serialize for StatRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.values.len() + 1))?;
        seq.serialize_element(&self.label)?;
        for v in &self.values {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

/// One stat across fields, ready for a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatSeries {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct NamedCounterSet {
    autoadd: bool,
    attachment: Attachment,
    fields: Vec<String>,
    aliases: Vec<String>,
    counters: Vec<(String, StatCounter)>,
    index: HashMap<String, usize>,
    // Heap bytes of the name tables, kept current as counters appear.
    name_bytes: usize,
}

/// Per-counter cost beyond its two name copies: the counter and its index entry.
const COUNTER_OVERHEAD: usize = std::mem::size_of::<(String, StatCounter)>()
    + std::mem::size_of::<(String, usize)>();

impl NamedCounterSet {
    /// Counters for every field `fields` widens to; `name=alias` sets the
    /// label used in tables and series.
    pub fn new(fields: &FieldList, autoadd: bool) -> StatsResult<Self> {
        let fa = separate_names_and_aliases(&widen_labeled_fields(fields)?);
        let mut set = Self::empty(autoadd);
        set.name_bytes += fa.aliases.iter().map(String::len).sum::<usize>();
        set.aliases = fa.aliases;
        for name in fa.names {
            set.counter_mut(&name);
            set.name_bytes += name.len();
            set.fields.push(name);
        }
        Ok(set)
    }

    /// A set with no configured fields; counters appear as values are added.
    pub fn empty(autoadd: bool) -> Self {
        Self {
            autoadd,
            attachment: Attachment::default(),
            fields: Vec::new(),
            aliases: Vec::new(),
            counters: Vec::new(),
            index: HashMap::new(),
            name_bytes: 0,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn counter_mut(&mut self, name: &str) -> &mut StatCounter {
        let i = match self.index.get(name) {
            Some(i) => *i,
            None => {
                self.name_bytes += 2 * name.len() + COUNTER_OVERHEAD;
                self.counters.push((name.to_string(), StatCounter::new()));
                self.index.insert(name.to_string(), self.counters.len() - 1);
                self.counters.len() - 1
            }
        };
        &mut self.counters[i].1
    }

    /// Add `min(value, max)` to `name`'s counter, creating it on first use.
    /// NaN still creates the counter but is not counted.
    pub fn add_value(&mut self, name: &str, value: f64, max: f64) {
        let counter = self.counter_mut(name);
        if value.is_nan() {
            return;
        }
        counter.add(value.min(max));
    }

    fn add_from(&mut self, source: &mut dyn FieldSource, name: &str, max: f64) {
        let v = source.get_double(name, f64::NAN);
        if !v.is_nan() {
            self.add_value(name, v, max);
        }
    }

    /// Ingest `base{start}` … `base{end}`; both bounds must be integral.
    pub fn add_data(
        &mut self,
        source: &mut dyn FieldSource,
        base: &str,
        start: f64,
        end: f64,
        max: f64,
    ) -> StatsResult<()> {
        self.attachment.ensure()?;
        let (start, end) = integral_range(start, end)?;
        for i in start..=end {
            self.add_from(source, &format!("{base}{i}"), max);
        }
        Ok(())
    }

    /// Ingest an explicit (widened) list of fields. Display aliases are dropped.
    pub fn add_of(&mut self, source: &mut dyn FieldSource, specs: &FieldList) -> StatsResult<()> {
        self.attachment.ensure()?;
        for spec in widen_fields(specs)? {
            let name = spec.split('=').next().unwrap_or_default().trim().to_string();
            self.add_from(source, &name, NO_LIMIT);
        }
        Ok(())
    }

    /// Every counter's summary in creation order.
    pub fn data(&self) -> Vec<(String, StatSummary)> {
        self.counters
            .iter()
            .map(|(name, c)| (name.clone(), c.summary()))
            .collect()
    }

    fn summary_of(&self, name: &str) -> Option<StatSummary> {
        self.index.get(name).map(|&i| self.counters[i].1.summary())
    }

    /// Labels and names to report, falling back to every counter when the
    /// set was created without fields.
    fn rows(&self, names: Vec<String>, aliases: Vec<String>) -> (Vec<String>, Vec<String>) {
        if names.is_empty() {
            let all: Vec<String> = self.counters.iter().map(|(n, _)| n.clone()).collect();
            (all.clone(), all)
        } else {
            (names, aliases)
        }
    }

    /// Rows per field, columns per selected stat, values rounded to `decimals`.
    /// An empty header list means `n;sum;avg;min;max;sd`; unknown stats are NaN.
    pub fn table(&self, headers: &FieldList, decimals: Option<i32>) -> StatTable {
        let selected: Vec<String> = if headers.is_empty() {
            STAT_HEADERS.iter().map(|s| s.to_string()).collect()
        } else {
            match headers {
                FieldList::Joined(s) => s.split(';').map(str::to_string).collect(),
                FieldList::List(items) => items.clone(),
            }
        };
        let selected: Vec<String> = selected.into_iter().filter(|h| !h.is_empty()).collect();

        let mut table = StatTable {
            headers: std::iter::once(String::new())
                .chain(selected.iter().cloned())
                .collect(),
            matrix: Vec::new(),
        };

        let (names, labels) = self.rows(self.fields.clone(), self.aliases.clone());
        for (name, label) in names.iter().zip(labels) {
            let Some(stat) = self.summary_of(name) else {
                continue;
            };
            let values = selected
                .iter()
                .map(|h| round_to(stat.get(h).unwrap_or(f64::NAN), decimals))
                .collect();
            table.matrix.push(StatRow { label, values });
        }
        table
    }

    /// `item` for each of `fields` (or every configured field), labeled by
    /// alias. Fields without a counter report 0.
    pub fn series(
        &self,
        fields: Option<&FieldList>,
        item: &str,
        decimals: Option<i32>,
    ) -> StatsResult<StatSeries> {
        let (names, aliases) = match fields {
            Some(list) if !list.is_empty() => {
                let fa = separate_names_and_aliases(&widen_labeled_fields(list)?);
                (fa.names, fa.aliases)
            }
            _ => (self.fields.clone(), self.aliases.clone()),
        };
        let (names, labels) = self.rows(names, aliases);

        let mut series = StatSeries {
            labels: Vec::with_capacity(names.len()),
            data: Vec::with_capacity(names.len()),
        };
        for (name, label) in names.iter().zip(labels) {
            series.labels.push(label);
            let value = match self.summary_of(name) {
                Some(stat) => round_to(stat.get(item).unwrap_or(f64::NAN), decimals),
                None => 0.0,
            };
            series.data.push(value);
        }
        Ok(series)
    }
}

/// Validate an inclusive integer range coming from a script.
pub fn integral_range(start: f64, end: f64) -> StatsResult<(i64, i64)> {
    let integral = |v: f64| v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15;
    if !integral(start) || !integral(end) {
        return Err(StatsError::NonIntegerRange);
    }
    let (start, end) = (start as i64, end as i64);
    if end >= start && (end - start) as u64 >= MAX_WIDENED_FIELDS as u64 {
        return Err(StatsError::RangeTooLarge {
            max: MAX_WIDENED_FIELDS,
        });
    }
    Ok((start, end))
}

impl Aggregator for NamedCounterSet {
    fn autoadd(&self) -> bool {
        self.autoadd
    }

    fn add_field(&mut self, source: &mut dyn FieldSource) -> StatsResult<()> {
        self.attachment.ensure()?;
        for name in self.fields.clone() {
            self.add_from(source, &name, NO_LIMIT);
        }
        Ok(())
    }

    fn detach(&mut self) {
        self.attachment.detach();
    }

    fn footprint(&self) -> usize {
        std::mem::size_of::<Self>() + self.name_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::MapSource;

    fn set(fields: &str) -> NamedCounterSet {
        NamedCounterSet::new(&FieldList::from(fields), true).unwrap()
    }

    #[test]
    fn test_fields_widen_with_aliases() {
        let s = set("d(1,2)=t;sum");
        assert_eq!(s.fields(), ["d1", "d2", "sum"]);
        assert_eq!(s.data().len(), 3);
    }

    #[test]
    fn test_add_field_reads_every_configured_field() {
        let mut s = set("a;b");
        let mut src = MapSource::with(&[("a", 3.0)]);
        s.add_field(&mut src).unwrap();
        assert_eq!(src.reads, vec!["a", "b"]);
        let data = s.data();
        assert_eq!(data[0].1.n, 1.0);
        assert_eq!(data[1].1.n, 0.0);
    }

    #[test]
    fn test_add_value_caps_and_creates() {
        let mut s = set("");
        s.add_value("x", 10.0, 4.0);
        s.add_value("x", 2.0, NO_LIMIT);
        s.add_value("y", f64::NAN, NO_LIMIT);
        let data = s.data();
        assert_eq!(data[0].0, "x");
        assert_eq!(data[0].1.sum, 6.0);
        assert_eq!(data[1].0, "y");
        assert_eq!(data[1].1.n, 0.0);
    }

    #[test]
    fn test_add_data_requires_integral_bounds() {
        let mut s = set("");
        let mut src = MapSource::with(&[("d1", 1.0), ("d2", 5.0), ("d3", 9.0)]);
        s.add_data(&mut src, "d", 1.0, 2.0, 4.0).unwrap();
        let data = s.data();
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].1.max, 4.0);

        assert_eq!(
            s.add_data(&mut src, "d", 1.5, 2.0, NO_LIMIT),
            Err(StatsError::NonIntegerRange)
        );
    }

    #[test]
    fn test_add_of_drops_aliases() {
        let mut s = set("");
        let mut src = MapSource::with(&[("d1", 1.0), ("d2", 2.0)]);
        s.add_of(&mut src, &FieldList::from("d(1,2)=t")).unwrap();
        assert_eq!(src.reads, vec!["d1", "d2"]);
    }

    #[test]
    fn test_table_uses_aliases_and_rounds() {
        let mut s = set("d1=first;d2");
        s.add_value("d1", 1.0, NO_LIMIT);
        s.add_value("d1", 2.0, NO_LIMIT);
        let table = s.table(&FieldList::from("n;avg;sd;median"), Some(2));
        assert_eq!(table.headers, vec!["", "n", "avg", "sd", "median"]);
        assert_eq!(table.matrix[0].label, "first");
        assert_eq!(&table.matrix[0].values[..3], &[2.0, 1.5, 0.71]);
        assert!(table.matrix[0].values[3].is_nan());
        assert_eq!(table.matrix[1].label, "d2");

        let json = serde_json::to_value(&table.matrix[1]).unwrap();
        assert_eq!(json[0], "d2");
    }

    #[test]
    fn test_table_default_headers() {
        let s = set("a");
        let table = s.table(&FieldList::from(""), Some(2));
        assert_eq!(table.headers.len(), 7);
        assert_eq!(table.matrix[0].values.len(), 6);
    }

    #[test]
    fn test_series_missing_fields_report_zero() {
        let mut s = set("a=A;b=B");
        s.add_value("a", 4.0, NO_LIMIT);
        let series = s.series(None, "avg", Some(2)).unwrap();
        assert_eq!(series.labels, vec!["A", "B"]);
        assert_eq!(series.data[0], 4.0);
        assert!(series.data[1].is_nan());

        let series = s.series(Some(&FieldList::from("a;zzz")), "sum", Some(2)).unwrap();
        assert_eq!(series.labels, vec!["a", "zzz"]);
        assert_eq!(series.data, vec![4.0, 0.0]);
    }

    #[test]
    fn test_footprint_grows_with_new_names_only() {
        let mut s = set("a");
        let base = s.footprint();
        s.add_value("a", 1.0, NO_LIMIT);
        assert_eq!(s.footprint(), base);
        s.add_value("fresh_name", 1.0, NO_LIMIT);
        assert_eq!(s.footprint(), base + 2 * "fresh_name".len() + COUNTER_OVERHEAD);
    }

    #[test]
    fn test_detached_set_rejects_pulls() {
        let mut s = set("a");
        s.detach();
        let mut src = MapSource::default();
        assert_eq!(s.add_field(&mut src), Err(StatsError::Detached));
        assert_eq!(
            s.add_of(&mut src, &FieldList::from("a")),
            Err(StatsError::Detached)
        );
    }
}
