//! Detection of record-by-record loading.
//!
//! Reading a field on a recordset loads it for the whole set in one query.
//! Code that iterates a set and reads through single-record sets instead
//! issues one query per record. [`LoadTracker`] counts the database loads
//! per model and field list and warns when single-record loads of the same
//! fields keep repeating.
//!
//! # Example
//!
//! ```ignore
//! let mut tracker = LoadTracker::new().with_threshold(5);
//! for id in ids {
//!     tracker.record_load("User", &["name".into()], 1); // warns at the 5th
//! }
//! ```

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug)]
pub struct LoadTracker {
    /// (model, comma-joined fields) -> number of single-record loads
    singles: HashMap<(String, String), usize>,
    threshold: usize,
    enabled: bool,
    total_loads: usize,
    records_loaded: usize,
    call_sites: Vec<CallSite>,
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a single-record load was triggered.
#[derive(Debug, Clone, Serialize)]
pub struct CallSite {
    pub model: String,
    pub file: &'static str,
    pub line: u32,
}

/// Load statistics of one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Number of load queries.
    pub total_loads: usize,
    /// Records fetched over all loads.
    pub records_loaded: usize,
    /// (model, fields) combinations loaded one record at a time at least
    /// `threshold` times.
    pub repeated_single_loads: usize,
}

impl LoadTracker {
    /// Tracker warning after 10 single-record loads of the same fields.
    #[must_use]
    pub fn new() -> Self {
        Self {
            singles: HashMap::new(),
            threshold: 10,
            enabled: true,
            total_loads: 0,
            records_loaded: 0,
            call_sites: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Records one load query of `fields` for `records` records of `model`.
    #[track_caller]
    pub fn record_load(&mut self, model: &str, fields: &[String], records: usize) {
        if !self.enabled {
            return;
        }
        self.total_loads += 1;
        self.records_loaded += records;
        if records != 1 {
            return;
        }

        let key = (model.to_string(), fields.join(","));
        let count = self.singles.entry(key).or_insert(0);
        *count += 1;
        let count = *count;

        let caller = std::panic::Location::caller();
        self.call_sites.push(CallSite {
            model: model.to_string(),
            file: caller.file(),
            line: caller.line(),
        });

        if count == self.threshold {
            self.emit_warning(model, fields, count);
        }
    }

    fn emit_warning(&self, model: &str, fields: &[String], count: usize) {
        tracing::warn!(
            target: "bizorm::load",
            model = model,
            fields = ?fields,
            queries = count,
            threshold = self.threshold,
            "Records loaded one at a time; read the field on the whole recordset instead"
        );
        for (i, site) in self
            .call_sites
            .iter()
            .filter(|s| s.model == model)
            .take(5)
            .enumerate()
        {
            tracing::debug!(target: "bizorm::load", index = i, file = site.file, line = site.line, "load site");
        }
    }

    /// Single-record loads so far of `fields` on `model`.
    #[must_use]
    pub fn count_for(&self, model: &str, fields: &[String]) -> usize {
        self.singles
            .get(&(model.to_string(), fields.join(",")))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn stats(&self) -> LoadStats {
        LoadStats {
            total_loads: self.total_loads,
            records_loaded: self.records_loaded,
            repeated_single_loads: self
                .singles
                .values()
                .filter(|c| **c >= self.threshold)
                .count(),
        }
    }

    pub fn reset(&mut self) {
        self.singles.clear();
        self.call_sites.clear();
        self.total_loads = 0;
        self.records_loaded = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_counts_single_record_loads() {
        let mut tracker = LoadTracker::new().with_threshold(3);
        let name = fields(&["name"]);
        tracker.record_load("User", &name, 1);
        tracker.record_load("User", &name, 1);
        tracker.record_load("User", &name, 20);
        assert_eq!(tracker.count_for("User", &name), 2);
        assert_eq!(tracker.stats().repeated_single_loads, 0);

        tracker.record_load("User", &name, 1);
        let stats = tracker.stats();
        assert_eq!(stats.total_loads, 4);
        assert_eq!(stats.records_loaded, 23);
        assert_eq!(stats.repeated_single_loads, 1);
    }

    #[test]
    fn test_disabled_tracker_records_nothing() {
        let mut tracker = LoadTracker::new();
        tracker.disable();
        tracker.record_load("User", &fields(&["name"]), 1);
        assert_eq!(tracker.stats(), LoadStats::default());
        tracker.enable();
        assert!(tracker.is_enabled());
    }

    #[test]
    fn test_reset_and_serialize() {
        let mut tracker = LoadTracker::new().with_threshold(1);
        tracker.record_load("Tag", &fields(&["name"]), 1);
        let json = serde_json::to_value(tracker.stats()).unwrap();
        assert_eq!(json["repeated_single_loads"], 1);
        tracker.reset();
        assert_eq!(tracker.stats(), LoadStats::default());
    }
}
