//! Header standardization
//!
//! Source files name the same field in many ways ("Регион", "region ",
//! "Region name"). A [`ColumnMapper`] maps every known alias onto one
//! standard batch column and tolerates small typos through normalized
//! Levenshtein similarity. Matches below the threshold are reported as
//! unresolved; the mapper never guesses.

use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};

use crate::store::config::DEFAULT_FUZZY_THRESHOLD;

/// Error type for header mapping
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("Unresolved headers: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    #[error("Invalid fuzzy threshold {0}: must be within 0.0..=1.0")]
    InvalidThreshold(f64),

    #[error("Mapping is empty")]
    EmptyMapping,

    #[error("Alias '{alias}' maps to both '{first}' and '{second}'")]
    DuplicateTarget {
        alias: String,
        first: String,
        second: String,
    },

    #[error("Record {0} is not a JSON object")]
    NotAnObject(usize),
}

/// Outcome of resolving one header
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderMatch {
    /// Known alias or standard name
    Exact(String),
    /// Closest alias within the threshold
    Fuzzy { column: String, score: f64 },
    Unresolved,
}

impl HeaderMatch {
    pub fn column(&self) -> Option<&str> {
        match self {
            HeaderMatch::Exact(column) | HeaderMatch::Fuzzy { column, .. } => Some(column),
            HeaderMatch::Unresolved => None,
        }
    }
}

/// Maps source headers onto standard column names
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    /// Normalized alias -> standard column
    aliases: BTreeMap<String, String>,
    threshold: f64,
}

impl ColumnMapper {
    /// Build from `standard -> [aliases]`
    ///
    /// Every standard name also matches itself.
    pub fn from_aliases<S, A, I>(mapping: impl IntoIterator<Item = (S, I)>) -> Result<Self, MappingError>
    where
        S: Into<String>,
        A: AsRef<str>,
        I: IntoIterator<Item = A>,
    {
        let mut mapper = Self::empty();
        for (standard, aliases) in mapping {
            let standard = standard.into();
            mapper.add(&standard, &standard)?;
            for alias in aliases {
                mapper.add(alias.as_ref(), &standard)?;
            }
        }
        mapper.non_empty()
    }

    /// Build from `alias -> standard`
    pub fn from_lookup<A, S>(mapping: impl IntoIterator<Item = (A, S)>) -> Result<Self, MappingError>
    where
        A: AsRef<str>,
        S: AsRef<str>,
    {
        let mut mapper = Self::empty();
        for (alias, standard) in mapping {
            mapper.add(standard.as_ref(), standard.as_ref())?;
            mapper.add(alias.as_ref(), standard.as_ref())?;
        }
        mapper.non_empty()
    }

    fn empty() -> Self {
        Self {
            aliases: BTreeMap::new(),
            threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    fn non_empty(self) -> Result<Self, MappingError> {
        if self.aliases.is_empty() {
            Err(MappingError::EmptyMapping)
        } else {
            Ok(self)
        }
    }

    fn add(&mut self, alias: &str, standard: &str) -> Result<(), MappingError> {
        let key = normalize(alias);
        if key.is_empty() {
            return Ok(());
        }
        match self.aliases.get(&key) {
            Some(existing) if existing != standard => Err(MappingError::DuplicateTarget {
                alias: alias.to_string(),
                first: existing.clone(),
                second: standard.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.aliases.insert(key, standard.to_string());
                Ok(())
            }
        }
    }

    /// Set the minimum similarity for a fuzzy match
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self, MappingError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MappingError::InvalidThreshold(threshold));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Standard columns known to the mapper, sorted and deduplicated
    pub fn standard_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.aliases.values().cloned().collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Resolve one header
    ///
    /// Ties on score go to the alias that sorts first, so the result does
    /// not depend on insertion order.
    pub fn resolve(&self, header: &str) -> HeaderMatch {
        let needle = normalize(header);
        if let Some(standard) = self.aliases.get(&needle) {
            return HeaderMatch::Exact(standard.clone());
        }
        if needle.is_empty() {
            return HeaderMatch::Unresolved;
        }

        let mut best: Option<(&String, f64)> = None;
        for (alias, standard) in &self.aliases {
            let score = similarity(&needle, alias);
            if score >= self.threshold && best.is_none_or(|(_, top)| score > top) {
                best = Some((standard, score));
            }
        }
        match best {
            Some((column, score)) => HeaderMatch::Fuzzy {
                column: column.clone(),
                score,
            },
            None => HeaderMatch::Unresolved,
        }
    }

    /// Map every header to its standard column
    ///
    /// Fails listing every unresolved header.
    pub fn rename_headers<S: AsRef<str>>(
        &self,
        headers: &[S],
    ) -> Result<HashMap<String, String>, MappingError> {
        let mut renames = HashMap::with_capacity(headers.len());
        let mut unresolved = Vec::new();
        for header in headers {
            let header = header.as_ref();
            match self.resolve(header).column() {
                Some(column) => {
                    renames.insert(header.to_string(), column.to_string());
                }
                None => unresolved.push(header.to_string()),
            }
        }
        if unresolved.is_empty() {
            Ok(renames)
        } else {
            Err(MappingError::Unresolved(unresolved))
        }
    }

    /// Rename the keys of JSON object records to standard columns
    ///
    /// Headers are collected across all records in first-seen order.
    pub fn rename_records(&self, records: Vec<JsonValue>) -> Result<Vec<JsonValue>, MappingError> {
        let mut headers: Vec<String> = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or(MappingError::NotAnObject(idx))?;
            for key in object.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let renames = self.rename_headers(&headers)?;

        Ok(records
            .into_iter()
            .map(|record| match record {
                JsonValue::Object(object) => {
                    let renamed: Map<String, JsonValue> = object
                        .into_iter()
                        .map(|(key, value)| {
                            let column = renames.get(&key).cloned().unwrap_or(key);
                            (column, value)
                        })
                        .collect();
                    JsonValue::Object(renamed)
                }
                other => other,
            })
            .collect())
    }
}

/// Lowercase, trim and collapse inner whitespace
fn normalize(header: &str) -> String {
    header
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `1 - distance / longer length`, in `0.0..=1.0`
fn similarity(a: &str, b: &str) -> f64 {
    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longer as f64
}

fn levenshtein(value: &str, needle: &str) -> usize {
    let needle_chars: Vec<char> = needle.chars().collect();
    let n = needle_chars.len();
    if n == 0 {
        return value.chars().count();
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = if c == needle_chars[j - 1] { 0 } else { 1 };
            let deletion = prev[j] + 1;
            let insertion = curr[j - 1] + 1;
            let substitution = prev[j - 1] + cost;
            curr[j] = deletion.min(insertion).min(substitution);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapper() -> ColumnMapper {
        ColumnMapper::from_aliases([
            ("region", vec!["Регион", "Region name"]),
            ("settlement", vec!["Населенный пункт", "city"]),
            ("participants", vec!["Участники"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("Регион", "Регоин"), 2);
    }

    #[test]
    fn test_exact_matches_are_normalized() {
        let mapper = mapper();
        assert_eq!(
            mapper.resolve("  REGION   Name "),
            HeaderMatch::Exact("region".to_string())
        );
        assert_eq!(
            mapper.resolve("settlement"),
            HeaderMatch::Exact("settlement".to_string())
        );
    }

    #[test]
    fn test_fuzzy_match_within_threshold() {
        match mapper().resolve("Участникии") {
            HeaderMatch::Fuzzy { column, score } => {
                assert_eq!(column, "participants");
                assert!(score >= 0.8);
            }
            other => panic!("expected fuzzy match, got {:?}", other),
        }
    }

    #[test]
    fn test_below_threshold_is_unresolved() {
        assert_eq!(mapper().resolve("budget"), HeaderMatch::Unresolved);
        let strict = mapper().with_threshold(1.0).unwrap();
        assert_eq!(strict.resolve("Участникии"), HeaderMatch::Unresolved);
    }

    #[test]
    fn test_invalid_threshold() {
        let err = mapper().with_threshold(1.5).unwrap_err();
        assert_eq!(err, MappingError::InvalidThreshold(1.5));
    }

    #[test]
    fn test_from_lookup_and_duplicates() {
        let mapper = ColumnMapper::from_lookup([("город", "settlement"), ("city", "settlement")])
            .unwrap();
        assert_eq!(mapper.standard_columns(), vec!["settlement"]);

        let err = ColumnMapper::from_lookup([("city", "settlement"), ("CITY", "region")])
            .unwrap_err();
        assert!(matches!(err, MappingError::DuplicateTarget { .. }));

        let empty: Vec<(&str, &str)> = Vec::new();
        assert_eq!(
            ColumnMapper::from_lookup(empty).unwrap_err(),
            MappingError::EmptyMapping
        );
    }

    #[test]
    fn test_rename_headers_lists_all_unresolved() {
        let err = mapper()
            .rename_headers(&["Регион", "budget", "notes"])
            .unwrap_err();
        assert_eq!(
            err,
            MappingError::Unresolved(vec!["budget".to_string(), "notes".to_string()])
        );
    }

    #[test]
    fn test_rename_records() {
        let records = vec![
            json!({"Регион": "North", "city": "Lake"}),
            json!({"Region name": "South", "Участники": "Alice"}),
        ];
        let renamed = mapper().rename_records(records).unwrap();
        assert_eq!(renamed[0], json!({"region": "North", "settlement": "Lake"}));
        assert_eq!(renamed[1], json!({"region": "South", "participants": "Alice"}));

        let err = mapper().rename_records(vec![json!([1, 2])]).unwrap_err();
        assert_eq!(err, MappingError::NotAnObject(0));
    }
}
