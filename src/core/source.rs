//! Access to the object store and time-series history a chart is built from.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::error::RenderResult;

pub const SYSTEM_CONFIG_ID: &str = "system.config";

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HistoryValue {
    pub ts: i64,
    #[serde(default, deserialize_with = "lenient_number")]
    pub val: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StateValue {
    #[serde(default, deserialize_with = "lenient_number")]
    pub val: Option<f64>,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregate {
    None,
    Average,
    Min,
    Max,
    Total,
    #[default]
    #[serde(other)]
    Minmax,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOptions {
    pub instance: String,
    pub start: i64,
    pub end: i64,
    pub aggregate: Aggregate,
    /// Upper bound of buckets; 0 disables bucketing
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub language: String,
    pub default_history: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            default_history: None,
        }
    }
}

impl SystemConfig {
    pub fn from_object(obj: &JsonValue) -> Self {
        let common = &obj["common"];
        let language = common["language"]
            .as_str()
            .filter(|s| !s.is_empty())
            .unwrap_or("en")
            .to_string();
        let default_history = common["defaultHistory"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            language,
            default_history,
        }
    }
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn get_state(&self, id: &str) -> RenderResult<Option<StateValue>>;

    async fn get_history(&self, id: &str, options: &HistoryOptions)
    -> RenderResult<Vec<HistoryValue>>;

    async fn get_object(&self, id: &str) -> RenderResult<Option<JsonValue>>;

    async fn get_system_config(&self) -> RenderResult<SystemConfig>;
}

#[derive(Debug, Default, Deserialize)]
struct Snapshot {
    #[serde(default)]
    objects: HashMap<String, JsonValue>,
    #[serde(default)]
    states: HashMap<String, StateValue>,
    #[serde(default)]
    history: HashMap<String, Vec<HistoryValue>>,
}

/// Data source backed by a JSON snapshot `{objects, states, history}`.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    snapshot: Snapshot,
    system_config: OnceCell<SystemConfig>,
}

impl MemoryDataSource {
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let mut snapshot: Snapshot =
            serde_json::from_value(value).context("malformed data snapshot")?;
        for values in snapshot.history.values_mut() {
            values.sort_by_key(|v| v.ts);
        }
        Ok(Self {
            snapshot,
            system_config: OnceCell::new(),
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read data file {}", path.display()))?;
        let value: JsonValue = serde_json::from_str(&raw)
            .with_context(|| format!("data file {} is not valid JSON", path.display()))?;
        Self::from_value(value)
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn get_state(&self, id: &str) -> RenderResult<Option<StateValue>> {
        Ok(self.snapshot.states.get(id).copied())
    }

    async fn get_history(
        &self,
        id: &str,
        options: &HistoryOptions,
    ) -> RenderResult<Vec<HistoryValue>> {
        let Some(values) = self.snapshot.history.get(id) else {
            return Ok(Vec::new());
        };
        let in_range: Vec<HistoryValue> = values
            .iter()
            .filter(|v| v.ts >= options.start && v.ts <= options.end)
            .copied()
            .collect();
        Ok(aggregate(
            &in_range,
            options.aggregate,
            options.count,
            options.start,
            options.end,
        ))
    }

    async fn get_object(&self, id: &str) -> RenderResult<Option<JsonValue>> {
        Ok(self.snapshot.objects.get(id).cloned())
    }

    async fn get_system_config(&self) -> RenderResult<SystemConfig> {
        let config = self.system_config.get_or_init(|| {
            self.snapshot
                .objects
                .get(SYSTEM_CONFIG_ID)
                .map(SystemConfig::from_object)
                .unwrap_or_default()
        });
        Ok(config.clone())
    }
}

/// Reduces sorted `values` to at most `count` buckets over `[start, end]`.
/// `minmax` keeps both extremes of every bucket at their original timestamps.
pub fn aggregate(
    values: &[HistoryValue],
    method: Aggregate,
    count: usize,
    start: i64,
    end: i64,
) -> Vec<HistoryValue> {
    if method == Aggregate::None || count == 0 || values.len() <= count || end <= start {
        return values.to_vec();
    }

    // i128 keeps the span of any pair of i64 bounds representable
    let (start, last) = (i128::from(start), count as i128 - 1);
    let step = ((i128::from(end) - start) / (count as i128)).max(1);
    let mut buckets: BTreeMap<i128, Vec<HistoryValue>> = BTreeMap::new();
    for value in values {
        let index = ((i128::from(value.ts) - start) / step).clamp(0, last);
        buckets.entry(index).or_default().push(*value);
    }

    let mut out = Vec::with_capacity(buckets.len());
    for (index, bucket) in buckets {
        let mid = i64::try_from(start + index * step + step / 2).unwrap_or(end);
        let numbers: Vec<&HistoryValue> = bucket.iter().filter(|v| v.val.is_some()).collect();
        if numbers.is_empty() {
            out.push(HistoryValue { ts: mid, val: None });
            continue;
        }
        let vals = numbers.iter().filter_map(|v| v.val);
        match method {
            Aggregate::Average => {
                let sum: f64 = vals.sum();
                out.push(HistoryValue {
                    ts: mid,
                    val: Some(sum / numbers.len() as f64),
                });
            }
            Aggregate::Total => out.push(HistoryValue {
                ts: mid,
                val: Some(vals.sum()),
            }),
            Aggregate::Min => out.push(HistoryValue {
                ts: mid,
                val: vals.reduce(f64::min),
            }),
            Aggregate::Max => out.push(HistoryValue {
                ts: mid,
                val: vals.reduce(f64::max),
            }),
            Aggregate::Minmax => {
                let min = numbers
                    .iter()
                    .min_by(|a, b| a.val.partial_cmp(&b.val).unwrap_or(std::cmp::Ordering::Equal));
                let max = numbers
                    .iter()
                    .max_by(|a, b| a.val.partial_cmp(&b.val).unwrap_or(std::cmp::Ordering::Equal));
                if let (Some(min), Some(max)) = (min, max) {
                    if min.ts == max.ts {
                        out.push(**min);
                    } else if min.ts < max.ts {
                        out.push(**min);
                        out.push(**max);
                    } else {
                        out.push(**max);
                        out.push(**min);
                    }
                }
            }
            Aggregate::None => out.extend(bucket.iter().copied()),
        }
    }
    out
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| json_number(&v)))
}

/// Numbers, booleans and numeric strings all chart as numbers.
pub fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn points(raw: &[(i64, f64)]) -> Vec<HistoryValue> {
        raw.iter()
            .map(|&(ts, val)| HistoryValue { ts, val: Some(val) })
            .collect()
    }

    #[test]
    fn aggregate_keeps_raw_values_under_count() {
        let values = points(&[(0, 1.0), (10, 2.0)]);
        assert_eq!(aggregate(&values, Aggregate::Average, 10, 0, 100), values);
    }

    #[test]
    fn aggregate_average_per_bucket() {
        let values = points(&[(0, 1.0), (10, 3.0), (60, 10.0), (70, 20.0)]);
        let out = aggregate(&values, Aggregate::Average, 2, 0, 100);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].val, Some(2.0));
        assert_eq!(out[1].val, Some(15.0));
    }

    #[test]
    fn aggregate_minmax_keeps_extremes_in_time_order() {
        let values = points(&[(0, 5.0), (10, 1.0), (20, 9.0), (30, 4.0)]);
        let out = aggregate(&values, Aggregate::Minmax, 1, 0, 100);
        assert_eq!(out, points(&[(10, 1.0), (20, 9.0)]));
    }

    #[test]
    fn aggregate_survives_extreme_bounds() {
        let values = points(&[(-5, 1.0), (0, 2.0), (5, 3.0)]);
        let out = aggregate(&values, Aggregate::Average, 1, i64::MIN, i64::MAX);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].val, Some(2.0));

        let out = aggregate(&values, Aggregate::Max, 2, i64::MIN, i64::MAX);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn unknown_aggregate_falls_back_to_minmax() {
        let method: Aggregate = serde_json::from_value(json!("median")).unwrap();
        assert_eq!(method, Aggregate::Minmax);
        let method: Aggregate = serde_json::from_value(json!("total")).unwrap();
        assert_eq!(method, Aggregate::Total);
    }

    #[test]
    fn lenient_values_parse() {
        let v: HistoryValue = serde_json::from_value(json!({"ts": 1, "val": "2.5"})).unwrap();
        assert_eq!(v.val, Some(2.5));
        let v: HistoryValue = serde_json::from_value(json!({"ts": 1, "val": true})).unwrap();
        assert_eq!(v.val, Some(1.0));
        let v: HistoryValue = serde_json::from_value(json!({"ts": 1, "val": null})).unwrap();
        assert_eq!(v.val, None);
    }

    #[tokio::test]
    async fn memory_source_filters_history_window() {
        let source = MemoryDataSource::from_value(json!({
            "history": {"a.0.temp": [{"ts": 30, "val": 3}, {"ts": 10, "val": 1}, {"ts": 200, "val": 2}]}
        }))
        .unwrap();
        let options = HistoryOptions {
            instance: "history.0".to_string(),
            start: 0,
            end: 100,
            aggregate: Aggregate::None,
            count: 0,
        };
        let values = source.get_history("a.0.temp", &options).await.unwrap();
        assert_eq!(values, points(&[(10, 1.0), (30, 3.0)]));
    }

    #[tokio::test]
    async fn system_config_defaults_to_english() {
        let source = MemoryDataSource::from_value(json!({})).unwrap();
        let config = source.get_system_config().await.unwrap();
        assert_eq!(config.language, "en");
        assert!(config.default_history.is_none());
    }
}
