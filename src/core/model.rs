//! Resolves a stored preset into the series a chart is drawn from.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::core::source::{
    Aggregate, DataSource, HistoryOptions, HistoryValue, SystemConfig, json_number,
};
use crate::error::{RenderError, RenderResult};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
/// Largest timestamp a JavaScript `Date` can hold.
const MAX_TIMESTAMP_MS: i64 = 8_640_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeType {
    #[default]
    Relative,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeEnd {
    Minute,
    Hour,
    Day,
    #[default]
    #[serde(other)]
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Scatter,
    Area,
    Steps,
    Spline,
    #[default]
    #[serde(other)]
    Line,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineConfig {
    pub id: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub chart_type: ChartType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub aggregate: Option<Aggregate>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub fill: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub thickness: Option<f64>,
}

/// Stored display settings of a preset (`native.data` of the preset object).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    #[serde(default)]
    pub lines: Vec<LineConfig>,
    #[serde(default)]
    pub time_type: TimeType,
    /// Window length in minutes for relative charts
    #[serde(default, deserialize_with = "lenient_f64")]
    pub range: Option<f64>,
    #[serde(default)]
    pub relative_end: RelativeEnd,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub start: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub end: Option<f64>,
    #[serde(default)]
    pub aggregate: Aggregate,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub count: Option<f64>,
    #[serde(default)]
    pub title: String,
    /// `""` hides the legend, otherwise one of `nw`, `ne`, `sw`, `se`
    #[serde(default)]
    pub legend: String,
}

impl ChartConfig {
    pub const DEFAULT_RANGE_MINUTES: f64 = 1440.0;
    pub const DEFAULT_COUNT: usize = 300;

    pub fn range_ms(&self) -> i64 {
        let minutes = self
            .range
            .filter(|r| *r > 0.0)
            .unwrap_or(Self::DEFAULT_RANGE_MINUTES);
        (minutes * MINUTE_MS as f64) as i64
    }

    pub fn count(&self) -> usize {
        self.count
            .filter(|c| *c >= 1.0)
            .map(|c| c as usize)
            .unwrap_or(Self::DEFAULT_COUNT)
    }

    /// Returns `(start, end)` in ms since epoch.
    pub fn window(&self, now_ms: i64) -> RenderResult<(i64, i64)> {
        match self.time_type {
            TimeType::Static => match (self.start, self.end) {
                (Some(start), Some(end)) if end > start => {
                    if within_time_range(start) && within_time_range(end) {
                        Ok((start as i64, end as i64))
                    } else {
                        Err(RenderError::SourceResolution(format!(
                            "Static chart bounds must lie within ±{MAX_TIMESTAMP_MS} ms"
                        )))
                    }
                }
                _ => Err(RenderError::SourceResolution(
                    "Static chart needs a start before its end".to_string(),
                )),
            },
            TimeType::Relative => {
                let end = match self.relative_end {
                    RelativeEnd::Now => now_ms,
                    RelativeEnd::Minute => ceil_to(now_ms, MINUTE_MS),
                    RelativeEnd::Hour => ceil_to(now_ms, HOUR_MS),
                    RelativeEnd::Day => ceil_to(now_ms, DAY_MS),
                };
                Ok((end.saturating_sub(self.range_ms()), end))
            }
        }
    }
}

fn within_time_range(ms: f64) -> bool {
    ms.abs() <= MAX_TIMESTAMP_MS as f64
}

fn ceil_to(ts: i64, unit: i64) -> i64 {
    let rem = ts.rem_euclid(unit);
    if rem == 0 { ts } else { ts - rem + unit }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLine {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub color: Option<String>,
    pub chart_type: ChartType,
    pub fill: Option<f64>,
    pub thickness: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesData {
    pub line: ResolvedLine,
    pub values: Vec<HistoryValue>,
}

/// Everything the option builder needs; immutable once resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub config: ChartConfig,
    pub series: Vec<SeriesData>,
    pub start: i64,
    pub end: i64,
    pub system_config: SystemConfig,
}

pub struct ChartModel;

impl ChartModel {
    pub async fn resolve(
        source: &dyn DataSource,
        preset: &str,
        now_ms: i64,
    ) -> RenderResult<ChartData> {
        let system_config = source.get_system_config().await?;

        let obj = source
            .get_object(preset)
            .await?
            .ok_or_else(|| RenderError::SourceResolution(format!("Preset {preset} not found")))?;
        let data = obj
            .get("native")
            .and_then(|native| native.get("data"))
            .cloned()
            .ok_or_else(|| {
                RenderError::SourceResolution(format!("Preset {preset} has no chart settings"))
            })?;
        let config: ChartConfig = serde_json::from_value(data).map_err(|e| {
            RenderError::SourceResolution(format!("Preset {preset} is invalid: {e}"))
        })?;

        let (start, end) = config.window(now_ms)?;
        let count = config.count();

        let mut series = Vec::with_capacity(config.lines.len());
        for line in &config.lines {
            let instance = line
                .instance
                .clone()
                .filter(|i| !i.is_empty())
                .or_else(|| system_config.default_history.clone())
                .ok_or_else(|| {
                    RenderError::SourceResolution(format!(
                        "No history instance defined for {}",
                        line.id
                    ))
                })?;

            let options = HistoryOptions {
                instance: instance.trim_start_matches("system.adapter.").to_string(),
                start,
                end,
                aggregate: line.aggregate.unwrap_or(config.aggregate),
                count,
            };
            let mut values = source.get_history(&line.id, &options).await?;
            if values.is_empty() {
                if let Some(state) = source.get_state(&line.id).await? {
                    if state.ts >= start && state.ts <= end {
                        values.push(HistoryValue {
                            ts: state.ts,
                            val: state.val,
                        });
                    }
                }
            }

            let resolved = resolve_line(source, line, &system_config.language).await?;
            tracing::debug!("{}: {} values from {}", line.id, values.len(), options.instance);
            series.push(SeriesData {
                line: resolved,
                values,
            });
        }

        Ok(ChartData {
            config,
            series,
            start,
            end,
            system_config,
        })
    }
}

async fn resolve_line(
    source: &dyn DataSource,
    line: &LineConfig,
    language: &str,
) -> RenderResult<ResolvedLine> {
    let needs_object = line.name.as_deref().is_none_or(str::is_empty)
        || line.unit.is_none();
    let obj = if needs_object {
        source.get_object(&line.id).await?
    } else {
        None
    };
    let common = obj.as_ref().map(|o| &o["common"]);

    let name = line
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| common.and_then(|c| translated(&c["name"], language)))
        .unwrap_or_else(|| line.id.clone());
    let unit = line
        .unit
        .clone()
        .or_else(|| common.and_then(|c| c["unit"].as_str().map(str::to_string)))
        .unwrap_or_default();

    Ok(ResolvedLine {
        id: line.id.clone(),
        name,
        unit,
        color: line.color.clone().filter(|c| !c.is_empty()),
        chart_type: line.chart_type,
        fill: line.fill,
        thickness: line.thickness,
    })
}

/// Object names are either plain strings or `{lang: text}` maps.
fn translated(name: &JsonValue, language: &str) -> Option<String> {
    match name {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Object(map) => map
            .get(language)
            .or_else(|| map.get("en"))
            .or_else(|| map.values().next())
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.and_then(|v| json_number(&v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::MemoryDataSource;
    use serde_json::json;

    const NOW: i64 = 1_700_000_030_000;

    fn source() -> MemoryDataSource {
        MemoryDataSource::from_value(json!({
            "objects": {
                "system.config": {"common": {"language": "de", "defaultHistory": "history.0"}},
                "echarts.0.Heating": {
                    "native": {"data": {
                        "range": "60",
                        "aggregate": "none",
                        "lines": [
                            {"id": "hm.0.temp", "color": "#ff0000"},
                            {"id": "hm.0.valve", "name": "Valve", "unit": "%", "chartType": "steps"}
                        ]
                    }}
                },
                "echarts.0.Broken": {"common": {}},
                "hm.0.temp": {"common": {"name": {"en": "Temperature", "de": "Temperatur"}, "unit": "°C"}}
            },
            "states": {"hm.0.valve": {"val": 40, "ts": NOW - 1000}},
            "history": {"hm.0.temp": [
                {"ts": NOW - 30 * 60_000, "val": 20.5},
                {"ts": NOW - 120 * 60_000, "val": 18.0}
            ]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_lines_with_object_metadata() {
        let data = ChartModel::resolve(&source(), "echarts.0.Heating", NOW)
            .await
            .unwrap();
        assert_eq!(data.start, NOW - 60 * 60_000);
        assert_eq!(data.end, NOW);
        assert_eq!(data.system_config.language, "de");

        let temp = &data.series[0];
        assert_eq!(temp.line.name, "Temperatur");
        assert_eq!(temp.line.unit, "°C");
        assert_eq!(temp.values.len(), 1);

        let valve = &data.series[1];
        assert_eq!(valve.line.chart_type, ChartType::Steps);
        // no history, falls back to the current state
        assert_eq!(valve.values, vec![HistoryValue { ts: NOW - 1000, val: Some(40.0) }]);
    }

    #[tokio::test]
    async fn unknown_preset_is_a_resolution_error() {
        let err = ChartModel::resolve(&source(), "echarts.0.Missing", NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::SourceResolution(_)));

        let err = ChartModel::resolve(&source(), "echarts.0.Broken", NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::SourceResolution(_)));
    }

    #[test]
    fn relative_end_rounds_up() {
        let config: ChartConfig =
            serde_json::from_value(json!({"range": 60, "relativeEnd": "hour"})).unwrap();
        let (start, end) = config.window(HOUR_MS * 10 + 5).unwrap();
        assert_eq!(end, HOUR_MS * 11);
        assert_eq!(start, HOUR_MS * 10);
    }

    #[test]
    fn static_window_requires_bounds() {
        let config: ChartConfig = serde_json::from_value(json!({"timeType": "static"})).unwrap();
        assert!(config.window(NOW).is_err());

        let config: ChartConfig =
            serde_json::from_value(json!({"timeType": "static", "start": 10, "end": 20})).unwrap();
        assert_eq!(config.window(NOW).unwrap(), (10, 20));
    }

    #[test]
    fn static_window_rejects_unrepresentable_bounds() {
        let config: ChartConfig = serde_json::from_value(
            json!({"timeType": "static", "start": -1e19, "end": 1e19, "count": 1}),
        )
        .unwrap();
        assert!(matches!(
            config.window(NOW),
            Err(RenderError::SourceResolution(_))
        ));
    }

    #[tokio::test]
    async fn extreme_static_preset_resolves_to_an_error() {
        let source = MemoryDataSource::from_value(json!({
            "objects": {
                "echarts.0.Wide": {"native": {"data": {
                    "timeType": "static", "start": -1e19, "end": 1e19, "count": 1,
                    "lines": [{"id": "hm.0.temp", "instance": "history.0"}]
                }}}
            },
            "history": {"hm.0.temp": [
                {"ts": 1, "val": 1.0}, {"ts": 2, "val": 2.0}, {"ts": 3, "val": 3.0}
            ]}
        }))
        .unwrap();
        let err = ChartModel::resolve(&source, "echarts.0.Wide", NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::SourceResolution(_)));
    }

    #[test]
    fn unknown_relative_end_means_now() {
        let config: ChartConfig =
            serde_json::from_value(json!({"range": 60, "relativeEnd": "week"})).unwrap();
        assert_eq!(config.relative_end, RelativeEnd::Now);
        assert_eq!(config.window(NOW).unwrap(), (NOW - HOUR_MS, NOW));
    }

    #[test]
    fn unknown_chart_type_falls_back_to_line() {
        let line: LineConfig =
            serde_json::from_value(json!({"id": "a", "chartType": "auto"})).unwrap();
        assert_eq!(line.chart_type, ChartType::Line);
    }
}
