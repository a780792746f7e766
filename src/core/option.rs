//! Turns resolved chart data into a declarative ECharts option.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{Value as JsonValue, json};

use crate::core::model::{ChartData, ChartType, SeriesData};
use crate::core::theme::Theme;

#[derive(Clone, Copy)]
struct LocaleFormat {
    /// chrono pattern for the subtitle date range
    datetime: &'static str,
    /// ECharts time template for day-scale axis labels
    axis_day: &'static str,
}

static EN_FORMAT: LocaleFormat = LocaleFormat {
    datetime: "%m/%d/%Y %H:%M",
    axis_day: "{MM}/{dd}",
};

static LOCALE_FORMATS: Lazy<HashMap<&'static str, LocaleFormat>> = Lazy::new(|| {
    let dotted = || LocaleFormat {
        datetime: "%d.%m.%Y %H:%M",
        axis_day: "{dd}.{MM}.",
    };
    let slashed = || LocaleFormat {
        datetime: "%d/%m/%Y %H:%M",
        axis_day: "{dd}/{MM}",
    };

    let mut formats = HashMap::new();
    formats.insert("en", EN_FORMAT);
    formats.insert("en-gb", slashed());
    formats.insert("de", dotted());
    formats.insert("ru", dotted());
    formats.insert("pl", dotted());
    formats.insert("nl", LocaleFormat {
        datetime: "%d-%m-%Y %H:%M",
        axis_day: "{dd}-{MM}",
    });
    formats.insert("fr", slashed());
    formats.insert("es", slashed());
    formats.insert("it", slashed());
    formats.insert("pt", slashed());
    formats.insert(
        "zh-cn",
        LocaleFormat {
            datetime: "%Y-%m-%d %H:%M",
            axis_day: "{MM}-{dd}",
        },
    );
    formats
});

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub struct OptionBuilder {
    locale: String,
    theme: Theme,
}

impl OptionBuilder {
    pub fn new(locale: impl Into<String>, theme: Theme) -> Self {
        Self {
            locale: locale.into().to_lowercase().replace('_', "-"),
            theme,
        }
    }

    fn format(&self) -> &'static LocaleFormat {
        LOCALE_FORMATS
            .get(self.locale.as_str())
            .unwrap_or(&EN_FORMAT)
    }

    pub fn format_timestamp(&self, ts: i64) -> String {
        DateTime::<Utc>::from_timestamp_millis(ts)
            .map(|dt| dt.format(self.format().datetime).to_string())
            .unwrap_or_default()
    }

    pub fn build(&self, data: &ChartData) -> JsonValue {
        let palette = self.theme.palette();
        let units = distinct_units(&data.series);

        let colors: Vec<&str> = data
            .series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                s.line
                    .color
                    .as_deref()
                    .unwrap_or(palette.series[i % palette.series.len()])
            })
            .collect();

        let has_title = !data.config.title.is_empty();
        let title = if has_title {
            json!({
                "text": data.config.title,
                "subtext": format!(
                    "{} - {}",
                    self.format_timestamp(data.start),
                    self.format_timestamp(data.end)
                ),
                "left": "center",
                "textStyle": {"color": palette.text},
                "subtextStyle": {"color": palette.axis},
            })
        } else {
            json!({"show": false})
        };

        let axis_label = if data.end.saturating_sub(data.start) > DAY_MS {
            format!("{}\n{{HH}}:{{mm}}", self.format().axis_day)
        } else {
            "{HH}:{mm}".to_string()
        };

        let y_axis: Vec<JsonValue> = units
            .iter()
            .enumerate()
            .map(|(i, unit)| {
                let formatter = if unit.is_empty() {
                    "{value}".to_string()
                } else {
                    format!("{{value}} {unit}")
                };
                json!({
                    "type": "value",
                    "scale": true,
                    "position": if i == 0 { "left" } else { "right" },
                    "offset": if i > 1 { (i as i64 - 1) * 50 } else { 0 },
                    "axisLabel": {"color": palette.text, "formatter": formatter},
                    "axisLine": {"show": true, "lineStyle": {"color": palette.axis}},
                    "splitLine": {"show": i == 0, "lineStyle": {"color": palette.split}},
                })
            })
            .collect();

        let series: Vec<JsonValue> = data
            .series
            .iter()
            .map(|s| {
                let y_index = units.iter().position(|u| *u == s.line.unit).unwrap_or(0);
                series_option(s, y_index)
            })
            .collect();

        json!({
            "animation": false,
            "backgroundColor": "transparent",
            "color": colors,
            "title": title,
            "legend": self.legend(data),
            "grid": {
                "left": 10,
                "right": 10 + units.len().saturating_sub(1) * 50,
                "top": if has_title { 60 } else { 20 },
                "bottom": 10,
                "containLabel": true,
            },
            "tooltip": {"trigger": "axis"},
            "xAxis": {
                "type": "time",
                "min": data.start,
                "max": data.end,
                "axisLabel": {"color": palette.text, "formatter": axis_label, "hideOverlap": true},
                "axisLine": {"lineStyle": {"color": palette.axis}},
                "splitLine": {"show": true, "lineStyle": {"color": palette.split}},
            },
            "yAxis": y_axis,
            "series": series,
        })
    }

    fn legend(&self, data: &ChartData) -> JsonValue {
        let names: Vec<String> = data.series.iter().map(display_name).collect();
        let mut legend = json!({
            "show": !data.config.legend.is_empty() && !names.is_empty(),
            "data": names,
            "orient": "vertical",
            "backgroundColor": "transparent",
            "textStyle": {"color": self.theme.palette().text},
        });
        let (vertical, horizontal) = match data.config.legend.as_str() {
            "ne" => (("top", 60), ("right", 60)),
            "sw" => (("bottom", 40), ("left", 60)),
            "se" => (("bottom", 40), ("right", 60)),
            _ => (("top", 60), ("left", 60)),
        };
        legend[vertical.0] = json!(vertical.1);
        legend[horizontal.0] = json!(horizontal.1);
        legend
    }
}

fn distinct_units(series: &[SeriesData]) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    for s in series {
        if !units.contains(&s.line.unit) {
            units.push(s.line.unit.clone());
        }
    }
    if units.is_empty() {
        units.push(String::new());
    }
    units
}

fn display_name(series: &SeriesData) -> String {
    let line = &series.line;
    if line.unit.is_empty() {
        line.name.clone()
    } else {
        format!("{} ({})", line.name, line.unit)
    }
}

fn series_option(series: &SeriesData, y_index: usize) -> JsonValue {
    let line = &series.line;
    let values: Vec<JsonValue> = series.values.iter().map(|v| json!([v.ts, v.val])).collect();

    let kind = match line.chart_type {
        ChartType::Bar => "bar",
        ChartType::Scatter => "scatter",
        ChartType::Line | ChartType::Area | ChartType::Steps | ChartType::Spline => "line",
    };

    let mut option = json!({
        "id": line.id,
        "name": display_name(series),
        "type": kind,
        "yAxisIndex": y_index,
        "showSymbol": false,
        "connectNulls": false,
        "data": values,
    });
    if let Some(color) = &line.color {
        option["itemStyle"] = json!({"color": color});
    }
    if kind == "line" {
        option["lineStyle"] = json!({"width": line.thickness.unwrap_or(2.0)});
    }

    match line.chart_type {
        ChartType::Area => {
            option["areaStyle"] = json!({"opacity": line.fill.filter(|f| *f > 0.0).unwrap_or(0.3)});
        }
        ChartType::Steps => option["step"] = json!("end"),
        ChartType::Spline => option["smooth"] = json!(true),
        _ => {
            if let Some(fill) = line.fill.filter(|f| *f > 0.0) {
                option["areaStyle"] = json!({"opacity": fill});
            }
        }
    }
    option
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ChartConfig, ResolvedLine};
    use crate::core::source::{HistoryValue, SystemConfig};

    fn line(id: &str, unit: &str, chart_type: ChartType) -> SeriesData {
        SeriesData {
            line: ResolvedLine {
                id: id.to_string(),
                name: id.to_uppercase(),
                unit: unit.to_string(),
                color: None,
                chart_type,
                fill: None,
                thickness: None,
            },
            values: vec![HistoryValue { ts: 1_000, val: Some(1.5) }],
        }
    }

    fn chart(series: Vec<SeriesData>, title: &str, legend: &str) -> ChartData {
        let config: ChartConfig =
            serde_json::from_value(json!({"title": title, "legend": legend})).unwrap();
        ChartData {
            config,
            series,
            start: 0,
            end: 3_600_000,
            system_config: SystemConfig::default(),
        }
    }

    #[test]
    fn one_axis_per_unit() {
        let data = chart(
            vec![
                line("a", "°C", ChartType::Line),
                line("b", "%", ChartType::Bar),
                line("c", "°C", ChartType::Area),
            ],
            "",
            "",
        );
        let option = OptionBuilder::new("en", Theme::Light).build(&data);
        assert_eq!(option["yAxis"].as_array().unwrap().len(), 2);
        assert_eq!(option["series"][1]["type"], "bar");
        assert_eq!(option["series"][1]["yAxisIndex"], 1);
        assert_eq!(option["series"][2]["yAxisIndex"], 0);
        assert!(option["series"][2]["areaStyle"].is_object());
        assert_eq!(option["animation"], false);
    }

    #[test]
    fn build_is_deterministic() {
        let data = chart(vec![line("a", "", ChartType::Steps)], "Heating", "ne");
        let builder = OptionBuilder::new("de", Theme::Dark);
        assert_eq!(builder.build(&data), builder.build(&data));
    }

    #[test]
    fn title_and_legend_follow_config() {
        let data = chart(vec![line("a", "", ChartType::Spline)], "Heating", "se");
        let option = OptionBuilder::new("de", Theme::Dark).build(&data);
        assert_eq!(option["title"]["text"], "Heating");
        assert_eq!(option["title"]["subtext"], "01.01.1970 00:00 - 01.01.1970 01:00");
        assert_eq!(option["title"]["textStyle"]["color"], "#dddddd");
        assert_eq!(option["legend"]["show"], true);
        assert_eq!(option["legend"]["right"], 60);
        assert_eq!(option["series"][0]["smooth"], true);

        let hidden = OptionBuilder::new("en", Theme::Light).build(&chart(vec![], "", ""));
        assert_eq!(hidden["legend"]["show"], false);
        assert_eq!(hidden["title"]["show"], false);
    }

    #[test]
    fn unknown_locale_uses_english_format() {
        let builder = OptionBuilder::new("xx", Theme::Light);
        assert_eq!(builder.format_timestamp(0), "01/01/1970 00:00");
    }

    #[test]
    fn british_english_uses_day_first_dates() {
        assert_eq!(
            OptionBuilder::new("en-GB", Theme::Light).format_timestamp(0),
            "01/01/1970 00:00"
        );
        assert_eq!(
            OptionBuilder::new("en_gb", Theme::Light).format_timestamp(3_600_000 * 24 * 40),
            "10/02/1970 00:00"
        );
        assert_eq!(
            OptionBuilder::new("en", Theme::Light).format_timestamp(3_600_000 * 24 * 40),
            "02/10/1970 00:00"
        );
    }
}
