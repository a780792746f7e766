#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Debug)]
pub struct Palette {
    pub text: &'static str,
    pub axis: &'static str,
    pub split: &'static str,
    /// Container background on the vector path when none is given
    pub background: Option<&'static str>,
    pub series: &'static [&'static str],
}

const SERIES_COLORS: &[&str] = &[
    "#5470c6", "#91cc75", "#fac858", "#ee6666", "#73c0de", "#3ba272", "#fc8452", "#9a60b4",
];

static LIGHT: Palette = Palette {
    text: "#333333",
    axis: "#6e7079",
    split: "#e0e6f1",
    background: None,
    series: SERIES_COLORS,
};

static DARK: Palette = Palette {
    text: "#dddddd",
    axis: "#b9b8ce",
    split: "#484753",
    background: Some("#000"),
    series: SERIES_COLORS,
};

impl Theme {
    /// Anything but `dark` renders light.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("dark") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn palette(&self) -> &'static Palette {
        match self {
            Theme::Light => &LIGHT,
            Theme::Dark => &DARK,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}
