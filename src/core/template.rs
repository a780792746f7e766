use anyhow::Result;

use crate::core::encode::Surface;
use crate::core::renderer::Scene;

/// Set by the page when the ECharts script failed to load.
pub const MISSING_LIBRARY: &str = "ECHARTS_UNAVAILABLE";

/// Drops anything that could break out of a CSS declaration.
fn css_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ';' | '{' | '}' | '<' | '>' | '"' | '\\'))
        .collect()
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JSON string literal that is also safe inside a `<script>` block.
fn script_literal(json: &str) -> Result<String> {
    Ok(serde_json::to_string(json)?.replace("</", "<\\/"))
}

pub fn generate_html(scene: &Scene, echarts_url: &str) -> Result<String> {
    let option_json = serde_json::to_string(&scene.option)?;
    let renderer = match scene.surface {
        Surface::Vector => "svg",
        Surface::Raster => "canvas",
    };
    let background = scene
        .background
        .as_deref()
        .map(|bg| format!("background: {};", css_value(bg)))
        .unwrap_or_default();

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        * {{
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }}
        html, body {{
            background: transparent;
            overflow: hidden;
        }}
        @page {{
            size: {width}px {height}px;
            margin: 0;
        }}
        #render-container {{
            width: {width}px;
            height: {height}px;
            {background}
        }}
    </style>
</head>
<body>
    <div id="render-container"></div>

    <script src="{script}"></script>

    <script>
        window.renderReady = false;
        window.renderError = null;
        window.renderChart = null;

        window.addEventListener('DOMContentLoaded', () => {{
            try {{
                if (typeof echarts === 'undefined') {{
                    window.renderError = '{missing}';
                    return;
                }}
                const chart = echarts.init(document.getElementById('render-container'), null, {{
                    renderer: '{renderer}',
                    width: {width},
                    height: {height}
                }});
                chart.setOption(JSON.parse({option}));
                window.renderChart = chart;
                window.renderReady = true;
            }} catch (error) {{
                console.error('Render initialization error:', error);
                window.renderError = String(error && error.message || error);
            }}
        }});
    </script>
</body>
</html>"#,
        title = escape_html(&scene.title),
        width = scene.width,
        height = scene.height,
        background = background,
        script = escape_html(echarts_url),
        missing = MISSING_LIBRARY,
        renderer = renderer,
        option = script_literal(&option_json)?,
    );

    Ok(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encode::OutputFormat;
    use serde_json::json;

    fn scene(surface: Surface, background: Option<&str>) -> Scene {
        Scene {
            width: 1024.0,
            height: 300.0,
            format: OutputFormat::Svg,
            surface,
            background: background.map(str::to_string),
            option: json!({"title": {"text": "</script><b>x</b>"}}),
            title: "A & B".to_string(),
        }
    }

    #[test]
    fn vector_page_uses_svg_renderer_and_background() {
        let html = generate_html(&scene(Surface::Vector, Some("#000")), "https://cdn/echarts.js").unwrap();
        assert!(html.contains("renderer: 'svg'"));
        assert!(html.contains("width: 1024px;"));
        assert!(html.contains("background: #000;"));
        assert!(html.contains("<title>A &amp; B</title>"));
    }

    #[test]
    fn option_cannot_close_script_block() {
        let html = generate_html(&scene(Surface::Raster, None), "https://cdn/echarts.js").unwrap();
        assert!(html.contains("renderer: 'canvas'"));
        assert!(!html.contains("</script><b>"));
        assert!(html.contains("background: transparent;"));
        assert!(!html.contains("background: white"));
    }

    #[test]
    fn background_is_sanitized() {
        let html = generate_html(
            &scene(Surface::Vector, Some("red; } body { display: none")),
            "https://cdn/echarts.js",
        )
        .unwrap();
        assert!(html.contains("background: red  body  display: none;"));
    }
}
