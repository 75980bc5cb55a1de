//! SVG document emission.
//!
//! The generated document is self-contained: styles and the interactive
//! controller (search, zoom) are inlined, so the file can be opened
//! directly in a browser.

use crate::tree::CallTree;
use crate::FlameGraph;

use std::fmt::Write;
use std::hash::Hasher;

/// Approximate glyph width of the 11 px text style, in pixels.
const CHAR_WIDTH: f64 = 6.5;

/// Vertical chrome: title block plus the detail strip.
const CHROME_HEIGHT: u32 = 170;

/// Top edge of the frame area in inverted (icicle) mode, below the headers.
const HEADER_BAND: f64 = 100.0;

pub(crate) fn render(fg: &FlameGraph, tree: &CallTree) -> String {
    let opts = fg.options();
    let width = opts.width;
    let frame_height = opts.frame_height;
    let height = tree.max_depth() as u32 * frame_height + CHROME_HEIGHT;

    let mut svg = String::new();
    let _ = writeln!(svg, "<?xml version=\"1.0\" standalone=\"no\"?>");
    let _ = writeln!(
        svg,
        "<!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd\">"
    );
    let _ = writeln!(svg, "<svg version=\"1.1\" width=\"{width}\" height=\"{height}\"");
    let _ = writeln!(svg, "onload=\"init(evt)\" viewBox=\"0 0 {width} {height}\"");
    let _ = writeln!(
        svg,
        "xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\">"
    );
    let _ = writeln!(
        svg,
        "<!-- Flame graph stack visualization. See https://www.brendangregg.com/flamegraphs.html for background. -->"
    );
    svg.push_str("<defs>\n");
    svg.push_str("<linearGradient id=\"background\" y1=\"0\" y2=\"1\" x1=\"0\" x2=\"0\">\n");
    svg.push_str("<stop stop-color=\"#eeeeee\" offset=\"5%\" />\n");
    svg.push_str("<stop stop-color=\"#eeeeb0\" offset=\"95%\" />\n");
    svg.push_str("</linearGradient>\n");
    svg.push_str("</defs>\n");
    svg.push_str("<style type=\"text/css\">\n");
    svg.push_str(
        "text { font-family: Source Serif Pro, Palatino, Arial, sans-serif; font-size: 11px; fill: rgb(0, 0, 0);}\n",
    );
    svg.push_str("#search, #ignorecase { opacity: 0.1; cursor: pointer; }\n");
    svg.push_str("#search:hover, #search.show, #ignorecase:hover, #ignorecase.show { opacity: 1; }\n");
    svg.push_str("#subtitle { text-anchor: middle; font-color: rgb(160, 160, 160);}\n");
    svg.push_str("#title { text-anchor: middle; font-size: 17px }\n");
    svg.push_str("#under_title { text-anchor: middle; font-size: 13px }\n");
    svg.push_str("#unzoom { cursor: pointer; }\n");
    svg.push_str("#frames > *:hover { stroke: black; stroke-width: 0.5; cursor: pointer; }\n");
    svg.push_str(".hide { display: none; }\n");
    svg.push_str(".parent { opacity: 0.5; }\n");
    svg.push_str("</style>\n");
    svg.push_str("<script type=\"text/ecmascript\">\n<![CDATA[\n");
    svg.push_str(include_str!("script.js"));
    svg.push_str("]]>\n</script>\n");
    let _ = writeln!(
        svg,
        "<rect x=\"0\" y=\"0\" width=\"{width}\" height=\"{height}\" fill=\"url(#background)\" rx=\"2\" ry=\"2\" />"
    );
    let _ = writeln!(
        svg,
        "<text id=\"title\" x=\"{}\" y=\"24\">{}</text>",
        width / 2,
        escape(&opts.title)
    );
    let _ = writeln!(
        svg,
        "<text id=\"under_title\" x=\"{}\" y=\"44\">Environment: {}</text>",
        width / 2,
        escape(&opts.package_path)
    );
    let _ = writeln!(
        svg,
        "<text id=\"under_title\" x=\"{}\" y=\"64\">Working Directory: {}</text>",
        width / 2,
        escape(&opts.work_dir)
    );
    let _ = writeln!(
        svg,
        "<text id=\"under_title\" x=\"{}\" y=\"84\">Command: {}</text>",
        width / 2,
        escape(&opts.command)
    );
    let _ = writeln!(svg, "<text id=\"details\" x=\"10\" y=\"{}\"> </text>", height - 10);
    let _ = writeln!(svg, "<text id=\"unzoom\" x=\"10\" y=\"24\" class=\"hide\">Reset Zoom</text>");
    let _ = writeln!(svg, "<text id=\"search\" x=\"{}\" y=\"24\">Search</text>", width - 110);
    let _ = writeln!(svg, "<text id=\"ignorecase\" x=\"{}\" y=\"24\">ic</text>", width - 30);
    let _ = writeln!(
        svg,
        "<text id=\"matched\" x=\"{}\" y=\"{}\"> </text>",
        width - 110,
        height - 10
    );
    svg.push_str("<g id=\"frames\">\n");

    let total = fg.total_samples().max(1);
    for row in tree.nodes_by_depth() {
        for id in row {
            let node = tree.node(id);
            if node.width < opts.min_width {
                continue;
            }

            // Flame graphs grow upward from the bottom; icicles hang from
            // the header band.
            let rect_y = if opts.inverted {
                HEADER_BAND + (node.depth - 1) as f64 * f64::from(frame_height)
            } else {
                f64::from(height) - (50 + node.depth as u32 * frame_height) as f64
            };
            let text_y = rect_y + f64::from(frame_height) - 4.5;

            let color = frame_color(&node.name);
            let text = trim_text(&node.name, node.width);
            let percent = node.total as f64 / total as f64 * 100.0;

            svg.push_str("<g>\n");
            let _ = writeln!(
                svg,
                "<title>{} ({} {}, {:.2}%)</title>",
                escape(&node.name),
                node.total,
                escape(&opts.count_name),
                percent
            );
            let _ = writeln!(
                svg,
                "<rect x=\"{:.2}\" y=\"{:.2}\" width=\"{:.2}\" height=\"{}\" fill=\"{}\" rx=\"2\" ry=\"2\" />",
                node.x, rect_y, node.width, frame_height, color
            );
            let _ = writeln!(
                svg,
                "<text x=\"{:.2}\" y=\"{:.2}\">{}</text>",
                node.x + 5.0,
                text_y,
                escape(&text)
            );
            svg.push_str("</g>\n");
        }
    }

    svg.push_str("</g>\n</svg>");
    svg
}

/// Muted, stable colour for a frame: hue from the full hash range,
/// saturation and lightness confined to narrow bands so adjacent frames
/// stay distinguishable without shouting.
pub(crate) fn frame_color(name: &str) -> String {
    let mut hasher = rustc_hash::FxHasher::default();
    hasher.write(name.as_bytes());
    let hash = hasher.finish();
    let hue = hash % 360;
    let sat = 35 + hash % 30;
    let lum = 65 + hash % 10;
    format!("hsl({hue}, {sat}%, {lum}%)")
}

/// Fit `text` into `width` pixels: untouched if it fits, trimmed with a
/// trailing ellipsis if not, empty below the readability floor.
pub(crate) fn trim_text(text: &str, width: f64) -> String {
    if width / CHAR_WIDTH < 3.0 {
        return String::new();
    }
    if text.chars().count() as f64 * CHAR_WIDTH <= width {
        return text.to_string();
    }
    let max_chars = (width / CHAR_WIDTH) as usize - 2;
    let mut trimmed: String = text.chars().take(max_chars).collect();
    trimmed.push_str("..");
    trimmed
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
