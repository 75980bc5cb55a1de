//! Colored terminal output helpers.
//!
//! Uses `termcolor` for cross-platform colored output; respects the
//! `NO_COLOR` environment variable.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn color_choice() -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn writeln_colored(stream: &mut StandardStream, prefix: &str, color: Color, text: &str) {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    let _ = stream.set_color(&spec);
    let _ = write!(stream, "{prefix}");
    let _ = stream.reset();
    let _ = writeln!(stream, " {text}");
}

/// Green success line on stdout.
pub fn success(text: &str) {
    let mut out = StandardStream::stdout(color_choice());
    writeln_colored(&mut out, "ok:", Color::Green, text);
}

/// Yellow warning line on stderr.
pub fn warning(text: &str) {
    let mut err = StandardStream::stderr(color_choice());
    writeln_colored(&mut err, "warning:", Color::Yellow, text);
}

/// Red error line on stderr.
pub fn error(text: &str) {
    let mut err = StandardStream::stderr(color_choice());
    writeln_colored(&mut err, "error:", Color::Red, text);
}

/// Two-column key/value table, used by the debug metrics report.
pub fn table(title: &str, rows: &[(&str, String)]) {
    let mut out = StandardStream::stdout(color_choice());

    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Cyan)).set_bold(true);
    let _ = out.set_color(&spec);
    let _ = writeln!(out, "{title}");
    let _ = out.reset();

    let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(Color::Cyan));
        let _ = out.set_color(&spec);
        let _ = write!(out, "  {key:<key_width$}");
        let _ = out.reset();
        let _ = writeln!(out, "  {value}");
    }
}
