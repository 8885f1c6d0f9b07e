use barea_rust::{App, BindError, Config, MarkupError};

use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;

/// The JSON document read from stdin.
#[derive(Deserialize)]
struct Input {
    state: Value,
    markup: String,
    #[serde(default)]
    config: Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(io::stderr)
        .init();

    let mut raw = String::new();
    if let Err(err) = io::stdin().read_to_string(&mut raw) {
        eprintln!("error reading stdin: {}", err);
        std::process::exit(1);
    }
    let input: Input = match serde_json::from_str(&raw) {
        Ok(input) => input,
        Err(err) => {
            eprintln!("invalid input: {}", err);
            std::process::exit(1);
        }
    };

    let mut app = App::with_config(input.state, input.config);
    let rendered = app.mount_markup(&input.markup).and_then(|_| app.render());
    for diagnostic in app.diagnostics() {
        eprintln!("warning: {}", diagnostic);
    }
    match rendered {
        Ok(markup) => println!("{}", markup),
        Err(BindError::Markup(err)) => {
            report_markup_error(&input.markup, &err);
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}

fn report_markup_error(markup: &str, err: &MarkupError) {
    let lines: Vec<&str> = markup.lines().collect();
    let line_num = err.begin.line;
    let line_text = lines.get(line_num).unwrap_or(&"");

    eprintln!("ERROR AT LINE {}:", line_num + 1);
    eprintln!("{}", line_text);

    // Build the underline
    let start_col = err.begin.column;
    let end_col = if err.begin.line == err.end.line && err.end.column > err.begin.column {
        err.end.column
    } else if start_col < line_text.chars().count() {
        line_text.chars().count()
    } else {
        start_col + 1
    };

    let mut underline = " ".repeat(start_col);
    underline.push('^');
    if end_col > start_col + 1 {
        underline.push_str(&"_".repeat(end_col - start_col - 1));
    }

    eprintln!("{}", underline);
    eprintln!("{}", err.message);
}
