//! Terminal formatting for search results and file descriptors

use crate::search::{Excerpt, SearchOutcome, Source};
use crate::stream::StreamDescriptor;
use serde::Serialize;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// One answered query, as printed by `search`
#[derive(Debug, Clone, Serialize)]
pub struct Hit<'a> {
    pub stream: &'a str,
    pub pattern: &'a str,
    /// 1-based position, -1 when not found
    pub offset: i64,
    pub source: Option<Source>,
}

impl<'a> Hit<'a> {
    pub fn new(stream: &'a str, pattern: &'a str, outcome: &SearchOutcome) -> Self {
        Self {
            stream,
            pattern,
            offset: outcome.offset(),
            source: outcome.source(),
        }
    }
}

pub fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

/// Print the stream heading once per searched file
pub fn print_stream_heading(out: &mut impl WriteColor, desc: &StreamDescriptor) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
    write!(out, "{}", desc)?;
    out.reset()?;
    writeln!(out, "  {}", desc.path.display())
}

/// Print a search result with optional surrounding digits
pub fn print_hit(
    out: &mut impl WriteColor,
    pattern: &str,
    outcome: &SearchOutcome,
    excerpt: Option<&Excerpt>,
) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
    write!(out, "{}", pattern)?;
    out.reset()?;
    write!(out, ": ")?;

    match outcome {
        SearchOutcome::Found { position, source } => {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
            write!(out, "{}", position)?;
            out.reset()?;
            writeln!(out, " [{}]", source)?;
        }
        SearchOutcome::NotFound => {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
            writeln!(out, "not found (-1)")?;
            out.reset()?;
        }
    }

    if let Some(ex) = excerpt {
        write!(out, "  {}: ", ex.start)?;
        out.write_all(&ex.before)?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        out.write_all(&ex.hit)?;
        out.reset()?;
        out.write_all(&ex.after)?;
        writeln!(out)?;
    }

    Ok(())
}

/// Print one search result as a JSON line
pub fn print_hit_json(out: &mut impl Write, hit: &Hit<'_>) -> io::Result<()> {
    serde_json::to_writer(&mut *out, hit)?;
    writeln!(out)
}

/// Print what the catalog learned about a file
pub fn print_descriptor(out: &mut impl WriteColor, desc: &StreamDescriptor) -> io::Result<()> {
    print_stream_heading(out, desc)?;
    writeln!(out, "  name:        {}", desc.name())?;
    writeln!(out, "  base:        {}", desc.base())?;
    writeln!(out, "  format:      {}", desc.format().as_str())?;
    writeln!(out, "  integer:     {}", desc.integer_part)?;
    writeln!(out, "  data offset: {}", desc.data_offset)?;
    writeln!(out, "  digits:      {}", desc.total_digits)?;
    writeln!(out, "  namespace:   {}", desc.identity.namespace())
}

/// Print an identification failure without aborting the listing
pub fn print_failure(
    out: &mut impl WriteColor,
    path: &std::path::Path,
    err: &dyn std::fmt::Display,
) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(Color::Red)))?;
    write!(out, "{}", path.display())?;
    out.reset()?;
    writeln!(out, ": {}", err)
}
