//! Terminal rendering for search results, documents and indexing status

use crate::engine::highlight::{POST_TAG, PRE_TAG};
use crate::index::types::{
    Document, IndexPhase, IndexResult, IndexingStatus, SearchResultSet, SourcePathEntry,
};
use crate::service::ConfigOverview;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Errors listed under a run summary before eliding the rest
const SHOWN_ERRORS: usize = 10;

fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

/// Split an HTML snippet into decoded text runs, flagging the highlighted ones
pub fn snippet_segments(snippet: &str) -> Vec<(String, bool)> {
    let mut segments = Vec::new();
    let mut rest = snippet;

    while let Some(start) = rest.find(PRE_TAG) {
        if start > 0 {
            segments.push((decode(&rest[..start]), false));
        }
        let after = &rest[start + PRE_TAG.len()..];
        match after.find(POST_TAG) {
            Some(end) => {
                segments.push((decode(&after[..end]), true));
                rest = &after[end + POST_TAG.len()..];
            }
            None => {
                // Unterminated marker: treat the remainder as highlighted
                segments.push((decode(after), true));
                rest = "";
            }
        }
    }

    if !rest.is_empty() {
        segments.push((decode(rest), false));
    }
    segments
}

fn decode(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Print one page of search hits
pub fn print_hits(results: &SearchResultSet, color: bool) -> io::Result<()> {
    let mut stdout = stdout(color);

    if results.hits.is_empty() {
        if results.total == 0 {
            writeln!(stdout, "No matches")?;
        } else {
            writeln!(
                stdout,
                "No results at offset {} ({} total)",
                results.offset, results.total
            )?;
        }
        return Ok(());
    }

    for hit in &results.hits {
        // Path header
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
        writeln!(stdout, "{}", hit.path)?;
        stdout.reset()?;

        write!(stdout, "  ")?;
        for (text, highlighted) in snippet_segments(&hit.snippet) {
            // Keep each hit on a short block of lines
            let text = text.replace('\n', "\n  ");
            if highlighted {
                stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
                write!(stdout, "{}", text)?;
                stdout.reset()?;
            } else {
                write!(stdout, "{}", text)?;
            }
        }
        writeln!(stdout)?;
        writeln!(stdout)?;
    }

    let first = results.offset + 1;
    let last = results.offset + results.hits.len();
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
    writeln!(stdout, "Showing {}-{} of {} matches", first, last, results.total)?;
    stdout.reset()?;

    Ok(())
}

/// Print a whole stored document
pub fn print_document(doc: &Document, color: bool) -> io::Result<()> {
    let mut stdout = stdout(color);
    stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
    writeln!(stdout, "{}", doc.path)?;
    stdout.reset()?;
    writeln!(stdout, "{}", doc.content)?;
    Ok(())
}

/// Print resolved source directories, marking missing ones
pub fn print_entries(entries: &[SourcePathEntry], color: bool) -> io::Result<()> {
    let mut stdout = stdout(color);

    if entries.is_empty() {
        writeln!(stdout, "  (no source directories configured)")?;
        return Ok(());
    }

    for entry in entries {
        write!(stdout, "  {}", entry.input)?;
        match &entry.resolved {
            Some(resolved) if entry.exists => {
                stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
                writeln!(stdout, " -> {}", resolved)?;
            }
            _ => {
                stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
                writeln!(stdout, " (missing)")?;
            }
        }
        stdout.reset()?;
    }
    Ok(())
}

pub fn print_config(overview: &ConfigOverview, color: bool) -> io::Result<()> {
    {
        let mut stdout = stdout(color);
        if let Some(file) = &overview.config_file {
            writeln!(stdout, "Config file: {}", file)?;
        }
        writeln!(stdout, "Engine: {}", overview.engine)?;
        match overview.doc_count {
            Some(count) => writeln!(stdout, "Documents: {}", count)?,
            None => writeln!(stdout, "Documents: unavailable")?,
        }
        writeln!(
            stdout,
            "Indexing: {}",
            if overview.indexing { "running" } else { "idle" }
        )?;
        writeln!(stdout, "Extensions: {}", overview.include_extensions.join(", "))?;
        writeln!(stdout, "Excluded dirs: {}", overview.exclude_dirs.join(", "))?;
        writeln!(stdout, "Max file size: {} MB", overview.max_file_size_mb)?;
        writeln!(stdout, "Bulk chunk size: {}", overview.bulk_chunk_size)?;
        writeln!(stdout, "Page size: {}", overview.page_size)?;
        writeln!(stdout, "Source directories:")?;
    }
    print_entries(&overview.sql_source_paths, color)
}

/// Print a completed run's summary and its first errors
pub fn print_index_result(result: &IndexResult, color: bool) -> io::Result<()> {
    let mut stdout = stdout(color);

    if let Some(failure) = &result.failure {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
        writeln!(stdout, "Indexing failed: {}", failure)?;
        stdout.reset()?;
    }

    writeln!(
        stdout,
        "Indexed {} files ({} errors, {} scanned, {} skipped) in {:.2}s",
        result.indexed_count,
        result.error_count,
        result.scanned_count,
        result.skipped_count,
        result.duration_ms as f64 / 1000.0
    )?;

    if !result.errors.is_empty() {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        for error in result.errors.iter().take(SHOWN_ERRORS) {
            writeln!(stdout, "  {}: {}", error.path, error.message)?;
        }
        let listed = result.errors.len().min(SHOWN_ERRORS) as u64;
        if result.error_count > listed {
            writeln!(stdout, "  ... and {} more", result.error_count - listed)?;
        }
        stdout.reset()?;
    }

    Ok(())
}

pub fn phase_label(phase: IndexPhase) -> &'static str {
    match phase {
        IndexPhase::Idle => "idle",
        IndexPhase::Waiting => "waiting for readers",
        IndexPhase::Resetting => "resetting index",
        IndexPhase::Collecting => "collecting files",
        IndexPhase::Writing => "writing documents",
    }
}

pub fn print_status(status: &IndexingStatus, color: bool) -> io::Result<()> {
    {
        let mut stdout = stdout(color);
        if status.is_running() {
            stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
            writeln!(
                stdout,
                "Indexing run {} in progress ({})",
                status.generation,
                phase_label(status.phase)
            )?;
            stdout.reset()?;
        } else {
            writeln!(stdout, "Idle ({} runs since start)", status.generation)?;
        }

        if status.last_result.is_some() {
            writeln!(stdout, "Last run:")?;
        }
    }

    if let Some(result) = &status.last_result {
        print_index_result(result, color)?;
    }
    Ok(())
}
