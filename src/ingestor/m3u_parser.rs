//! Tolerant M3U/EXTINF parser.
//!
//! Malformed entries are skipped with a warning; they never fail the whole
//! playlist.

use tracing::warn;
use url::Url;

use crate::models::ParsedChannel;

/// Lazily parse playlist text into channel entries.
pub fn parse(content: &str) -> Entries<'_> {
    Entries {
        lines: content.lines(),
    }
}

/// Iterator over the entries of one playlist.
pub struct Entries<'a> {
    lines: std::str::Lines<'a>,
}

impl Iterator for Entries<'_> {
    type Item = ParsedChannel;

    fn next(&mut self) -> Option<ParsedChannel> {
        let mut pending: Option<ParsedChannel> = None;

        for line in self.lines.by_ref() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("#EXTM3U") {
                continue;
            }

            if line.starts_with("#EXTINF:") {
                if pending.is_some() {
                    warn!("Dropping EXTINF entry with no URL line");
                }
                pending = parse_extinf_line(line);
                continue;
            }

            // Auxiliary directives (#EXTVLCOPT, #EXTGRP, ...) between EXTINF
            // and URL do not start a new entry.
            if line.starts_with('#') {
                continue;
            }

            // A bare URL line.
            let Some(mut entry) = pending.take() else {
                warn!("Skipping URL line with no preceding EXTINF: {line}");
                continue;
            };

            if Url::parse(line).is_err() {
                warn!("Skipping entry '{}' with malformed URL: {line}", entry.title);
                continue;
            }

            entry.url = line.to_string();
            return Some(entry);
        }

        None
    }
}

/// Parse `#EXTINF:<duration> <attr>*,<display name>` into an entry with an
/// empty URL. Returns None when the line has no comma or yields no title.
fn parse_extinf_line(line: &str) -> Option<ParsedChannel> {
    let comma_pos = match line.rfind(',') {
        Some(pos) => pos,
        None => {
            warn!("Skipping EXTINF line without display name: {line}");
            return None;
        }
    };

    let attributes_part = &line["#EXTINF:".len()..comma_pos];
    let display_name = line[comma_pos + 1..].trim();

    let mut tvg_id = String::new();
    let mut tvg_name = String::new();
    let mut tvg_logo = String::new();
    let mut group_title = String::new();

    for (key, value) in parse_attributes(attributes_part) {
        match key.as_str() {
            "tvg-id" => tvg_id = value,
            "tvg-name" => tvg_name = value,
            "tvg-logo" => tvg_logo = value,
            "group-title" => group_title = value,
            _ => {}
        }
    }

    let title = if tvg_name.is_empty() {
        display_name.to_string()
    } else {
        tvg_name
    };
    if title.is_empty() {
        warn!("Skipping EXTINF entry with no usable title: {line}");
        return None;
    }

    Some(ParsedChannel {
        tvg_id,
        title,
        logo_url: tvg_logo,
        group_name: group_title,
        url: String::new(),
    })
}

/// Tokenize space-separated `key="value"` pairs, tolerating unquoted values
/// and unterminated quotes. The leading duration token never forms a pair,
/// so it falls out on its own.
fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' if in_value => {
                if in_quotes {
                    attrs.push((key.trim().to_string(), std::mem::take(&mut value)));
                    key.clear();
                    in_value = false;
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            '=' if !in_value => in_value = true,
            ' ' | '\t' if !in_quotes => {
                if in_value {
                    attrs.push((key.trim().to_string(), std::mem::take(&mut value)));
                    in_value = false;
                }
                key.clear();
            }
            _ => {
                if in_value {
                    value.push(ch);
                } else {
                    key.push(ch);
                }
            }
        }
    }

    if in_value {
        attrs.push((key.trim().to_string(), value));
    }

    attrs
}
