//! Parser for the `dietpi-software list` text table.
//!
//! The table is meant for humans: `|`-separated columns with ANSI colour
//! codes sprinkled in. Parsing is best effort and tied to that tool's output.

use anyhow::{Context, Result};

use crate::types::SoftwareEntry;

// Lines before the table are database status messages.
const HEADER_LINES: usize = 4;

const GREEN: &str = "\u{1b}[32m";
const GREY: &str = "\u{1b}[90m";
const RESET: &str = "\u{1b}[0m";

pub fn parse_software_list(text: &str) -> Result<Vec<SoftwareEntry>> {
    text.lines()
        .skip(HEADER_LINES)
        .filter(|line| line.contains('|'))
        .map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Result<SoftwareEntry> {
    let mut entry = SoftwareEntry::default();
    for (col, field) in line.split('|').enumerate() {
        match col {
            0 => {
                let id = strip_ansi(field);
                let id = id.trim().trim_start_matches("ID").trim();
                entry.id = id
                    .parse()
                    .with_context(|| format!("invalid software ID {id:?}"))?;
            }
            1 => {
                let flag = field.trim().trim_start_matches('=');
                let flag: i32 = flag.parse().with_context(|| {
                    format!("invalid installed flag {flag:?} for ID {}", entry.id)
                })?;
                entry.installed = flag > 0;
            }
            2 => {
                let (name, desc) = field.split_once(':').unwrap_or((field, ""));
                entry.name = strip_ansi(name).trim().to_string();
                entry.description = strip_ansi(desc).trim().to_string();
            }
            3 => {
                if field.contains("DISABLED") {
                    return Ok(SoftwareEntry::disabled());
                }
                entry.dependencies = strip_ansi(field).trim().to_string();
            }
            4 => entry.docs = strip_ansi(field).trim().to_string(),
            _ => {}
        }
    }
    Ok(entry)
}

fn strip_ansi(s: &str) -> String {
    s.replace(GREEN, "").replace(GREY, "").replace(RESET, "")
}
