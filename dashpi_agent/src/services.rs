//! Parser for `dietpi-services status`.
//!
//! Every unit is introduced by a status marker. Healthy units are one line,
//! `name<TAB>state since <time>`; failed units carry a `systemctl status`
//! excerpt whose journal tail becomes the entry's log.

use anyhow::{Context, Result};

use crate::types::ServiceEntry;

const MARKERS: [&str; 3] = [
    "[FAILED] DietPi-Services | \u{25cf} ",
    "[ INFO ] DietPi-Services | ",
    "[  OK  ] DietPi-Services | ",
];

// `systemctl status` header lines ahead of the journal excerpt
const STATUS_HEADER_LINES: usize = 9;

pub fn parse_service_status(text: &str) -> Result<Vec<ServiceEntry>> {
    let mut services = Vec::new();
    for block in blocks(text) {
        if block.contains(".service") {
            services.push(parse_failed(block)?);
        } else if let Some(entry) = parse_state_line(block) {
            services.push(entry);
        }
    }
    Ok(services)
}

// Text between one marker and the next, markers removed.
fn blocks(text: &str) -> Vec<&str> {
    let mut starts: Vec<(usize, usize)> = MARKERS
        .iter()
        .flat_map(|m| text.match_indices(m).map(|(i, m)| (i, i + m.len())))
        .collect();
    starts.sort_unstable();
    starts
        .iter()
        .enumerate()
        .map(|(n, &(_, body))| {
            let end = starts.get(n + 1).map_or(text.len(), |&(next, _)| next);
            &text[body..end]
        })
        .collect()
}

fn parse_failed(block: &str) -> Result<ServiceEntry> {
    let first = block.lines().next().unwrap_or_default();
    let name = first
        .split_once(".service")
        .context("couldn't get failed service name")?
        .0;
    let log = block
        .lines()
        .skip(STATUS_HEADER_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ServiceEntry {
        name: name.trim().to_string(),
        status: "failed".to_string(),
        start: String::new(),
        log,
    })
}

// Info lines have no tab and are skipped.
fn parse_state_line(block: &str) -> Option<ServiceEntry> {
    let (name, rest) = block.split_once('\t')?;
    let (status, start) = match rest.split_once(" since ") {
        Some((state, since)) => {
            let status = match state.trim() {
                "active (running)" | "active (exited)" => "active",
                "inactive (dead)" => "inactive",
                _ => "unknown",
            };
            (status, since.trim().to_string())
        }
        None => ("inactive", String::new()),
    };
    Some(ServiceEntry {
        name: name.trim().to_string(),
        status: status.to_string(),
        start,
        log: String::new(),
    })
}
