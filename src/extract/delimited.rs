use crate::error::{IngestError, Result};
use log::debug;

const CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 5;

/// Reads CSV/TSV bytes into rows of trimmed cells. Ragged rows are kept as-is.
pub fn read_rows(bytes: &[u8], filename: &str) -> Result<Vec<Vec<String>>> {
    let decoded = String::from_utf8_lossy(bytes);
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(decoded.as_ref());
    if text.trim().is_empty() {
        return Err(IngestError::parsing(filename, "file contains no text"));
    }

    let delimiter = if filename.to_lowercase().ends_with(".tsv") {
        b'\t'
    } else {
        sniff_delimiter(text)
    };
    debug!("'{}': using delimiter {:?}", filename, delimiter as char);

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| IngestError::parsing(filename, format!("CSV parse error: {}", e)))?;
        rows.push(record.iter().map(|c| c.trim().to_string()).collect());
    }
    Ok(rows)
}

/// Picks the candidate that appears most consistently across the first lines.
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();

    let mut best = (b',', 0usize);
    for candidate in CANDIDATES {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| count_unquoted(line, candidate))
            .collect();
        // Title lines above the header often have no delimiters at all.
        let populated: Vec<usize> = counts.into_iter().filter(|c| *c > 0).collect();
        let Some(min) = populated.iter().min().copied() else {
            continue;
        };
        let score = min * populated.len();
        if score > best.1 {
            best = (candidate, score);
        }
    }
    best.0
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for byte in line.bytes() {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b if b == delimiter && !in_quotes => count += 1,
            _ => {}
        }
    }
    count
}
