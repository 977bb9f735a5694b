use chrono::{Datelike, Days, NaiveDate};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Unknown")
}

pub fn short_month_name(month: u32) -> &'static str {
    let name = month_name(month);
    name.get(..3).unwrap_or(name)
}

/// Parses "Nov", "november", "Sept" into a 1-based month number.
pub fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().trim_end_matches('.').to_lowercase();
    if lower.len() < 3 {
        return None;
    }
    if lower == "sept" {
        return Some(9);
    }
    MONTH_NAMES
        .iter()
        .position(|m| {
            let full = m.to_lowercase();
            full == lower || (lower.len() == 3 && full.starts_with(&lower))
        })
        .map(|idx| idx as u32 + 1)
}

pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

/// Converts an Excel serial day number (1900 date system) to a date.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_days(Days::new(serial.trunc() as u64))
}

/// Parses a monetary amount as printed on statements.
///
/// Strips currency symbols, codes, spaces and thousands separators. A lone
/// comma before one or two trailing digits is a decimal comma. Amounts in
/// parentheses, with a leading minus or a trailing `DR` come back negative;
/// callers decide whether that is acceptable.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let mut negative = false;
    if text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = text[1..text.len() - 1].to_string();
    }

    let upper = text.to_uppercase();
    let mut cleaned = upper.trim().to_string();
    // Debit balances are negative.
    if let Some(rest) = cleaned.strip_suffix("DR") {
        negative = true;
        cleaned = rest.trim_end().to_string();
    }
    for token in ["INR", "USD", "EUR", "GBP", "RS.", "RS", "CR"] {
        cleaned = cleaned.replace(token, "");
    }

    let cleaned: String = cleaned
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (sign_negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, cleaned.trim_start_matches('+').to_string()),
    };
    if digits.contains('-') || digits.contains('+') {
        return None;
    }

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        // 1.234,56
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        // 850,75: no grouping ends in fewer than three digits
        (Some(comma), None) if digits.matches(',').count() == 1 && (2..=3).contains(&(digits.len() - comma)) => {
            digits.replace(',', ".")
        }
        // 1,234.56 or 1,50,000
        _ => digits.replace(',', ""),
    };

    let value: f64 = normalized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    if negative || sign_negative {
        Some(-value)
    } else {
        Some(value)
    }
}

/// Parses the date layouts commonly printed on statements and exports.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    // Spreadsheet exports often carry a time component.
    let text = text
        .split(['T', ' '])
        .next()
        .filter(|first| first.len() >= 8 && first.chars().filter(|c| c.is_ascii_digit()).count() >= 6)
        .unwrap_or(text);

    const FORMATS: [&str; 10] = [
        "%Y-%m-%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%d.%m.%Y",
        "%Y/%m/%d",
        "%d-%b-%Y",
        "%d %b %Y",
        "%d %B %Y",
        "%b %d, %Y",
        "%B %d, %Y",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Lowercases and collapses everything but letters and digits into single spaces.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '&' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment of a (possibly multi-word) keyword in a normalized name.
pub fn contains_phrase(normalized_name: &str, keyword: &str) -> bool {
    let keyword = normalize_name(keyword);
    if keyword.is_empty() {
        return false;
    }
    let haystack = format!(" {} ", normalized_name);
    haystack.contains(&format!(" {} ", keyword))
}

/// "November 2024" for a statement date.
pub fn month_label(date: NaiveDate) -> String {
    format!("{} {}", month_name(date.month()), date.year())
}
