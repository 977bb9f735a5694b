// Prompts for the AI extraction, classification and statement-date calls.

pub const SYSTEM_PROMPT_TABULAR: &str = r#"
You are a Portfolio Statement Reader.

You receive the first rows of a spreadsheet or CSV export whose header row could not be recognised.
Identify every individual holding in the rows.

## RULES
- One record per holding. Skip headers, section titles, subtotals and grand totals.
- `name` is the holding's name exactly as printed.
- `currentValue` is the CURRENT MARKET VALUE as a plain number (no currency symbols, no thousands separators).
- Include `quantity`, `purchasePrice`, `purchaseDate` (YYYY-MM-DD), `isin`, `tickerSymbol` and `exchange` only when the row shows them.
- Never invent holdings or values.

## OUTPUT
Return a JSON array of holdings matching the provided schema. Return [] when nothing qualifies.
"#;

pub const SYSTEM_PROMPT_DOCUMENT: &str = r#"
You are a Portfolio Statement Reader.

You receive the text of a brokerage, bank, depository or fund statement.

## YOUR MISSION
1. List every individual holding with its current market value.
2. Find the statement date (the "as on" / "as of" / "period ending" date of the balances).

## RULES
- One record per holding. Skip subtotals, grand totals and transaction lines.
- `currentValue` is the market value as a plain number.
- Dates are YYYY-MM-DD.
- Include identifiers (`isin`, `tickerSymbol`, `exchange`) only when printed.
- Do not guess a statement date; use null when the document does not state one.

## OUTPUT
Return a JSON object: {"statementDate": "YYYY-MM-DD" or null, "assets": [...]}
"#;

pub const OCR_PROMPT: &str = r#"
These images are the first pages of a scanned financial statement.
Read every individual holding and its current market value, and the statement date if printed.
Skip subtotals and grand totals. Numbers are plain (no currency symbols or separators). Dates are YYYY-MM-DD.
Return a JSON object: {"statementDate": "YYYY-MM-DD" or null, "assets": [{"name": ..., "currentValue": ..., ...}]}
"#;

pub const SYSTEM_PROMPT_CLASSIFY: &str = r#"
You are an Investment Classification Specialist.

Classify one holding into exactly one asset class and one subclass from the closed list below.
The subclass MUST belong to the chosen class.

## ALLOWED CLASSES AND SUBCLASSES
{taxonomy}

## OUTPUT
Return a JSON object:
{"assetClass": "<class>", "assetSubclass": "<subclass>", "confidence": <0.0-1.0>}
Use the lowest confidence that honestly reflects how sure you are.
"#;

pub const SYSTEM_PROMPT_STATEMENT_DATE: &str = r#"
You read financial statements and report the date their balances refer to.
Return a JSON object: {"date": "YYYY-MM-DD" or null}
Use null when the text does not state a statement or valuation date. Never return a transaction date.
"#;

pub fn classification_system_prompt(taxonomy_listing: &str) -> String {
    SYSTEM_PROMPT_CLASSIFY.replace("{taxonomy}", taxonomy_listing.trim_end())
}

pub fn classification_user_prompt(
    name: &str,
    isin: Option<&str>,
    ticker: Option<&str>,
    value: f64,
) -> String {
    let mut prompt = format!("Holding name: {}\nCurrent value: {:.2}\n", name, value);
    if let Some(isin) = isin {
        prompt.push_str(&format!("ISIN: {}\n", isin));
    }
    if let Some(ticker) = ticker {
        prompt.push_str(&format!("Ticker: {}\n", ticker));
    }
    prompt
}

pub fn tabular_user_prompt(filename: &str, rows: &[Vec<String>]) -> String {
    let mut prompt = format!("File: {}\n\nRows (one per line, cells separated by ' | '):\n", filename);
    for row in rows {
        prompt.push_str(&row.join(" | "));
        prompt.push('\n');
    }
    prompt
}

pub fn document_user_prompt(filename: &str, text: &str) -> String {
    format!("File: {}\n\n--- STATEMENT TEXT ---\n{}\n--- END ---", filename, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_prompt_embeds_taxonomy() {
        let prompt = classification_system_prompt("- gold: gold\n");
        assert!(prompt.contains("- gold: gold\n\n## OUTPUT"));
        assert!(!prompt.contains("{taxonomy}"));
    }

    #[test]
    fn test_tabular_prompt_lists_rows() {
        let rows = vec![
            vec!["Scheme".to_string(), "Units".to_string()],
            vec!["Axis Bluechip".to_string(), "12.5".to_string()],
        ];
        let prompt = tabular_user_prompt("cams.xlsx", &rows);
        assert!(prompt.contains("Scheme | Units\nAxis Bluechip | 12.5\n"));
    }
}
