//! A1 notation helpers for spreadsheet ranges.

/// Column letters for a 0-based column index (`0` → `A`, `26` → `AA`).
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Quotes a sheet name for use in a range.
pub fn quote_sheet(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// The header row of a sheet.
pub fn header_range(sheet: &str) -> String {
    format!("{}!1:1", quote_sheet(sheet))
}

/// Every cell of a sheet.
pub fn sheet_range(sheet: &str) -> String {
    quote_sheet(sheet)
}

/// One whole row, `width` columns wide.
pub fn row_range(sheet: &str, row: u32, width: usize) -> String {
    let last = column_letters(width.max(1) - 1);
    format!("{}!A{row}:{last}{row}", quote_sheet(sheet))
}

/// Extracts the first row number of a range such as `'Sheet'!A5:D5`.
pub fn first_row(range: &str) -> Option<u32> {
    let cells = range.rsplit('!').next()?;
    let start = cells.split(':').next()?;
    let digits: String = start.chars().skip_while(|c| c.is_ascii_alphabetic()).collect();
    digits.parse().ok()
}
