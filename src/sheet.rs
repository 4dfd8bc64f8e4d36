use crate::xlsx;
use anyhow::{anyhow, Context};
use std::path::Path;

/// A single named sheet of text cells. Row 0 is the header when the sheet
/// carries one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(|r| r.as_slice())
    }

    /// Rows after the header, paired with their 1-based line in the file.
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[String])> {
        self.rows
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, r)| (i + 1, r.as_slice()))
    }
}

pub fn read_sheet(path: &Path) -> anyhow::Result<Sheet> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" => {
            let (name, rows) = xlsx::read_first_sheet(path)?;
            Ok(Sheet { name, rows })
        }
        "csv" => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
            Ok(Sheet {
                name: path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("Sheet1")
                    .to_string(),
                rows: parse_csv_text(&text),
            })
        }
        _ => Err(anyhow!(
            "unsupported spreadsheet format: {} (expected .xlsx or .csv)",
            path.to_string_lossy()
        )),
    }
}

pub fn write_sheet(path: &Path, sheet: &Sheet) -> anyhow::Result<()> {
    xlsx::write_workbook(path, &sheet.name, &sheet.rows)
}

/// Splits CSV text into records. A quoted field may span lines.
pub fn parse_csv_text(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut started = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        started = true;
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                buf.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => record.push(std::mem::take(&mut buf)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut buf));
                rows.push(std::mem::take(&mut record));
                started = false;
            }
            _ => buf.push(ch),
        }
    }
    if started {
        record.push(buf);
        rows.push(record);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_handles_quotes_bom_and_crlf() {
        let rows = parse_csv_text("\u{feff}A,B\r\n\"x, y\",\"say \"\"hi\"\"\"\r\n");
        assert_eq!(rows[0], vec!["A", "B"]);
        assert_eq!(rows[1], vec!["x, y", "say \"hi\""]);
    }

    #[test]
    fn quoted_newlines_stay_in_one_field() {
        let rows = parse_csv_text("Name,Address\nAbel,\"Kebele 4\nHouse 12\"\r\nSara,Kara");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["Abel", "Kebele 4\nHouse 12"]);
        assert_eq!(rows[2], vec!["Sara", "Kara"]);
    }

    #[test]
    fn data_rows_report_file_lines() {
        let s = Sheet {
            name: "S".into(),
            rows: vec![vec!["h".into()], vec!["a".into()], vec!["b".into()]],
        };
        let lines: Vec<usize> = s.data_rows().map(|(l, _)| l).collect();
        assert_eq!(lines, vec![2, 3]);
    }
}
