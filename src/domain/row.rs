//! Feed row parsing
//!
//! Payload: newline-separated rows, tab-separated tokens, each token a
//! single tag character immediately followed by its value (`Y5` = device 5).
//! Parsing never fails; missing tags surface as `None`.

const NEW_LINE: char = '\n';
const NEW_COLUMN: char = '\t';

/// Split a raw feed payload into non-empty rows
pub fn split_rows(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(NEW_LINE)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
}

/// Value following the first token whose first character is `tag`
pub fn extract_field<'a>(columns: &[&'a str], tag: char) -> Option<&'a str> {
    columns.iter().find_map(|column| column.strip_prefix(tag))
}

/// One feed row split into column tokens
#[derive(Debug, Clone)]
pub struct Row<'a> {
    columns: Vec<&'a str>,
}

impl<'a> Row<'a> {
    pub fn parse(line: &'a str) -> Self {
        Self { columns: line.split(NEW_COLUMN).filter(|c| !c.is_empty()).collect() }
    }

    #[inline]
    pub fn field(&self, tag: char) -> Option<&'a str> {
        extract_field(&self.columns, tag)
    }

    pub fn columns(&self) -> &[&'a str] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::column;

    #[test]
    fn test_extract_field_present() {
        let columns = ["BM", "Y5", "N123", "C001", "E12:30:00"];
        assert_eq!(extract_field(&columns, column::DEVICE_ID), Some("5"));
        assert_eq!(extract_field(&columns, column::CHIP), Some("123"));
        assert_eq!(extract_field(&columns, column::TIME_OF_DAY), Some("12:30:00"));
    }

    #[test]
    fn test_extract_field_absent() {
        let columns = ["BS", "Y7", "C002"];
        assert_eq!(extract_field(&columns, column::BATTERY_LEVEL), None);
        assert_eq!(extract_field(&[], column::ROW_MODE), None);
    }

    #[test]
    fn test_extract_field_first_match_wins() {
        let columns = ["Y5", "Y6"];
        assert_eq!(extract_field(&columns, 'Y'), Some("5"));
    }

    #[test]
    fn test_extract_field_tag_only() {
        let columns = ["BM", "C"];
        assert_eq!(extract_field(&columns, column::CODE), Some(""));
    }

    #[test]
    fn test_split_rows_skips_blank_lines() {
        let payload = "BM\tY5\r\n\nBS\tY7\n\n";
        let rows: Vec<&str> = split_rows(payload).collect();
        assert_eq!(rows, vec!["BM\tY5", "BS\tY7"]);
    }

    #[test]
    fn test_row_parse_ignores_empty_tokens() {
        let row = Row::parse("BM\t\tY5\t");
        assert_eq!(row.columns(), &["BM", "Y5"]);
        assert_eq!(row.field('Y'), Some("5"));
    }
}
