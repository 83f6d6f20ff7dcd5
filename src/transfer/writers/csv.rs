//! CSV writer for tabular export
//!
//! Columns come from a frozen [`FieldSet`]; each row resolves the dotted
//! paths against the document and quotes values per RFC 4180.

use mongodb::bson::Document;
use tracing::debug;

use crate::error::Result;
use crate::transfer::schema::{FieldSet, lookup_path};

use super::{CellConverter, FormatWriter, Termination};

/// Row formatting options
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Field separator
    pub delimiter: char,
    /// Whether to emit a header row
    pub include_header: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            include_header: true,
        }
    }
}

/// Writer for CSV format
pub struct CsvWriter {
    fields: FieldSet,
    options: CsvOptions,
    converter: CellConverter,
    written: u64,
}

impl CsvWriter {
    /// Create a writer with a fixed column set
    ///
    /// # Arguments
    /// * `fields` - Dotted paths, in column order
    /// * `options` - Delimiter and header settings
    pub fn new(fields: FieldSet, options: CsvOptions) -> Self {
        Self {
            fields,
            options,
            converter: CellConverter::new(),
            written: 0,
        }
    }

    /// Format one document as a row, without the line terminator
    pub fn format_row(&self, doc: &Document) -> String {
        let mut delimiter = [0u8; 4];
        let delimiter = self.options.delimiter.encode_utf8(&mut delimiter);

        self.fields
            .iter()
            .map(|path| {
                let value = self.converter.convert_optional(lookup_path(doc, path));
                escape_value(&value, self.options.delimiter)
            })
            .collect::<Vec<_>>()
            .join(delimiter)
    }

    fn format_header(&self) -> String {
        let mut delimiter = [0u8; 4];
        let delimiter = self.options.delimiter.encode_utf8(&mut delimiter);

        self.fields
            .iter()
            .map(|field| escape_value(field, self.options.delimiter))
            .collect::<Vec<_>>()
            .join(delimiter)
    }
}

/// Quote a value containing the delimiter, a quote or a line break
pub fn escape_value(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains(['"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

impl FormatWriter for CsvWriter {
    fn begin(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.options.include_header && !self.fields.is_empty() {
            out.extend_from_slice(self.format_header().as_bytes());
            out.push(b'\n');
            debug!("Wrote CSV header: {} fields", self.fields.len());
        }
        Ok(())
    }

    fn write_batch(&mut self, out: &mut Vec<u8>, docs: &[Document]) -> Result<usize> {
        for doc in docs {
            out.extend_from_slice(self.format_row(doc).as_bytes());
            out.push(b'\n');
        }
        self.written += docs.len() as u64;
        Ok(docs.len())
    }

    fn finish(&mut self, _out: &mut Vec<u8>, termination: &Termination) -> Result<()> {
        debug!("CSV export finished after {} rows: {:?}", self.written, termination);
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    /// Split one RFC 4180 row back into fields
    fn split_row(row: &str, delimiter: char) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = row.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    current.push('"');
                    chars.next();
                }
                '"' => quoted = !quoted,
                c if c == delimiter && !quoted => fields.push(std::mem::take(&mut current)),
                c => current.push(c),
            }
        }
        fields.push(current);
        fields
    }

    fn writer(fields: &[&str]) -> CsvWriter {
        CsvWriter::new(
            FieldSet::new(fields.iter().map(|f| f.to_string()).collect()),
            CsvOptions::default(),
        )
    }

    #[test]
    fn test_comma_and_quote_are_escaped_and_recoverable() {
        let original = r#"Smith, "Jr""#;
        let w = writer(&["name", "n"]);
        let row = w.format_row(&doc! { "name": original, "n": 1 });

        assert_eq!(row, r#""Smith, ""Jr""",1"#);
        assert_eq!(split_row(&row, ','), vec![original.to_string(), "1".to_string()]);
    }

    #[test]
    fn test_missing_fields_yield_empty_cells() {
        let w = writer(&["a", "b.c", "d"]);
        assert_eq!(w.format_row(&doc! { "a": 1, "d": null }), "1,,");
        assert_eq!(w.format_row(&doc! { "b": { "c": "x" } }), ",x,");
    }

    #[test]
    fn test_compound_values_are_quoted() {
        let w = writer(&["tags"]);
        let row = w.format_row(&doc! { "tags": ["a", "b"] });
        assert_eq!(row, r#""[""a"",""b""]""#);
        assert_eq!(split_row(&row, ','), vec![r#"["a","b"]"#.to_string()]);
    }

    #[test]
    fn test_custom_delimiter_and_header() {
        let mut w = CsvWriter::new(
            FieldSet::new(vec!["a".into(), "b".into()]),
            CsvOptions {
                delimiter: ';',
                include_header: true,
            },
        );
        let mut out = Vec::new();
        w.begin(&mut out).unwrap();
        w.write_batch(&mut out, &[doc! { "a": "x;y", "b": "1,2" }]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a;b\n\"x;y\";1,2\n");
    }

    #[test]
    fn test_no_header() {
        let mut w = CsvWriter::new(
            FieldSet::new(vec!["a".into()]),
            CsvOptions {
                delimiter: ',',
                include_header: false,
            },
        );
        let mut out = Vec::new();
        w.begin(&mut out).unwrap();
        w.write_batch(&mut out, &[doc! { "a": "line\nbreak" }]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\"line\nbreak\"\n");
    }
}
