// src/convert/mod.rs
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::utils::error::ConversionError;
use crate::utils::urls::compact_ws;

/// Structured content pulled out of a fetched document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConvertedDocument {
    pub text: String,
    /// Each table as rows of cell strings.
    pub tables: Vec<Vec<Vec<String>>>,
}

/// The document-conversion capability: blob and media type in, text and tables out.
pub trait DocumentConverter: Send + Sync {
    fn convert(&self, bytes: &[u8], media_type: &str) -> Result<ConvertedDocument, ConversionError>;
}

// --- CSS Selectors (Lazy Static) ---
static BODY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("Failed to compile BODY_SELECTOR"));
static TABLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("Failed to compile TABLE_SELECTOR"));
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("Failed to compile ROW_SELECTOR"));
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("th, td").expect("Failed to compile CELL_SELECTOR"));
static NOISE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script, style, noscript").expect("Failed to compile NOISE_SELECTOR"));

/// Converts HTML earnings releases. Binary formats are left to other converters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlConverter;

impl HtmlConverter {
    fn element_text(element: ElementRef<'_>) -> String {
        let noise: Vec<_> = element.select(&NOISE_SELECTOR).map(|n| n.id()).collect();
        let mut text = String::new();
        for node in element.descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            if node.ancestors().any(|a| noise.contains(&a.id())) {
                continue;
            }
            text.push_str(fragment);
            text.push(' ');
        }
        compact_ws(&text)
    }

    fn table_rows(table: ElementRef<'_>) -> Vec<Vec<String>> {
        table
            .select(&ROW_SELECTOR)
            .map(|row| {
                row.select(&CELL_SELECTOR)
                    .map(|cell| compact_ws(&cell.text().collect::<String>()))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| cells.iter().any(|c| !c.is_empty()))
            .collect()
    }
}

impl DocumentConverter for HtmlConverter {
    fn convert(&self, bytes: &[u8], media_type: &str) -> Result<ConvertedDocument, ConversionError> {
        if !matches!(media_type, "text/html" | "application/xhtml+xml") {
            return Err(ConversionError::Unsupported(media_type.to_string()));
        }
        let html = std::str::from_utf8(bytes).map_err(|e| ConversionError::Parse(e.to_string()))?;
        let document = Html::parse_document(html);

        let root = document
            .select(&BODY_SELECTOR)
            .next()
            .unwrap_or_else(|| document.root_element());
        let text = Self::element_text(root);
        if text.is_empty() {
            return Err(ConversionError::Parse("document has no text".into()));
        }

        let tables = document
            .select(&TABLE_SELECTOR)
            .map(Self::table_rows)
            .filter(|rows| !rows.is_empty())
            .collect();
        Ok(ConvertedDocument { text, tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_text_and_tables() {
        let html = br#"<html><head><title>x</title></head><body>
            <script>var tracking = 1;</script>
            <h1>Third Quarter 2025   Results</h1>
            <table>
              <tr><th>Metric</th><th>Q3 2025</th></tr>
              <tr><td>Revenue</td><td>$94.9B</td></tr>
              <tr><td></td><td></td></tr>
            </table>
        </body></html>"#;
        let converted = HtmlConverter.convert(html, "text/html").unwrap();
        assert!(converted.text.starts_with("Third Quarter 2025 Results"));
        assert!(!converted.text.contains("tracking"));
        assert_eq!(
            converted.tables,
            vec![vec![
                vec!["Metric".to_string(), "Q3 2025".to_string()],
                vec!["Revenue".to_string(), "$94.9B".to_string()],
            ]]
        );
    }

    #[test]
    fn test_unsupported_and_unparseable() {
        assert!(matches!(
            HtmlConverter.convert(b"%PDF-1.7", "application/pdf"),
            Err(ConversionError::Unsupported(_))
        ));
        assert!(matches!(HtmlConverter.convert(b"\xff\xfe", "text/html"), Err(ConversionError::Parse(_))));
        assert!(matches!(
            HtmlConverter.convert(b"<html><body>   </body></html>", "text/html"),
            Err(ConversionError::Parse(_))
        ));
    }
}
