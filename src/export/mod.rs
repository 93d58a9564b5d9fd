pub mod layout;

use self::layout::{Page, FONT_SIZE_PT, PAGE_HEIGHT_MM, PAGE_WIDTH_MM};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const DOCUMENT_TITLE: &str = "Study Plan";
const LAYER_NAME: &str = "Layer 1";

/// Applied in order; the banner removal relies on the glyph and apostrophe
/// substitutions that precede it.
const SUBSTITUTIONS: [(&str, &str); 5] = [
    ("’", "'"),
    ("✅", "[DONE]"),
    ("❌", "[ERROR]"),
    ("⏳", "[LOADING]"),
    ("[DONE] Here's your study plan:", ""),
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Nothing to save!")]
    Empty,

    #[error("character {ch:?} on line {line} is outside the range supported by Helvetica")]
    UnsupportedCharacter { ch: char, line: usize },

    #[error("failed to render PDF: {0}")]
    Render(String),

    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Saved(PathBuf),
    Cancelled,
}

pub fn sanitize(text: &str) -> String {
    SUBSTITUTIONS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

/// The built-in Helvetica only covers Latin-1.
fn check_encodable(text: &str) -> Result<(), ExportError> {
    for (index, line) in text.split('\n').enumerate() {
        if let Some(ch) = line.chars().find(|ch| u32::from(*ch) > 0xFF) {
            return Err(ExportError::UnsupportedCharacter {
                ch,
                line: index + 1,
            });
        }
    }
    Ok(())
}

fn render(pages: &[Page]) -> Result<Vec<u8>, ExportError> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        DOCUMENT_TITLE,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        LAYER_NAME,
    );
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|err| ExportError::Render(err.to_string()))?;

    for (index, page) in pages.iter().enumerate() {
        let (page_index, layer_index) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), LAYER_NAME)
        };
        let layer = doc.get_page(page_index).get_layer(layer_index);

        for row in page.rows.iter().filter(|row| !row.text.is_empty()) {
            layer.use_text(
                row.text.as_str(),
                FONT_SIZE_PT,
                Mm(row.left_mm()),
                Mm(row.baseline_mm()),
                &font,
            );
        }
    }

    let mut writer = BufWriter::new(Vec::new());
    doc.save(&mut writer)
        .map_err(|err| ExportError::Render(err.to_string()))?;
    writer
        .into_inner()
        .map_err(|err| ExportError::Render(err.to_string()))
}

/// Writes `text` as a paginated PDF.
///
/// A `None` destination means the user dismissed the file picker.
pub fn export(text: &str, destination: Option<&Path>) -> Result<ExportOutcome, ExportError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExportError::Empty);
    }
    let Some(destination) = destination else {
        debug!("export cancelled, no destination chosen");
        return Ok(ExportOutcome::Cancelled);
    };

    let content = sanitize(trimmed);
    check_encodable(&content)?;

    let pages = layout::paginate(&content);
    let bytes = render(&pages)?;
    fs::write(destination, &bytes).map_err(|source| ExportError::Io {
        path: destination.to_path_buf(),
        source,
    })?;

    info!(
        path = %destination.display(),
        pages = pages.len(),
        bytes = bytes.len(),
        "exported study plan"
    );
    Ok(ExportOutcome::Saved(destination.to_path_buf()))
}
