//! Page layout for exported plans: A4 portrait, Helvetica 20pt, 12mm lines,
//! automatic page break 15mm above the bottom edge.

pub const PAGE_WIDTH_MM: f32 = 210.0;
pub const PAGE_HEIGHT_MM: f32 = 297.0;
pub const MARGIN_MM: f32 = 10.0;
pub const BOTTOM_MARGIN_MM: f32 = 15.0;
pub const FONT_SIZE_PT: f32 = 20.0;
pub const LINE_HEIGHT_MM: f32 = 12.0;
/// Horizontal padding inside a text block.
pub const CELL_PADDING_MM: f32 = 1.0;

const PT_TO_MM: f32 = 25.4 / 72.0;

/// Helvetica advance widths in 1/1000 em for ASCII 32..=126.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

const DEFAULT_GLYPH_WIDTH: u16 = 556;

fn glyph_width(ch: char) -> u16 {
    let code = ch as u32;
    if (32..=126).contains(&code) {
        HELVETICA_ASCII[(code - 32) as usize]
    } else {
        DEFAULT_GLYPH_WIDTH
    }
}

pub fn text_width_mm(text: &str) -> f32 {
    let units: u32 = text.chars().map(|ch| u32::from(glyph_width(ch))).sum();
    units as f32 / 1000.0 * FONT_SIZE_PT * PT_TO_MM
}

fn usable_width_mm() -> f32 {
    PAGE_WIDTH_MM - 2.0 * MARGIN_MM - 2.0 * CELL_PADDING_MM
}

/// Wraps one source line into rows that fit the text width. Breaks at
/// spaces where possible and inside a word only when the word alone is too
/// wide. An empty line produces one empty row.
pub fn wrap_line(line: &str) -> Vec<String> {
    let max_width = usable_width_mm();
    let mut rows = Vec::new();
    let mut current = String::new();

    for word in line.split(' ') {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if text_width_mm(&candidate) <= max_width {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            rows.push(std::mem::take(&mut current));
        }
        for ch in word.chars() {
            current.push(ch);
            if text_width_mm(&current) > max_width {
                current.pop();
                rows.push(std::mem::replace(&mut current, ch.to_string()));
            }
        }
    }

    rows.push(current);
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedRow {
    pub text: String,
    /// Distance of the row's top edge from the top of the page.
    pub top_mm: f32,
}

impl PlacedRow {
    /// Baseline in PDF coordinates (origin bottom-left), text vertically
    /// centred in its row.
    pub fn baseline_mm(&self) -> f32 {
        let baseline_from_top = self.top_mm + 0.5 * LINE_HEIGHT_MM + 0.3 * FONT_SIZE_PT * PT_TO_MM;
        PAGE_HEIGHT_MM - baseline_from_top
    }

    pub fn left_mm(&self) -> f32 {
        MARGIN_MM + CELL_PADDING_MM
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<PlacedRow>,
}

/// Lays out every `\n`-separated line as a wrapped block, starting a new
/// page whenever the next row would cross the bottom margin.
pub fn paginate(text: &str) -> Vec<Page> {
    let break_at = PAGE_HEIGHT_MM - BOTTOM_MARGIN_MM;
    let mut pages = vec![Page::default()];
    let mut top = MARGIN_MM;

    for line in text.split('\n') {
        for row in wrap_line(line.trim_end_matches('\r')) {
            if top + LINE_HEIGHT_MM > break_at {
                pages.push(Page::default());
                top = MARGIN_MM;
            }
            if let Some(page) = pages.last_mut() {
                page.rows.push(PlacedRow { text: row, top_mm: top });
            }
            top += LINE_HEIGHT_MM;
        }
    }

    pages
}
