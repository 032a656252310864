use chrono::Local;
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfLayerReference};

use crate::storage::HistoryEntry;

use super::ReportError;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 20.0;
const RECENT_ROWS: usize = 15;
const COLUMNS: [f32; 3] = [MARGIN, 110.0, 150.0];

pub(super) fn render(entries: &[HistoryEntry]) -> Result<Vec<u8>, ReportError> {
    let (doc, page, layer) = PdfDocument::new(
        "Bear detection report",
        Mm(PAGE_WIDTH),
        Mm(PAGE_HEIGHT),
        "Layer 1",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| ReportError::Generation(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| ReportError::Generation(e.to_string()))?;
    let layer = doc.get_page(page).get_layer(layer);

    let mut y = PAGE_HEIGHT - MARGIN;
    layer.use_text("Bear detection report", 18.0, Mm(MARGIN), Mm(y), &bold);
    y -= 12.0;

    let total_bears: usize = entries.iter().map(|e| e.bear_count).sum();
    for line in [
        format!("Generated: {}", Local::now().format("%d.%m.%Y %H:%M:%S")),
        format!("Total requests: {}", entries.len()),
        format!("Total bears detected: {total_bears}"),
    ] {
        layer.use_text(line, 11.0, Mm(MARGIN), Mm(y), &regular);
        y -= 7.0;
    }
    y -= 8.0;

    row(&layer, &bold, y, ["Timestamp", "Bears", "Processing time"]);
    y -= 8.0;

    let start = entries.len().saturating_sub(RECENT_ROWS);
    for entry in &entries[start..] {
        row(
            &layer,
            &regular,
            y,
            [
                entry.timestamp.as_str(),
                &entry.bear_count.to_string(),
                &format!("{:.2} s", entry.processing_time),
            ],
        );
        y -= 6.5;
    }

    doc.save_to_bytes().map_err(|e| ReportError::Generation(e.to_string()))
}

fn row(layer: &PdfLayerReference, font: &IndirectFontRef, y: f32, cells: [&str; 3]) {
    for (x, text) in COLUMNS.iter().zip(cells) {
        layer.use_text(text, 10.0, Mm(*x), Mm(y), font);
    }
}
