use chrono::Local;
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError};

use crate::stats;
use crate::storage::HistoryEntry;

use super::{data_period, entry_confidence, ReportError};

const ACCENT: u32 = 0x366092;
const SUBHEADER_FILL: u32 = 0xD9E1F2;

struct Styles {
    title: Format,
    subheader: Format,
    header: Format,
    cell: Format,
    percent: Format,
    decimal: Format,
}

impl Styles {
    fn new() -> Self {
        let cell = Format::new().set_border(FormatBorder::Thin);
        Self {
            title: Format::new()
                .set_bold()
                .set_font_size(16)
                .set_font_color(Color::RGB(ACCENT))
                .set_align(FormatAlign::Center),
            subheader: Format::new()
                .set_bold()
                .set_font_size(11)
                .set_background_color(Color::RGB(SUBHEADER_FILL)),
            header: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(ACCENT))
                .set_align(FormatAlign::Center)
                .set_border(FormatBorder::Thin),
            percent: cell.clone().set_num_format("0.00%"),
            decimal: Format::new().set_num_format("0.00"),
            cell,
        }
    }
}

pub(super) fn render(entries: &[HistoryEntry]) -> Result<Vec<u8>, ReportError> {
    build(entries).map_err(|e| ReportError::Generation(e.to_string()))
}

fn build(entries: &[HistoryEntry]) -> Result<Vec<u8>, XlsxError> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();

    summary_sheet(workbook.add_worksheet(), &styles, entries)?;
    details_sheet(workbook.add_worksheet(), &styles, entries)?;

    workbook.save_to_buffer()
}

fn summary_sheet(
    ws: &mut Worksheet,
    styles: &Styles,
    entries: &[HistoryEntry],
) -> Result<(), XlsxError> {
    ws.set_name("Summary")?;
    ws.merge_range(0, 0, 0, 6, "BEAR DETECTION REPORT", &styles.title)?;

    ws.write_string(2, 0, "Generated:")?;
    ws.write_string(2, 1, Local::now().format("%d.%m.%Y %H:%M:%S").to_string())?;
    ws.write_string(3, 0, "Data period:")?;
    let period = match data_period(entries) {
        Some((from, to)) => format!("{from} - {to}"),
        None => "No data".to_string(),
    };
    ws.write_string(3, 1, period)?;

    ws.merge_range(5, 0, 5, 6, "KEY FIGURES", &styles.subheader)?;

    let summary = stats::summarize(entries);
    let mut row = 7;
    ws.write_string(row, 0, "Total requests")?;
    ws.write_number(row, 1, summary.total_requests as f64)?;
    row += 1;
    ws.write_string(row, 0, "Total bears detected")?;
    ws.write_number(row, 1, summary.total_bears as f64)?;
    row += 1;
    for (label, value) in [
        ("Average confidence", summary.avg_confidence),
        ("Maximum confidence", summary.max_confidence),
        ("Minimum confidence", summary.min_confidence),
    ] {
        ws.write_string(row, 0, label)?;
        ws.write_number_with_format(row, 1, value, &styles.percent)?;
        row += 1;
    }
    ws.write_string(row, 0, "Bears per request")?;
    ws.write_number_with_format(row, 1, summary.bears_per_request, &styles.decimal)?;
    row += 2;

    ws.merge_range(row, 0, row, 6, "DAILY STATISTICS", &styles.subheader)?;
    row += 2;

    let headers = ["Date", "Requests", "Bears", "Avg confidence", "Max confidence"];
    for (col, header) in headers.iter().enumerate() {
        ws.write_string_with_format(row, col as u16, *header, &styles.header)?;
    }
    row += 1;

    for day in &summary.daily_stats {
        ws.write_string_with_format(row, 0, &day.date, &styles.cell)?;
        ws.write_number_with_format(row, 1, day.count as f64, &styles.cell)?;
        ws.write_number_with_format(row, 2, day.bears as f64, &styles.cell)?;
        ws.write_number_with_format(row, 3, day.avg_confidence, &styles.percent)?;
        ws.write_number_with_format(row, 4, day.max_confidence, &styles.percent)?;
        row += 1;
    }

    for col in 0..7 {
        ws.set_column_width(col, 22)?;
    }
    Ok(())
}

fn details_sheet(
    ws: &mut Worksheet,
    styles: &Styles,
    entries: &[HistoryEntry],
) -> Result<(), XlsxError> {
    ws.set_name("Details")?;
    ws.merge_range(0, 0, 0, 8, "ALL REQUESTS", &styles.title)?;

    let headers = [
        "#",
        "Timestamp",
        "Bears",
        "Confidence (avg)",
        "Confidence (max)",
        "Confidence (min)",
        "File",
        "Event ID",
        "Status",
    ];
    for (col, header) in headers.iter().enumerate() {
        ws.write_string_with_format(2, col as u16, *header, &styles.header)?;
    }

    for (idx, entry) in entries.iter().enumerate() {
        let row = 3 + idx as u32;
        let (avg, max, min) = entry_confidence(entry);
        let file = entry
            .original_image_ref
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let status = if entry.detections.is_empty() {
            "Not detected"
        } else {
            "Detected"
        };

        ws.write_number_with_format(row, 0, (idx + 1) as f64, &styles.cell)?;
        ws.write_string_with_format(row, 1, &entry.timestamp, &styles.cell)?;
        ws.write_number_with_format(row, 2, entry.bear_count as f64, &styles.cell)?;
        ws.write_number_with_format(row, 3, avg, &styles.percent)?;
        ws.write_number_with_format(row, 4, max, &styles.percent)?;
        ws.write_number_with_format(row, 5, min, &styles.percent)?;
        ws.write_string_with_format(row, 6, file, &styles.cell)?;
        ws.write_string_with_format(row, 7, &entry.id, &styles.cell)?;
        ws.write_string_with_format(row, 8, status, &styles.cell)?;
    }

    for (col, width) in [5, 28, 10, 16, 16, 16, 40, 38, 14].into_iter().enumerate() {
        ws.set_column_width(col as u16, width)?;
    }
    Ok(())
}
