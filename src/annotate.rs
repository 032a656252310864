//! Overlay drawing for result images: per-detection boxes, the summary
//! panel, and the fallback plot of everything the model reported.

use std::time::Duration;

use opencv::core::{self, Mat, Point, Rect, Scalar, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use crate::detection::{classes, Detection, RawDetection};

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const PANEL_HEIGHT: i32 = 120;
const PANEL_ALPHA: f64 = 0.7;

/// Confidence bands used for box colors. The thresholds are strict lower
/// bounds: 0.8 exactly is `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceTier {
    pub const ALL: [ConfidenceTier; 4] = [
        ConfidenceTier::High,
        ConfidenceTier::Medium,
        ConfidenceTier::Low,
        ConfidenceTier::VeryLow,
    ];

    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            ConfidenceTier::High
        } else if confidence > 0.65 {
            ConfidenceTier::Medium
        } else if confidence > 0.5 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::VeryLow
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceTier::High => "high",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::Low => "low",
            ConfidenceTier::VeryLow => "very-low",
        }
    }

    /// BGR color.
    pub fn color(self) -> Scalar {
        match self {
            ConfidenceTier::High => Scalar::new(0.0, 255.0, 0.0, 0.0),
            ConfidenceTier::Medium => Scalar::new(0.0, 200.0, 255.0, 0.0),
            ConfidenceTier::Low => Scalar::new(0.0, 100.0, 255.0, 0.0),
            ConfidenceTier::VeryLow => Scalar::new(0.0, 0.0, 255.0, 0.0),
        }
    }

    pub fn legend(self) -> &'static str {
        match self {
            ConfidenceTier::High => "High (>80%)",
            ConfidenceTier::Medium => "Medium (65-80%)",
            ConfidenceTier::Low => "Low (50-65%)",
            ConfidenceTier::VeryLow => "Very Low (<50%)",
        }
    }
}

fn white() -> Scalar {
    Scalar::new(255.0, 255.0, 255.0, 0.0)
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn to_rect(bbox: [f64; 4]) -> Rect {
    let x1 = bbox[0] as i32;
    let y1 = bbox[1] as i32;
    let x2 = bbox[2] as i32;
    let y2 = bbox[3] as i32;
    Rect::new(x1, y1, (x2 - x1).max(1), (y2 - y1).max(1))
}

/// Text on a filled background whose bottom-left corner sits at `origin`.
fn draw_tag(
    img: &mut Mat,
    text: &str,
    origin: Point,
    scale: f64,
    thickness: i32,
    background: Scalar,
) -> opencv::Result<Size> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(text, FONT, scale, thickness, &mut baseline)?;
    let top = (origin.y - size.height - baseline).max(0);
    imgproc::rectangle(
        img,
        Rect::new(origin.x, top, size.width + 4, origin.y - top),
        background,
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        img,
        text,
        Point::new(origin.x + 2, origin.y - baseline),
        FONT,
        scale,
        white(),
        thickness,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(size)
}

pub fn draw_detection(img: &mut Mat, detection: &Detection) -> opencv::Result<()> {
    let color = ConfidenceTier::from_confidence(detection.confidence).color();
    let shortest = img.cols().min(img.rows());
    let thickness = (shortest / 300).max(2);
    let rect = to_rect(detection.bbox);

    imgproc::rectangle(img, rect, color, thickness, imgproc::LINE_8, 0)?;

    let font_scale = (f64::from(shortest) / 1200.0).max(0.5);
    let font_thickness = ((font_scale * 2.0) as i32).max(1);
    let label = format!(
        "{}: {:.1}%",
        capitalize(&detection.class_label),
        detection.confidence * 100.0
    );
    draw_tag(
        img,
        &label,
        Point::new(rect.x, (rect.y - 5).max(0)),
        font_scale,
        font_thickness,
        color,
    )?;

    let area = format!("Area: {:.0}px", detection.area);
    let area_scale = font_scale * 0.8;
    let mut baseline = 0;
    let area_size = imgproc::get_text_size(&area, FONT, area_scale, 1, &mut baseline)?;
    draw_tag(
        img,
        &area,
        Point::new(rect.x, rect.y + rect.height + area_size.height + baseline + 5),
        area_scale,
        1,
        color,
    )?;

    Ok(())
}

/// Darkened band across the top with totals, the tier legend and the
/// processing time.
pub fn draw_info_panel(
    img: &mut Mat,
    detections: &[Detection],
    processing_time: Duration,
) -> opencv::Result<()> {
    let width = img.cols();

    let mut overlay = img.try_clone()?;
    imgproc::rectangle(
        &mut overlay,
        Rect::new(0, 0, width, PANEL_HEIGHT.min(img.rows())),
        Scalar::all(0.0),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )?;
    let mut blended = Mat::default();
    core::add_weighted(&overlay, PANEL_ALPHA, &*img, 1.0 - PANEL_ALPHA, 0.0, &mut blended, -1)?;
    *img = blended;

    imgproc::put_text(
        img,
        "Bear Detection Results",
        Point::new(20, 35),
        FONT,
        1.2,
        white(),
        2,
        imgproc::LINE_AA,
        false,
    )?;

    if !detections.is_empty() {
        let avg = detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64;
        let stats = format!(
            "Bears detected: {} | Avg confidence: {:.1}%",
            detections.len(),
            avg * 100.0
        );
        imgproc::put_text(
            img,
            &stats,
            Point::new(20, 70),
            FONT,
            0.8,
            white(),
            1,
            imgproc::LINE_AA,
            false,
        )?;

        let legend_y = 95;
        let mut x = 20;
        for tier in ConfidenceTier::ALL {
            let swatch = Rect::new(x, legend_y - 10, 20, 20);
            imgproc::rectangle(img, swatch, tier.color(), imgproc::FILLED, imgproc::LINE_8, 0)?;
            imgproc::rectangle(img, swatch, white(), 1, imgproc::LINE_8, 0)?;
            imgproc::put_text(
                img,
                tier.legend(),
                Point::new(x + 30, legend_y + 5),
                FONT,
                0.5,
                white(),
                1,
                imgproc::LINE_AA,
                false,
            )?;
            x += 150;
        }
    }

    let elapsed = format!("Processing time: {:.2}s", processing_time.as_secs_f64());
    imgproc::put_text(
        img,
        &elapsed,
        Point::new((width - 300).max(0), 35),
        FONT,
        0.7,
        white(),
        1,
        imgproc::LINE_AA,
        false,
    )?;

    Ok(())
}

/// Draws every raw detection with its class name, used when none of them is
/// a target.
pub fn plot_model_view(img: &mut Mat, raw: &[RawDetection]) -> opencv::Result<()> {
    let shortest = img.cols().min(img.rows());
    let thickness = (shortest / 300).max(2);
    let color = Scalar::new(255.0, 144.0, 30.0, 0.0);

    for det in raw {
        let rect = to_rect(det.bbox.map(f64::from));
        imgproc::rectangle(img, rect, color, thickness, imgproc::LINE_8, 0)?;
        let label = format!("{} {:.2}", classes::class_name(det.class_id), det.confidence);
        draw_tag(
            img,
            &label,
            Point::new(rect.x, (rect.y - 3).max(0)),
            0.5,
            1,
            color,
        )?;
    }
    Ok(())
}

/// Encodes `img` using the format implied by `ext` (e.g. ".jpg").
pub fn encode(img: &Mat, ext: &str) -> opencv::Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let ok = imgcodecs::imencode(ext, img, &mut buf, &Vector::<i32>::new())?;
    if !ok {
        return Err(opencv::Error::new(
            core::StsError,
            format!("failed to encode image as {ext}"),
        ));
    }
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    fn canvas() -> Mat {
        Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn tier_boundaries_are_strict() {
        assert_eq!(ConfidenceTier::from_confidence(0.95), ConfidenceTier::High);
        assert_eq!(ConfidenceTier::from_confidence(0.8), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confidence(0.66), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confidence(0.65), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_confidence(0.51), ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::from_confidence(0.5), ConfidenceTier::VeryLow);
        assert_eq!(ConfidenceTier::from_confidence(0.1), ConfidenceTier::VeryLow);
    }

    #[test]
    fn tier_names() {
        let names: Vec<&str> = ConfidenceTier::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names, ["high", "medium", "low", "very-low"]);
    }

    #[test]
    fn drawing_keeps_image_dimensions() {
        let mut img = canvas();
        let det = Detection::new([20.0, 40.0, 120.0, 140.0], 0.9, 21, "bear".into());
        draw_detection(&mut img, &det).unwrap();
        draw_info_panel(&mut img, &[det], Duration::from_millis(1500)).unwrap();
        assert_eq!(img.cols(), 320);
        assert_eq!(img.rows(), 240);

        let png = encode(&img, ".png").unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn box_is_drawn_in_tier_color() {
        let mut img = canvas();
        let det = Detection::new([100.0, 150.0, 200.0, 230.0], 0.95, 21, "bear".into());
        draw_detection(&mut img, &det).unwrap();
        // Left edge of the box, below the label tag.
        let px = img.at_2d::<core::Vec3b>(200, 100).unwrap();
        assert_eq!(px.0, [0, 255, 0]);
    }

    #[test]
    fn capitalize_label() {
        assert_eq!(capitalize("bear"), "Bear");
        assert_eq!(capitalize(""), "");
    }
}
