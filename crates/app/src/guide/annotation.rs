//! Bounding boxes, captions, and JPEG encoding for streamed frames.

use anyhow::{Result, anyhow};
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use video_ingest::Frame;

use crate::guide::data::Detection;

/// Muted box colours, indexed by `class_id % 10`.
const PALETTE: [Rgb<u8>; 10] = [
    Rgb([87, 120, 164]),
    Rgb([228, 148, 68]),
    Rgb([209, 97, 93]),
    Rgb([133, 182, 178]),
    Rgb([106, 159, 88]),
    Rgb([231, 202, 96]),
    Rgb([168, 124, 159]),
    Rgb([241, 162, 169]),
    Rgb([150, 118, 98]),
    Rgb([184, 176, 172]),
];

const CAPTION_BG: Rgb<u8> = Rgb([0, 0, 0]);
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

pub fn palette_color(class_id: i64) -> Rgb<u8> {
    PALETTE[class_id.rem_euclid(PALETTE.len() as i64) as usize]
}

/// Convert a BGR frame into an RGB image buffer.
pub fn frame_to_rgb(frame: &Frame) -> Result<RgbImage> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() < expected {
        return Err(anyhow!(
            "frame buffer holds {} bytes, expected {expected}",
            frame.data.len()
        ));
    }
    let mut rgb = Vec::with_capacity(expected);
    for chunk in frame.data[..expected].chunks_exact(3) {
        rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

/// Draw every detection with a palette box and a `LABEL NN%` caption.
pub fn annotate(image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
        let [left, top, right, bottom] = detection.bbox;
        let color = palette_color(detection.class_id);
        draw_rectangle(image, left, top, right, bottom, color);
        // two pixel border
        draw_rectangle(image, left + 1, top + 1, right - 1, bottom - 1, color);
    }

    for detection in detections {
        let caption = format!(
            "{} {:.0}%",
            detection.label,
            (detection.confidence * 100.0).clamp(0.0, 100.0)
        );
        let x = detection.bbox[0].max(0);
        let y = (detection.bbox[1] - GLYPH_HEIGHT - 5).max(0);
        let text_width = caption.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            image,
            x,
            y,
            x + text_width + 2,
            y + GLYPH_HEIGHT + 2,
            CAPTION_BG,
        );
        draw_label(
            image,
            x + 1,
            y + 1,
            &caption,
            palette_color(detection.class_id),
        );
    }
}

/// Encode the frame as JPEG, optionally annotated first.
pub fn render_jpeg(
    frame: &Frame,
    detections: &[Detection],
    annotate_boxes: bool,
    quality: u8,
) -> Result<Vec<u8>> {
    let mut image = frame_to_rgb(frame)?;
    if annotate_boxes {
        annotate(&mut image, detections);
    }
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    if image.width() == 0 || image.height() == 0 || right < left || bottom < top {
        return;
    }
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    let (l, r) = (left.clamp(0, max_x), right.clamp(0, max_x));
    let (t, b) = (top.clamp(0, max_y), bottom.clamp(0, max_y));

    for x in l..=r {
        image.put_pixel(x as u32, t as u32, color);
        image.put_pixel(x as u32, b as u32, color);
    }
    for y in t..=b {
        image.put_pixel(l as u32, y as u32, color);
        image.put_pixel(r as u32, y as u32, color);
    }
}

fn fill_rect(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    for y in top.clamp(0, max_y)..=bottom.clamp(0, max_y) {
        for x in left.clamp(0, max_x)..=right.clamp(0, max_x) {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    let px = x + col;
                    if (pattern >> (4 - col)) & 1 == 1 && px >= 0 && px < width {
                        image.put_pixel(px as u32, py as u32, color);
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 bitmap font; unknown characters advance without drawing.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use video_ingest::FrameFormat;

    use super::*;

    fn blank(width: u32, height: u32) -> Frame {
        Frame {
            data: vec![0; (width * height * 3) as usize],
            width,
            height,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    #[test]
    fn palette_wraps_by_class_id() {
        assert_eq!(palette_color(0), palette_color(10));
        assert_ne!(palette_color(0), palette_color(1));
        assert_eq!(palette_color(-1), palette_color(9));
        assert_eq!(palette_color(0), Rgb([87, 120, 164]));
        assert_eq!(palette_color(9), Rgb([184, 176, 172]));
    }

    #[test]
    fn bgr_is_swapped_to_rgb() {
        let mut frame = blank(1, 1);
        frame.data = vec![10, 20, 30];
        let rgb = frame_to_rgb(&frame).expect("convert");
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([30, 20, 10]));
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut frame = blank(4, 4);
        frame.data.truncate(5);
        assert!(frame_to_rgb(&frame).is_err());
    }

    #[test]
    fn short_buffer_fails_the_encode() {
        let mut frame = blank(8, 8);
        frame.data.truncate(10);
        assert!(render_jpeg(&frame, &[], true, 80).is_err());
        assert!(render_jpeg(&blank(8, 8), &[], true, 80).is_ok());
    }

    #[test]
    fn box_edges_take_the_class_colour() {
        let mut image = RgbImage::new(64, 64);
        let detection = Detection {
            label: "cup".into(),
            confidence: 0.9,
            bbox: [10, 20, 40, 50],
            class_id: 2,
        };
        annotate(&mut image, &[detection]);
        assert_eq!(image.get_pixel(25, 50), &palette_color(2));
        assert_eq!(image.get_pixel(40, 35), &palette_color(2));
        assert_eq!(image.get_pixel(25, 35), &Rgb([0, 0, 0]));
    }

    #[test]
    fn out_of_frame_boxes_do_not_panic() {
        let mut image = RgbImage::new(16, 16);
        let detection = Detection {
            label: "wide".into(),
            confidence: 1.0,
            bbox: [-50, -50, 500, 500],
            class_id: 0,
        };
        annotate(&mut image, &[detection]);
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let bytes = render_jpeg(&blank(32, 24), &[], true, 80).expect("encode");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
