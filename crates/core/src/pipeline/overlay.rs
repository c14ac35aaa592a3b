//! Annotated-frame rendering.
//!
//! Draws the documented visual contract straight into RGB frame bytes:
//! per-track box (solid while seen, dashed while lost, hidden past the
//! grace window), label strip, activity badge, PPE suffix, and a fading
//! history trail. Text uses an embedded 5×7 glyph table.

use crate::activity::classifier::Activity;
use crate::shared::constants::OVERLAY_MAX_LOST;
use crate::shared::frame::Frame;
use crate::tracking::track::Track;

const WHITE: [u8; 3] = [255, 255, 255];
const STANDING_COLOR: [u8; 3] = [0, 255, 0];
const MOVING_COLOR: [u8; 3] = [255, 200, 0];
const STOPPED_COLOR: [u8; 3] = [128, 128, 128];
const NEUTRAL_COLOR: [u8; 3] = [100, 100, 100];

const DASH_LEN: i64 = 10;
const BOX_THICKNESS: i64 = 2;

/// Deterministic per-track color in the 60–220 band, derived from the id.
pub fn track_color(track_id: u64) -> [u8; 3] {
    let mut state = track_id.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut next = || {
        state ^= state >> 30;
        state = state.wrapping_mul(0xbf58_476d_1ce4_e5b9);
        state ^= state >> 27;
        (60 + (state >> 33) % 160) as u8
    };
    [next(), next(), next()]
}

pub fn activity_color(activity: Option<Activity>) -> [u8; 3] {
    match activity {
        Some(Activity::Standing) => STANDING_COLOR,
        Some(Activity::Moving) => MOVING_COLOR,
        Some(Activity::Stopped) => STOPPED_COLOR,
        None => NEUTRAL_COLOR,
    }
}

fn fade(color: [u8; 3], factor: f64) -> [u8; 3] {
    [
        (color[0] as f64 * factor) as u8,
        (color[1] as f64 * factor) as u8,
        (color[2] as f64 * factor) as u8,
    ]
}

/// Draw every visible track onto the frame.
pub fn draw_tracks(frame: &mut Frame, tracks: &[Track]) {
    for track in tracks {
        let is_lost = track.lost_frames > 0;
        if is_lost && track.lost_frames > OVERLAY_MAX_LOST {
            continue;
        }

        let mut color = track_color(track.id);
        if track.activity.is_some() && track.class_name.as_deref() == Some("person") {
            color = activity_color(track.activity);
        }
        if is_lost {
            color = fade(color, 0.5);
        }

        let x1 = track.bbox.x1 as i64;
        let y1 = track.bbox.y1 as i64;
        let x2 = track.bbox.x2 as i64;
        let y2 = track.bbox.y2 as i64;

        if is_lost {
            draw_dashed_rect(frame, x1, y1, x2, y2, color);
        } else {
            draw_rect(frame, x1, y1, x2, y2, color);
        }

        let class_label = track
            .class_name
            .clone()
            .unwrap_or_else(|| track.class_id.to_string());
        let mut label = if is_lost {
            format!("{class_label} #{} (lost)", track.id)
        } else {
            format!("{class_label} #{} {:.2}", track.id, track.score)
        };
        if let (Some(clothing), false) = (track.clothing, is_lost) {
            label.push_str(&format!(" PPE:{clothing}"));
        }
        draw_label_strip(frame, x1, y1, &label, color);

        if let (Some(activity), false) = (track.activity, is_lost) {
            let badge = format!("{activity} {:.0}%", track.activity_conf * 100.0);
            draw_badge(frame, x1, y2, &badge, activity_color(track.activity));
        }

        draw_trail(frame, track, color);
    }
}

/// Label strip above the box: filled background plus text.
fn draw_label_strip(frame: &mut Frame, x: i64, y: i64, text: &str, color: [u8; 3]) {
    let width = text_width(text) + 6;
    let top = y - (GLYPH_HEIGHT as i64) - 6;
    fill_rect(frame, x, top, x + width, y, color);
    draw_text(frame, x + 3, top + 3, text, WHITE);
}

/// Activity badge below the box.
fn draw_badge(frame: &mut Frame, x: i64, y2: i64, text: &str, color: [u8; 3]) {
    let width = text_width(text) + 10;
    let top = y2 + 5;
    fill_rect(frame, x, top, x + width, top + (GLYPH_HEIGHT as i64) + 8, color);
    draw_text(frame, x + 5, top + 4, text, WHITE);
}

/// History polyline, fading toward the past, with an endpoint marker.
fn draw_trail(frame: &mut Frame, track: &Track, color: [u8; 3]) {
    let points: Vec<(i64, i64)> = track
        .history
        .iter()
        .map(|&(x, y)| (x as i64, y as i64))
        .collect();
    if points.len() < 2 {
        return;
    }

    for i in 1..points.len() {
        let alpha = i as f64 / points.len() as f64;
        let segment_color = fade(color, alpha);
        draw_line(
            frame,
            points[i - 1].0,
            points[i - 1].1,
            points[i].0,
            points[i].1,
            segment_color,
        );
    }

    let &(cx, cy) = points.last().unwrap();
    fill_circle(frame, cx, cy, 4, color);
}

// ---------------------------------------------------------------------------
// Primitive raster ops (all clamp to the frame)
// ---------------------------------------------------------------------------

fn put(frame: &mut Frame, x: i64, y: i64, color: [u8; 3]) {
    if x >= 0 && y >= 0 && (x as u32) < frame.width() && (y as u32) < frame.height() {
        frame.set_pixel(x as u32, y as u32, color);
    }
}

pub fn fill_rect(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    for y in y1.max(0)..y2.min(frame.height() as i64) {
        for x in x1.max(0)..x2.min(frame.width() as i64) {
            put(frame, x, y, color);
        }
    }
}

pub fn draw_rect(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(frame, x, y1 + t, color);
            put(frame, x, y2 - t, color);
        }
        for y in y1..=y2 {
            put(frame, x1 + t, y, color);
            put(frame, x2 - t, y, color);
        }
    }
}

pub fn draw_dashed_rect(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    let mut x = x1;
    while x < x2 {
        let end = (x + DASH_LEN).min(x2);
        for t in 0..BOX_THICKNESS {
            for px in x..end {
                put(frame, px, y1 + t, color);
                put(frame, px, y2 - t, color);
            }
        }
        x += DASH_LEN * 2;
    }
    let mut y = y1;
    while y < y2 {
        let end = (y + DASH_LEN).min(y2);
        for t in 0..BOX_THICKNESS {
            for py in y..end {
                put(frame, x1 + t, py, color);
                put(frame, x2 - t, py, color);
            }
        }
        y += DASH_LEN * 2;
    }
}

pub fn draw_line(frame: &mut Frame, x1: i64, y1: i64, x2: i64, y2: i64, color: [u8; 3]) {
    // Bresenham
    let dx = (x2 - x1).abs();
    let dy = -(y2 - y1).abs();
    let sx = if x1 < x2 { 1 } else { -1 };
    let sy = if y1 < y2 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x1, y1);

    loop {
        put(frame, x, y, color);
        if x == x2 && y == y2 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn fill_circle(frame: &mut Frame, cx: i64, cy: i64, radius: i64, color: [u8; 3]) {
    for y in -radius..=radius {
        for x in -radius..=radius {
            if x * x + y * y <= radius * radius {
                put(frame, cx + x, cy + y, color);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 5×7 text
// ---------------------------------------------------------------------------

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
const GLYPH_ADVANCE: i64 = GLYPH_WIDTH as i64 + 1;

pub fn text_width(text: &str) -> i64 {
    text.chars().count() as i64 * GLYPH_ADVANCE
}

pub fn draw_text(frame: &mut Frame, x: i64, y: i64, text: &str, color: [u8; 3]) {
    let mut cursor = x;
    for ch in text.chars() {
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) != 0 {
                    put(frame, cursor + col as i64, y + row as i64, color);
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

/// Row bitmaps (bit 4 leftmost) for the characters labels use. Letters
/// render through their uppercase shapes; anything unmapped is blank.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0x00; 7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ppe::high_vis::Clothing;
    use crate::shared::bbox::BBox;

    fn black_frame() -> Frame {
        Frame::filled(320, 240, [0, 0, 0], 0)
    }

    fn person_track(id: u64) -> Track {
        let mut track = Track::new(id, BBox::new(50.0, 50.0, 150.0, 180.0), 0, 0.87, 0.0);
        track.class_name = Some("person".to_string());
        track
    }

    fn painted_pixels(frame: &Frame) -> usize {
        frame.data().chunks(3).filter(|p| p != &[0, 0, 0]).count()
    }

    #[test]
    fn test_track_color_is_deterministic_and_in_band() {
        for id in [1u64, 2, 42, 1000] {
            let color = track_color(id);
            assert_eq!(color, track_color(id));
            for channel in color {
                assert!((60..220).contains(&channel), "channel {channel}");
            }
        }
        assert_ne!(track_color(1), track_color(2));
    }

    #[test]
    fn test_activity_colors_differ() {
        let standing = activity_color(Some(Activity::Standing));
        let moving = activity_color(Some(Activity::Moving));
        let stopped = activity_color(Some(Activity::Stopped));
        assert_ne!(standing, moving);
        assert_ne!(moving, stopped);
        assert_ne!(activity_color(None), standing);
    }

    #[test]
    fn test_draw_tracks_paints_something() {
        let mut frame = black_frame();
        draw_tracks(&mut frame, &[person_track(1)]);
        assert!(painted_pixels(&frame) > 100);
    }

    #[test]
    fn test_fresh_person_box_uses_activity_color() {
        let mut frame = black_frame();
        let mut track = person_track(1);
        track.activity = Some(Activity::Standing);
        track.activity_conf = 0.9;
        draw_tracks(&mut frame, &[track]);
        // Top edge of the box carries the standing green.
        assert_eq!(frame.pixel(100, 50), STANDING_COLOR);
    }

    #[test]
    fn test_lost_track_beyond_grace_window_hidden() {
        let mut frame = black_frame();
        let mut track = person_track(1);
        track.lost_frames = OVERLAY_MAX_LOST + 1;
        draw_tracks(&mut frame, &[track]);
        assert_eq!(painted_pixels(&frame), 0);
    }

    #[test]
    fn test_lost_track_within_grace_window_drawn_faded() {
        let mut frame = black_frame();
        let mut track = person_track(1);
        track.activity = Some(Activity::Standing);
        track.lost_frames = 5;
        draw_tracks(&mut frame, &[track]);
        // Dashed box in half-faded green: the dash start at the top-left
        // corner is painted.
        assert_eq!(frame.pixel(50, 50), fade(STANDING_COLOR, 0.5));
        assert!(painted_pixels(&frame) > 0);
    }

    #[test]
    fn test_out_of_frame_box_does_not_panic() {
        let mut frame = black_frame();
        let mut track = person_track(1);
        track.bbox = BBox::new(-100.0, -100.0, 500.0, 400.0);
        track.push_center((-50.0, -50.0));
        track.push_center((400.0, 300.0));
        draw_tracks(&mut frame, &[track]);
    }

    #[test]
    fn test_trail_drawn_for_history() {
        let mut frame = black_frame();
        let mut track = person_track(1);
        track.activity = None;
        for i in 0..20 {
            track.push_center((60.0 + i as f64 * 5.0, 200.0));
        }
        draw_tracks(&mut frame, &[track]);
        // Endpoint marker at the last center.
        let last = track_color(1);
        assert_eq!(frame.pixel(155, 200), last);
    }

    #[test]
    fn test_ppe_suffix_widens_label() {
        let plain = person_track(1);
        let mut with_ppe = person_track(2);
        with_ppe.clothing = Some(Clothing::HighVis);

        let mut frame_a = black_frame();
        draw_tracks(&mut frame_a, &[plain]);
        let mut frame_b = black_frame();
        draw_tracks(&mut frame_b, &[with_ppe]);
        // The PPE-labelled strip covers more pixels.
        assert!(painted_pixels(&frame_b) > painted_pixels(&frame_a));
    }

    #[test]
    fn test_text_width_scales_with_length() {
        assert_eq!(text_width(""), 0);
        assert_eq!(text_width("abc"), 3 * GLYPH_ADVANCE);
    }

    #[test]
    fn test_draw_text_paints_glyph_pixels() {
        let mut frame = black_frame();
        draw_text(&mut frame, 10, 10, "a1#", WHITE);
        assert!(painted_pixels(&frame) > 10);
    }

    #[test]
    fn test_draw_line_endpoints() {
        let mut frame = black_frame();
        draw_line(&mut frame, 10, 10, 30, 20, WHITE);
        assert_eq!(frame.pixel(10, 10), WHITE);
        assert_eq!(frame.pixel(30, 20), WHITE);
    }
}
