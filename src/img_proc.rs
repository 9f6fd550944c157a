//! 検出結果を画像に描画するモジュール

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{Pixel, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::detection_result::{normalize_label, DetectionRecord};

/// ラベルの色 (tab10)
const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

/// TTFフォントを読み込みます。
pub fn load_font<P: AsRef<Path>>(path: P) -> Result<Font<'static>> {
    let path = path.as_ref();
    let data = std::fs::read(path).with_context(|| format!("can't read font {}", path.display()))?;
    Font::try_from_vec(data).ok_or_else(|| anyhow!("invalid font file: {}", path.display()))
}

/// ラベルごとに固定の色を選びます。
fn label_color(label: &str) -> Rgb<u8> {
    let idx = normalize_label(label)
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    *Rgb::from_slice(&PALETTE[idx % PALETTE.len()])
}

/// 太さ `thickness` の枠を描画します。枠線は座標を中心に内外へ広がります。
fn draw_frame(img: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, thickness: u32, color: Rgb<u8>) {
    let t = thickness.max(1) as i32;
    for k in 0..t {
        let off = k - t / 2;
        let w = x2 - x1 - 2 * off + 1;
        let h = y2 - y1 - 2 * off + 1;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(x1 + off, y1 + off).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// 背景色に対して読みやすい文字色
fn text_color_on(bg: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = bg.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma < 140. {
        Rgb([255, 255, 255])
    } else {
        Rgb([0, 0, 0])
    }
}

/// 枠の左上にラベルを描画します。
///
/// 画像の上端からはみ出す場合は枠の内側に置きます。
fn draw_label(img: &mut RgbImage, x: i32, y: i32, bg: Rgb<u8>, font: &Font, font_size: f32, text: &str) {
    let scale = Scale::uniform(font_size);
    let (text_w, _) = text_size(scale, font, text);
    let pad = (font_size / 4.).round() as i32;
    let box_h = font_size.ceil() as i32 + pad;
    let top = if y - box_h < 0 { y } else { y - box_h };

    let rect = Rect::at(x, top).of_size((text_w + pad * 2).max(1) as u32, box_h.max(1) as u32);
    draw_filled_rect_mut(img, rect, bg);
    draw_text_mut(img, text_color_on(bg), x + pad, top + pad / 2, scale, font, text);
}

/// 画像上にバウンディングボックスとラベルを描画します。
///
/// コンフィデンスの高いものが上に来るように、低い順に描画します。
/// `font` が `None` の場合は枠だけを描画します。
///
/// # Args
///
/// * `img` - 描画する画像 (in-place)
/// * `detections` - 検出結果
/// * `font` - ラベルのフォント
/// * `font_size` - ラベルのフォントサイズ
/// * `line_thickness` - 枠線の太さ
pub fn draw_bbox(
    img: &mut RgbImage,
    detections: &[DetectionRecord],
    font: Option<&Font>,
    font_size: f32,
    line_thickness: u32,
) {
    let mut sorted: Vec<&DetectionRecord> = detections.iter().collect();
    sorted.sort_by(|a, b| a.confidence().total_cmp(&b.confidence()));

    for d in sorted {
        let color = label_color(d.label());
        let [x1, y1, x2, y2] = d.bbox().to_array().map(|v| v.round() as i32);

        draw_frame(img, x1, y1, x2, y2, line_thickness, color);

        if let Some(font) = font {
            let text = format!("{} {:.0}%", d.label(), d.confidence() * 100.);
            let lx = x1 - (line_thickness / 2) as i32;
            draw_label(img, lx, y1, color, font, font_size, &text);
        }
    }
}

/// ターゲットが見つかったことを示す表示を描画します。
///
/// フォントが無い場合は画像の外周を緑の枠で囲みます。
pub fn draw_found_banner(img: &mut RgbImage, target: &str, font: Option<&Font>, font_size: f32) {
    let green = Rgb([0u8, 200, 0]);
    match font {
        Some(font) => {
            let text = format!("FOUND: {}", target);
            draw_label(img, 8, 8, green, font, font_size, &text);
        }
        None => {
            let (w, h) = (img.width() as i32, img.height() as i32);
            draw_frame(img, 0, 0, w - 1, h - 1, 6, green);
        }
    }
}
