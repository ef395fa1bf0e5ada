//! 学習用のランダムなデータ拡張
//!
//! 回転・シフト・せん断・ズーム・左右反転を1つのアフィン変換にまとめ、
//! 出力画素ごとに入力側の座標を逆算して最近傍でサンプリングします。
//! 画像外を参照した場合は端の画素で埋めます。

use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::model::AugmentationSettings;

/// 1枚分の変換パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// 回転角（度）
    pub rotation: f32,
    /// x方向シフト（ピクセル）
    pub shift_x: f32,
    /// y方向シフト（ピクセル）
    pub shift_y: f32,
    /// せん断角（度）
    pub shear: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
    pub flip: bool,
}

impl AffineParams {
    pub const IDENTITY: Self = Self {
        rotation: 0.0,
        shift_x: 0.0,
        shift_y: 0.0,
        shear: 0.0,
        zoom_x: 1.0,
        zoom_y: 1.0,
        flip: false,
    };

    /// 設定範囲から一様乱数でパラメータを引く
    pub fn sample(
        settings: &AugmentationSettings,
        width: u32,
        height: u32,
        rng: &mut StdRng,
    ) -> Self {
        let zoom_x = 1.0 + jitter_range(rng, settings.zoom_range);
        let zoom_y = 1.0 + jitter_range(rng, settings.zoom_range);
        Self {
            rotation: jitter_range(rng, settings.rotation_range),
            shift_x: jitter_range(rng, settings.width_shift_range) * width as f32,
            shift_y: jitter_range(rng, settings.height_shift_range) * height as f32,
            shear: jitter_range(rng, settings.shear_range),
            zoom_x,
            zoom_y,
            flip: settings.horizontal_flip && rng.gen_bool(0.5),
        }
    }
}

fn jitter_range(rng: &mut StdRng, range: f32) -> f32 {
    if range <= 0.0 {
        0.0
    } else {
        rng.gen_range(-range..=range)
    }
}

/// 変換を適用した新しい画像を返す（サイズは入力と同じ）
pub fn apply_affine(img: &RgbImage, params: &AffineParams) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 || *params == AffineParams::IDENTITY {
        return img.clone();
    }

    let (sin_r, cos_r) = params.rotation.to_radians().sin_cos();
    let (sin_s, cos_s) = params.shear.to_radians().sin_cos();

    // 出力座標 -> 入力座標の行列 (回転 * せん断 * ズーム)
    let m00 = cos_r * params.zoom_x;
    let m01 = (-sin_r * cos_s - cos_r * sin_s) * params.zoom_y;
    let m10 = sin_r * params.zoom_x;
    let m11 = (cos_r * cos_s - sin_r * sin_s) * params.zoom_y;

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;

    RgbImage::from_fn(width, height, |x, y| {
        let out_x = if params.flip { max_x - x as f32 } else { x as f32 };
        let dx = out_x - cx;
        let dy = y as f32 - cy;
        let src_x = m00 * dx + m01 * dy + cx + params.shift_x;
        let src_y = m10 * dx + m11 * dy + cy + params.shift_y;
        let sx = src_x.round().clamp(0.0, max_x) as u32;
        let sy = src_y.round().clamp(0.0, max_y) as u32;
        *img.get_pixel(sx, sy)
    })
}

/// シード付き乱数を持つデータ拡張器
///
/// バッチャーから `&self` で呼ばれるため乱数は `Mutex` で保持します。
#[derive(Debug)]
pub struct Augmenter {
    settings: AugmentationSettings,
    rng: Mutex<StdRng>,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings, seed: u64) -> Self {
        Self {
            settings,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// ランダムな変換を1回適用
    pub fn augment(&self, img: &RgbImage) -> RgbImage {
        if !self.settings.enabled {
            return img.clone();
        }
        let params = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            AffineParams::sample(&self.settings, img.width(), img.height(), &mut rng)
        };
        apply_affine(img, &params)
    }
}
