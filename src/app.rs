//! デスクトップGUI
//!
//! 画像を選んでサムネイルと分類結果を表示するだけの1画面アプリです。
//! 推論エンジンは起動前に読み込み済みのものを受け取ります。

use anyhow::Result;
use burn::tensor::backend::Backend;
use eframe::egui::{self, Color32, RichText, TextureHandle, TextureOptions};
use rfd::{FileDialog, MessageDialog, MessageLevel};

use crate::classify_commands::{classify_file, render, ResultTone, ResultView, Thumbnail};
use crate::ml::Predictor;
use crate::model::GuiSettings;

const WINDOW_TITLE: &str = "Fruit Classifier";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const SUCCESS_COLOR: Color32 = Color32::from_rgb(40, 110, 230);
const FAILURE_COLOR: Color32 = Color32::from_rgb(220, 50, 50);

pub struct FruitApp<B: Backend> {
    predictor: Predictor<B>,
    thumbnail_size: u32,
    texture: Option<TextureHandle>,
    result: Option<(String, ResultTone)>,
}

impl<B: Backend> FruitApp<B> {
    pub fn new(predictor: Predictor<B>, thumbnail_size: u32) -> Self {
        Self {
            predictor,
            thumbnail_size,
            texture: None,
            result: None,
        }
    }

    fn upload_image(&mut self, ctx: &egui::Context) {
        let Some(path) = FileDialog::new()
            .set_title("Select an image")
            .add_filter("Image files", &IMAGE_EXTENSIONS)
            .pick_file()
        else {
            return;
        };

        let selection = classify_file(&self.predictor, &path, self.thumbnail_size);
        if let Some(thumbnail) = &selection.thumbnail {
            self.set_thumbnail(ctx, thumbnail);
        }

        match render(&selection.outcome) {
            ResultView::Inline { text, tone } => self.result = Some((text, tone)),
            ResultView::Modal { title, message } => show_error_dialog(&title, &message),
        }
    }

    fn set_thumbnail(&mut self, ctx: &egui::Context, thumbnail: &Thumbnail) {
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [thumbnail.width as usize, thumbnail.height as usize],
            &thumbnail.rgba,
        );
        match self.texture.as_mut() {
            Some(texture) if texture.size() == image.size => {
                texture.set(image, TextureOptions::LINEAR);
            }
            _ => {
                self.texture = Some(ctx.load_texture("thumbnail", image, TextureOptions::LINEAR));
            }
        }
    }
}

impl<B: Backend> eframe::App for FruitApp<B> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(8.0);
                ui.heading(WINDOW_TITLE);
                ui.add_space(8.0);

                if let Some(texture) = &self.texture {
                    ui.image(texture);
                } else {
                    let side = self.thumbnail_size as f32;
                    ui.allocate_space(egui::vec2(side, side));
                }

                ui.add_space(8.0);
                if let Some((text, tone)) = &self.result {
                    let color = match tone {
                        ResultTone::Success => SUCCESS_COLOR,
                        ResultTone::Failure => FAILURE_COLOR,
                    };
                    ui.label(RichText::new(text).size(16.0).color(color));
                } else {
                    ui.label("");
                }

                ui.add_space(8.0);
                if ui.button("Upload Image").clicked() {
                    self.upload_image(ctx);
                }
                if ui.button("Quit").clicked() {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                }
            });
        });
    }
}

fn show_error_dialog(title: &str, message: &str) {
    tracing::error!("{}", message);
    MessageDialog::new()
        .set_level(MessageLevel::Error)
        .set_title(title)
        .set_description(message)
        .show();
}

/// ウィンドウを開き、閉じられるまでブロック
pub fn launch<B: Backend>(predictor: Predictor<B>, settings: &GuiSettings) -> Result<()> {
    let viewport = egui::ViewportBuilder::default()
        .with_title(WINDOW_TITLE)
        .with_inner_size([settings.window_width, settings.window_height]);
    let native_options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    let thumbnail_size = settings.thumbnail_size;
    eframe::run_native(
        WINDOW_TITLE,
        native_options,
        Box::new(move |_cc| Ok(Box::new(FruitApp::new(predictor, thumbnail_size)))),
    )
    .map_err(|e| anyhow::anyhow!("GUI error: {e}"))
}
