// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;

use crate::{
  labels::ClassNameTable,
  model::{DetectItem, DetectResult},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 3;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法加载嵌入的字体文件: {0}")]
  InvalidFont(#[from] InvalidFont),
}

pub struct Draw<'a> {
  font: FontRef<'a>,
  font_size: f32,
  box_color: [u8; 3],
  text_color: [u8; 3],
}

impl Draw<'static> {
  pub fn new() -> Result<Self, DrawError> {
    let font_data = include_bytes!("../../assets/font.ttf");
    let font = FontRef::try_from_slice(font_data)?;

    Ok(Self {
      font,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      text_color: TEXT_COLOR,
    })
  }
}

/// 标签文本：`<类别名>: <置信度两位小数>`
pub fn label_text(labels: &ClassNameTable, item: &DetectItem) -> String {
  match labels.name(item.class_id) {
    Some(name) => format!("{}: {:.2}", name, item.score),
    None => format!("#{}: {:.2}", item.class_id, item.score),
  }
}

impl<'a> Draw<'a> {
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult, labels: &ClassNameTable) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item, &label_text(labels, item));
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x0 = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y0 = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x1 = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y1 = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    let (x_min, x_max) = (x0.min(x1), x0.max(x1));
    let (y_min, y_max) = (y0.min(y1), y0.max(y1));

    // 向内收缩绘制，得到加粗边框；零宽或零高的框退化为一条线
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.box_color));
    }

    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, &self.font, label);
    let label_width = text_width as i32 + 2 * LABEL_TEXT_HORIZONTAL_PADDING;
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在边框左上角上方，空间不足时贴着图像顶端
    let label_x = x_min;
    let label_y = (y_min - label_height).max(0);
    let label_width = label_width.min(w - label_x);

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(self.box_color));
      draw_text_mut(
        image,
        Rgb(self.text_color),
        label_x + LABEL_TEXT_HORIZONTAL_PADDING,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        &self.font,
        label,
      );
    }
  }
}
