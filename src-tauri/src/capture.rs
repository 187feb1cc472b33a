use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use screenshots::image::{imageops, DynamicImage, ImageFormat, RgbaImage};

use crate::config::AppConfig;
use crate::models::ImageData;

#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
  pub max_width: Option<u32>,
  pub settle_delay: Duration,
}

impl From<&AppConfig> for CaptureSettings {
  fn from(config: &AppConfig) -> Self {
    Self {
      max_width: config.capture_max_width,
      settle_delay: Duration::from_millis(config.capture_delay_ms),
    }
  }
}

/// Hides the overlay, grabs the primary display, and shows the overlay again.
pub fn capture_full_screen<H, S>(hide: H, show: S, settings: CaptureSettings) -> anyhow::Result<ImageData>
where
  H: FnOnce(),
  S: FnOnce(),
{
  capture_with(hide, show, settings, grab_primary_display)
}

/// `show` runs even when the grab fails, so the window never stays hidden.
pub fn capture_with<H, S, G>(hide: H, show: S, settings: CaptureSettings, grab: G) -> anyhow::Result<ImageData>
where
  H: FnOnce(),
  S: FnOnce(),
  G: FnOnce() -> anyhow::Result<RgbaImage>,
{
  hide();
  if !settings.settle_delay.is_zero() {
    std::thread::sleep(settings.settle_delay);
  }
  let grabbed = grab();
  show();

  let image = downscale(grabbed?, settings.max_width);
  encode_png(DynamicImage::ImageRgba8(image))
}

fn grab_primary_display() -> anyhow::Result<RgbaImage> {
  let screens = screenshots::Screen::all()?;
  let screen = screens
    .first()
    .ok_or_else(|| anyhow::anyhow!("no screens found"))?;
  Ok(screen.capture()?)
}

fn downscale(image: RgbaImage, max_width: Option<u32>) -> RgbaImage {
  match max_width {
    Some(max) if max > 0 && image.width() > max => {
      let scale = max as f64 / image.width() as f64;
      let height = ((image.height() as f64 * scale) as u32).max(1);
      imageops::resize(&image, max, height, imageops::FilterType::Triangle)
    }
    _ => image,
  }
}

/// Re-encodes a pasted clipboard image (any format the decoder knows) as PNG.
pub fn normalize_pasted(base64: &str) -> anyhow::Result<ImageData> {
  let payload = match base64.split_once(";base64,") {
    Some((_, data)) => data,
    None => base64,
  };
  let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
  let image = screenshots::image::load_from_memory(&bytes)?;
  encode_png(image)
}

fn encode_png(image: DynamicImage) -> anyhow::Result<ImageData> {
  let mut png = Vec::new();
  image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
  Ok(ImageData::png(base64::engine::general_purpose::STANDARD.encode(png)))
}
