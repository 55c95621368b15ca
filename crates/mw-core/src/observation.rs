use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat};
use serde_json::Value;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

/// Decoded device screenshot. Keeps the original PNG bytes next to the pixels.
#[derive(Debug, Clone)]
pub struct Screenshot {
    png: Vec<u8>,
    image: DynamicImage,
}

impl Screenshot {
    pub fn from_png_bytes(png: Vec<u8>) -> Result<Self> {
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|err| anyhow!("screenshot is not a valid PNG: {}", err))?;
        Ok(Self { png, image })
    }

    pub fn from_image(image: DynamicImage) -> Result<Self> {
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(Self { png, image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn to_b64(&self) -> String {
        BASE64_STANDARD.encode(&self.png)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.png)?;
        Ok(())
    }
}

/// Decodes the `b64_png` field of a screenshot response. A `data:` URL prefix is tolerated.
pub fn decode_screenshot_b64(raw: &str) -> Result<Screenshot> {
    let payload = raw.rsplit(',').next().unwrap_or(raw).trim();
    let bytes = BASE64_STANDARD
        .decode(payload)
        .map_err(|err| anyhow!("screenshot is not valid base64: {}", err))?;
    Screenshot::from_png_bytes(bytes)
}

#[derive(Debug, Clone)]
pub struct Observation {
    pub screenshot: Screenshot,
    pub ask_user_response: Option<String>,
    pub tool_call: Option<Value>,
}

impl Observation {
    pub fn from_screenshot(screenshot: Screenshot) -> Self {
        Self {
            screenshot,
            ask_user_response: None,
            tool_call: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Screenshot,
    AccessibilityTree,
    ScreenshotAndAccessibilityTree,
}

impl ObservationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::AccessibilityTree => "accessibility_tree",
            Self::ScreenshotAndAccessibilityTree => "screenshot_and_accessibility_tree",
        }
    }
}

impl FromStr for ObservationKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "screenshot" => Ok(Self::Screenshot),
            "accessibility_tree" => Ok(Self::AccessibilityTree),
            "screenshot_and_accessibility_tree" => Ok(Self::ScreenshotAndAccessibilityTree),
            other => Err(anyhow!("unsupported observation type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn sample_png_b64() -> String {
        Screenshot::from_image(DynamicImage::ImageRgba8(RgbaImage::new(4, 7)))
            .expect("encode png")
            .to_b64()
    }

    #[test]
    fn decodes_plain_and_data_url_payloads() {
        let b64 = sample_png_b64();
        let plain = decode_screenshot_b64(&b64).expect("plain payload");
        assert_eq!((plain.width(), plain.height()), (4, 7));

        let data_url = format!("data:image/png;base64,{}", b64);
        let prefixed = decode_screenshot_b64(&data_url).expect("data url payload");
        assert_eq!(prefixed.png_bytes(), plain.png_bytes());
    }

    #[test]
    fn rejects_non_png_payloads() {
        let not_png = BASE64_STANDARD.encode(b"definitely not an image");
        let err = decode_screenshot_b64(&not_png).expect_err("garbage should fail");
        assert!(err.to_string().contains("PNG"), "unexpected error: {}", err);
        assert!(decode_screenshot_b64("%%%").is_err());
    }

    #[test]
    fn saved_png_reloads_with_the_same_size() {
        let screenshot = decode_screenshot_b64(&sample_png_b64()).expect("decode");
        let path = std::env::temp_dir().join(format!("mw_core_shot_{}.png", std::process::id()));
        screenshot.save_png(&path).expect("save");
        let reloaded = Screenshot::from_png_bytes(fs::read(&path).expect("read back")).expect("png");
        let _ = fs::remove_file(&path);
        assert_eq!((reloaded.width(), reloaded.height()), (4, 7));
    }

    #[test]
    fn observation_kinds_parse_from_their_wire_names() {
        for kind in [
            ObservationKind::Screenshot,
            ObservationKind::AccessibilityTree,
            ObservationKind::ScreenshotAndAccessibilityTree,
        ] {
            assert_eq!(kind.as_str().parse::<ObservationKind>().expect("parse"), kind);
        }
        assert!("som".parse::<ObservationKind>().is_err());
    }
}
