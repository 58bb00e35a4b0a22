//! Image encoding: `DynamicImage` → PNG bytes → base64 data URI.
//!
//! Rendered pages are always PNG. Uploaded PNG and JPEG files are sent as
//! they are; GIF and BMP are re-encoded to PNG first. The data URI names its
//! media type.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::error::{ImageFormatHint, UnsupportedError, UnsupportedErrorKind};
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// PNG-encode a rendered page.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} page → {} PNG bytes", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// An uploaded image ready to be sent.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Bytes for the request body.
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    /// Extension of the original file format, without the dot.
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Sniff an uploaded image and normalise it to a format vision endpoints
/// accept. Only PNG, JPEG, GIF and BMP are recognised.
pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, ImageError> {
    let format = image::guess_format(bytes)?;
    let extension = match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        other => {
            let hint = ImageFormatHint::Exact(other);
            return Err(ImageError::Unsupported(UnsupportedError::from_format_and_kind(
                hint.clone(),
                UnsupportedErrorKind::Format(hint),
            )));
        }
    };

    if matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        let (width, height) =
            ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
        return Ok(PreparedImage {
            bytes: bytes.to_vec(),
            media_type: format.to_mime_type(),
            extension,
            width,
            height,
        });
    }

    let img = image::load_from_memory_with_format(bytes, format)?;
    Ok(PreparedImage {
        bytes: encode_png(&img)?,
        media_type: "image/png",
        extension,
        width: img.width(),
        height: img.height(),
    })
}

/// Plain base64 of the image bytes.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<media_type>;base64,<payload>`.
pub fn data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, to_base64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert_eq!(decoded.width(), 10);
    }

    fn sample(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(6, 4, image::Rgb([9, 9, 9])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn png_and_jpeg_pass_through() {
        let png = sample(ImageFormat::Png);
        let prepared = prepare_image(&png).unwrap();
        assert_eq!(prepared.bytes, png);
        assert_eq!((prepared.media_type, prepared.extension), ("image/png", "png"));
        assert_eq!((prepared.width, prepared.height), (6, 4));

        let jpg = sample(ImageFormat::Jpeg);
        let prepared = prepare_image(&jpg).unwrap();
        assert_eq!(prepared.bytes, jpg);
        assert_eq!((prepared.media_type, prepared.extension), ("image/jpeg", "jpg"));
    }

    #[test]
    fn bmp_is_reencoded_as_png() {
        let prepared = prepare_image(&sample(ImageFormat::Bmp)).unwrap();
        assert_eq!(prepared.media_type, "image/png");
        assert_eq!(prepared.extension, "bmp");
        assert_eq!(&prepared.bytes[1..4], b"PNG");
        assert_eq!((prepared.width, prepared.height), (6, 4));
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        assert!(prepare_image(b"definitely not an image").is_err());
        assert!(prepare_image(b"%PDF-1.4\n").is_err());
    }

    #[test]
    fn data_uri_names_media_type() {
        let uri = data_uri("image/png", &[1, 2, 3]);
        assert_eq!(uri, "data:image/png;base64,AQID");
    }
}
