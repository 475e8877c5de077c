use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use image::{
    AnimationDecoder, GenericImageView, ImageFormat, ImageReader,
    codecs::{gif::GifDecoder, png::PngDecoder, webp::WebPDecoder},
};
use mime_guess::mime;

pub const DEFAULT_EXTENSION: &str = "jpg";

/// Marker between the page name and the part number of a split image
pub const SPLIT_MARKER: &str = "__";

static IMAGE_SUBTYPES: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "jpeg" => "jpg",
    "jpg" => "jpg",
    "pjpeg" => "jpg",
    "png" => "png",
    "webp" => "webp",
    "gif" => "gif",
    "avif" => "avif",
    "heif" => "heif",
    "heic" => "heif",
    "jxl" => "jxl",
    "bmp" => "bmp",
};

fn extension_from_mime(mime: &mime::Mime) -> Option<&'static str> {
    if mime.type_() != mime::IMAGE {
        return None;
    }
    IMAGE_SUBTYPES.get(mime.subtype().as_str()).copied()
}

fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime: mime::Mime = content_type.trim().parse().ok()?;
    extension_from_mime(&mime)
}

fn extension_from_uri(uri: &str) -> Option<&'static str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let mime = mime_guess::from_path(path).first()?;
    extension_from_mime(&mime)
}

fn extension_from_magic(data: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(data).ok()?;
    format.extensions_str().first().copied()
}

/// Picks the file extension of a downloaded image. The content type reported
/// by the server wins over the uri, which wins over the magic number.
pub fn sniff_extension(content_type: Option<&str>, uri: &str, data: &[u8]) -> &'static str {
    content_type
        .and_then(extension_from_content_type)
        .or_else(|| extension_from_uri(uri))
        .or_else(|| extension_from_magic(data))
        .unwrap_or(DEFAULT_EXTENSION)
}

/// File name of part `part` (1 based) of a split page
pub fn split_part_name(page_name: &str, part: usize) -> String {
    format!("{page_name}{SPLIT_MARKER}{part:03}.{DEFAULT_EXTENSION}")
}

fn is_animated(data: &[u8], format: ImageFormat) -> bool {
    match format {
        ImageFormat::Gif => GifDecoder::new(Cursor::new(data))
            .map(|decoder| decoder.into_frames().take(2).count() > 1)
            .unwrap_or(false),
        ImageFormat::WebP => WebPDecoder::new(Cursor::new(data))
            .map(|decoder| decoder.has_animation())
            .unwrap_or(false),
        ImageFormat::Png => PngDecoder::new(Cursor::new(data))
            .and_then(|mut decoder| decoder.is_apng())
            .unwrap_or(false),
        _ => false,
    }
}

/// Splits an image whose height / width exceeds `ratio` into parts of at most
/// `width * ratio` pixels. The parts replace the original file.
///
/// Returns the written parts, empty when the image was not tall enough or is
/// animated. Fails for images that can not be decoded.
pub fn split_tall_image(path: &Path, ratio: f64) -> Result<Vec<PathBuf>> {
    let data = std::fs::read(path)?;
    let reader = ImageReader::new(Cursor::new(&data)).with_guessed_format()?;
    if reader
        .format()
        .is_some_and(|format| is_animated(&data, format))
    {
        debug!("not splitting animated image {}", path.display());
        return Ok(vec![]);
    }

    let img = reader
        .decode()
        .map_err(|e| anyhow!("failed to decode {}: {e}", path.display()))?;

    let (width, height) = img.dimensions();
    if width == 0 || (height as f64 / width as f64) <= ratio {
        return Ok(vec![]);
    }

    let part_height = ((width as f64 * ratio) as u32).max(1);
    let page_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("invalid page path {}", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut parts = vec![];
    let mut y = 0;
    while y < height {
        let h = part_height.min(height - y);
        let part = img.view(0, y, width, h).to_image();
        let rgb = image::DynamicImage::ImageRgba8(part).to_rgb8();

        let part_path = dir.join(split_part_name(&page_name, parts.len() + 1));
        rgb.save_with_format(&part_path, ImageFormat::Jpeg)?;
        parts.push(part_path);
        y += h;
    }

    std::fs::remove_file(path)?;
    debug!("split {} into {} parts", path.display(), parts.len());

    Ok(parts)
}

#[cfg(test)]
mod test {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const GIF_MAGIC: &[u8] = b"GIF89a\0\0\0\0";
    const AVIF_HEADER: &[u8] = b"\0\0\0\x20ftypavif\0\0\0\0avifmif1miaf";

    #[test]
    fn test_content_type_beats_uri_and_magic() {
        assert_eq!(
            sniff_extension(Some("image/webp"), "https://x.org/1.png", PNG_MAGIC),
            "webp"
        );
        assert_eq!(
            sniff_extension(Some("image/jpeg; charset=binary"), "/1.png", GIF_MAGIC),
            "jpg"
        );
    }

    #[test]
    fn test_uri_beats_magic() {
        assert_eq!(
            sniff_extension(Some("application/octet-stream"), "https://x.org/1.gif?t=1", PNG_MAGIC),
            "gif"
        );
        assert_eq!(sniff_extension(None, "https://x.org/1.png", GIF_MAGIC), "png");
    }

    #[test]
    fn test_magic_and_default() {
        assert_eq!(sniff_extension(None, "https://x.org/page", PNG_MAGIC), "png");
        assert_eq!(sniff_extension(None, "https://x.org/page", GIF_MAGIC), "gif");
        assert_eq!(sniff_extension(None, "https://x.org/page", b"garbage"), "jpg");
    }

    #[test]
    fn test_sniff_is_deterministic() {
        for _ in 0..10 {
            assert_eq!(
                sniff_extension(Some("image/png"), "https://x.org/1.gif", GIF_MAGIC),
                "png"
            );
        }
    }

    #[test]
    fn test_split_tall_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.png");
        image::RgbImage::new(10, 100).save(&path).unwrap();

        let parts = split_tall_image(&path, 3.0).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], dir.path().join("001__001.jpg"));
        assert_eq!(parts[3], dir.path().join("001__004.jpg"));
        assert!(!path.exists());

        let last = image::open(&parts[3]).unwrap();
        assert_eq!(last.dimensions(), (10, 10));
    }

    #[test]
    fn test_animated_image_is_not_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.gif");
        let mut data = Vec::new();
        {
            let mut encoder = image::codecs::gif::GifEncoder::new(&mut data);
            let frames = (0..2).map(|_| image::Frame::new(image::RgbaImage::new(10, 100)));
            encoder.encode_frames(frames).unwrap();
        }
        std::fs::write(&path, &data).unwrap();

        assert!(split_tall_image(&path, 3.0).unwrap().is_empty());
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert!(!dir.path().join("001__001.jpg").exists());
    }

    #[test]
    fn test_undecodable_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.avif");
        std::fs::write(&path, AVIF_HEADER).unwrap();

        assert!(split_tall_image(&path, 3.0).is_err());
        assert!(path.exists());
    }

    #[test]
    fn test_short_image_is_not_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001.png");
        image::RgbImage::new(10, 20).save(&path).unwrap();

        assert!(split_tall_image(&path, 3.0).unwrap().is_empty());
        assert!(path.exists());
    }
}
