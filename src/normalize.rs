//! Turns a URL or an uploaded file into something the model provider accepts.
//!
//! Uploads are decoded, flattened to RGB, shrunk to fit inside
//! [`MAX_DIMENSION`] on the longer side and re-encoded as JPEG. URLs are passed
//! through or fetched and treated like uploads, depending on [`UrlMode`].

use std::io::Cursor;

use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use tracing::{debug, info};

use crate::config::UrlMode;
use crate::error::NormalizationError;

type Result<T> = std::result::Result<T, NormalizationError>;

/// Longest side, in pixels, of any inline image.
pub const MAX_DIMENSION: u32 = 1024;
/// Per-image size accepted by the provider.
pub const MAX_INLINE_BYTES: usize = 20 * 1024 * 1024;
/// Largest body accepted when fetching a URL.
pub const MAX_DOWNLOAD_BYTES: usize = 25 * 1024 * 1024;
pub const JPEG_QUALITY: u8 = 85;
pub const OUTPUT_MIME: &str = "image/jpeg";

/// An image as supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    Bytes { data: Vec<u8>, mime: String },
}

impl ImageReference {
    /// Accepts an upload if its extension is one of jpg, jpeg or png.
    pub fn from_upload(file_name: &str, data: Vec<u8>) -> Result<Self> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let mime = match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            _ => {
                return Err(NormalizationError::UnsupportedFormat(format!(
                    "'{file_name}' is not a .jpg, .jpeg or .png file"
                )))
            }
        };
        Ok(ImageReference::Bytes {
            data,
            mime: mime.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ImageReference::Url(_) => "url",
            ImageReference::Bytes { .. } => "upload",
        }
    }
}

/// An image ready to be embedded in a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedImagePayload {
    RemoteUrl(String),
    /// `data` is standard base64.
    InlineData { data: String, mime: String },
}

impl NormalizedImagePayload {
    /// The value for an `image_url` content part.
    pub fn to_image_url(&self) -> String {
        match self {
            NormalizedImagePayload::RemoteUrl(url) => url.clone(),
            NormalizedImagePayload::InlineData { data, mime } => {
                format!("data:{mime};base64,{data}")
            }
        }
    }
}

pub struct ImageNormalizer {
    url_mode: UrlMode,
    http: reqwest::Client,
}

impl ImageNormalizer {
    pub fn new(url_mode: UrlMode) -> Self {
        Self::with_client(url_mode, reqwest::Client::new())
    }

    pub fn with_client(url_mode: UrlMode, http: reqwest::Client) -> Self {
        Self { url_mode, http }
    }

    pub async fn normalize(&self, reference: ImageReference) -> Result<NormalizedImagePayload> {
        match reference {
            ImageReference::Url(url) => match self.url_mode {
                UrlMode::PassThrough => {
                    debug!(%url, "passing image url through");
                    Ok(NormalizedImagePayload::RemoteUrl(url))
                }
                UrlMode::Fetch => {
                    let data = self.fetch(&url).await?;
                    normalize_off_thread(data).await
                }
            },
            ImageReference::Bytes { data, mime } => {
                debug!(%mime, bytes = data.len(), "normalizing upload");
                normalize_off_thread(data).await
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        info!(%url, "fetching image");
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| NormalizationError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NormalizationError::Fetch(format!("{url} returned {status}")));
        }
        let over_limit = || {
            NormalizationError::Fetch(format!(
                "{url} is over the {MAX_DOWNLOAD_BYTES} byte download limit"
            ))
        };
        if let Some(len) = response.content_length() {
            if len > MAX_DOWNLOAD_BYTES as u64 {
                return Err(over_limit());
            }
        }

        // Chunked bodies carry no length up front, so count as we read.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| NormalizationError::Fetch(e.to_string()))?
        {
            if body.len() + chunk.len() > MAX_DOWNLOAD_BYTES {
                return Err(over_limit());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

async fn normalize_off_thread(data: Vec<u8>) -> Result<NormalizedImagePayload> {
    tokio::task::spawn_blocking(move || normalize_bytes(&data))
        .await
        .map_err(|e| NormalizationError::InvalidImage(format!("decoder stopped: {e}")))?
}

/// Decode, flatten, bound and re-encode raw image bytes.
pub fn normalize_bytes(data: &[u8]) -> Result<NormalizedImagePayload> {
    if data.is_empty() {
        return Err(NormalizationError::EmptyInput);
    }

    let format = image::guess_format(data)
        .map_err(|e| NormalizationError::UnsupportedFormat(e.to_string()))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(NormalizationError::UnsupportedFormat(format!(
            "{format:?} images are not accepted, use JPEG or PNG"
        )));
    }

    let img = image::load_from_memory_with_format(data, format)
        .map_err(|e| NormalizationError::UnsupportedFormat(e.to_string()))?;

    check_dimensions(&img)?;
    let (width, height) = img.dimensions();

    let img = fit_within(to_rgb(img), MAX_DIMENSION);
    let jpeg = encode_jpeg(&img)?;
    if jpeg.len() > MAX_INLINE_BYTES {
        return Err(NormalizationError::TooLarge {
            bytes: jpeg.len(),
            limit: MAX_INLINE_BYTES,
        });
    }

    let (out_w, out_h) = img.dimensions();
    debug!(
        ?format,
        width,
        height,
        out_w,
        out_h,
        bytes = jpeg.len(),
        "image normalized"
    );

    Ok(NormalizedImagePayload::InlineData {
        data: general_purpose::STANDARD.encode(&jpeg),
        mime: OUTPUT_MIME.to_string(),
    })
}

/// Rejects images with no pixels. Decoders usually refuse a zero-sized header
/// themselves, which surfaces as `UnsupportedFormat` before this runs.
fn check_dimensions(img: &DynamicImage) -> Result<()> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(NormalizationError::InvalidImage(format!(
            "image has no pixels ({width}x{height})"
        )));
    }
    Ok(())
}

fn to_rgb(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Shrinks `img` so neither side exceeds `max`. Never enlarges.
fn fit_within(img: DynamicImage, max: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max && height <= max {
        return img;
    }
    img.resize(max, max, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    img.write_to(
        &mut Cursor::new(&mut jpeg),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )
    .map_err(|e| NormalizationError::Encode(e.to_string()))?;
    Ok(jpeg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    pub(crate) fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(90))
            .unwrap();
        out
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img =
            RgbaImage::from_fn(width, height, |x, _| Rgba([200, (x % 256) as u8, 40, 128]));
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    pub(crate) fn decode_payload(payload: &NormalizedImagePayload) -> DynamicImage {
        match payload {
            NormalizedImagePayload::InlineData { data, mime } => {
                assert_eq!(mime, OUTPUT_MIME);
                let bytes = general_purpose::STANDARD.decode(data).unwrap();
                assert!(!bytes.is_empty());
                assert!(bytes.len() <= MAX_INLINE_BYTES);
                image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg).unwrap()
            }
            other => panic!("expected inline data, got {other:?}"),
        }
    }

    #[test]
    fn large_jpeg_is_bounded_with_aspect_kept() {
        let payload = normalize_bytes(&jpeg_bytes(2000, 1500)).unwrap();
        assert_eq!(decode_payload(&payload).dimensions(), (1024, 768));
    }

    #[test]
    fn tall_png_is_bounded_on_the_long_side() {
        let payload = normalize_bytes(&png_bytes(300, 1800)).unwrap();
        let (w, h) = decode_payload(&payload).dimensions();
        assert_eq!(h, 1024);
        assert!(w <= 1024 && w > 0);
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let payload = normalize_bytes(&png_bytes(640, 480)).unwrap();
        assert_eq!(decode_payload(&payload).dimensions(), (640, 480));

        let payload = normalize_bytes(&jpeg_bytes(1024, 10)).unwrap();
        assert_eq!(decode_payload(&payload).dimensions(), (1024, 10));
    }

    #[test]
    fn output_is_deterministic() {
        let input = png_bytes(1200, 900);
        assert_eq!(normalize_bytes(&input).unwrap(), normalize_bytes(&input).unwrap());
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(normalize_bytes(&[]), Err(NormalizationError::EmptyInput));
    }

    #[test]
    fn garbage_and_truncated_input_is_unsupported() {
        let err = normalize_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, NormalizationError::UnsupportedFormat(_)));

        let mut truncated = png_bytes(64, 64);
        truncated.truncate(40);
        let err = normalize_bytes(&truncated).unwrap_err();
        assert!(matches!(err, NormalizationError::UnsupportedFormat(_)));
    }

    #[test]
    fn other_formats_are_unsupported() {
        let mut bmp = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut Cursor::new(&mut bmp), ImageOutputFormat::Bmp)
            .unwrap();
        let err = normalize_bytes(&bmp).unwrap_err();
        assert!(matches!(err, NormalizationError::UnsupportedFormat(_)));
    }

    #[test]
    fn upload_extension_is_checked() {
        let r = ImageReference::from_upload("Painting.JPG", vec![1]).unwrap();
        assert_eq!(
            r,
            ImageReference::Bytes {
                data: vec![1],
                mime: "image/jpeg".into()
            }
        );
        assert!(ImageReference::from_upload("scan.png", vec![1]).is_ok());
        assert!(matches!(
            ImageReference::from_upload("notes.txt", vec![1]),
            Err(NormalizationError::UnsupportedFormat(_))
        ));
        assert!(ImageReference::from_upload("no_extension", vec![1]).is_err());
    }

    #[test]
    fn inline_payload_renders_as_data_url() {
        let payload = NormalizedImagePayload::InlineData {
            data: "QUJD".into(),
            mime: "image/jpeg".into(),
        };
        assert_eq!(payload.to_image_url(), "data:image/jpeg;base64,QUJD");
    }

    #[tokio::test]
    async fn urls_pass_through_unchanged() {
        let normalizer = ImageNormalizer::new(UrlMode::PassThrough);
        let payload = normalizer
            .normalize(ImageReference::Url("https://example.com/art.png".into()))
            .await
            .unwrap();
        assert_eq!(
            payload,
            NormalizedImagePayload::RemoteUrl("https://example.com/art.png".into())
        );
    }

    #[tokio::test]
    async fn uploads_are_normalized() {
        let normalizer = ImageNormalizer::new(UrlMode::PassThrough);
        let payload = normalizer
            .normalize(ImageReference::Bytes {
                data: png_bytes(1500, 1500),
                mime: "image/png".into(),
            })
            .await
            .unwrap();
        assert_eq!(decode_payload(&payload).dimensions(), (1024, 1024));
    }

    #[test]
    fn zero_sized_images_are_invalid() {
        for (w, h) in [(0, 10), (10, 0)] {
            let err = check_dimensions(&DynamicImage::new_rgb8(w, h)).unwrap_err();
            assert!(matches!(err, NormalizationError::InvalidImage(_)), "{w}x{h}");
        }
        assert!(check_dimensions(&DynamicImage::new_rgb8(1, 1)).is_ok());
    }

    #[tokio::test]
    async fn chunked_download_stops_at_the_limit() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        const CHUNK: usize = 1024 * 1024;
        const OFFERED: usize = 100 * CHUNK;

        // Streams up to 100 MiB without a Content-Length and reports how much got out.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = concat!(
                "HTTP/1.1 200 OK\r\n",
                "Content-Type: image/jpeg\r\n",
                "Transfer-Encoding: chunked\r\n\r\n",
            );
            if socket.write_all(head.as_bytes()).await.is_err() {
                return 0;
            }
            let mut chunk = format!("{CHUNK:x}\r\n").into_bytes();
            chunk.extend(std::iter::repeat(0xAB).take(CHUNK));
            chunk.extend_from_slice(b"\r\n");
            let mut sent = 0;
            while sent < OFFERED {
                if socket.write_all(&chunk).await.is_err() {
                    break;
                }
                sent += CHUNK;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            sent
        });

        let normalizer = ImageNormalizer::new(UrlMode::Fetch);
        let err = normalizer
            .normalize(ImageReference::Url(format!("http://{addr}/huge.jpg")))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, NormalizationError::Fetch(m) if m.contains("download limit")),
            "{err:?}"
        );
        drop(normalizer);

        let sent = tokio::time::timeout(std::time::Duration::from_secs(30), server)
            .await
            .expect("server kept streaming after the client gave up")
            .unwrap();
        assert!(sent < OFFERED / 2, "server delivered {sent} bytes");
    }

    #[tokio::test]
    async fn unreachable_url_is_a_fetch_error_in_fetch_mode() {
        let normalizer = ImageNormalizer::new(UrlMode::Fetch);
        let err = normalizer
            .normalize(ImageReference::Url("http://127.0.0.1:1/art.png".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizationError::Fetch(_)));
    }
}
