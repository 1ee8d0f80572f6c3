//! Decode path for camera frames embedded in `img` telemetry lines.
//!
//! A frame arrives as one base64 token holding a JPEG stream.  The token is
//! base64-decoded here and the bytes are handed to a [`FrameDecoder`]; the
//! default [`JpegDecoder`] uses the `image` crate.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rovlink_types::{LinkError, RawImage};

/// An image codec that turns a compressed byte buffer into a colour frame.
pub trait FrameDecoder: Send + Sync {
    /// Decode `bytes` into an RGB24 frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::ImageDecode`] for corrupt or unsupported data.
    fn decode(&self, bytes: &[u8]) -> Result<RawImage, LinkError>;
}

/// JPEG decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegDecoder;

impl FrameDecoder for JpegDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RawImage, LinkError> {
        let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
            .map_err(|e| LinkError::ImageDecode(e.to_string()))?
            .to_rgb8();
        Ok(RawImage {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
        })
    }
}

/// Base64-decode `token` and decode the result with `decoder`.
pub fn decode_frame(token: &str, decoder: &dyn FrameDecoder) -> Result<RawImage, LinkError> {
    let bytes = BASE64
        .decode(token)
        .map_err(|e| LinkError::ImageDecode(format!("invalid base64 payload: {e}")))?;
    let frame = decoder.decode(&bytes)?;
    tracing::trace!(
        width = frame.width,
        height = frame.height,
        compressed = bytes.len(),
        "decoded camera frame"
    );
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_token(width: u32, height: u32) -> String {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, image::ImageFormat::Jpeg)
            .unwrap();
        BASE64.encode(buf)
    }

    #[test]
    fn decodes_base64_jpeg_into_rgb_frame() {
        let frame = decode_frame(&jpeg_token(8, 6), &JpegDecoder).unwrap();
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 6);
        assert_eq!(frame.data.len(), 8 * 6 * 3);
        // JPEG is lossy; the dominant channel must still be red.
        assert!(frame.data[0] > frame.data[1]);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode_frame("not base64!!", &JpegDecoder).unwrap_err();
        assert!(matches!(err, LinkError::ImageDecode(_)));
    }

    #[test]
    fn rejects_non_jpeg_payload() {
        let token = BASE64.encode(b"definitely not a jpeg");
        let err = decode_frame(&token, &JpegDecoder).unwrap_err();
        assert!(matches!(err, LinkError::ImageDecode(_)));
    }

    struct FixedDecoder;

    impl FrameDecoder for FixedDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<RawImage, LinkError> {
            Ok(RawImage {
                width: bytes.len() as u32,
                height: 1,
                data: bytes.to_vec(),
            })
        }
    }

    #[test]
    fn custom_decoder_receives_decoded_bytes() {
        let token = BASE64.encode([1u8, 2, 3]);
        let frame = decode_frame(&token, &FixedDecoder).unwrap();
        assert_eq!(frame.width, 3);
        assert_eq!(frame.data, vec![1, 2, 3]);
    }
}
