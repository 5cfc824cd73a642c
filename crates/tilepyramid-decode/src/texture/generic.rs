//! Fallback decoding through the `image` crate.

use crate::{error::DecodeResult, texture::DecodedImage};

/// Decode any image the `image` crate recognises (JPEG, PNG) to RGBA.
///
/// # Errors
///
/// Returns [`DecodeError::Image`](crate::DecodeError::Image) if the data is
/// not a decodable image.
pub fn decode_generic_to_rgba(data: &[u8]) -> DecodeResult<DecodedImage> {
    let image = image::load_from_memory(data)?.to_rgba8();
    let (width, height) = image.dimensions();
    Ok(DecodedImage::new(image.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;
    use proptest::prelude::*;

    fn png_bytes() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let decoded = decode_generic_to_rgba(&png_bytes()).unwrap();
        assert_eq!((decoded.width, decoded.height), (3, 2));
        assert!(decoded.is_valid());
        assert_eq!(&decoded.data[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage() {
        let result = decode_generic_to_rgba(&[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(DecodeError::Image(_))));
    }

    proptest! {
        #[test]
        fn test_arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = decode_generic_to_rgba(&data);
        }
    }
}
