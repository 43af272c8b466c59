//! FrameConverter: raw source layout → canonical packed RGBA8.

use bytes::Bytes;
use starry_core::{Frame, FormatError, PixelFormat, RawFrame};

/// Normalise a raw frame: strip row padding and reorder channels to RGBA.
///
/// Pure and stateless. Fails when the geometry is empty, the format is not
/// recognised, a row does not fit in `stride`, or the buffer is too short.
pub fn convert(raw: &RawFrame) -> Result<Frame, FormatError> {
    let (width, height) = (raw.width, raw.height);
    if width == 0 || height == 0 {
        return Err(FormatError::EmptyGeometry { width, height });
    }
    let bpp = raw
        .format
        .bytes_per_pixel()
        .ok_or(FormatError::UnsupportedFormat(raw.format))?;

    let row_bytes = (width as usize)
        .checked_mul(bpp)
        .ok_or(FormatError::Overflow { width, height })?;
    if raw.stride < row_bytes {
        return Err(FormatError::StrideTooSmall { stride: raw.stride, min: row_bytes });
    }
    // The last row need not carry trailing padding.
    let needed = raw
        .stride
        .checked_mul(height as usize - 1)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or(FormatError::Overflow { width, height })?;
    if raw.data.len() < needed {
        return Err(FormatError::Truncated { len: raw.data.len(), needed });
    }

    let out_len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(4))
        .ok_or(FormatError::Overflow { width, height })?;

    // Already canonical: hand out a slice of the same buffer.
    if raw.format == PixelFormat::Rgba8 && raw.stride == row_bytes {
        return Frame::from_rgba(raw.data.slice(..out_len), width, height, raw.captured_at_ms);
    }

    let write_px: fn(&[u8], &mut Vec<u8>) = match raw.format {
        PixelFormat::Rgba8 => |px, out| out.extend_from_slice(px),
        PixelFormat::Bgra8 => |px, out| out.extend_from_slice(&[px[2], px[1], px[0], px[3]]),
        PixelFormat::Bgrx8 => |px, out| out.extend_from_slice(&[px[2], px[1], px[0], 0xFF]),
        PixelFormat::Rgb8 => |px, out| out.extend_from_slice(&[px[0], px[1], px[2], 0xFF]),
        PixelFormat::Unknown(_) => return Err(FormatError::UnsupportedFormat(raw.format)),
    };

    let mut rgba = Vec::with_capacity(out_len);
    for row in raw.data.chunks(raw.stride).take(height as usize) {
        for px in row[..row_bytes].chunks_exact(bpp) {
            write_px(px, &mut rgba);
        }
    }

    Frame::from_rgba(Bytes::from(rgba), width, height, raw.captured_at_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(format: PixelFormat, width: u32, height: u32, stride: usize, data: Vec<u8>) -> RawFrame {
        RawFrame { data: Bytes::from(data), stride, format, width, height, captured_at_ms: 7 }
    }

    #[test]
    fn bgra_with_padding_is_packed_and_swizzled() {
        // 2x2 BGRA, stride 12 (4 bytes padding per row)
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, 0xEE, 0xEE, 0xEE, 0xEE,
            9, 10, 11, 12, 13, 14, 15, 16, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let frame = convert(&raw(PixelFormat::Bgra8, 2, 2, 12, data)).unwrap();
        assert_eq!(frame.rgba(), &[3, 2, 1, 4, 7, 6, 5, 8, 11, 10, 9, 12, 15, 14, 13, 16]);
        assert_eq!(frame.timestamp_ms(), 7);
    }

    #[test]
    fn stride_boundary() {
        let exact = raw(PixelFormat::Bgra8, 3, 2, 12, vec![0; 24]);
        assert_eq!(convert(&exact).unwrap().rgba().len(), 3 * 2 * 4);

        let short = raw(PixelFormat::Bgra8, 3, 2, 11, vec![0; 24]);
        assert_eq!(
            convert(&short).unwrap_err(),
            FormatError::StrideTooSmall { stride: 11, min: 12 }
        );
    }

    #[test]
    fn zero_geometry_rejected() {
        let err = convert(&raw(PixelFormat::Bgra8, 0, 2, 0, Vec::new())).unwrap_err();
        assert_eq!(err, FormatError::EmptyGeometry { width: 0, height: 2 });
        let err = convert(&raw(PixelFormat::Bgra8, 2, 0, 8, Vec::new())).unwrap_err();
        assert_eq!(err, FormatError::EmptyGeometry { width: 2, height: 0 });
    }

    #[test]
    fn unknown_format_rejected() {
        let err = convert(&raw(PixelFormat::Unknown(87), 1, 1, 4, vec![0; 4])).unwrap_err();
        assert_eq!(err, FormatError::UnsupportedFormat(PixelFormat::Unknown(87)));
    }

    #[test]
    fn truncated_buffer_rejected() {
        // Two rows of stride 8 need 8 + 8 bytes; last row without padding is fine.
        let ok = raw(PixelFormat::Rgba8, 1, 2, 8, vec![1; 12]);
        assert_eq!(convert(&ok).unwrap().rgba(), &[1; 8]);

        let short = raw(PixelFormat::Rgba8, 1, 2, 8, vec![1; 11]);
        assert_eq!(convert(&short).unwrap_err(), FormatError::Truncated { len: 11, needed: 12 });
    }

    #[test]
    fn opaque_formats_get_full_alpha() {
        let rgb = convert(&raw(PixelFormat::Rgb8, 1, 1, 3, vec![10, 20, 30])).unwrap();
        assert_eq!(rgb.rgba(), &[10, 20, 30, 255]);

        let bgrx = convert(&raw(PixelFormat::Bgrx8, 1, 1, 4, vec![30, 20, 10, 0])).unwrap();
        assert_eq!(bgrx.rgba(), &[10, 20, 30, 255]);
    }

    #[test]
    fn packed_rgba_shares_the_source_buffer() {
        let source = raw(PixelFormat::Rgba8, 2, 1, 8, vec![5; 8]);
        let frame = convert(&source).unwrap();
        assert_eq!(frame.rgba().as_ptr(), source.data.as_ptr());
    }
}
