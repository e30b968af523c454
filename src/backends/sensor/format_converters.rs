// SPDX-License-Identifier: GPL-3.0-only
//! Pixel unpacking for the sensor's native V4L2 formats
//!
//! Infrared nodes deliver 16-bit or 10-bit packed samples, which are widened
//! to float over [0, 65535]. Color nodes deliver packed 4:2:2 or Bayer GRBG,
//! which are expanded to packed BGRX. Outputs are written into caller-owned
//! vectors so their allocations survive across frames.

/// Byte order of a packed 4:2:2 format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packed422 {
    /// Y0 U Y1 V
    Yuyv,
    /// U Y0 V Y1
    Uyvy,
}

/// Convert packed YUV 4:2:2 to BGRX
///
/// Each 4-byte group encodes 2 pixels. Uses BT.601 coefficients.
pub fn packed_422_to_bgrx(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    order: Packed422,
    out: &mut Vec<u8>,
) {
    let w = width as usize;
    let row_len = w * 2;
    let stride = stride.max(row_len);
    out.clear();
    out.reserve(w * height as usize * 4);

    for row in data.chunks(stride).take(height as usize) {
        let Some(row) = row.get(..row_len) else {
            break;
        };
        for chunk in row.chunks_exact(4) {
            let (y0, u, y1, v) = match order {
                Packed422::Yuyv => (chunk[0], chunk[1], chunk[2], chunk[3]),
                Packed422::Uyvy => (chunk[1], chunk[0], chunk[3], chunk[2]),
            };
            let u = u as f32 - 128.0;
            let v = v as f32 - 128.0;

            for y in [y0 as f32, y1 as f32] {
                let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
                let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
                let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
                out.extend_from_slice(&[b, g, r, 255]);
            }
        }
    }
}

/// Convert Bayer GRBG to BGRX using a nearest-neighbor demosaic
///
/// ```text
/// G R
/// B G
/// ```
/// Each 2x2 block produces 4 pixels with the same color.
pub fn grbg_to_bgrx(data: &[u8], width: u32, height: u32, out: &mut Vec<u8>) {
    let w = width as usize;
    let h = height as usize;
    out.clear();
    out.resize(w * h * 4, 0);
    if data.len() < w * h {
        out.clear();
        return;
    }

    for y in (0..h.saturating_sub(1)).step_by(2) {
        for x in (0..w.saturating_sub(1)).step_by(2) {
            let g0 = data[y * w + x] as u32;
            let r = data[y * w + x + 1];
            let b = data[(y + 1) * w + x];
            let g1 = data[(y + 1) * w + x + 1] as u32;
            let g = ((g0 + g1) / 2) as u8;

            for dy in 0..2 {
                for dx in 0..2 {
                    let idx = ((y + dy) * w + (x + dx)) * 4;
                    out[idx..idx + 4].copy_from_slice(&[b, g, r, 255]);
                }
            }
        }
    }
}

/// Unpack Y10B (10-bit packed) samples to 16-bit values
///
/// Y10B packs 4 10-bit values into 5 bytes:
/// ```text
/// [A9:A2][B9:B2][C9:C2][D9:D2][D1:D0,C1:C0,B1:B0,A1:A0]
/// ```
///
/// Returns raw 10-bit values (0-1023 range).
pub fn unpack_y10b(data: &[u8], width: u32, height: u32) -> Vec<u16> {
    let pixel_count = (width * height) as usize;
    let mut output = Vec::with_capacity(pixel_count);

    for chunk in data.chunks_exact(5) {
        let low = chunk[4] as u16;
        for (i, &high) in chunk[..4].iter().enumerate() {
            if output.len() >= pixel_count {
                return output;
            }
            output.push(((high as u16) << 2) | ((low >> (2 * i)) & 0x03));
        }
    }

    output
}

/// Unpack Y10B infrared to float samples over [0, 65535]
///
/// 10-bit values are shifted left by 6 bits to use the full 16-bit range.
pub fn y10b_to_ir(data: &[u8], width: u32, height: u32, out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        unpack_y10b(data, width, height)
            .into_iter()
            .map(|v| (v << 6) as f32),
    );
}

/// Widen little-endian Y16 infrared to float samples
pub fn y16_to_ir(data: &[u8], width: u32, height: u32, stride: usize, out: &mut Vec<f32>) {
    let w = width as usize;
    let stride = stride.max(w * 2);
    out.clear();
    out.reserve(w * height as usize);

    for row in data.chunks(stride).take(height as usize) {
        out.extend(
            row.chunks_exact(2)
                .take(w)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as f32),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_y10b_unpacking() {
        // Test data: 4 pixels A=1023, B=512, C=256, D=0
        // Byte 4 = (D[1:0]<<6) | (C[1:0]<<4) | (B[1:0]<<2) | A[1:0] = 3
        let raw_data = vec![255u8, 128, 64, 0, 3];
        let ir = unpack_y10b(&raw_data, 2, 2);

        assert_eq!(ir, vec![1023, 512, 256, 0]);
    }

    #[test]
    fn test_y10b_to_ir_scales_to_16_bit() {
        let raw_data = vec![255u8, 128, 64, 0, 3];
        let mut ir = Vec::new();
        y10b_to_ir(&raw_data, 2, 2, &mut ir);

        assert_eq!(ir, vec![(1023 << 6) as f32, (512 << 6) as f32, (256 << 6) as f32, 0.0]);
    }

    #[test]
    fn test_y16_skips_row_padding() {
        // 2x2 image with 2 bytes of padding per row
        let data = [0xFF, 0xFF, 0x00, 0x01, 0xAA, 0xAA, 0x02, 0x00, 0x03, 0x00, 0xAA, 0xAA];
        let mut ir = Vec::new();
        y16_to_ir(&data, 2, 2, 6, &mut ir);

        assert_eq!(ir, vec![65535.0, 256.0, 2.0, 3.0]);
    }

    #[test]
    fn test_uyvy_white_to_bgrx() {
        // Pure white in YUV (Y=255, U=128, V=128)
        let uyvy = vec![128u8, 255, 128, 255];
        let mut bgrx = Vec::new();
        packed_422_to_bgrx(&uyvy, 2, 1, 4, Packed422::Uyvy, &mut bgrx);

        assert_eq!(bgrx.len(), 8);
        assert!(bgrx[..3].iter().all(|&c| c > 250));
        assert_eq!(bgrx[3], 255);
    }

    #[test]
    fn test_yuyv_order() {
        // Y0=10, U=128, Y1=200, V=128: neutral chroma, two gray pixels
        let yuyv = vec![10u8, 128, 200, 128];
        let mut bgrx = Vec::new();
        packed_422_to_bgrx(&yuyv, 2, 1, 4, Packed422::Yuyv, &mut bgrx);

        assert_eq!(bgrx[0], 10);
        assert_eq!(bgrx[4], 200);
    }

    #[test]
    fn test_grbg_block_color() {
        // G=100 R=200 / B=50 G=100
        let data = vec![100u8, 200, 50, 100];
        let mut bgrx = Vec::new();
        grbg_to_bgrx(&data, 2, 2, &mut bgrx);

        assert_eq!(bgrx.len(), 16);
        for px in bgrx.chunks_exact(4) {
            assert_eq!(px, &[50, 100, 200, 255]);
        }
    }
}
