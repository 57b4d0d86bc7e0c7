// PIXEL - YCbCr 4:2:0 to RGB24
//
// The card composites MPEG pictures as packed RGB. Codecs that do not bring
// their own converter get this one through MpegCodec::frame_to_rgb.

use std::sync::OnceLock;

use crate::codec::VideoFrame;

/// MPEG-1 (BT.601) luma weights: Wr, Wb. Wg = 1 - Wr - Wb.
const BT601_WR: f32 = 0.299;
const BT601_WB: f32 = 0.114;

static BT601: OnceLock<Rgb24Converter> = OnceLock::new();

fn yuv_to_rgb_matrix(wr: f32, wb: f32) -> [[f32; 3]; 3] {
    let wg = 1.0 - wr - wb;

    let cr_r = 2.0 * (1.0 - wr);
    let cb_g = -2.0 * wb * (1.0 - wb) / wg;
    let cr_g = -2.0 * wr * (1.0 - wr) / wg;
    let cb_b = 2.0 * (1.0 - wb);

    [
        [1.0, 0.0, cr_r],
        [1.0, cb_g, cr_g],
        [1.0, cb_b, 0.0],
    ]
}

// ============================================================================
// Converter
// ============================================================================

pub struct Rgb24Converter {
    // Pre-computed lookup tables, 8-bit fixed point
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl Rgb24Converter {
    pub fn bt601() -> Self {
        let mut converter = Self {
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        converter.build_tables(yuv_to_rgb_matrix(BT601_WR, BT601_WB));
        converter
    }

    /// Process-wide BT.601 converter, built on first use
    pub fn shared() -> &'static Self {
        BT601.get_or_init(Self::bt601)
    }

    fn build_tables(&mut self, matrix: [[f32; 3]; 3]) {
        for i in 0..256 {
            let y = (i as i32) - 16;
            let uv = (i as f32) - 128.0;

            // Studio swing: 219 luma steps, 224 chroma steps
            self.y_table[i] = (y * 298) >> 8;
            let uv_scale = 255.0 / 224.0;
            self.u_table_g[i] = (uv * uv_scale * matrix[1][1] * 256.0) as i32;
            self.u_table_b[i] = (uv * uv_scale * matrix[2][1] * 256.0) as i32;
            self.v_table_r[i] = (uv * uv_scale * matrix[0][2] * 256.0) as i32;
            self.v_table_g[i] = (uv * uv_scale * matrix[1][2] * 256.0) as i32;
        }
    }

    /// Convert `src` into `rgb`, writing `stride` bytes per row.
    ///
    /// Rows or columns that do not fit into `rgb` are skipped.
    pub fn convert(&self, src: &VideoFrame, rgb: &mut [u8], stride: usize) {
        let width = src.width;
        let uv_width = VideoFrame::chroma_len(width);
        let row_bytes = (width * 3).min(stride);

        for y in 0..src.height {
            let dst_row = y * stride;
            if dst_row + row_bytes > rgb.len() {
                break;
            }
            let y_row = y * width;
            let uv_row = (y / 2) * uv_width;

            for x in 0..row_bytes / 3 {
                let y_val = src.y[y_row + x] as usize;
                let uv_idx = uv_row + x / 2;
                let u_val = src.cb[uv_idx] as usize;
                let v_val = src.cr[uv_idx] as usize;

                let y_contrib = self.y_table[y_val];
                let r = (y_contrib + (self.v_table_r[v_val] >> 8)).clamp(0, 255) as u8;
                let g = (y_contrib + (self.u_table_g[u_val] >> 8) + (self.v_table_g[v_val] >> 8))
                    .clamp(0, 255) as u8;
                let b = (y_contrib + (self.u_table_b[u_val] >> 8)).clamp(0, 255) as u8;

                let dst_idx = dst_row + x * 3;
                rgb[dst_idx] = r;
                rgb[dst_idx + 1] = g;
                rgb[dst_idx + 2] = b;
            }
        }
    }
}
