// Copyright 2026 ThermoLink Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Binary frame classification and thermal matrix decoding.
//!
//! The device sends two payload kinds over the same WebSocket with no
//! envelope header: fixed-size thermal sensor matrices and JPEG camera
//! frames. Message length is the only discriminator: exactly 3072 bytes
//! is a thermal matrix, everything else is an encoded image. A camera
//! frame that happens to be exactly 3072 bytes long is indistinguishable
//! from thermal data and will be misclassified; the firmware protocol
//! carries no tag byte to resolve this.

/// Thermal sensor columns (MLX90640 frames are 32 wide).
pub const THERMAL_COLS: usize = 32;

/// Thermal sensor rows.
pub const THERMAL_ROWS: usize = 24;

/// Values per thermal frame.
pub const THERMAL_VALUES: usize = THERMAL_COLS * THERMAL_ROWS;

/// Exact wire length of a thermal payload: 768 little-endian f32s.
pub const THERMAL_PAYLOAD_LEN: usize = THERMAL_VALUES * 4;

/// A decoded 32x24 grid of temperature readings, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalMatrix {
    values: Vec<f32>,
}

impl ThermalMatrix {
    /// Decode a thermal matrix from its wire form.
    ///
    /// Returns `None` unless the payload is exactly [`THERMAL_PAYLOAD_LEN`]
    /// bytes; decoding itself cannot fail.
    pub fn from_le_bytes(payload: &[u8]) -> Option<Self> {
        if payload.len() != THERMAL_PAYLOAD_LEN {
            return None;
        }

        let mut values = Vec::with_capacity(THERMAL_VALUES);
        for chunk in payload.chunks_exact(4) {
            values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        Some(Self { values })
    }

    /// Re-encode to the wire form.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(THERMAL_PAYLOAD_LEN);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Temperature at `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if `row >= 24` or `col >= 32`.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        assert!(row < THERMAL_ROWS && col < THERMAL_COLS);
        self.values[row * THERMAL_COLS + col]
    }

    /// All values in row-major order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Lowest reading in the frame (NaN readings are skipped).
    pub fn min(&self) -> f32 {
        self.values.iter().copied().fold(f32::INFINITY, f32::min)
    }

    /// Highest reading in the frame (NaN readings are skipped).
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }
}

/// A classified binary payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A 32x24 thermal matrix.
    Thermal(ThermalMatrix),
    /// An encoded still image (JPEG from the camera); decoding is the
    /// image codec's job, not ours.
    Camera(Vec<u8>),
}

/// Classify a binary payload by length alone.
pub fn classify(payload: Vec<u8>) -> DecodedFrame {
    match ThermalMatrix::from_le_bytes(&payload) {
        Some(matrix) => DecodedFrame::Thermal(matrix),
        None => DecodedFrame::Camera(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thermal_payload(value: f32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(THERMAL_PAYLOAD_LEN);
        for _ in 0..THERMAL_VALUES {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        payload
    }

    #[test]
    fn test_wrong_sizes_are_never_thermal() {
        for len in [0, 1, 100, 3071, 3073, 4096] {
            let payload = vec![0u8; len];
            assert!(ThermalMatrix::from_le_bytes(&payload).is_none());
            assert!(matches!(classify(payload), DecodedFrame::Camera(_)));
        }
    }

    #[test]
    fn test_uniform_frame_decodes_exactly() {
        let decoded = match classify(thermal_payload(25.0)) {
            DecodedFrame::Thermal(m) => m,
            other => panic!("expected thermal, got {:?}", other),
        };

        assert_eq!(decoded.values().len(), THERMAL_VALUES);
        assert!(decoded.values().iter().all(|&v| v == 25.0));
    }

    #[test]
    fn test_roundtrip_is_bit_exact() {
        let mut payload = Vec::with_capacity(THERMAL_PAYLOAD_LEN);
        for i in 0..THERMAL_VALUES {
            payload.extend_from_slice(&(i as f32 * 0.125 - 40.0).to_le_bytes());
        }

        let matrix = ThermalMatrix::from_le_bytes(&payload).unwrap();
        assert_eq!(matrix.to_le_bytes(), payload);

        let again = ThermalMatrix::from_le_bytes(&matrix.to_le_bytes()).unwrap();
        assert_eq!(again, matrix);
    }

    #[test]
    fn test_row_major_indexing() {
        let mut payload = Vec::with_capacity(THERMAL_PAYLOAD_LEN);
        for i in 0..THERMAL_VALUES {
            payload.extend_from_slice(&(i as f32).to_le_bytes());
        }

        let matrix = ThermalMatrix::from_le_bytes(&payload).unwrap();
        assert_eq!(matrix.at(0, 0), 0.0);
        assert_eq!(matrix.at(0, 31), 31.0);
        assert_eq!(matrix.at(1, 0), 32.0);
        assert_eq!(matrix.at(23, 31), 767.0);
    }

    #[test]
    fn test_min_max() {
        let mut payload = thermal_payload(20.0);
        payload.splice(0..4, 36.6f32.to_le_bytes());
        payload.splice(4..8, (-5.0f32).to_le_bytes());

        let matrix = ThermalMatrix::from_le_bytes(&payload).unwrap();
        assert_eq!(matrix.max(), 36.6);
        assert_eq!(matrix.min(), -5.0);
    }

    #[test]
    fn test_ambiguous_camera_frame_is_misclassified_as_thermal() {
        // Inherent protocol ambiguity: a 3072-byte JPEG cannot be told apart.
        let payload = vec![0xFFu8; THERMAL_PAYLOAD_LEN];
        assert!(matches!(classify(payload), DecodedFrame::Thermal(_)));
    }
}
