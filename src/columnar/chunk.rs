//! Compressed chunk encodings.
//!
//! A chunk is `{encoding, rows, packed bytes}`. Every encoding decodes to `i64`
//! or `f64` and reserves an in-band NA pattern:
//!
//! | Encoding        | Row value                       | NA pattern          |
//! |-----------------|---------------------------------|---------------------|
//! | `ConstInt`      | `value`                         | none                |
//! | `ConstReal`     | `value`                         | `value` is NaN      |
//! | `Scaled{w,e,b}` | `(raw + b) * 10^e`, raw `w` bytes | raw = MIN of width |
//! | `Int64`         | raw `i64`                       | `i64::MIN`          |
//! | `Real32`        | raw `f32`                       | NaN                 |
//! | `Real64`        | raw `f64`                       | NaN                 |
//!
//! Wire format, little endian: `[kind u8][header][packed rows]`. Constant
//! chunks carry their row count in the header; every other encoding derives it
//! from the payload length and the row width.

use super::new_chunk::NewChunk;
use crate::error::{FabricError, FabricResult};
use serde::{Deserialize, Serialize};

/// Integer NA sentinel returned by [`Chunk::decode_int`].
pub const INT_NA: i64 = i64::MIN;

/// Largest decimal exponent magnitude a scaled encoding uses.
pub const MAX_SCALE_DIGITS: i32 = 18;

const KIND_CONST_INT: u8 = 0;
const KIND_CONST_REAL: u8 = 1;
const KIND_SCALED: u8 = 2;
const KIND_INT64: u8 = 3;
const KIND_REAL32: u8 = 4;
const KIND_REAL64: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Encoding {
    ConstInt { value: i64 },
    ConstReal { value: f64 },
    /// Signed `width`-byte integers (1, 2 or 4).
    Scaled { width: u8, exponent: i32, bias: i64 },
    Int64,
    Real32,
    Real64,
}

impl Encoding {
    /// Bytes per row; 0 for constants.
    pub fn row_width(&self) -> usize {
        match self {
            Encoding::ConstInt { .. } | Encoding::ConstReal { .. } => 0,
            Encoding::Scaled { width, .. } => *width as usize,
            Encoding::Int64 | Encoding::Real64 => 8,
            Encoding::Real32 => 4,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::ConstInt { .. } => "const-int",
            Encoding::ConstReal { .. } => "const-real",
            Encoding::Scaled { width: 1, .. } => "scaled-8",
            Encoding::Scaled { width: 2, .. } => "scaled-16",
            Encoding::Scaled { .. } => "scaled-32",
            Encoding::Int64 => "int64",
            Encoding::Real32 => "real32",
            Encoding::Real64 => "real64",
        }
    }
}

/// Smallest and largest non-NA raw value of a scaled width.
pub fn scaled_range(width: u8) -> (i64, i64) {
    match width {
        1 => (i8::MIN as i64 + 1, i8::MAX as i64),
        2 => (i16::MIN as i64 + 1, i16::MAX as i64),
        _ => (i32::MIN as i64 + 1, i32::MAX as i64),
    }
}

fn scaled_na(width: u8) -> i64 {
    scaled_range(width).0 - 1
}

pub(crate) fn pow10(digits: i32) -> Option<i64> {
    10i64.checked_pow(u32::try_from(digits).ok()?)
}

/// `units * 10^exponent` as a double, exact whenever the decimal is.
pub(crate) fn decimal_to_f64(units: i64, exponent: i32) -> f64 {
    if exponent >= 0 {
        units as f64 * 10f64.powi(exponent)
    } else {
        units as f64 / 10f64.powi(-exponent)
    }
}

/// Expresses `value` as `units * 10^exponent` with the given exponent, if the
/// decimal reproduces `value` exactly.
fn f64_to_units(value: f64, exponent: i32) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let scaled = if exponent >= 0 {
        value / 10f64.powi(exponent)
    } else {
        value * 10f64.powi(-exponent)
    };
    let units = scaled.round();
    if units.abs() >= 9.007_199_254_740_992e15 {
        return None;
    }
    let units = units as i64;
    (decimal_to_f64(units, exponent).to_bits() == value.to_bits()).then_some(units)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    encoding: Encoding,
    len: usize,
    data: Vec<u8>,
}

impl Chunk {
    pub fn constant_int(value: i64, len: usize) -> Self {
        Self {
            encoding: Encoding::ConstInt { value },
            len,
            data: Vec::new(),
        }
    }

    pub fn constant_real(value: f64, len: usize) -> Self {
        Self {
            encoding: Encoding::ConstReal { value },
            len,
            data: Vec::new(),
        }
    }

    /// Zero-filled chunk of a packed encoding. Zero bytes decode to
    /// `bias * 10^exponent` for scaled chunks and 0 otherwise.
    pub(crate) fn zeroed(encoding: Encoding, len: usize) -> Self {
        Self {
            encoding,
            len,
            data: vec![0; len * encoding.row_width()],
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Encoded size in bytes, header excluded.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    fn raw(&self, row: usize) -> i64 {
        let w = self.encoding.row_width();
        let b = &self.data[row * w..row * w + w];
        match w {
            1 => b[0] as i8 as i64,
            2 => i16::from_le_bytes([b[0], b[1]]) as i64,
            4 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
            _ => i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        }
    }

    fn write_raw(&mut self, row: usize, raw: i64) {
        let w = self.encoding.row_width();
        let out = &mut self.data[row * w..row * w + w];
        match w {
            1 => out.copy_from_slice(&(raw as i8).to_le_bytes()),
            2 => out.copy_from_slice(&(raw as i16).to_le_bytes()),
            4 => out.copy_from_slice(&(raw as i32).to_le_bytes()),
            _ => out.copy_from_slice(&raw.to_le_bytes()),
        }
    }

    fn real(&self, row: usize) -> f64 {
        match self.encoding {
            Encoding::Real32 => {
                let b = &self.data[row * 4..row * 4 + 4];
                f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64
            }
            _ => f64::from_bits(self.raw(row) as u64),
        }
    }

    fn write_real(&mut self, row: usize, value: f64) {
        match self.encoding {
            Encoding::Real32 => {
                self.data[row * 4..row * 4 + 4].copy_from_slice(&(value as f32).to_le_bytes())
            }
            _ => self.write_raw(row, value.to_bits() as i64),
        }
    }

    pub fn is_na(&self, row: usize) -> bool {
        match self.encoding {
            Encoding::ConstInt { .. } => false,
            Encoding::ConstReal { value } => value.is_nan(),
            Encoding::Scaled { width, .. } => self.raw(row) == scaled_na(width),
            Encoding::Int64 => self.raw(row) == INT_NA,
            Encoding::Real32 | Encoding::Real64 => self.real(row).is_nan(),
        }
    }

    /// Row value as an integer, [`INT_NA`] when missing. Fractional values
    /// truncate toward zero.
    pub fn decode_int(&self, row: usize) -> i64 {
        if self.is_na(row) {
            return INT_NA;
        }
        match self.encoding {
            Encoding::ConstInt { value } => value,
            Encoding::ConstReal { value } => value as i64,
            Encoding::Scaled { exponent, bias, .. } if exponent >= 0 => {
                let units = self.raw(row) + bias;
                pow10(exponent)
                    .and_then(|p| units.checked_mul(p))
                    .unwrap_or_else(|| decimal_to_f64(units, exponent) as i64)
            }
            Encoding::Scaled { exponent, bias, .. } => {
                let units = self.raw(row) + bias;
                pow10(-exponent).map(|p| units / p).unwrap_or(0)
            }
            Encoding::Int64 => self.raw(row),
            Encoding::Real32 | Encoding::Real64 => self.real(row) as i64,
        }
    }

    /// Row value as a double, NaN when missing.
    pub fn decode_float(&self, row: usize) -> f64 {
        if self.is_na(row) {
            return f64::NAN;
        }
        match self.encoding {
            Encoding::ConstInt { value } => value as f64,
            Encoding::ConstReal { value } => value,
            Encoding::Scaled { exponent, bias, .. } => {
                decimal_to_f64(self.raw(row) + bias, exponent)
            }
            Encoding::Int64 => self.raw(row) as f64,
            Encoding::Real32 | Encoding::Real64 => self.real(row),
        }
    }

    /// Overwrites `row` with `value` if this encoding holds it losslessly.
    /// Leaves the chunk untouched and returns false otherwise.
    pub fn try_encode_int(&mut self, row: usize, value: i64) -> bool {
        if row >= self.len {
            return false;
        }
        match self.encoding {
            Encoding::ConstInt { value: c } => value == c,
            Encoding::ConstReal { value: c } => {
                (value as f64) == c && (c as i64) == value && value != INT_NA
            }
            Encoding::Scaled { width, exponent, bias } => {
                let units = if exponent >= 0 {
                    match pow10(exponent) {
                        Some(p) if value % p == 0 => Some(value / p),
                        _ => None,
                    }
                } else {
                    pow10(-exponent).and_then(|p| value.checked_mul(p))
                };
                self.store_scaled(row, width, bias, units)
            }
            Encoding::Int64 => {
                if value == INT_NA {
                    return false;
                }
                self.write_raw(row, value);
                true
            }
            Encoding::Real32 => {
                let v = value as f64;
                if (v as f32) as f64 != v || v as i64 != value {
                    return false;
                }
                self.write_real(row, v);
                true
            }
            Encoding::Real64 => {
                let v = value as f64;
                if v as i64 != value || value == INT_NA {
                    return false;
                }
                self.write_real(row, v);
                true
            }
        }
    }

    /// Overwrites `row` with `value` if this encoding holds it losslessly.
    /// NaN is not a value; use [`Chunk::try_encode_na`].
    pub fn try_encode_float(&mut self, row: usize, value: f64) -> bool {
        if row >= self.len || value.is_nan() {
            return false;
        }
        match self.encoding {
            Encoding::ConstInt { value: c } => value == c as f64 && value as i64 == c,
            Encoding::ConstReal { value: c } => value.to_bits() == c.to_bits(),
            Encoding::Scaled { width, exponent, bias } => {
                let units = f64_to_units(value, exponent);
                self.store_scaled(row, width, bias, units)
            }
            Encoding::Int64 => {
                if value.fract() != 0.0 || value.abs() >= 9.2e18 || value as i64 == INT_NA {
                    return false;
                }
                self.write_raw(row, value as i64);
                true
            }
            Encoding::Real32 => {
                if (value as f32) as f64 != value {
                    return false;
                }
                self.write_real(row, value);
                true
            }
            Encoding::Real64 => {
                self.write_real(row, value);
                true
            }
        }
    }

    fn store_scaled(&mut self, row: usize, width: u8, bias: i64, units: Option<i64>) -> bool {
        let (lo, hi) = scaled_range(width);
        match units.and_then(|u| u.checked_sub(bias)) {
            Some(raw) if raw >= lo && raw <= hi => {
                self.write_raw(row, raw);
                true
            }
            _ => false,
        }
    }

    /// Marks `row` missing. Constant chunks cannot hold a missing row.
    pub fn try_encode_na(&mut self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        match self.encoding {
            Encoding::ConstInt { .. } => false,
            Encoding::ConstReal { value } => value.is_nan(),
            Encoding::Scaled { width, .. } => {
                self.write_raw(row, scaled_na(width));
                true
            }
            Encoding::Int64 => {
                self.write_raw(row, INT_NA);
                true
            }
            Encoding::Real32 | Encoding::Real64 => {
                self.write_real(row, f64::NAN);
                true
            }
        }
    }

    /// Expands every row into `into`, preserving decimal form where the
    /// encoding has one.
    pub fn inflate(&self, into: &mut NewChunk) {
        for row in 0..self.len {
            if self.is_na(row) {
                into.append_na();
                continue;
            }
            match self.encoding {
                Encoding::ConstInt { value } => into.append_int(value),
                Encoding::Scaled { exponent, bias, .. } => {
                    into.append_decimal(self.raw(row) + bias, exponent)
                }
                Encoding::Int64 => into.append_int(self.raw(row)),
                Encoding::ConstReal { .. } | Encoding::Real32 | Encoding::Real64 => {
                    into.append_real(self.decode_float(row))
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 16 + self.data.len());
        match self.encoding {
            Encoding::ConstInt { value } => {
                out.push(KIND_CONST_INT);
                out.extend_from_slice(&value.to_le_bytes());
                out.extend_from_slice(&(self.len as u64).to_le_bytes());
            }
            Encoding::ConstReal { value } => {
                out.push(KIND_CONST_REAL);
                out.extend_from_slice(&value.to_bits().to_le_bytes());
                out.extend_from_slice(&(self.len as u64).to_le_bytes());
            }
            Encoding::Scaled { width, exponent, bias } => {
                out.push(KIND_SCALED);
                out.push(width);
                out.extend_from_slice(&exponent.to_le_bytes());
                out.extend_from_slice(&bias.to_le_bytes());
            }
            Encoding::Int64 => out.push(KIND_INT64),
            Encoding::Real32 => out.push(KIND_REAL32),
            Encoding::Real64 => out.push(KIND_REAL64),
        }
        out.extend_from_slice(&self.data);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> FabricResult<Self> {
        let (&kind, rest) = bytes
            .split_first()
            .ok_or_else(|| FabricError::Codec("empty chunk buffer".to_string()))?;

        let (encoding, payload) = match kind {
            KIND_CONST_INT | KIND_CONST_REAL => {
                let (value, len) = read_const_header(rest)?;
                let encoding = if kind == KIND_CONST_INT {
                    Encoding::ConstInt {
                        value: value as i64,
                    }
                } else {
                    Encoding::ConstReal {
                        value: f64::from_bits(value),
                    }
                };
                return Ok(Self {
                    encoding,
                    len: len as usize,
                    data: Vec::new(),
                });
            }
            KIND_SCALED => {
                if rest.len() < 13 {
                    return Err(FabricError::Codec("truncated scaled header".to_string()));
                }
                let width = rest[0];
                if !matches!(width, 1 | 2 | 4) {
                    return Err(FabricError::Codec(format!("bad scaled width {}", width)));
                }
                let exponent = i32::from_le_bytes(le_array(&rest[1..5]));
                let bias = i64::from_le_bytes(le_array(&rest[5..13]));
                let (min_raw, max_raw) = scaled_range(width);
                if bias.checked_add(min_raw).is_none() || bias.checked_add(max_raw).is_none() {
                    return Err(FabricError::Codec(format!(
                        "scaled bias {} overflows a {}-byte range",
                        bias, width
                    )));
                }
                (
                    Encoding::Scaled {
                        width,
                        exponent,
                        bias,
                    },
                    &rest[13..],
                )
            }
            KIND_INT64 => (Encoding::Int64, rest),
            KIND_REAL32 => (Encoding::Real32, rest),
            KIND_REAL64 => (Encoding::Real64, rest),
            other => {
                return Err(FabricError::Codec(format!("unknown chunk kind {}", other)));
            }
        };

        let width = encoding.row_width();
        if payload.len() % width != 0 {
            return Err(FabricError::Codec(format!(
                "{} payload of {} bytes is not a multiple of {}",
                encoding.name(),
                payload.len(),
                width
            )));
        }
        Ok(Self {
            encoding,
            len: payload.len() / width,
            data: payload.to_vec(),
        })
    }
}

fn read_const_header(rest: &[u8]) -> FabricResult<(u64, u64)> {
    if rest.len() != 16 {
        return Err(FabricError::Codec(format!(
            "constant header must be 16 bytes, got {}",
            rest.len()
        )));
    }
    Ok((
        u64::from_le_bytes(le_array(&rest[..8])),
        u64::from_le_bytes(le_array(&rest[8..16])),
    ))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
