use super::chunk::{decimal_to_f64, pow10, scaled_range, Chunk, Encoding, MAX_SCALE_DIGITS};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Datum {
    Na,
    /// `mantissa * 10^exponent`
    Decimal { mantissa: i64, exponent: i32 },
    Real(f64),
}

/// Per-chunk statistics gathered while staging. Merging is associative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub rows: u64,
    pub na: u64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub is_int: bool,
}

impl Default for ChunkSummary {
    fn default() -> Self {
        Self {
            rows: 0,
            na: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sum: 0.0,
            is_int: true,
        }
    }
}

impl ChunkSummary {
    pub fn merge(&mut self, other: &ChunkSummary) {
        self.rows += other.rows;
        self.na += other.na;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.is_int &= other.is_int;
    }

    pub fn observed(&self) -> u64 {
        self.rows - self.na
    }
}

/// Growable staging buffer for one chunk's rows.
///
/// Exclusively owned by whoever is building the chunk until
/// [`NewChunk::compress`] freezes it.
#[derive(Debug, Clone, Default)]
pub struct NewChunk {
    rows: Vec<Datum>,
}

impl NewChunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(rows: usize) -> Self {
        Self {
            rows: Vec::with_capacity(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn append_int(&mut self, value: i64) {
        self.append_decimal(value, 0);
    }

    pub fn append_decimal(&mut self, mantissa: i64, exponent: i32) {
        let (mantissa, exponent) = normalize(mantissa, exponent);
        self.rows.push(Datum::Decimal { mantissa, exponent });
    }

    /// Appends a double; NaN is stored as missing.
    pub fn append_real(&mut self, value: f64) {
        if value.is_nan() {
            self.rows.push(Datum::Na);
        } else {
            self.rows.push(Datum::Real(value));
        }
    }

    pub fn append_na(&mut self) {
        self.rows.push(Datum::Na);
    }

    pub fn is_na(&self, row: usize) -> bool {
        matches!(self.rows.get(row), Some(Datum::Na) | None)
    }

    pub fn at(&self, row: usize) -> f64 {
        self.rows.get(row).map(datum_f64).unwrap_or(f64::NAN)
    }

    pub fn summary(&self) -> ChunkSummary {
        let mut summary = ChunkSummary {
            rows: self.rows.len() as u64,
            ..ChunkSummary::default()
        };
        for datum in &self.rows {
            match datum {
                Datum::Na => summary.na += 1,
                Datum::Decimal { exponent, .. } => {
                    summary.is_int &= *exponent >= 0;
                    observe(&mut summary, datum_f64(datum));
                }
                Datum::Real(value) => {
                    summary.is_int &= value.fract() == 0.0;
                    observe(&mut summary, *value);
                }
            }
        }
        summary
    }

    /// Freezes the rows into the narrowest encoding that reproduces every
    /// value exactly.
    ///
    /// Order of preference: constant, scaled 1/2/4-byte integers (plain
    /// integers are scaled with exponent 0), `Int64`, `Real32`, `Real64`.
    pub fn compress(&self) -> Chunk {
        let len = self.rows.len();
        if len == 0 {
            return Chunk::constant_int(0, 0);
        }
        if self.rows.iter().all(|d| matches!(d, Datum::Na)) {
            return Chunk::constant_real(f64::NAN, len);
        }

        let chunk = match self.as_decimals() {
            Some(decimals) => self
                .decimal_encoding(&decimals)
                .unwrap_or_else(|| self.real_encoding()),
            None => self.real_encoding(),
        };
        tracing::trace!("Compressed {} rows as {}", len, chunk.encoding().name());
        chunk
    }

    /// Every row in decimal form, or `None` if some real has no exact short
    /// decimal.
    fn as_decimals(&self) -> Option<Vec<Option<(i64, i32)>>> {
        self.rows
            .iter()
            .map(|d| match *d {
                Datum::Na => Some(None),
                Datum::Decimal { mantissa, exponent } => Some(Some((mantissa, exponent))),
                Datum::Real(value) => real_to_decimal(value).map(Some),
            })
            .collect()
    }

    fn decimal_encoding(&self, decimals: &[Option<(i64, i32)>]) -> Option<Chunk> {
        let exponent = decimals.iter().flatten().map(|&(_, e)| e).min()?;
        if exponent < -MAX_SCALE_DIGITS {
            return None;
        }

        // Mantissas rescaled to the common exponent.
        let mut units = Vec::with_capacity(decimals.len());
        for d in decimals {
            units.push(match d {
                None => None,
                Some((m, e)) => Some(m.checked_mul(pow10(e - exponent)?)?),
            });
        }
        let mut observed = units.iter().flatten().copied();
        let first = observed.next()?;
        let (mut lo, mut hi) = (first, first);
        for u in observed {
            lo = lo.min(u);
            hi = hi.max(u);
        }
        let has_na = units.iter().any(Option::is_none);

        if !has_na && lo == hi {
            let chunk = match exponent >= 0 {
                true => match pow10(exponent).and_then(|p| lo.checked_mul(p)) {
                    Some(value) => Chunk::constant_int(value, units.len()),
                    None => Chunk::constant_real(decimal_to_f64(lo, exponent), units.len()),
                },
                false => Chunk::constant_real(decimal_to_f64(lo, exponent), units.len()),
            };
            if self.reproduces(&chunk) {
                return Some(chunk);
            }
        }

        for width in [1u8, 2, 4] {
            let (min_raw, max_raw) = scaled_range(width);
            let bias = if lo >= min_raw && hi <= max_raw {
                0
            } else if (hi as i128 - lo as i128) <= (max_raw - min_raw) as i128 {
                // The bias must itself be an i64 and keep every biased row in range.
                match lo.checked_sub(min_raw) {
                    Some(bias) if bias.checked_add(max_raw).is_some() => bias,
                    _ => continue,
                }
            } else {
                continue;
            };
            let encoding = Encoding::Scaled {
                width,
                exponent,
                bias,
            };
            if let Some(chunk) = self.fill(encoding) {
                return Some(chunk);
            }
        }

        if exponent >= 0 {
            return self.fill(Encoding::Int64);
        }
        None
    }

    fn real_encoding(&self) -> Chunk {
        let fits_f32 = self.rows.iter().all(|d| match d {
            Datum::Na => true,
            _ => {
                let v = datum_f64(d);
                (v as f32) as f64 == v
            }
        });
        let encoding = if fits_f32 {
            Encoding::Real32
        } else {
            Encoding::Real64
        };
        self.fill(encoding)
            .or_else(|| self.fill(Encoding::Real64))
            .unwrap_or_else(|| Chunk::constant_real(f64::NAN, self.rows.len()))
    }

    /// Writes every row into a fresh chunk of `encoding`; `None` if any row is
    /// rejected or would not read back exactly.
    fn fill(&self, encoding: Encoding) -> Option<Chunk> {
        let mut chunk = Chunk::zeroed(encoding, self.rows.len());
        for (row, datum) in self.rows.iter().enumerate() {
            let accepted = match *datum {
                Datum::Na => chunk.try_encode_na(row),
                Datum::Decimal { mantissa, exponent: 0 } => chunk.try_encode_int(row, mantissa),
                Datum::Decimal { mantissa, exponent } if exponent > 0 => {
                    match pow10(exponent).and_then(|p| mantissa.checked_mul(p)) {
                        Some(value) => chunk.try_encode_int(row, value),
                        None => chunk.try_encode_float(row, datum_f64(datum)),
                    }
                }
                _ => chunk.try_encode_float(row, datum_f64(datum)),
            };
            if !accepted {
                return None;
            }
        }
        self.reproduces(&chunk).then_some(chunk)
    }

    fn reproduces(&self, chunk: &Chunk) -> bool {
        self.rows.iter().enumerate().all(|(row, datum)| match *datum {
            Datum::Na => chunk.is_na(row),
            Datum::Decimal { mantissa, exponent } if exponent >= 0 => {
                match pow10(exponent).and_then(|p| mantissa.checked_mul(p)) {
                    Some(value) => !chunk.is_na(row) && chunk.decode_int(row) == value,
                    None => chunk.decode_float(row).to_bits() == datum_f64(datum).to_bits(),
                }
            }
            _ => chunk.decode_float(row).to_bits() == datum_f64(datum).to_bits(),
        })
    }
}

fn observe(summary: &mut ChunkSummary, value: f64) {
    summary.min = summary.min.min(value);
    summary.max = summary.max.max(value);
    summary.sum += value;
}

fn datum_f64(datum: &Datum) -> f64 {
    match *datum {
        Datum::Na => f64::NAN,
        Datum::Decimal { mantissa, exponent } => decimal_to_f64(mantissa, exponent),
        Datum::Real(value) => value,
    }
}

fn normalize(mut mantissa: i64, mut exponent: i32) -> (i64, i32) {
    if mantissa == 0 {
        return (0, 0);
    }
    while mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    (mantissa, exponent)
}

/// Shortest `mantissa * 10^exponent` (exponent <= 0) that reads back as `value`.
fn real_to_decimal(value: f64) -> Option<(i64, i32)> {
    if !value.is_finite() {
        return None;
    }
    if value == 0.0 {
        // -0.0 has no decimal form that reads back bit-for-bit.
        return (value.to_bits() == 0).then_some((0, 0));
    }
    for digits in 0..=MAX_SCALE_DIGITS {
        let scaled = (value * 10f64.powi(digits)).round();
        if scaled.abs() >= 9.007_199_254_740_992e15 {
            return None;
        }
        let mantissa = scaled as i64;
        if decimal_to_f64(mantissa, -digits).to_bits() == value.to_bits() {
            return Some(normalize(mantissa, -digits));
        }
    }
    None
}
