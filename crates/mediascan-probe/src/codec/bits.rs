//! Bit-level reading shared by the codec parsers

use bitstream_io::{BigEndian, BitRead, BitReader};

/// MSB-first bit reader over a byte slice.
///
/// Every read returns `None` once the data runs out, so header parsers can
/// bail out with `?` on truncated input.
pub struct Bits<'a> {
    inner: BitReader<&'a [u8], BigEndian>,
    remaining: u64,
}

impl<'a> Bits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            inner: BitReader::endian(data, BigEndian),
            remaining: data.len() as u64 * 8,
        }
    }

    /// Bits left to read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read up to 32 bits.
    pub fn read_bits(&mut self, n: u32) -> Option<u32> {
        if n == 0 {
            return Some(0);
        }
        if n > 32 || u64::from(n) > self.remaining {
            return None;
        }
        let value = self.inner.read::<u32>(n).ok()?;
        self.remaining -= u64::from(n);
        Some(value)
    }

    /// Read up to 64 bits.
    pub fn read_u64(&mut self, n: u32) -> Option<u64> {
        if n > 32 {
            let high = self.read_bits(n - 32)? as u64;
            let low = self.read_bits(32)? as u64;
            Some((high << 32) | low)
        } else {
            self.read_bits(n).map(u64::from)
        }
    }

    pub fn read_flag(&mut self) -> Option<bool> {
        if self.remaining == 0 {
            return None;
        }
        let bit = self.inner.read_bit().ok()?;
        self.remaining -= 1;
        Some(bit)
    }

    pub fn skip(&mut self, n: u32) -> Option<()> {
        if u64::from(n) > self.remaining {
            return None;
        }
        self.inner.skip(n).ok()?;
        self.remaining -= u64::from(n);
        Some(())
    }

    /// Unsigned Exp-Golomb
    pub fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u32;
        while !self.read_flag()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        if leading_zeros == 0 {
            return Some(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Some(((1u64 << leading_zeros) - 1 + suffix as u64).min(u32::MAX as u64) as u32)
    }

    /// Signed Exp-Golomb
    pub fn read_se(&mut self) -> Option<i32> {
        let k = self.read_ue()? as i64;
        let v = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Some(v as i32)
    }
}

/// Strip emulation prevention bytes (`00 00 03` → `00 00`) from a NAL unit.
pub fn unescape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Iterate over Annex-B NAL unit payloads (start codes stripped).
pub fn annex_b_units(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    let mut units = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let mut end = starts.get(idx + 1).map_or(data.len(), |next| next - 3);
        // trailing_zero_8bits and the leading zero of a 4-byte start code
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        if start < end {
            units.push(&data[start..end]);
        }
    }
    units.into_iter()
}

/// Find a `00 00 01` start code at or after `from`.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|p| p + from)
}

/// Insert emulation prevention bytes; the inverse of [`unescape_rbsp`].
#[cfg(test)]
pub(crate) fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let mut zeros = 0usize;
    for &byte in data {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}
