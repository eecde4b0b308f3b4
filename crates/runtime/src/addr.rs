//! Mixed-radix instance addressing
//!
//! Banked reactors and their ports are identified by a single flat code
//! instead of a tuple of bank indices. The digit vector lists indices
//! innermost level first; radices are the bank widths at each level.

use crate::error::{Error, Result};

/// A multi-level bank index with per-level widths.
///
/// Flattening follows positional numeral systems with per-position bases:
/// `code = d0 + r0 * (d1 + r1 * (d2 + ...))`, innermost digit first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedRadixInt {
    digits: Vec<u32>,
    radices: Vec<u32>,
}

impl MixedRadixInt {
    /// Build from parallel digit/radix vectors. Every digit must be strictly
    /// below its radix and every radix strictly positive.
    pub fn new(digits: Vec<u32>, radices: Vec<u32>) -> Result<Self> {
        if digits.len() != radices.len() {
            return Err(Error::MalformedAddress {
                reason: format!(
                    "digit count {} does not match radix count {}",
                    digits.len(),
                    radices.len()
                ),
            });
        }
        for (position, (&digit, &radix)) in digits.iter().zip(radices.iter()).enumerate() {
            if radix == 0 {
                return Err(Error::MalformedAddress {
                    reason: format!("radix at position {position} is zero"),
                });
            }
            if digit >= radix {
                return Err(Error::DigitOutOfRange {
                    digit,
                    radix,
                    position,
                });
            }
        }
        Ok(MixedRadixInt { digits, radices })
    }

    /// The zero address over the given radices.
    pub fn zero(radices: Vec<u32>) -> Result<Self> {
        let digits = vec![0; radices.len()];
        MixedRadixInt::new(digits, radices)
    }

    pub fn digits(&self) -> &[u32] {
        &self.digits
    }

    pub fn radices(&self) -> &[u32] {
        &self.radices
    }

    /// Total number of addressable instances. Overflowing the u32 address
    /// width is an error, never a silent wrap.
    pub fn capacity(radices: &[u32]) -> Result<u32> {
        let mut cap: u32 = 1;
        for &radix in radices {
            cap = cap
                .checked_mul(radix)
                .ok_or_else(|| Error::RadixOverflow {
                    radices: radices.to_vec(),
                })?;
        }
        Ok(cap)
    }

    /// Encode the digit vector into a single flat code.
    pub fn flatten(&self) -> Result<u32> {
        let mut code: u32 = 0;
        let mut stride: u32 = 1;
        for (&digit, &radix) in self.digits.iter().zip(self.radices.iter()) {
            let term = digit
                .checked_mul(stride)
                .ok_or_else(|| self.overflow())?;
            code = code.checked_add(term).ok_or_else(|| self.overflow())?;
            stride = stride.checked_mul(radix).ok_or_else(|| self.overflow())?;
        }
        Ok(code)
    }

    /// Decode a flat code back into its digit vector over `radices`.
    pub fn unflatten(code: u32, radices: &[u32]) -> Result<Self> {
        let capacity = Self::capacity(radices)?;
        if code >= capacity {
            return Err(Error::CodeOutOfRange { code, capacity });
        }
        let mut rest = code;
        let mut digits = Vec::with_capacity(radices.len());
        for &radix in radices {
            digits.push(rest % radix);
            rest /= radix;
        }
        MixedRadixInt::new(digits, radices.to_vec())
    }

    /// Odometer-style increment across the whole address space.
    /// Returns false when the address wraps back to zero.
    pub fn advance(&mut self) -> bool {
        for (digit, &radix) in self.digits.iter_mut().zip(self.radices.iter()) {
            *digit += 1;
            if *digit < radix {
                return true;
            }
            *digit = 0;
        }
        false
    }

    fn overflow(&self) -> Error {
        Error::RadixOverflow {
            radices: self.radices.clone(),
        }
    }
}
