//! Packed sample codec (component A).
//!
//! Each sample is a single `u32` word: either the reserved `EMPTY` pattern
//! (no value collected for this slot) or a finite value encoded as a signed
//! mantissa with a small decimal exponent plus quality flags. The encoding
//! reserves bit 31 as zero for every real sample, so `EMPTY` (all ones) can
//! never collide with a packed value.

use std::fmt;

/// Reserved bit pattern meaning "not collected".
pub const EMPTY: Sample = Sample(u32::MAX);

const SIGN_BIT: u32 = 1 << 30;
const EXPONENT_SHIFT: u32 = 27;
const EXPONENT_MASK: u32 = 0b111;
const MANTISSA_SHIFT: u32 = 3;
const MANTISSA_MASK: u32 = (1 << 24) - 1;
const MAX_MANTISSA: u32 = MANTISSA_MASK;
const MAX_EXPONENT: i32 = 7;

const FLAG_RESET: u32 = 1 << 0;
const FLAG_PARTIAL: u32 = 1 << 1;
const FLAG_ANOMALOUS: u32 = 1 << 2;

/// A packed sample word. Opaque to callers; use [`pack`] / [`unpack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample(pub(crate) u32);

impl Sample {
    /// Raw word, for storage in the ring buffer.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Reconstruct a `Sample` from a raw word read out of the ring.
    #[inline]
    pub fn from_raw(word: u32) -> Self {
        Sample(word)
    }
}

/// Sample quality flags. At most one of `reset`/`partial` applies;
/// `anomalous` is orthogonal to both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub reset: bool,
    pub partial: bool,
    pub anomalous: bool,
}

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags {
        reset: false,
        partial: false,
        anomalous: false,
    };

    pub const RESET: SampleFlags = SampleFlags {
        reset: true,
        partial: false,
        anomalous: false,
    };

    pub const PARTIAL: SampleFlags = SampleFlags {
        reset: false,
        partial: true,
        anomalous: false,
    };

    fn to_bits(self) -> u32 {
        let mut bits = 0;
        if self.reset {
            bits |= FLAG_RESET;
        }
        if self.partial {
            bits |= FLAG_PARTIAL;
        }
        if self.anomalous {
            bits |= FLAG_ANOMALOUS;
        }
        bits
    }

    fn from_bits(bits: u32) -> Self {
        SampleFlags {
            reset: bits & FLAG_RESET != 0,
            partial: bits & FLAG_PARTIAL != 0,
            anomalous: bits & FLAG_ANOMALOUS != 0,
        }
    }

    /// Union of two flag sets (used to check the `f' ⊇ f` round-trip property).
    pub fn contains(self, other: SampleFlags) -> bool {
        (!other.reset || self.reset)
            && (!other.partial || self.partial)
            && (!other.anomalous || self.anomalous)
    }
}

impl fmt::Display for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.reset {
            parts.push("reset");
        }
        if self.partial {
            parts.push("partial");
        }
        if self.anomalous {
            parts.push("anomalous");
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// Encode a value and flags into a packed sample.
///
/// Non-finite inputs (`NaN`, `+-inf`) map to [`EMPTY`]. Values whose
/// magnitude does not fit the 24-bit mantissa even at exponent 0 are clamped
/// to the representable extreme and get `flags.reset` forced on.
pub fn pack(value: f64, flags: SampleFlags) -> Sample {
    if !value.is_finite() {
        return EMPTY;
    }

    let sign = value.is_sign_negative() && value != 0.0;
    let magnitude = value.abs();

    let mut chosen: Option<(i32, u32)> = None;
    for exponent in (0..=MAX_EXPONENT).rev() {
        let scaled = magnitude * 10f64.powi(exponent);
        if scaled <= MAX_MANTISSA as f64 {
            chosen = Some((exponent, scaled.round() as u32));
            break;
        }
    }

    let (exponent, mantissa, clamped) = match chosen {
        Some((e, m)) => (e, m.min(MAX_MANTISSA), false),
        None => (0, MAX_MANTISSA, true),
    };

    let mut out_flags = flags;
    if clamped {
        out_flags.reset = true;
    }

    let mut word = 0u32;
    if sign {
        word |= SIGN_BIT;
    }
    word |= (exponent as u32 & EXPONENT_MASK) << EXPONENT_SHIFT;
    word |= (mantissa & MANTISSA_MASK) << MANTISSA_SHIFT;
    word |= out_flags.to_bits();

    Sample(word)
}

/// Decode a packed sample back into a value and its flags.
///
/// For [`EMPTY`] this returns `(0.0, SampleFlags::NONE)`; callers should
/// check [`is_empty`] first if "no value" needs to be distinguished from a
/// real zero.
pub fn unpack(sample: Sample) -> (f64, SampleFlags) {
    if is_empty(sample) {
        return (0.0, SampleFlags::NONE);
    }

    let word = sample.0;
    let sign = word & SIGN_BIT != 0;
    let exponent = (word >> EXPONENT_SHIFT) & EXPONENT_MASK;
    let mantissa = (word >> MANTISSA_SHIFT) & MANTISSA_MASK;
    let flags = SampleFlags::from_bits(word & 0b111);

    let magnitude = mantissa as f64 / 10f64.powi(exponent as i32);
    let value = if sign { -magnitude } else { magnitude };

    (value, flags)
}

/// Constant-time check for the reserved "not collected" pattern.
#[inline]
pub fn is_empty(sample: Sample) -> bool {
    sample == EMPTY
}

/// Whether a (non-empty) sample carries the anomalous flag.
#[inline]
pub fn is_anomalous(sample: Sample) -> bool {
    !is_empty(sample) && sample.0 & FLAG_ANOMALOUS != 0
}

/// Maximum quantization error for a given magnitude, used by tests and by
/// callers that need to reason about round-trip precision.
pub fn epsilon(value: f64) -> f64 {
    let magnitude = value.abs();
    if magnitude == 0.0 {
        return 0.5;
    }
    // Worst case: rounding at exponent 0 (no fractional digits) halves a unit,
    // or the chosen exponent's fractional step, whichever the codec picked.
    let mut best_exp = 0i32;
    for exponent in (0..=MAX_EXPONENT).rev() {
        if magnitude * 10f64.powi(exponent) <= MAX_MANTISSA as f64 {
            best_exp = exponent;
            break;
        }
    }
    0.5 * 10f64.powi(-best_exp)
}
