//! Vector data types
//!
//! A `VecType` is the element category, lane width and lane count of a kernel
//! value, e.g. `u8v4` (four unsigned bytes) or `f32` (one float).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lane counts OpenCL can spell as a vector type
pub const VALID_LANES: [u8; 6] = [1, 2, 3, 4, 8, 16];

/// Lane widths the engine reasons about, widest first
pub const VALID_BITS: [u8; 4] = [64, 32, 16, 8];

/// Element category of a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemKind {
    Unsigned,
    Signed,
    Float,
}

impl ElemKind {
    pub fn is_integer(self) -> bool {
        !matches!(self, ElemKind::Float)
    }

    /// Category used when reinterpreting at the same width
    pub fn alternate(self) -> ElemKind {
        match self {
            ElemKind::Float => ElemKind::Unsigned,
            ElemKind::Unsigned | ElemKind::Signed => ElemKind::Float,
        }
    }

    fn prefix(self) -> char {
        match self {
            ElemKind::Unsigned => 'u',
            ElemKind::Signed => 'i',
            ElemKind::Float => 'f',
        }
    }
}

/// Error parsing a vector type name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid vector type `{0}`")]
pub struct VecTypeError(pub String);

/// Vector type descriptor: category, lane bit-width and lane count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VecType {
    pub kind: ElemKind,
    pub bits: u8,
    pub lanes: u8,
}

impl VecType {
    pub const fn new(kind: ElemKind, bits: u8, lanes: u8) -> Self {
        Self { kind, bits, lanes }
    }

    pub const fn unsigned(bits: u8, lanes: u8) -> Self {
        Self::new(ElemKind::Unsigned, bits, lanes)
    }

    pub const fn signed(bits: u8, lanes: u8) -> Self {
        Self::new(ElemKind::Signed, bits, lanes)
    }

    pub const fn float(bits: u8, lanes: u8) -> Self {
        Self::new(ElemKind::Float, bits, lanes)
    }

    pub fn is_valid_lanes(lanes: u32) -> bool {
        VALID_LANES.iter().any(|&l| u32::from(l) == lanes)
    }

    /// Whether a target can spell this type at all
    pub fn is_valid(&self) -> bool {
        let bits_ok = match self.kind {
            ElemKind::Float => matches!(self.bits, 16 | 32 | 64),
            _ => matches!(self.bits, 8 | 16 | 32 | 64),
        };
        bits_ok && Self::is_valid_lanes(u32::from(self.lanes))
    }

    pub fn total_bits(&self) -> u32 {
        u32::from(self.bits) * u32::from(self.lanes)
    }

    pub fn is_integer(&self) -> bool {
        self.kind.is_integer()
    }

    pub fn is_scalar(&self) -> bool {
        self.lanes == 1
    }

    pub fn scalar(self) -> Self {
        Self { lanes: 1, ..self }
    }

    pub fn with_kind(self, kind: ElemKind) -> Self {
        Self { kind, ..self }
    }

    pub fn with_bits(self, bits: u8) -> Self {
        Self { bits, ..self }
    }

    pub fn with_lanes(self, lanes: u8) -> Self {
        Self { lanes, ..self }
    }

    /// Same bits, unsigned category
    pub fn to_unsigned(self) -> Self {
        self.with_kind(ElemKind::Unsigned)
    }

    /// OpenCL C spelling, e.g. `uchar4`, `int`, `half2`
    pub fn cl_name(&self) -> String {
        let base = match (self.kind, self.bits) {
            (ElemKind::Unsigned, 8) => "uchar",
            (ElemKind::Unsigned, 16) => "ushort",
            (ElemKind::Unsigned, 32) => "uint",
            (ElemKind::Unsigned, 64) => "ulong",
            (ElemKind::Signed, 8) => "char",
            (ElemKind::Signed, 16) => "short",
            (ElemKind::Signed, 32) => "int",
            (ElemKind::Signed, 64) => "long",
            (ElemKind::Float, 16) => "half",
            (ElemKind::Float, 32) => "float",
            (ElemKind::Float, 64) => "double",
            _ => "void",
        };
        if self.lanes == 1 {
            base.to_string()
        } else {
            format!("{}{}", base, self.lanes)
        }
    }
}

impl fmt::Display for VecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.bits)?;
        if self.lanes > 1 {
            write!(f, "v{}", self.lanes)?;
        }
        Ok(())
    }
}

impl FromStr for VecType {
    type Err = VecTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VecTypeError(s.to_string());
        let text = s.trim();
        let mut chars = text.chars();
        let kind = match chars.next() {
            Some('u') => ElemKind::Unsigned,
            Some('i') => ElemKind::Signed,
            Some('f') => ElemKind::Float,
            _ => return Err(err()),
        };
        let rest = chars.as_str();
        let (bits, lanes) = match rest.split_once('v') {
            Some((bits, lanes)) => (bits, lanes),
            None => (rest, "1"),
        };
        let bits: u8 = bits.parse().map_err(|_| err())?;
        let lanes: u8 = lanes.parse().map_err(|_| err())?;
        let vtype = VecType::new(kind, bits, lanes);
        if vtype.is_valid() { Ok(vtype) } else { Err(err()) }
    }
}

/// Per-lane field selector (`s0`..`sf`)
pub fn lane_field(index: u8) -> char {
    const NAMES: &[u8; 16] = b"0123456789abcdef";
    NAMES[usize::from(index & 0xf)] as char
}
