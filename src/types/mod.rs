//! Data types shared by the subgroup codegen
//!
//! - Vector types (category, lane width, lane count)
//! - Their OpenCL C spelling

pub mod vector;

pub use vector::{ElemKind, VALID_BITS, VALID_LANES, VecType, VecTypeError, lane_field};
