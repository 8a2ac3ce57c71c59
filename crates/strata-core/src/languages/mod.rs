//! Language-specific walkers.
//!
//! Each walker takes a parsed tree and an `Extraction` context and emits
//! declarations and named references. Binding happens afterwards.

pub(crate) mod python;
pub(crate) mod rust;
