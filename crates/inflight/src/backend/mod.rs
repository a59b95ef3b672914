//! # Tensor Backend
//!
//! Raw engine outputs reach the post-processors through the [`Backend`]
//! trait, which lets the detection and segmentation transforms read any
//! tensor type as a flat run of `f32` values plus a shape.

//! ## Feature Flags
//!
//! - `candle`: Enables support for the Candle tensor library
//! - `burn`: Enables support for the Burn tensor library
//!
//! Plain `Vec<f32>` buffers are always supported, which is what most engine
//! bindings hand back after copying an output blob.

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
pub mod candle;

#[cfg_attr(docsrs, doc(cfg(feature = "burn")))]
#[cfg(feature = "burn")]
/// Burn tensor backend implementation.
///
/// This module is only available when the `burn` feature flag is enabled.
/// Only float tensors are covered, since detector and segmentation heads
/// emit floating point maps.
pub mod burn;


// Re-export the core traits for convenient imports
pub use core_trait::*;


#[cfg(test)]
/// Mock tensor implementation.
///
/// Carries its values inline and can be told to fail on read.
pub(crate) mod mock_tensor;
