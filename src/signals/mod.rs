//! Stage-1 signal detectors
//!
//! Each detector looks only at the most recent bar, judged against a
//! trailing baseline built from the bars before it.
//!
//! - **Volatility spike**: latest close-to-close return vs trailing return std-dev
//! - **Gap**: latest open vs prior close
//! - **Wide range**: latest high-low range vs trailing average range

pub mod helpers;

pub mod gap;
pub mod range;
pub mod volatility;

// Re-export all signals for convenience
pub use gap::*;
pub use range::*;
pub use volatility::*;
