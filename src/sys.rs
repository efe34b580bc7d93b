// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! System abstractions for cross-platform compatibility.
//!
//! Frame timing needs a monotonic clock, which `std::time::Instant` does not
//! provide on WASM targets.

pub mod time {
    //! On native platforms, this re-exports `std::time` types.
    //! On WASM platforms, this re-exports `web_time` types for compatibility.

    #[cfg(not(target_arch = "wasm32"))]
    pub use std::time::{Duration, Instant};

    #[cfg(target_arch = "wasm32")]
    pub use web_time::{Duration, Instant};
}
