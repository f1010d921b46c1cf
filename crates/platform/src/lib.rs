//! Hardware Abstraction Layer (HAL) for the smart-amplifier control plane
//!
//! This crate provides the trait-based seams the control plane drives,
//! enabling development and testing without physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Control plane (smartamp crate: blob parsing, state machine, controls)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Transport (I²C / SPI driver, OS firmware loader)
//! ```
//!
//! # Abstractions
//!
//! - [`RegisterBus`] - Banked register read/write/bulk/update-bits access
//! - [`RegAddr`] - Flat `(book, page, reg)` register address
//! - [`FirmwareSource`] - Asynchronous tuning-blob provisioning
//! - [`FirmwareCompletion`] - Completion signal shared with the provider
//!
//! # Features
//!
//! - `std`: Enable the [`mocks`] module outside of this crate's own tests
//! - `defmt`: Enable defmt logging derives
//!
//! # Example
//!
//! ```no_run
//! use platform::{RegAddr, RegisterBus};
//!
//! async fn mute<B: RegisterBus>(bus: &mut B) -> Result<(), B::Error> {
//!     bus.update_bits(0, RegAddr::new(0, 0, 0x02), 0x03, 0x01).await
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors — callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(async_fn_in_trait)] // single-threaded executors, Send bounds not needed

extern crate alloc;

pub mod firmware;
pub mod mocks;
pub mod regmap;

// Re-export main traits
pub use firmware::{FirmwareCompletion, FirmwareSource};
pub use regmap::{RegAddr, RegisterBus, PAGES_PER_BOOK, REGS_PER_PAGE};
