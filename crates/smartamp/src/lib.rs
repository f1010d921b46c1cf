//! Control plane for multi-channel smart power amplifiers
//!
//! Everything between a vendor tuning blob and the amplifier registers:
//!
//! ```text
//! firmware image ─▶ blob::container ─▶ blob::BlobParser ─▶ ParsedBlob (Arc)
//!                                                              │
//!         ┌──────────────────┬──────────────────┬──────────────┤
//!         ▼                  ▼                  ▼              ▼
//!   ProfileManager     ControlPlane     InterruptManager   HardwareParamSet
//!         └──────────────────┴────────┬─────────┴──────────────┘
//!                                     ▼
//!                      interpreter::Interpreter (CommandBlock)
//!                                     ▼
//!                          platform::RegisterBus
//! ```
//!
//! [`device::Device`] owns the runtime state and sequences power
//! transitions, deferred post-power-up work, interrupt recovery and
//! fail-safe escalation on top of these pieces.
//!
//! # Features
//!
//! - `std` (default): host time driver and critical-section implementation
//! - `serde`: (de)serialisable [`config::DriverConfig`]

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)]
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)]
#![allow(clippy::doc_markdown)] // register and section names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::future_not_send)] // single-threaded executors

extern crate alloc;

pub mod blob;
pub mod cmdblock;
pub mod config;
pub mod device;
pub mod error;
pub mod hw_params;
pub mod interpreter;
pub mod interrupt;
pub mod kcontrol;
pub mod profile;

pub use blob::{BlobParser, ParsedBlob};
pub use cmdblock::{CommandBlock, Op};
pub use config::DriverConfig;
pub use device::{Device, DeviceStats, ErrorClass, ErrorCode, FirmwareState, PowerState, RecoveryReport};
pub use error::{BlobError, ContainerError, DeviceError, OpError, ParseError, RangeError};
pub use kcontrol::{ControlId, ControlInfo, PutOutcome};
