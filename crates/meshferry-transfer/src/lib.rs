//! # Meshferry Transfer
//!
//! Transfer engine for the meshferry protocol.
//!
//! This crate provides:
//! - File splitting into radio-sized chunks
//! - Receive-side reassembly with order-independent, idempotent storage
//! - Selective retransmission with a bounded retry budget
//! - A single-writer packet dispatch engine with event notifications
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      TransferEngine                         │
//! │  (one per peer connection, single-writer inbound dispatch) │
//! ├─────────────────┬──────────────────┬───────────────────────┤
//! │  FileSplitter   │  ChunkAssembler  │ Retransmission-       │
//! │  (outbound cut) │  (receive slots) │ Coordinator (timers)  │
//! └─────────────────┴──────────────────┴───────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod retransmit;
pub mod splitter;

pub use assembler::{AssemblyState, ChunkAssembler, ChunkOutcome};
pub use config::TransferConfig;
pub use engine::TransferEngine;
pub use error::TransferError;
pub use events::TransferEvent;
pub use retransmit::{RetransmissionCoordinator, RetryDecision};
pub use splitter::FileSplitter;

/// Default chunk size in bytes, sized to fit a LoRa-class radio frame
/// together with the packet header
pub const DEFAULT_CHUNK_SIZE: usize = 100;
