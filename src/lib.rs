//! touchtalk - touch-to-wake voice bridge
//!
//! Lets a person talk to a desk device that wakes on touch: microphone audio
//! streams to a remote conversational session, and spoken replies play back
//! in real time and can be interrupted mid-sentence.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  wake/sleep   ┌──────────────────┐
//! │  WakeMonitor │──────────────▶│ SessionLifecycle │
//! │  (polls the  │               │  (one session)   │
//! │   device)    │               └───┬──────────▲───┘
//! └──────────────┘          mic frames│          │events
//!                                     ▼          │
//!              ┌────────────────┐  ┌──────────────┴──┐
//!              │AudioInputEngine│─▶│  RemoteSession  │
//!              └────────────────┘  └──────────────┬──┘
//!                                     audio chunks│ interrupt
//!              ┌──────────────────┐  ┌────────────▼──────────┐
//!              │AudioOutputEngine │◀─│PlaybackBuffer + signal│
//!              │ (hardware clock) │  └───────────────────────┘
//!              └──────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod monitor;
pub mod session;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
