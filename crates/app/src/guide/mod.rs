//! Live object guidance over WebSocket.
//!
//! A capture thread detects objects in camera frames and hands annotated
//! frames to connection loops through a bounded drop-oldest queue. Clients
//! switch modes, select an object, and request text reading with commands.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `state`: Mutex-guarded shared state and capture lifecycle phases.
//! - `queue`: Frame hand-off (drop-oldest queue and latest-frame cell).
//! - `tracker`: Visibility episodes, announcements, and guidance notices.
//! - `capture`: Capture loop and its reference-counted start/stop.
//! - `commands`: Mode state machine and `SELECT`/`READ` handling.
//! - `ocr_gate`: Area-ratio gate and OCR preprocessing.
//! - `session`: Per-connection frame cursor, FPS window, and dispatch.
//! - `server`: Actix Web routes for the WebSocket, status, and metrics.
//! - `watchdog`: Capture heartbeat monitoring.
//! - `annotation`: Box drawing and JPEG encoding.
//! - `data`: Detections, frame slots, and wire messages.

/// Re-export settings so callers can configure runs without reaching into
/// submodules.
pub use config::{GuideCliArgs, GuideConfig, SourceKind};
pub use context::GuideContext;
/// Launch the guide server with a ready-made configuration.
pub use pipeline::run;

pub mod annotation;
pub mod capture;
pub mod commands;
pub mod config;
mod context;
pub mod data;
pub mod ocr_gate;
mod pipeline;
pub mod queue;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod tracker;
pub mod watchdog;
