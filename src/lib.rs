//! trapmos: on-device pipeline of a mosquito-surveillance trap.
//!
//! The trap samples camera frames, runs a species detector on them, keeps the
//! strongest frame of every fixed time window and reports it (or a heartbeat
//! when nothing was seen) to a cloud backend, tagged with the best position
//! currently known from GPS or WiFi geolocation. A small status panel shows
//! live counts and connectivity.
//!
//! # Module Structure
//!
//! - `detect`: inference boundary, detection types, YOLO decoding
//! - `ingest`: camera sources (synthetic, still image, V4L2)
//! - `location`: GPS and WiFi pollers and the arbitrating `LocationManager`
//! - `window`: best-of-window selection
//! - `upload`: non-blocking upload queue, naming scheme, cloud client
//! - `display`: last-write-wins status panel with its render thread
//! - `pipeline`: the orchestrator loop and its shutdown sequence
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod location;
pub mod net;
pub mod pipeline;
pub mod upload;
pub mod window;

pub use config::TrapConfig;
pub use detect::{BoundingBox, Detection, Inference, InferenceBackend, StubBackend, TargetFilter};
pub use display::{LiveStatus, Status, StatusDisplay};
pub use frame::Frame;
pub use ingest::{open_camera, CameraConfig, FrameSource};
pub use location::{Fix, LocationManager, LocationSource};
pub use pipeline::{Orchestrator, PipelineSettings, RunSummary, Step};
pub use upload::{CloudStore, DeviceIdentity, UploadJob, UploadQueue};
pub use window::{DetectionWindow, WindowReport};
