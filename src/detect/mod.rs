mod backend;
mod backends;
mod result;
pub mod yolo;

pub use backend::InferenceBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{BoundingBox, Detection, Inference, TargetFilter};

/// Species the trap reports by default.
pub const DEFAULT_TARGET_CLASSES: [&str; 3] = [
    "Culex quinquefasciatus",
    "Aedes albopictus",
    "Aedes aegypti",
];
