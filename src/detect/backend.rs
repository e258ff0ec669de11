use anyhow::Result;

use crate::detect::result::Inference;
use crate::frame::Frame;

/// Inference capability.
///
/// Implementations receive one frame at a time and report every object they
/// found, in corner-form pixel coordinates of the frame they were given. The call
/// is synchronous; the orchestrator treats an error as fatal for that frame only.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on a frame, reporting detections and the time it took.
    fn infer(&mut self, frame: &Frame) -> Result<Inference>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
