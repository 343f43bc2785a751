//! Multi-step sensor operations
//!
//! Operations that span several command/response round trips and depend on
//! physical sensor state (finger presence, populated feature buffers) run as
//! an explicit state machine:
//!
//! ```text
//! Idle → ImageCaptured → FeaturesExtracted → {Enrolled | SearchCompleted |
//! StoreCompleted} → Idle
//! ```
//!
//! Every run starts from `Idle` and re-captures rather than trusting buffer
//! residue left by an aborted predecessor. The per-run [`OperationContext`]
//! is discarded when the run ends, success or not.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, trace};

use fprust_core::{BufferId, ConfirmationCode};

use crate::device::Device;
use crate::error::{Error, Result};

/// Cooperative cancellation for multi-step operations
///
/// Cancellation is best-effort and coarse: the flag is checked between packet
/// round trips only. A command already sent cannot be un-sent; its exchange
/// completes before the operation stops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation before the next packet is issued
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Step of an enrollment run, reported by [`Error::Enrollment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollStep {
    /// Capturing image `index` (1-based)
    Capture { index: u8 },

    /// Extracting features from capture `index`
    Extract { index: u8 },

    /// Merging feature buffers into one model
    Merge,

    /// Writing the model to its library slot
    Store,
}

impl fmt::Display for EnrollStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture { index } => write!(f, "capture #{}", index),
            Self::Extract { index } => write!(f, "extract #{}", index),
            Self::Merge => write!(f, "merge"),
            Self::Store => write!(f, "store"),
        }
    }
}

/// Enrollment parameters
#[derive(Debug, Clone)]
pub struct EnrollConfig {
    /// Library slot the finished model is written to
    pub slot: u16,

    /// Number of image captures to merge (1 or 2)
    pub captures: u8,

    /// How many times a capture is retried while no finger is present
    pub retry_limit: u32,

    /// Pause between no-finger retries
    pub retry_delay: Duration,

    /// Optional cancellation flag, checked between round trips
    pub cancel: Option<CancelToken>,
}

impl EnrollConfig {
    pub fn new(slot: u16) -> Self {
        Self {
            slot,
            captures: 2,
            retry_limit: 15,
            retry_delay: Duration::from_millis(300),
            cancel: None,
        }
    }

    pub fn with_captures(mut self, captures: u8) -> Self {
        self.captures = captures;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Result of a library search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A template matched the captured finger
    Match { slot: u16, score: u16 },

    /// No template in the scanned range matched
    NotFound,
}

impl SearchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// Result of a one-to-one comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The buffers hold the same finger
    Match { score: u16 },

    /// The buffers hold different fingers
    Mismatch,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

/// Named states of a multi-step run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Idle,
    ImageCaptured,
    FeaturesExtracted,
    Enrolled,
    SearchCompleted,
    StoreCompleted,
}

/// Ephemeral state of one state-machine run
///
/// Tracks which feature buffers the run has populated. Dropped at the end of
/// the run regardless of outcome, so no sensor-side assumption leaks across
/// operation boundaries.
struct OperationContext {
    state: OpState,
    populated: Vec<BufferId>,
}

impl OperationContext {
    fn new() -> Self {
        Self {
            state: OpState::Idle,
            populated: Vec::new(),
        }
    }

    fn transition(&mut self, next: OpState) {
        trace!(from = ?self.state, to = ?next, "Operation state");
        self.state = next;
    }
}

impl Drop for OperationContext {
    fn drop(&mut self) {
        trace!(last = ?self.state, buffers = ?self.populated, "Operation context discarded");
    }
}

fn check_cancel(cancel: Option<&CancelToken>) -> Result<()> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn step_error(step: EnrollStep, source: Error) -> Error {
    // Cancellation is not a step failure
    if matches!(source, Error::Cancelled) {
        return source;
    }
    Error::Enrollment {
        step,
        source: Box::new(source),
    }
}

/// Capture an image, retrying while the sensor reports no finger
///
/// The single built-in retry in the driver: an absent finger is an expected
/// transient condition during user interaction, not a fault. Every other
/// failure aborts immediately.
async fn capture_with_retry(device: &mut Device, config: &EnrollConfig) -> Result<()> {
    let mut attempt = 0u32;

    loop {
        check_cancel(config.cancel.as_ref())?;

        match device.capture_image_unguarded().await {
            Ok(()) => return Ok(()),
            Err(Error::Rejected(ConfirmationCode::NoFinger)) if attempt < config.retry_limit => {
                attempt += 1;
                debug!(attempt, limit = config.retry_limit, "No finger on sensor, retrying");
                sleep(config.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub(crate) async fn enroll(device: &mut Device, config: &EnrollConfig) -> Result<u16> {
    if !(1..=2).contains(&config.captures) {
        return Err(Error::InvalidArgument(format!(
            "capture count must be 1 or 2, got {}",
            config.captures
        )));
    }

    info!(slot = config.slot, captures = config.captures, "Starting enrollment");

    let mut ctx = OperationContext::new();
    let buffers = [BufferId::Buffer1, BufferId::Buffer2];

    for (i, &buffer) in buffers[..config.captures as usize].iter().enumerate() {
        let index = i as u8 + 1;

        capture_with_retry(device, config)
            .await
            .map_err(|e| step_error(EnrollStep::Capture { index }, e))?;
        ctx.transition(OpState::ImageCaptured);

        device
            .extract_features_unguarded(buffer)
            .await
            .map_err(|e| step_error(EnrollStep::Extract { index }, e))?;
        ctx.populated.push(buffer);
        ctx.transition(OpState::FeaturesExtracted);
    }

    check_cancel(config.cancel.as_ref())?;
    debug!(buffers = ?ctx.populated, "Merging feature buffers");

    device
        .create_model_unguarded()
        .await
        .map_err(|e| step_error(EnrollStep::Merge, e))?;

    device
        .store_model_unguarded(BufferId::Buffer1, config.slot)
        .await
        .map_err(|e| step_error(EnrollStep::Store, e))?;
    ctx.transition(OpState::StoreCompleted);

    ctx.transition(OpState::Enrolled);
    info!(slot = config.slot, "Enrollment complete");

    Ok(config.slot)
}

pub(crate) async fn search_finger(
    device: &mut Device,
    start: u16,
    count: u16,
) -> Result<SearchOutcome> {
    let mut ctx = OperationContext::new();

    // No retry here: the caller decides whether to re-prompt for a finger
    device.capture_image_unguarded().await?;
    ctx.transition(OpState::ImageCaptured);

    device.extract_features_unguarded(BufferId::Buffer1).await?;
    ctx.populated.push(BufferId::Buffer1);
    ctx.transition(OpState::FeaturesExtracted);

    let outcome = device
        .search_unguarded(BufferId::Buffer1, start, count)
        .await?;
    ctx.transition(OpState::SearchCompleted);

    debug!(outcome = ?outcome, "Search finished");
    Ok(outcome)
}

pub(crate) async fn verify_finger(device: &mut Device, slot: u16) -> Result<MatchOutcome> {
    let mut ctx = OperationContext::new();

    device.capture_image_unguarded().await?;
    ctx.transition(OpState::ImageCaptured);

    device.extract_features_unguarded(BufferId::Buffer1).await?;
    ctx.populated.push(BufferId::Buffer1);
    ctx.transition(OpState::FeaturesExtracted);

    device
        .load_model_unguarded(BufferId::Buffer2, slot)
        .await?;
    ctx.populated.push(BufferId::Buffer2);

    let outcome = device.match_buffers_unguarded().await?;
    ctx.transition(OpState::SearchCompleted);

    debug!(slot, outcome = ?outcome, "Verification finished");
    Ok(outcome)
}
