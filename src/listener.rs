use std::sync::Mutex;
use std::sync::mpsc::Sender;

use crate::buffer::Image8;
use crate::geometry::{CropWindow, Rect};
use crate::state::ColorManagement;

/// Result of one completed pipeline run, trimmed to the requested rectangle.
#[derive(Debug, Clone)]
pub struct DetailedCrop {
    pub region: u64,
    pub display: Image8,
    /// Output-space copy, present when the listener asked for one.
    pub analysis: Option<Image8>,
    pub icm: ColorManagement,
    /// The window this crop was computed for.
    pub window: CropWindow,
    /// Full-image rectangle actually covered, after clamping.
    pub rect: Rect,
}

/// Receives finished crops. Called on a pipeline worker thread while the
/// region is locked, so implementations should hand the crop off quickly.
pub trait DetailedCropListener: Send + Sync {
    fn set_detailed_crop(&self, crop: DetailedCrop);

    fn wants_analysis(&self) -> bool {
        false
    }
}

/// Forwards crops over a channel.
pub struct ChannelListener {
    tx: Mutex<Sender<DetailedCrop>>,
    analysis: bool,
}

impl ChannelListener {
    pub fn new(tx: Sender<DetailedCrop>, analysis: bool) -> Self {
        Self {
            tx: Mutex::new(tx),
            analysis,
        }
    }
}

impl DetailedCropListener for ChannelListener {
    fn set_detailed_crop(&self, crop: DetailedCrop) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.send(crop).is_err() {
            tracing::debug!("crop receiver gone, dropping result");
        }
    }

    fn wants_analysis(&self) -> bool {
        self.analysis
    }
}
