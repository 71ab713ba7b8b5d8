//! Region-of-interest preview pipeline for an image editor.
//!
//! A [`Coordinator`] owns one opened image and its processing parameters and
//! hands out [`CropRegion`]s. Each region decodes only the part of the image it
//! shows, runs the stages a parameter change invalidated, and hands the
//! trimmed result to its [`DetailedCropListener`].

pub mod buffer;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod geometry;
pub mod listener;
pub mod pipeline;
pub mod pool;
pub mod processing;
pub mod refresh;
pub mod region;
pub mod scheduler;
pub mod source;
pub mod stages;
pub mod state;
pub mod viewport;

#[cfg(test)]
mod testing;

pub use config::PipelineSettings;
pub use coordinator::Coordinator;
pub use geometry::{CropWindow, Rect, Size};
pub use listener::{ChannelListener, DetailedCrop, DetailedCropListener};
pub use refresh::RefreshMask;
pub use region::CropRegion;
pub use state::ProcParams;
