//! Tauri command handlers for the frontend.
//!
//! This module exposes commands that can be invoked from the web frontend:
//! - [`add_image_paths`] / [`add_dropped_images`]: stage exposures
//! - [`remove_image`], [`thumbnails`], [`thumbnail_preview`]: the thumbnail strip
//! - [`merge_images`]: run one merge attempt
//! - [`start_new_batch`], [`ui_state`], [`save_result`]: session and download

mod merge;

pub use merge::*;
