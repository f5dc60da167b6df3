//! Image intake: the ordered working set of staged exposures.
//!
//! - [`ImageSource`]: a picked file or a dropped payload
//! - [`WorkingSet`]: append, remove, validate
//! - [`thumbnails`]: preview entries and their removal bindings

mod source;
pub mod thumbnails;

use serde::Serialize;
use tracing::debug;
use crate::config::IntakePolicy;

pub use source::ImageSource;
pub use thumbnails::{RemovalBinding, Thumbnail, ThumbnailSheet};

/// What happened to one `accept` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReport {
    pub accepted: usize,
    /// Names skipped by the image type filter
    pub rejected: Vec<String>,
    pub total: usize,
}

/// Ordered set of staged images.
///
/// Every mutation bumps `generation` so removal bindings handed out by the
/// thumbnail renderer can be checked against the set they were built from.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    items: Vec<ImageSource>,
    generation: u64,
    policy: IntakePolicy,
}

impl WorkingSet {
    pub fn new(policy: IntakePolicy) -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
            policy,
        }
    }

    /// Appends `sources` in order. An empty selection leaves the set untouched.
    pub fn accept(&mut self, sources: Vec<ImageSource>) -> IntakeReport {
        let mut report = IntakeReport::default();
        if sources.is_empty() {
            report.total = self.items.len();
            return report;
        }

        for source in sources {
            if self.policy.filter_image_types && source.mime().is_none() {
                debug!("Skipping non-image file {}", source.name());
                report.rejected.push(source.name().to_string());
                continue;
            }
            self.items.push(source);
            report.accepted += 1;
        }

        if report.accepted > 0 {
            self.generation += 1;
        }
        report.total = self.items.len();
        report
    }

    /// Removes the item at `index`; out of range is a no-op.
    pub fn remove(&mut self, index: usize) -> Option<ImageSource> {
        if index >= self.items.len() {
            debug!("Ignoring removal of index {} from {} images", index, self.items.len());
            return None;
        }
        self.generation += 1;
        Some(self.items.remove(index))
    }

    /// Removes through a thumbnail binding; bindings from an older set are ignored.
    pub fn remove_bound(&mut self, binding: RemovalBinding) -> Option<ImageSource> {
        if binding.generation != self.generation {
            debug!(
                "Ignoring stale removal binding (generation {} vs {})",
                binding.generation, self.generation
            );
            return None;
        }
        self.remove(binding.index)
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.generation += 1;
        }
    }

    /// True iff the set size permits a merge.
    pub fn is_valid(&self) -> bool {
        (self.policy.min_images..=self.policy.max_images).contains(&self.items.len())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[ImageSource] {
        &self.items
    }

    pub fn get(&self, binding: RemovalBinding) -> Option<&ImageSource> {
        if binding.generation != self.generation {
            return None;
        }
        self.items.get(binding.index)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn policy(&self) -> &IntakePolicy {
        &self.policy
    }

    /// Copy of the current items for one merge attempt.
    pub fn snapshot(&self) -> Vec<ImageSource> {
        self.items.clone()
    }
}
