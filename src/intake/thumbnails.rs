//! Thumbnail sheet rebuilt from the working set on every change.

use std::io::Cursor;
use serde::{Deserialize, Serialize};
use crate::intake::{ImageSource, WorkingSet};
use crate::utils::{HdrError, HdrResult};

/// Handle a thumbnail's remove control carries back to the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalBinding {
    pub index: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub name: String,
    pub mime: Option<&'static str>,
    pub size_bytes: u64,
    pub removal: RemovalBinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailSheet {
    pub generation: u64,
    pub entries: Vec<Thumbnail>,
}

/// Builds one entry per staged image. Entries and bindings come from the same
/// pass over the same generation, so an index never outlives its set.
pub fn render(set: &WorkingSet) -> ThumbnailSheet {
    let generation = set.generation();
    let entries = set
        .items()
        .iter()
        .enumerate()
        .map(|(index, source)| Thumbnail {
            name: source.name().to_string(),
            mime: source.mime(),
            size_bytes: source.size(),
            removal: RemovalBinding { index, generation },
        })
        .collect();

    ThumbnailSheet { generation, entries }
}

/// Decodes `source` and encodes a PNG preview whose longest edge is at most `max_edge`.
pub async fn preview(source: &ImageSource, max_edge: u32) -> HdrResult<Vec<u8>> {
    let bytes = source.read_bytes().await?;
    let name = source.name().to_string();

    tokio::task::spawn_blocking(move || {
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| HdrError::format(format!("Cannot preview {name}: {e}")))?;
        let small = decoded.thumbnail(max_edge, max_edge);

        let mut out = Cursor::new(Vec::new());
        small
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| HdrError::format(format!("Cannot encode preview for {name}: {e}")))?;
        Ok(out.into_inner())
    })
    .await
    .map_err(|e| HdrError::io(format!("Preview task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntakePolicy;

    fn staged(names: &[&str]) -> WorkingSet {
        let mut set = WorkingSet::new(IntakePolicy::default());
        set.accept(
            names
                .iter()
                .map(|n| ImageSource::from_bytes(*n, vec![0u8; 10]))
                .collect(),
        );
        set
    }

    #[test]
    fn one_entry_per_image_with_matching_bindings() {
        let set = staged(&["a.jpg", "b.jpg", "c.png"]);
        let sheet = render(&set);

        assert_eq!(sheet.entries.len(), 3);
        for (i, entry) in sheet.entries.iter().enumerate() {
            assert_eq!(entry.removal.index, i);
            assert_eq!(entry.removal.generation, set.generation());
            assert_eq!(set.get(entry.removal).unwrap().name(), entry.name);
        }
        assert_eq!(sheet.entries[2].mime, Some("image/png"));
    }

    #[test]
    fn rebuild_after_removal_has_no_index_drift() {
        let mut set = staged(&["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
        let before = render(&set);

        set.remove_bound(before.entries[1].removal).unwrap();
        let after = render(&set);

        let names: Vec<_> = after.entries.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a.jpg", "c.jpg", "d.jpg"]);
        assert!(after.entries.iter().enumerate().all(|(i, t)| t.removal.index == i));
        // The old sheet's bindings are dead now.
        assert!(set.remove_bound(before.entries[2].removal).is_none());
    }

    #[test]
    fn empty_set_renders_empty_sheet() {
        let set = WorkingSet::new(IntakePolicy::default());
        assert!(render(&set).entries.is_empty());
    }

    #[tokio::test]
    async fn preview_shrinks_to_max_edge() {
        let img = image::RgbImage::from_pixel(64, 32, image::Rgb([200, 100, 50]));
        let mut encoded = Cursor::new(Vec::new());
        img.write_to(&mut encoded, image::ImageFormat::Png).unwrap();
        let source = ImageSource::from_bytes("wide.png", encoded.into_inner());

        let png = preview(&source, 16).await.unwrap();
        let thumb = image::load_from_memory(&png).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (16, 8));
    }

    #[tokio::test]
    async fn preview_of_garbage_is_a_format_error() {
        let source = ImageSource::from_bytes("broken.jpg", b"not an image".to_vec());
        assert!(matches!(preview(&source, 16).await, Err(HdrError::Format(_))));
    }
}
