use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

const TRANSIENT_SCHEME: &str = "blob:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Classifies a MIME type such as `video/mp4`. Anything that is neither
    /// video nor image is rejected.
    pub fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("video/") {
            Some(Self::Video)
        } else if mime.starts_with("image/") {
            Some(Self::Image)
        } else {
            None
        }
    }
}

/// A playable media source. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaDescriptor {
    url: String,
    kind: MediaKind,
}

impl MediaDescriptor {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Transient URLs were minted for user uploads and must be released once
    /// nothing refers to them.
    pub fn is_transient(&self) -> bool {
        self.url.starts_with(TRANSIENT_SCHEME)
    }
}

/// Releases URLs minted for uploaded files.
pub trait UrlReleaser {
    fn release(&mut self, url: &str);
}

/// Releaser for hosts that never mint transient URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReleaser;

impl UrlReleaser for NoopReleaser {
    fn release(&mut self, _url: &str) {}
}

/// Ordered list of media sources. Duplicates are allowed and order decides
/// what `next`/`previous` select.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MediaCatalog {
    entries: Vec<MediaDescriptor>,
}

impl MediaCatalog {
    pub fn new(entries: Vec<MediaDescriptor>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MediaDescriptor> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaDescriptor> {
        self.entries.iter()
    }

    pub fn append(&mut self, descriptor: MediaDescriptor) {
        self.entries.push(descriptor);
    }

    /// Swaps in a new list of sources and releases transient URLs of the
    /// replaced entries that the new list no longer references. Returns how
    /// many URLs were released.
    pub fn replace(
        &mut self,
        entries: Vec<MediaDescriptor>,
        releaser: &mut dyn UrlReleaser,
    ) -> usize {
        let old = std::mem::replace(&mut self.entries, entries);
        let kept: HashSet<&str> = self.entries.iter().map(MediaDescriptor::url).collect();
        release_transient(old.iter().filter(|d| !kept.contains(d.url())), releaser)
    }

    /// Empties the catalog, releasing every transient URL it held.
    pub fn reset(&mut self, releaser: &mut dyn UrlReleaser) -> usize {
        let old = std::mem::take(&mut self.entries);
        release_transient(old.iter(), releaser)
    }

    /// Index after `current`, wrapping to the start.
    pub fn next_index(&self, current: usize) -> Option<usize> {
        let len = self.entries.len();
        (len > 0).then(|| (current % len + 1) % len)
    }

    /// Index before `current`, wrapping to the end.
    pub fn previous_index(&self, current: usize) -> Option<usize> {
        let len = self.entries.len();
        (len > 0).then(|| (current % len + len - 1) % len)
    }
}

fn release_transient<'a>(
    entries: impl Iterator<Item = &'a MediaDescriptor>,
    releaser: &mut dyn UrlReleaser,
) -> usize {
    let mut released = HashSet::new();
    for descriptor in entries.filter(|d| d.is_transient()) {
        if released.insert(descriptor.url()) {
            debug!(url = descriptor.url(), "releasing transient media url");
            releaser.release(descriptor.url());
        }
    }
    released.len()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Default)]
    struct RecordingReleaser(Vec<String>);

    impl UrlReleaser for RecordingReleaser {
        fn release(&mut self, url: &str) {
            self.0.push(url.to_string());
        }
    }

    fn video(url: &str) -> MediaDescriptor {
        MediaDescriptor::new(url, MediaKind::Video)
    }

    #[test]
    fn next_and_previous_wrap_in_both_directions() {
        let catalog = MediaCatalog::new(vec![video("a"), video("b"), video("c")]);
        assert_eq!(catalog.next_index(2), Some(0));
        assert_eq!(catalog.previous_index(0), Some(2));
        assert_eq!(catalog.next_index(0), Some(1));
        assert_eq!(MediaCatalog::default().next_index(0), None);
    }

    #[test]
    fn replace_releases_only_dropped_transient_urls() {
        let mut catalog = MediaCatalog::new(vec![
            video("blob:one"),
            video("vid/local.mp4"),
            video("blob:two"),
            video("blob:one"),
        ]);
        let mut releaser = RecordingReleaser::default();

        let released = catalog.replace(vec![video("blob:two"), video("blob:three")], &mut releaser);

        assert_eq!(released, 1);
        assert_eq!(releaser.0, vec!["blob:one".to_string()]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn reset_releases_everything_transient() {
        let mut catalog = MediaCatalog::new(vec![video("blob:x"), video("clip.mp4")]);
        let mut releaser = RecordingReleaser::default();
        assert_eq!(catalog.reset(&mut releaser), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn classifies_mime_types() {
        assert_eq!(MediaKind::from_mime("video/webm"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("audio/mpeg"), None);
    }

    proptest! {
        #[test]
        fn stepping_len_times_returns_to_start(len in 1usize..64, start in 0usize..64) {
            let catalog = MediaCatalog::new((0..len).map(|i| video(&i.to_string())).collect());
            let start = start % len;
            let mut index = start;
            for _ in 0..len {
                index = catalog.next_index(index).unwrap();
            }
            prop_assert_eq!(index, start);

            for _ in 0..len {
                index = catalog.previous_index(index).unwrap();
            }
            prop_assert_eq!(index, start);
        }
    }
}
