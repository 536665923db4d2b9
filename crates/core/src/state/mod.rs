//! The single mutable state container shared by input handling, the media
//! pipeline and the frame scheduler.
//!
//! All mutation goes through [`Store::update`], which merges a
//! [`StatePatch`] and then notifies subscribers synchronously in
//! subscription order. Subscribers cannot touch the store directly while
//! being notified; they may queue follow-up patches on the [`Deferred`]
//! handed to them. Queued patches are applied, one notify pass each, after
//! the current pass completes. A patch that leaves the state unchanged
//! triggers no pass, and a cascade longer than [`MAX_CASCADE`] passes is cut
//! off with a warning.

use std::{fmt, time::Duration};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{beat::BeatState, catalog::MediaKind, media::MediaSize, media::SlotState};

/// Upper bound on notify passes triggered by a single [`Store::update`].
pub const MAX_CASCADE: usize = 32;

/// Raw pointer speed (pixels per second) that maps to a velocity of 1.
const VELOCITY_FULL_SCALE: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Normal,
    Split,
    Blend,
}

/// Normalised pointer position plus the raw sample it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerState {
    pub x: f32,
    pub y: f32,
    pub velocity: f32,
    pub last_raw: Vec2,
    pub last_sample: Option<Duration>,
}

impl Default for PointerState {
    fn default() -> Self {
        Self {
            x: 0.5,
            y: 0.5,
            velocity: 0.0,
            last_raw: Vec2::ZERO,
            last_sample: None,
        }
    }
}

impl PointerState {
    /// Derives the next pointer state from a raw surface position in pixels.
    ///
    /// `y` is flipped so that the bottom of the surface is 0. Velocity only
    /// updates when time has actually elapsed since the previous sample;
    /// otherwise the previous velocity is kept.
    pub fn moved_to(&self, raw: Vec2, surface: Vec2, now: Duration) -> Self {
        if !raw.is_finite() {
            return *self;
        }

        let mut next = *self;
        if surface.x > 0.0 && surface.y > 0.0 {
            next.x = clamp_unit(raw.x / surface.x);
            next.y = clamp_unit(1.0 - raw.y / surface.y);
        }

        let elapsed = self
            .last_sample
            .map(|last| now.saturating_sub(last).as_secs_f32())
            .unwrap_or_else(|| now.as_secs_f32());
        if elapsed > 0.0 {
            let speed = raw.distance(self.last_raw) / elapsed;
            next.velocity = clamp_unit(speed / VELOCITY_FULL_SCALE);
        }

        next.last_raw = raw;
        next.last_sample = Some(now);
        next
    }

    /// Sets the normalised position directly, as the drag bars do.
    pub fn with_position(&self, x: Option<f32>, y: Option<f32>) -> Self {
        Self {
            x: x.map(clamp_unit).unwrap_or(self.x),
            y: y.map(clamp_unit).unwrap_or(self.y),
            ..*self
        }
    }
}

/// Mirror of the media pipeline's public state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MediaState {
    pub active_index: usize,
    pub kind: Option<MediaKind>,
    pub slot: SlotState,
    pub intrinsic_size: Option<MediaSize>,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositorState {
    pub pointer: PointerState,
    pub beat: BeatState,
    pub media: MediaState,
    pub display_mode: DisplayMode,
    /// Percent of the surface width, in `[0, 100]`.
    pub divider_position: f32,
    /// Toggled by clicks on the surface.
    pub old_film: bool,
    /// A captured stream drives the audio; manual media controls are locked.
    pub capture_active: bool,
    pub secondary_size: Option<MediaSize>,
    pub resolution: Vec2,
}

impl Default for CompositorState {
    fn default() -> Self {
        Self {
            pointer: PointerState::default(),
            beat: BeatState::default(),
            media: MediaState::default(),
            display_mode: DisplayMode::Normal,
            divider_position: 50.0,
            old_film: false,
            capture_active: false,
            secondary_size: None,
            resolution: Vec2::ZERO,
        }
    }
}

impl CompositorState {
    fn merged(&self, patch: &StatePatch) -> Self {
        let mut next = self.clone();
        if let Some(pointer) = patch.pointer {
            next.pointer = pointer;
        }
        if let Some(beat) = patch.beat {
            next.beat = beat;
        }
        if let Some(media) = patch.media {
            next.media = media;
        }
        if let Some(mode) = patch.display_mode {
            next.display_mode = mode;
        }
        if let Some(divider) = patch.divider_position {
            if divider.is_finite() {
                next.divider_position = divider.clamp(0.0, 100.0);
            }
        }
        if let Some(old_film) = patch.old_film {
            next.old_film = old_film;
        }
        if let Some(active) = patch.capture_active {
            next.capture_active = active;
        }
        if let Some(size) = patch.secondary_size {
            next.secondary_size = size;
        }
        if let Some(resolution) = patch.resolution {
            if resolution.is_finite() {
                next.resolution = resolution.max(Vec2::ZERO);
            }
        }
        next
    }
}

/// Partial update merged into [`CompositorState`]. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub pointer: Option<PointerState>,
    pub beat: Option<BeatState>,
    pub media: Option<MediaState>,
    pub display_mode: Option<DisplayMode>,
    pub divider_position: Option<f32>,
    pub old_film: Option<bool>,
    pub capture_active: Option<bool>,
    pub secondary_size: Option<Option<MediaSize>>,
    pub resolution: Option<Vec2>,
}

impl StatePatch {
    pub fn pointer(pointer: PointerState) -> Self {
        Self {
            pointer: Some(pointer),
            ..Default::default()
        }
    }

    pub fn beat(beat: BeatState) -> Self {
        Self {
            beat: Some(beat),
            ..Default::default()
        }
    }

    pub fn media(media: MediaState) -> Self {
        Self {
            media: Some(media),
            ..Default::default()
        }
    }

    pub fn display_mode(mode: DisplayMode) -> Self {
        Self {
            display_mode: Some(mode),
            ..Default::default()
        }
    }

    pub fn divider(position: f32) -> Self {
        Self {
            divider_position: Some(position),
            ..Default::default()
        }
    }

    pub fn resolution(resolution: Vec2) -> Self {
        Self {
            resolution: Some(resolution),
            ..Default::default()
        }
    }
}

/// Follow-up patches queued by subscribers during a notify pass.
#[derive(Debug, Default)]
pub struct Deferred {
    patches: Vec<StatePatch>,
}

impl Deferred {
    pub fn push(&mut self, patch: StatePatch) {
        self.patches.push(patch);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn FnMut(&CompositorState, &mut Deferred)>;

/// Owns the [`CompositorState`] for the whole session.
pub struct Store {
    state: CompositorState,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

impl Store {
    pub fn new(initial: CompositorState) -> Self {
        Self {
            state: initial,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> &CompositorState {
        &self.state
    }

    pub fn subscribe(
        &mut self,
        subscriber: impl FnMut(&CompositorState, &mut Deferred) + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    /// Merges `patch` and runs notify passes until no follow-up patches
    /// remain. Returns the number of passes that ran.
    pub fn update(&mut self, patch: StatePatch) -> usize {
        let mut queue = std::collections::VecDeque::from([patch]);
        let mut passes = 0;

        while let Some(patch) = queue.pop_front() {
            let next = self.state.merged(&patch);
            if next == self.state {
                continue;
            }
            if passes == MAX_CASCADE {
                warn!(
                    dropped = queue.len() + 1,
                    "state update cascade exceeded {MAX_CASCADE} passes"
                );
                break;
            }

            self.state = next;
            passes += 1;

            let mut deferred = Deferred::default();
            for (_, subscriber) in &mut self.subscribers {
                subscriber(&self.state, &mut deferred);
            }
            if !deferred.patches.is_empty() {
                debug!(queued = deferred.patches.len(), "subscribers queued follow-up patches");
            }
            queue.extend(deferred.patches);
        }

        passes
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(CompositorState::default())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use proptest::prelude::*;

    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn subscribers_run_in_subscription_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut store = Store::default();
        for name in ["first", "second"] {
            let log = log.clone();
            store.subscribe(move |_, _| log.borrow_mut().push(name));
        }

        assert_eq!(store.update(StatePatch::divider(20.0)), 1);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn unchanged_state_skips_notification() {
        let calls = Rc::new(RefCell::new(0));
        let mut store = Store::default();
        let counter = calls.clone();
        store.subscribe(move |_, _| *counter.borrow_mut() += 1);

        assert_eq!(store.update(StatePatch::divider(50.0)), 0);
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn mutations_queued_during_notify_run_after_the_pass() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut store = Store::default();

        store.subscribe(|state, deferred| {
            if state.display_mode == DisplayMode::Split {
                deferred.push(StatePatch::divider(75.0));
            }
        });
        let log = seen.clone();
        store.subscribe(move |state, _| {
            log.borrow_mut()
                .push((state.display_mode, state.divider_position));
        });

        let passes = store.update(StatePatch::display_mode(DisplayMode::Split));

        assert_eq!(passes, 2);
        // The second subscriber saw the first pass complete before the
        // queued divider change was applied.
        assert_eq!(
            *seen.borrow(),
            vec![(DisplayMode::Split, 50.0), (DisplayMode::Split, 75.0)]
        );
    }

    #[test]
    fn runaway_cascade_is_cut_off() {
        let mut store = Store::default();
        store.subscribe(|state, deferred| {
            let next = if state.divider_position >= 100.0 { 0.0 } else { 100.0 };
            deferred.push(StatePatch::divider(next));
        });

        assert_eq!(store.update(StatePatch::divider(10.0)), MAX_CASCADE);
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let calls = Rc::new(RefCell::new(0));
        let mut store = Store::default();
        let counter = calls.clone();
        let id = store.subscribe(move |_, _| *counter.borrow_mut() += 1);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.update(StatePatch::divider(10.0));
        assert_eq!(*calls.borrow(), 0);
    }

    #[test]
    fn divider_is_clamped() {
        let mut store = Store::default();
        store.update(StatePatch::divider(140.0));
        assert_eq!(store.state().divider_position, 100.0);
        store.update(StatePatch::divider(f32::NAN));
        assert_eq!(store.state().divider_position, 100.0);
    }

    #[test]
    fn pointer_maps_to_unit_square_with_flipped_y() {
        let pointer = PointerState::default().moved_to(
            Vec2::new(480.0, 270.0),
            Vec2::new(1920.0, 1080.0),
            ms(10),
        );
        assert!((pointer.x - 0.25).abs() < 1e-6);
        assert!((pointer.y - 0.75).abs() < 1e-6);
    }

    #[test]
    fn zero_elapsed_time_keeps_previous_velocity() {
        let surface = Vec2::new(100.0, 100.0);
        let first = PointerState::default().moved_to(Vec2::new(10.0, 10.0), surface, ms(100));
        let second = first.moved_to(Vec2::new(90.0, 90.0), surface, ms(100));
        assert_eq!(second.velocity, first.velocity);
        assert!(second.velocity.is_finite());
    }

    proptest! {
        #[test]
        fn pointer_stays_in_unit_range(
            moves in prop::collection::vec((-1e6f32..1e6, -1e6f32..1e6, 0u64..50), 1..50),
            width in 0f32..4000.0,
            height in 0f32..4000.0,
        ) {
            let surface = Vec2::new(width, height);
            let mut pointer = PointerState::default();
            let mut now = 0;
            for (x, y, dt) in moves {
                now += dt;
                pointer = pointer.moved_to(Vec2::new(x, y), surface, ms(now));
                prop_assert!((0.0..=1.0).contains(&pointer.x));
                prop_assert!((0.0..=1.0).contains(&pointer.y));
                prop_assert!((0.0..=1.0).contains(&pointer.velocity));
            }
        }
    }
}
