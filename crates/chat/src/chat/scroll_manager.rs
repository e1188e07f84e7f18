use std::time::Duration;

use tokio::time::Instant;

use crate::chat::message::StreamStatus;
use crate::chat::viewport::{ScrollBehavior, Viewport, ViewportMetrics};

/// Distance from the bottom beyond which a user scroll pauses follow mode.
pub const DEFAULT_AWAY_THRESHOLD: f32 = 50.0;
pub const DEFAULT_SMOOTH_SETTLE: Duration = Duration::from_millis(500);
pub const DEFAULT_INSTANT_SETTLE: Duration = Duration::from_millis(100);
/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowMode {
    #[default]
    Auto,
    UserHeld,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollConfig {
    pub away_threshold: f32,
    pub smooth_settle: Duration,
    pub instant_settle: Duration,
}

impl ScrollConfig {
    /// How long self-induced scroll events are ignored after a programmatic scroll.
    pub fn settle_for(&self, behavior: ScrollBehavior) -> Duration {
        match behavior {
            ScrollBehavior::Smooth => self.smooth_settle,
            ScrollBehavior::Instant => self.instant_settle,
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            away_threshold: DEFAULT_AWAY_THRESHOLD,
            smooth_settle: DEFAULT_SMOOTH_SETTLE,
            instant_settle: DEFAULT_INSTANT_SETTLE,
        }
    }
}

/// Tracks whether the view follows the stream tail or respects a manual position.
///
/// Once the user scrolls away, only [`ScrollManager::resume`] or a new submission
/// re-enables follow mode; returning to the bottom by hand does not.
///
/// Every scroll event that arrives while a programmatic scroll settles is self-induced.
#[derive(Debug)]
pub struct ScrollManager {
    config: ScrollConfig,
    follow_mode: FollowMode,
    last_scroll_top: f32,
    programmatic_until: Option<Instant>,
}

impl ScrollManager {
    pub fn new(config: ScrollConfig) -> Self {
        Self {
            config,
            follow_mode: FollowMode::Auto,
            last_scroll_top: 0.0,
            programmatic_until: None,
        }
    }

    pub fn follow_mode(&self) -> FollowMode {
        self.follow_mode
    }

    pub fn is_following(&self) -> bool {
        self.follow_mode == FollowMode::Auto
    }

    pub fn last_scroll_top(&self) -> f32 {
        self.last_scroll_top
    }

    pub fn is_programmatic(&self, now: Instant) -> bool {
        self.programmatic_until.is_some_and(|until| now < until)
    }

    /// Deadline at which the programmatic-scroll flag clears.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.programmatic_until
    }

    pub fn clear_expired(&mut self, now: Instant) -> bool {
        match self.programmatic_until {
            Some(until) if until <= now => {
                self.programmatic_until = None;
                true
            }
            Some(_) | None => false,
        }
    }

    /// Handles a scroll event from the viewport. Returns true when follow mode was paused.
    pub fn handle_scroll(&mut self, metrics: ViewportMetrics, now: Instant) -> bool {
        if self.is_programmatic(now) {
            tracing::trace!(scroll_top = metrics.scroll_top, "ignored self-induced scroll");
            return false;
        }

        let scrolled_up = metrics.scroll_top < self.last_scroll_top - SCROLL_DELTA_EPSILON;
        self.last_scroll_top = metrics.scroll_top;

        let away_from_bottom = metrics.distance_from_bottom() > self.config.away_threshold;
        if self.follow_mode == FollowMode::Auto && (scrolled_up || away_from_bottom) {
            tracing::debug!(
                scroll_top = metrics.scroll_top,
                distance_from_bottom = metrics.distance_from_bottom(),
                "user scrolled away, pausing follow mode"
            );
            self.follow_mode = FollowMode::UserHeld;
            return true;
        }

        false
    }

    /// Explicit resume, e.g. the "jump to latest" button.
    pub fn resume<V>(&mut self, viewport: &mut V, now: Instant) -> bool
    where
        V: Viewport + ?Sized,
    {
        self.follow_mode = FollowMode::Auto;
        self.scroll_to_bottom(viewport, ScrollBehavior::Smooth, now)
    }

    pub fn handle_user_submit<V>(&mut self, viewport: &mut V, now: Instant) -> bool
    where
        V: Viewport + ?Sized,
    {
        self.resume(viewport, now)
    }

    /// Keeps the tail in view while a response is arriving.
    pub fn handle_snapshot_changed<V>(
        &mut self,
        status: StreamStatus,
        viewport: &mut V,
        now: Instant,
    ) -> bool
    where
        V: Viewport + ?Sized,
    {
        if self.follow_mode != FollowMode::Auto || !status.is_active() {
            return false;
        }

        self.scroll_to_bottom(viewport, ScrollBehavior::Instant, now)
    }

    pub fn reset(&mut self) {
        self.follow_mode = FollowMode::Auto;
        self.last_scroll_top = 0.0;
        self.programmatic_until = None;
    }

    fn scroll_to_bottom<V>(&mut self, viewport: &mut V, behavior: ScrollBehavior, now: Instant) -> bool
    where
        V: Viewport + ?Sized,
    {
        // Not queued: the next trigger tries again.
        if viewport.metrics().is_none() {
            tracing::debug!(?behavior, "viewport not measurable, skipping scroll");
            return false;
        }

        // Flag before scrolling so the resulting scroll events are ignored.
        let until = now + self.config.settle_for(behavior);
        self.programmatic_until = Some(
            self.programmatic_until
                .map_or(until, |existing| existing.max(until)),
        );
        viewport.scroll_to_bottom(behavior);
        true
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new(ScrollConfig::default())
    }
}
