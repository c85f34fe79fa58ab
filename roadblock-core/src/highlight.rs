//! Temporary client-side markers over blocks a player just changed.
//!
//! Each player has at most one pending reversion. A new highlight for the
//! same player cancels the old timer and starts a fresh one, so expiry is
//! always measured from the latest call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::location::ValidLocation;
use crate::settings::Settings;
use crate::timer::{Tick, TimerHandle, TimerQueue};
use crate::world::{Material, PlayerId, WorldAccess};

/// Sends fake block changes to one player's client.
pub trait BlockDisplay {
    fn show_block(&self, player: PlayerId, location: &ValidLocation, material: &Material);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightStyle {
    Protect,
    Unprotect,
}

struct ActiveHighlight {
    timer: TimerHandle,
    locations: Vec<ValidLocation>,
}

pub struct HighlightScheduler {
    display: Arc<dyn BlockDisplay>,
    worlds: Arc<dyn WorldAccess>,
    timers: TimerQueue<PlayerId>,
    active: HashMap<PlayerId, ActiveHighlight>,
    duration: Tick,
    protect_marker: Material,
    unprotect_marker: Material,
}

impl HighlightScheduler {
    pub fn new(display: Arc<dyn BlockDisplay>, worlds: Arc<dyn WorldAccess>, settings: &Settings) -> Self {
        Self {
            display,
            worlds,
            timers: TimerQueue::new(),
            active: HashMap::new(),
            duration: settings.highlight_ticks,
            protect_marker: settings.highlight_protect_material.clone(),
            unprotect_marker: settings.highlight_unprotect_material.clone(),
        }
    }

    fn marker(&self, style: HighlightStyle) -> &Material {
        match style {
            HighlightStyle::Protect => &self.protect_marker,
            HighlightStyle::Unprotect => &self.unprotect_marker,
        }
    }

    /// Show `locations` to `player` as the style's marker and (re)start the
    /// reversion timer.
    pub fn highlight_blocks(
        &mut self,
        player: PlayerId,
        locations: impl IntoIterator<Item = ValidLocation>,
        style: HighlightStyle,
    ) {
        let locations: Vec<ValidLocation> = locations.into_iter().collect();

        if let Some(previous) = self.active.remove(&player) {
            self.timers.cancel(previous.timer);
            let keep: HashSet<&ValidLocation> = locations.iter().collect();
            let stale: Vec<&ValidLocation> = previous.locations.iter().filter(|l| !keep.contains(l)).collect();
            self.restore(player, stale);
        }

        let marker = self.marker(style).clone();
        for location in &locations {
            self.display.show_block(player, location, &marker);
        }

        let timer = self.timers.schedule(self.duration, player);
        log::debug!(
            "Highlighting {} blocks for {} until tick {}",
            locations.len(),
            player,
            self.timers.now() + self.duration
        );
        self.active.insert(player, ActiveHighlight { timer, locations });
    }

    /// Cancel the pending timer and put the real blocks back right away.
    /// Returns false if nothing was highlighted.
    pub fn un_highlight_blocks(&mut self, player: PlayerId) -> bool {
        let Some(active) = self.active.remove(&player) else {
            return false;
        };
        self.timers.cancel(active.timer);
        self.restore(player, &active.locations);
        true
    }

    /// A timer must never outlive the player's session.
    pub fn on_player_disconnect(&mut self, player: PlayerId) {
        if self.un_highlight_blocks(player) {
            log::debug!("Cleared pending highlight for disconnected player {}", player);
        }
    }

    pub fn tick(&mut self) {
        self.advance(1);
    }

    pub fn advance(&mut self, ticks: Tick) {
        for player in self.timers.advance(ticks) {
            if let Some(active) = self.active.remove(&player) {
                self.restore(player, &active.locations);
            }
        }
    }

    /// Restore every pending highlight. Used on shutdown.
    pub fn clear_all(&mut self) {
        self.timers.drain();
        let active: Vec<(PlayerId, ActiveHighlight)> = self.active.drain().collect();
        for (player, highlight) in active {
            self.restore(player, &highlight.locations);
        }
    }

    pub fn is_highlighting(&self, player: PlayerId) -> bool {
        self.active.contains_key(&player)
    }

    /// Tick at which `player`'s highlight reverts.
    pub fn expires_at(&self, player: PlayerId) -> Option<Tick> {
        self.active
            .get(&player)
            .and_then(|active| self.timers.expires_at(active.timer))
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn restore<'a>(&self, player: PlayerId, locations: impl IntoIterator<Item = &'a ValidLocation>) {
        for location in locations {
            // world gone: the client will drop the fake block along with it
            if let Some(material) = self.worlds.material_at(location.world_id(), location.pos()) {
                self.display.show_block(player, location, &material);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{BlockLocation, RawLocation};
    use crate::test_support::{FakeWorlds, RecordingDisplay};
    use crate::world::BlockPos;
    use uuid::Uuid;

    struct Fixture {
        worlds: Arc<FakeWorlds>,
        display: Arc<RecordingDisplay>,
        scheduler: HighlightScheduler,
        world: Uuid,
    }

    fn fixture() -> Fixture {
        let worlds = Arc::new(FakeWorlds::new());
        let world = worlds.add_world("world");
        worlds.paint(world, (0, 3), (0, 0), 64, "minecraft:dirt_path");
        let display = Arc::new(RecordingDisplay::default());
        let settings = Settings {
            highlight_ticks: 100,
            ..Settings::default()
        };
        let scheduler = HighlightScheduler::new(display.clone(), worlds.clone(), &settings);
        Fixture {
            worlds,
            display,
            scheduler,
            world,
        }
    }

    impl Fixture {
        fn at(&self, x: i32) -> ValidLocation {
            BlockLocation::validate(
                Some(&RawLocation::new(Some(self.world), x as f64, 64.0, 0.0)),
                self.worlds.as_ref(),
            )
            .valid()
            .unwrap()
        }
    }

    const PLAYER: Uuid = Uuid::from_u128(7);

    #[test]
    fn test_highlight_reverts_after_duration() {
        let mut fx = fixture();
        let block = fx.at(0);

        fx.scheduler.highlight_blocks(PLAYER, [block.clone()], HighlightStyle::Protect);
        assert_eq!(
            fx.display.shown(PLAYER, block.pos()),
            Some(Material::from("minecraft:lime_stained_glass"))
        );

        fx.scheduler.advance(99);
        assert!(fx.scheduler.is_highlighting(PLAYER));

        fx.scheduler.tick();
        assert!(!fx.scheduler.is_highlighting(PLAYER));
        assert_eq!(
            fx.display.shown(PLAYER, block.pos()),
            Some(Material::from("minecraft:dirt_path"))
        );
    }

    #[test]
    fn test_repeated_highlight_debounces() {
        let mut fx = fixture();

        fx.scheduler.highlight_blocks(PLAYER, [fx.at(0)], HighlightStyle::Protect);
        fx.scheduler.advance(30);
        fx.scheduler.highlight_blocks(PLAYER, [fx.at(1)], HighlightStyle::Unprotect);

        assert_eq!(fx.scheduler.pending_timers(), 1);
        assert_eq!(fx.scheduler.expires_at(PLAYER), Some(130));
        // the block dropped from the highlight went back immediately
        assert_eq!(
            fx.display.shown(PLAYER, BlockPos::new(0, 64, 0)),
            Some(Material::from("minecraft:dirt_path"))
        );

        fx.scheduler.advance(70);
        assert!(fx.scheduler.is_highlighting(PLAYER));
        fx.scheduler.advance(30);
        assert!(!fx.scheduler.is_highlighting(PLAYER));
        assert_eq!(fx.scheduler.pending_timers(), 0);
    }

    #[test]
    fn test_unhighlight_restores_immediately() {
        let mut fx = fixture();
        let block = fx.at(2);
        fx.scheduler.highlight_blocks(PLAYER, [block.clone()], HighlightStyle::Unprotect);

        assert!(fx.scheduler.un_highlight_blocks(PLAYER));
        assert!(!fx.scheduler.un_highlight_blocks(PLAYER));
        assert_eq!(fx.scheduler.pending_timers(), 0);
        assert_eq!(
            fx.display.shown(PLAYER, block.pos()),
            Some(Material::from("minecraft:dirt_path"))
        );
    }

    #[test]
    fn test_disconnect_cancels_timer() {
        let mut fx = fixture();
        fx.scheduler.highlight_blocks(PLAYER, [fx.at(0), fx.at(1)], HighlightStyle::Protect);

        fx.scheduler.on_player_disconnect(PLAYER);

        assert_eq!(fx.scheduler.pending_timers(), 0);
        assert!(!fx.scheduler.is_highlighting(PLAYER));
        let sent = fx.display.sent.borrow().len();
        fx.scheduler.advance(1000);
        assert_eq!(fx.display.sent.borrow().len(), sent);
    }

    #[test]
    fn test_players_have_independent_timers() {
        let mut fx = fixture();
        let other = Uuid::from_u128(8);
        fx.scheduler.highlight_blocks(PLAYER, [fx.at(0)], HighlightStyle::Protect);
        fx.scheduler.advance(50);
        fx.scheduler.highlight_blocks(other, [fx.at(0)], HighlightStyle::Protect);

        fx.scheduler.advance(50);

        assert!(!fx.scheduler.is_highlighting(PLAYER));
        assert!(fx.scheduler.is_highlighting(other));
    }

    #[test]
    fn test_clear_all_restores_everyone() {
        let mut fx = fixture();
        let other = Uuid::from_u128(8);
        fx.scheduler.highlight_blocks(PLAYER, [fx.at(0)], HighlightStyle::Protect);
        fx.scheduler.highlight_blocks(other, [fx.at(3)], HighlightStyle::Protect);

        fx.scheduler.clear_all();

        assert_eq!(fx.scheduler.pending_timers(), 0);
        assert_eq!(
            fx.display.shown(other, BlockPos::new(3, 64, 0)),
            Some(Material::from("minecraft:dirt_path"))
        );
    }
}
