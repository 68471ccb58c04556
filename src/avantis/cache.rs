//! In-memory mirror of console state
//!
//! Storage is indexed by [`ChannelType`] and channel index, so every lookup is
//! a bounds-checked array access rather than a string-keyed map lookup. All
//! fields start unknown and are learned from traffic.

use std::collections::BTreeMap;

use super::channel::{ChannelType, LogicalChannel, CHANNEL_TYPE_COUNT};
use super::codec::Color;

/// Everything known about one channel strip
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelState {
    pub mute: Option<bool>,
    pub fader_db: Option<f64>,
    pub name: Option<String>,
    pub color: Option<Color>,
    pub main_assign: Option<bool>,
    /// DCA and mute-group membership, keyed by group
    pub groups: BTreeMap<LogicalChannel, bool>,
}

/// A single cache write, delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    Mute { channel: LogicalChannel, muted: bool },
    Fader { channel: LogicalChannel, db: f64 },
    Name { channel: LogicalChannel, name: String },
    Color { channel: LogicalChannel, color: Color },
    MainAssign { channel: LogicalChannel, assigned: bool },
    GroupAssign { channel: LogicalChannel, group: LogicalChannel, assigned: bool },
    Scene { scene: u16 },
    /// Name the console reported for a scene
    SceneName { scene: u16, name: String },
}

impl CacheUpdate {
    /// Family whose feedbacks need re-evaluating
    pub fn channel_type(&self) -> ChannelType {
        self.channel().map_or(ChannelType::Scene, |c| c.kind)
    }

    pub fn channel(&self) -> Option<LogicalChannel> {
        match *self {
            CacheUpdate::Mute { channel, .. }
            | CacheUpdate::Fader { channel, .. }
            | CacheUpdate::Name { channel, .. }
            | CacheUpdate::Color { channel, .. }
            | CacheUpdate::MainAssign { channel, .. }
            | CacheUpdate::GroupAssign { channel, .. } => Some(channel),
            CacheUpdate::Scene { .. } | CacheUpdate::SceneName { .. } => None,
        }
    }
}

/// Per-family channel state plus the current scene
#[derive(Debug, Clone)]
pub struct StateCache {
    channels: [Vec<ChannelState>; CHANNEL_TYPE_COUNT],
    current_scene: Option<u16>,
    current_scene_name: Option<String>,
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            channels: std::array::from_fn(|slot| {
                let kind = ChannelType::ALL[slot];
                // Scenes carry no strip state
                let len = if kind.is_note_addressed() { kind.count() as usize } else { 0 };
                vec![ChannelState::default(); len]
            }),
            current_scene: None,
            current_scene_name: None,
        }
    }

    /// Forget everything (done on every reconnect)
    pub fn clear(&mut self) {
        for family in self.channels.iter_mut() {
            family.iter_mut().for_each(|state| *state = ChannelState::default());
        }
        self.current_scene = None;
        self.current_scene_name = None;
    }

    pub fn get(&self, channel: LogicalChannel) -> Option<&ChannelState> {
        let index = (channel.index as usize).checked_sub(1)?;
        self.channels[channel.kind.slot()].get(index)
    }

    fn get_mut(&mut self, channel: LogicalChannel) -> Option<&mut ChannelState> {
        let index = (channel.index as usize).checked_sub(1)?;
        self.channels[channel.kind.slot()].get_mut(index)
    }

    pub fn mute(&self, channel: LogicalChannel) -> Option<bool> {
        self.get(channel).and_then(|s| s.mute)
    }

    pub fn fader_db(&self, channel: LogicalChannel) -> Option<f64> {
        self.get(channel).and_then(|s| s.fader_db)
    }

    pub fn name(&self, channel: LogicalChannel) -> Option<&str> {
        self.get(channel).and_then(|s| s.name.as_deref())
    }

    pub fn color(&self, channel: LogicalChannel) -> Option<Color> {
        self.get(channel).and_then(|s| s.color)
    }

    pub fn current_scene(&self) -> Option<u16> {
        self.current_scene
    }

    pub fn current_scene_name(&self) -> Option<&str> {
        self.current_scene_name.as_deref()
    }

    /// Channels of one family that have at least one known field
    pub fn known(&self, kind: ChannelType) -> impl Iterator<Item = (LogicalChannel, &ChannelState)> {
        self.channels[kind.slot()]
            .iter()
            .enumerate()
            .filter(|(_, state)| **state != ChannelState::default())
            .map(move |(i, state)| (LogicalChannel { kind, index: i as u16 + 1 }, state))
    }

    /// Write an update, returning false if it addresses no stored channel
    pub fn apply(&mut self, update: &CacheUpdate) -> bool {
        match update {
            CacheUpdate::Scene { scene } => {
                if self.current_scene != Some(*scene) {
                    self.current_scene_name = None;
                }
                self.current_scene = Some(*scene);
                return true;
            }
            // A reply for a scene that is no longer current is stale
            CacheUpdate::SceneName { scene, name } => {
                if self.current_scene != Some(*scene) {
                    return false;
                }
                self.current_scene_name = Some(name.clone());
                return true;
            }
            _ => {}
        }
        let Some(state) = update.channel().and_then(|c| self.get_mut(c)) else {
            return false;
        };

        match update {
            CacheUpdate::Mute { muted, .. } => state.mute = Some(*muted),
            CacheUpdate::Fader { db, .. } => state.fader_db = Some(*db),
            CacheUpdate::Name { name, .. } => state.name = Some(name.clone()),
            CacheUpdate::Color { color, .. } => state.color = Some(*color),
            CacheUpdate::MainAssign { assigned, .. } => state.main_assign = Some(*assigned),
            CacheUpdate::GroupAssign { group, assigned, .. } => {
                state.groups.insert(*group, *assigned);
            }
            CacheUpdate::Scene { .. } | CacheUpdate::SceneName { .. } => {}
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(index: u16) -> LogicalChannel {
        LogicalChannel::new(ChannelType::Input, index).unwrap()
    }

    #[test]
    fn test_starts_unknown() {
        let cache = StateCache::new();
        assert_eq!(cache.mute(input(1)), None);
        assert_eq!(cache.name(input(64)), None);
        assert_eq!(cache.current_scene(), None);
        assert_eq!(cache.known(ChannelType::Input).count(), 0);
    }

    #[test]
    fn test_apply_and_clear() {
        let mut cache = StateCache::new();
        assert!(cache.apply(&CacheUpdate::Mute { channel: input(5), muted: true }));
        assert!(cache.apply(&CacheUpdate::Name { channel: input(5), name: "Kick".into() }));
        assert!(cache.apply(&CacheUpdate::Scene { scene: 12 }));

        assert_eq!(cache.mute(input(5)), Some(true));
        assert_eq!(cache.name(input(5)), Some("Kick"));
        assert_eq!(cache.current_scene(), Some(12));
        assert_eq!(cache.known(ChannelType::Input).map(|(c, _)| c).collect::<Vec<_>>(), vec![input(5)]);

        cache.clear();
        assert_eq!(cache.get(input(5)), Some(&ChannelState::default()));
        assert_eq!(cache.current_scene(), None);
    }

    #[test]
    fn test_scene_name_follows_current_scene() {
        let mut cache = StateCache::new();
        assert!(!cache.apply(&CacheUpdate::SceneName { scene: 3, name: "Act 1".into() }));

        cache.apply(&CacheUpdate::Scene { scene: 3 });
        assert!(cache.apply(&CacheUpdate::SceneName { scene: 3, name: "Act 1".into() }));
        assert_eq!(cache.current_scene_name(), Some("Act 1"));

        // Late reply for the previous scene
        cache.apply(&CacheUpdate::Scene { scene: 4 });
        assert_eq!(cache.current_scene_name(), None);
        assert!(!cache.apply(&CacheUpdate::SceneName { scene: 3, name: "Act 1".into() }));

        cache.apply(&CacheUpdate::SceneName { scene: 4, name: "Act 2".into() });
        cache.clear();
        assert_eq!(cache.current_scene_name(), None);
    }

    #[test]
    fn test_group_membership() {
        let mut cache = StateCache::new();
        let dca = LogicalChannel::new(ChannelType::Dca, 3).unwrap();
        cache.apply(&CacheUpdate::GroupAssign { channel: input(2), group: dca, assigned: true });
        cache.apply(&CacheUpdate::GroupAssign { channel: input(2), group: dca, assigned: false });
        assert_eq!(cache.get(input(2)).unwrap().groups.get(&dca), Some(&false));
    }

    #[test]
    fn test_scene_channels_hold_no_state() {
        let mut cache = StateCache::new();
        let scene = LogicalChannel { kind: ChannelType::Scene, index: 1 };
        assert!(!cache.apply(&CacheUpdate::Mute { channel: scene, muted: true }));
        assert_eq!(cache.get(scene), None);
    }

    #[test]
    fn test_update_channel_type() {
        let dca = LogicalChannel::new(ChannelType::Dca, 1).unwrap();
        assert_eq!(CacheUpdate::Fader { channel: dca, db: 0.0 }.channel_type(), ChannelType::Dca);
        assert_eq!(CacheUpdate::Scene { scene: 1 }.channel_type(), ChannelType::Scene);
    }
}
