//! CC value table with channel filter and watch window
//!
//! Pure state: no I/O, no allocation. The engine feeds every polled message
//! through [`CcTable::process`].

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{BridgeError, Result};
use crate::midi::{MidiWord, DATA_MAX};

/// Number of output channels, one per watched CC number
pub const NUM_OUTPUTS: usize = 16;

/// Number of MIDI channels
pub const NUM_CHANNELS: u8 = 16;

/// Highest valid first-CC offset (the window starts inside 0..127)
pub const FIRST_CC_MAX: u8 = DATA_MAX - 1;

/// Which MIDI channels are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelFilter {
    #[default]
    All,
    /// Zero-based channel (0-15)
    Channel(u8),
}

impl ChannelFilter {
    pub fn accepts(self, channel: u8) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Channel(c) => c == channel,
        }
    }

    /// Decode the persisted integer form: negative means all channels
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            r if r < 0 => Ok(ChannelFilter::All),
            r if r < NUM_CHANNELS as i64 => Ok(ChannelFilter::Channel(r as u8)),
            r => Err(BridgeError::InvalidSetting {
                field: "channel",
                value: r,
                expected: "-1 (all) or 0-15",
            }),
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            ChannelFilter::All => -1,
            ChannelFilter::Channel(c) => c as i64,
        }
    }

    fn validate(self) -> Result<Self> {
        Self::from_raw(self.as_raw())
    }
}

/// What happens to stored values when the first-CC offset moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Keep old values until new messages overwrite them
    #[default]
    KeepStale,
    /// Zero every slot so no value is relabelled to a different CC number
    Clear,
}

/// Most recent value of each watched CC number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcTable {
    channel: ChannelFilter,
    first_cc: u8,
    offset_policy: OffsetPolicy,
    values: [u8; NUM_OUTPUTS],
}

impl Default for CcTable {
    fn default() -> Self {
        Self::new(OffsetPolicy::default())
    }
}

impl CcTable {
    pub fn new(offset_policy: OffsetPolicy) -> Self {
        Self {
            channel: ChannelFilter::All,
            first_cc: 0,
            offset_policy,
            values: [0; NUM_OUTPUTS],
        }
    }

    /// Apply one message; returns whether a slot was written
    ///
    /// Filtered channels, non-CC messages, CC numbers outside the window and
    /// malformed data bytes are ignored without error.
    pub fn process(&mut self, word: MidiWord) -> bool {
        if !self.channel.accepts(word.channel()) {
            return false;
        }
        let Some(cc) = word.as_control_change() else {
            return false;
        };
        if cc.cc > DATA_MAX || cc.value > DATA_MAX {
            return false;
        }
        let Some(slot) = self.slot_for(cc.cc) else {
            return false;
        };

        trace!("CC {} -> slot {} = {}", cc.cc, slot, cc.value);
        self.values[slot] = cc.value;
        true
    }

    /// Slot watching this CC number, if it is inside the window
    pub fn slot_for(&self, cc: u8) -> Option<usize> {
        let offset = (cc as usize).checked_sub(self.first_cc as usize)?;
        (offset < NUM_OUTPUTS).then_some(offset)
    }

    pub fn channel(&self) -> ChannelFilter {
        self.channel
    }

    pub fn set_channel(&mut self, channel: ChannelFilter) -> Result<()> {
        self.channel = channel.validate()?;
        Ok(())
    }

    pub fn first_cc(&self) -> u8 {
        self.first_cc
    }

    pub fn set_first_cc(&mut self, first_cc: u8) -> Result<()> {
        if first_cc > FIRST_CC_MAX {
            return Err(BridgeError::InvalidSetting {
                field: "first CC",
                value: first_cc as i64,
                expected: "0-126",
            });
        }
        if first_cc != self.first_cc && self.offset_policy == OffsetPolicy::Clear {
            self.clear();
        }
        self.first_cc = first_cc;
        Ok(())
    }

    pub fn offset_policy(&self) -> OffsetPolicy {
        self.offset_policy
    }

    pub fn set_offset_policy(&mut self, policy: OffsetPolicy) {
        self.offset_policy = policy;
    }

    pub fn values(&self) -> &[u8; NUM_OUTPUTS] {
        &self.values
    }

    pub fn clear(&mut self) {
        self.values = [0; NUM_OUTPUTS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cc(channel: u8, cc: u8, value: u8) -> MidiWord {
        MidiWord::control_change(channel, cc, value)
    }

    #[test]
    fn test_any_channel_updates_slot() {
        let mut table = CcTable::default();
        assert!(table.process(cc(3, 5, 100)));
        assert_eq!(table.values()[5], 100);
        assert_eq!(table.values().iter().filter(|&&v| v != 0).count(), 1);
    }

    #[test]
    fn test_channel_mismatch_is_ignored() {
        let mut table = CcTable::default();
        table.set_channel(ChannelFilter::Channel(2)).unwrap();
        assert!(!table.process(cc(5, 0, 127)));
        assert_eq!(table.values(), &[0; NUM_OUTPUTS]);

        assert!(table.process(cc(2, 0, 127)));
        assert_eq!(table.values()[0], 127);
    }

    #[test]
    fn test_window_bounds() {
        let mut table = CcTable::default();
        table.set_first_cc(20).unwrap();

        assert!(!table.process(cc(0, 10, 99)));
        assert_eq!(table.values(), &[0; NUM_OUTPUTS]);

        assert!(table.process(cc(0, 20, 99)));
        assert_eq!(table.values()[0], 99);

        assert!(table.process(cc(0, 35, 1)));
        assert_eq!(table.values()[15], 1);
        assert!(!table.process(cc(0, 36, 1)));
    }

    #[test]
    fn test_window_at_top_of_range() {
        let mut table = CcTable::default();
        table.set_first_cc(FIRST_CC_MAX).unwrap();
        assert!(table.process(cc(0, 126, 1)));
        assert!(table.process(cc(0, 127, 2)));
        assert_eq!(&table.values()[..2], &[1, 2]);
    }

    #[test]
    fn test_malformed_data_bytes_are_ignored() {
        let mut table = CcTable::default();
        table.set_first_cc(120).unwrap();
        // data1 above 127 would otherwise land in the window
        assert!(!table.process(MidiWord::new(0xB0, 130, 5)));
        assert!(!table.process(MidiWord::new(0xB0, 121, 200)));
        assert_eq!(table.values(), &[0; NUM_OUTPUTS]);
    }

    #[test]
    fn test_setting_validation() {
        let mut table = CcTable::default();
        assert!(table.set_channel(ChannelFilter::Channel(16)).is_err());
        assert_eq!(table.channel(), ChannelFilter::All);
        assert!(table.set_first_cc(127).is_err());
        assert_eq!(table.first_cc(), 0);
    }

    #[test]
    fn test_channel_raw_form() {
        assert_eq!(ChannelFilter::from_raw(-1).unwrap(), ChannelFilter::All);
        assert_eq!(ChannelFilter::from_raw(9).unwrap(), ChannelFilter::Channel(9));
        assert!(ChannelFilter::from_raw(16).is_err());
        assert_eq!(ChannelFilter::Channel(4).as_raw(), 4);
        assert_eq!(ChannelFilter::All.as_raw(), -1);
    }

    #[test]
    fn test_offset_change_keeps_stale_values() {
        let mut table = CcTable::new(OffsetPolicy::KeepStale);
        table.process(cc(0, 3, 42));
        table.set_first_cc(10).unwrap();
        // Slot 3 now nominally watches CC 13 but still shows CC 3's value
        assert_eq!(table.values()[3], 42);
        table.process(cc(0, 13, 7));
        assert_eq!(table.values()[3], 7);
    }

    #[test]
    fn test_offset_change_clears_values() {
        let mut table = CcTable::new(OffsetPolicy::Clear);
        table.process(cc(0, 3, 42));
        table.set_first_cc(0).unwrap();
        assert_eq!(table.values()[3], 42);

        table.set_first_cc(10).unwrap();
        assert_eq!(table.values(), &[0; NUM_OUTPUTS]);
    }

    proptest! {
        #[test]
        fn prop_filtered_channel_never_changes_values(
            filter in 0u8..16,
            channel in 0u8..16,
            number in 0u8..128,
            value in 0u8..128,
        ) {
            prop_assume!(filter != channel);
            let mut table = CcTable::default();
            table.set_channel(ChannelFilter::Channel(filter)).unwrap();
            let before = *table.values();
            table.process(cc(channel, number, value));
            prop_assert_eq!(table.values(), &before);
        }

        #[test]
        fn prop_outside_window_never_changes_values(
            first_cc in 0u8..=FIRST_CC_MAX,
            number in 0u8..128,
            value in 0u8..128,
        ) {
            let first = first_cc as usize;
            prop_assume!((number as usize) < first || (number as usize) >= first + NUM_OUTPUTS);
            let mut table = CcTable::default();
            table.set_first_cc(first_cc).unwrap();
            table.process(cc(0, number, value));
            prop_assert_eq!(table.values(), &[0; NUM_OUTPUTS]);
        }

        #[test]
        fn prop_non_cc_status_never_changes_values(
            status in 0x8u8..0x10,
            channel in 0u8..16,
            data1 in 0u8..128,
            data2 in 0u8..128,
        ) {
            prop_assume!(status != 0xB);
            let mut table = CcTable::default();
            table.process(MidiWord::new(status << 4 | channel, data1, data2));
            prop_assert_eq!(table.values(), &[0; NUM_OUTPUTS]);
        }

        #[test]
        fn prop_processing_is_idempotent(
            channel in 0u8..16,
            number in 0u8..128,
            value in 0u8..128,
        ) {
            let word = cc(channel, number, value);
            let mut once = CcTable::default();
            once.process(word);
            let mut twice = once.clone();
            twice.process(word);
            prop_assert_eq!(once, twice);
        }
    }
}
