//! MIDI message words and value conversions
//!
//! Incoming messages travel through the bridge as a packed 32-bit word:
//! byte 0 holds the status byte (channel in the low nibble, status code in the
//! high nibble), byte 1 holds data1 and byte 2 holds data2.

use std::fmt;

/// Status code (high nibble of the status byte) of a Control Change message
pub const STATUS_CONTROL_CHANGE: u8 = 0xB;

/// Highest 7-bit MIDI data value
pub const DATA_MAX: u8 = 127;

/// Packed MIDI message word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiWord(pub u32);

/// Decoded Control Change: channel (0-15), cc (0-127), value (0-127)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    pub channel: u8,
    pub cc: u8,
    pub value: u8,
}

impl MidiWord {
    /// Pack a status byte and two data bytes
    pub fn new(status_byte: u8, data1: u8, data2: u8) -> Self {
        Self(status_byte as u32 | (data1 as u32) << 8 | (data2 as u32) << 16)
    }

    /// Build a Control Change word for the given channel (0-15)
    pub fn control_change(channel: u8, cc: u8, value: u8) -> Self {
        Self::new(
            (STATUS_CONTROL_CHANGE << 4) | (channel & 0x0F),
            cc & 0x7F,
            value & 0x7F,
        )
    }

    /// Pack a raw byte message as delivered by byte-oriented drivers
    ///
    /// Missing data bytes are packed as zero. Running status (a data byte in
    /// first position) cannot be packed without context and yields `None`.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if status < 0x80 {
            return None;
        }
        let data1 = rest.first().copied().unwrap_or(0);
        let data2 = rest.get(1).copied().unwrap_or(0);
        Some(Self::new(status, data1, data2))
    }

    pub fn channel(self) -> u8 {
        (self.0 & 0xf) as u8
    }

    pub fn status(self) -> u8 {
        ((self.0 >> 4) & 0xf) as u8
    }

    pub fn data1(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub fn data2(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    /// Decode as a Control Change, if the status code says so
    pub fn as_control_change(self) -> Option<ControlChange> {
        (self.status() == STATUS_CONTROL_CHANGE).then(|| ControlChange {
            channel: self.channel(),
            cc: self.data1(),
            value: self.data2(),
        })
    }

    /// The three bytes in wire order
    pub fn to_bytes(self) -> [u8; 3] {
        [
            (self.0 & 0xff) as u8,
            self.data1(),
            self.data2(),
        ]
    }
}

impl fmt::Display for MidiWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_control_change() {
            Some(cc) => write!(f, "CC ch:{} cc:{} v:{}", cc.channel + 1, cc.cc, cc.value),
            None => write!(
                f,
                "status:{:X} ch:{} d1:{} d2:{}",
                self.status(),
                self.channel() + 1,
                self.data1(),
                self.data2()
            ),
        }
    }
}

/// Value conversion utilities
pub mod convert {
    use super::DATA_MAX;

    /// Control voltage produced by the highest CC value
    pub const CV_MAX: f32 = 10.0;

    /// Map a 7-bit CC value linearly onto 0..=10 V
    pub fn cc_to_cv(value: u8) -> f32 {
        value as f32 / DATA_MAX as f32 * CV_MAX
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let word = MidiWord::from_bytes(&[0xB3, 5, 100]).unwrap();
        assert_eq!(word.channel(), 3);
        assert_eq!(word.status(), STATUS_CONTROL_CHANGE);
        assert_eq!(word.data1(), 5);
        assert_eq!(word.data2(), 100);
        assert_eq!(word.0, 0x0064_05B3);
    }

    #[test]
    fn test_control_change_decoding() {
        let word = MidiWord::control_change(2, 7, 100);
        assert_eq!(
            word.as_control_change(),
            Some(ControlChange {
                channel: 2,
                cc: 7,
                value: 100,
            })
        );
    }

    #[test]
    fn test_note_on_is_not_control_change() {
        let word = MidiWord::from_bytes(&[0x90, 60, 100]).unwrap();
        assert_eq!(word.status(), 0x9);
        assert!(word.as_control_change().is_none());
    }

    #[test]
    fn test_short_messages() {
        // Program change carries a single data byte
        let word = MidiWord::from_bytes(&[0xC1, 12]).unwrap();
        assert_eq!(word.data1(), 12);
        assert_eq!(word.data2(), 0);

        let clock = MidiWord::from_bytes(&[0xF8]).unwrap();
        assert_eq!(clock.status(), 0xF);
    }

    #[test]
    fn test_unpackable_bytes() {
        assert!(MidiWord::from_bytes(&[]).is_none());
        assert!(MidiWord::from_bytes(&[0x40, 0x10]).is_none());
    }

    #[test]
    fn test_to_bytes() {
        assert_eq!(MidiWord::control_change(0, 1, 2).to_bytes(), [0xB0, 1, 2]);
    }

    #[test]
    fn test_cv_scaling() {
        assert_eq!(convert::cc_to_cv(0), 0.0);
        assert!((convert::cc_to_cv(127) - 10.0).abs() < 1e-6);
        assert!((convert::cc_to_cv(64) - 5.0394).abs() < 1e-3);
        assert!((convert::cc_to_cv(100) - 7.874).abs() < 1e-3);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            MidiWord::control_change(0, 7, 64).to_string(),
            "CC ch:1 cc:7 v:64"
        );
        assert_eq!(format_hex(&[0xB0, 0x07, 0x40]), "B0 07 40");
    }
}
