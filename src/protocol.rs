use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    codec::{decode_at, ByteOrder},
    error::{Result, SunnyFitError},
    types::{AccessoryType, ProtocolGeneration},
    SUNNYFIT_COMMAND_CHAR_UUID, SUNNYFIT_COMMAND_CHAR_UUID_2, SUNNYFIT_NOTIFICATION_CHAR_UUID,
    SUNNYFIT_NOTIFICATION_CHAR_UUID_2, SUNNYFIT_NOTIFICATION_CHAR_UUID_3,
};

/// Status frame length of the split protocol
pub const STATUS_FRAME_SIZE: usize = 20;

/// Counter frame length of the split protocol
pub const COUNTER_FRAME_SIZE: usize = 12;

/// Summary frame length of the legacy protocol
pub const SUMMARY_FRAME_SIZE: usize = 27;

/// First byte of every command frame
pub const FRAME_HEADER: u8 = 0x5A;

/// Last byte of every command frame
pub const FRAME_TERMINATOR: u8 = 0xA5;

/// Periodic workout status
///
/// Split protocol, 20-byte frame:
/// - Bytes 6-7: Reps per minute (u16 little-endian)
/// - Bytes 10-11: Calories (u16 little-endian, tenths of a kilocalorie)
/// - Bytes 16-17: Elapsed time (u16 little-endian, seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    /// Current cadence
    pub reps_per_minute: u16,
    /// Burned energy in tenths of a kilocalorie
    pub calories: u16,
    /// Workout duration in seconds
    pub elapsed_seconds: u16,
}

impl Status {
    /// Parse a status frame
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::ParseError`] unless `data` is exactly 20 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        expect_len(data, STATUS_FRAME_SIZE)?;
        Ok(Self {
            reps_per_minute: decode_at(data, 6, ByteOrder::Little)?,
            calories: decode_at(data, 10, ByteOrder::Little)?,
            elapsed_seconds: decode_at(data, 16, ByteOrder::Little)?,
        })
    }

    /// Burned energy in kilocalories
    #[must_use]
    pub fn kilocalories(&self) -> f32 {
        f32::from(self.calories) / 10.0
    }
}

/// Repetition counter
///
/// Split protocol, 12-byte frame:
/// - Bytes 0-1: Total reps (u16 little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counter {
    /// Total repetitions
    pub reps: u16,
}

impl Counter {
    /// Parse a counter frame
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::ParseError`] unless `data` is exactly 12 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        expect_len(data, COUNTER_FRAME_SIZE)?;
        Ok(Self {
            reps: decode_at(data, 0, ByteOrder::Little)?,
        })
    }
}

/// Combined workout summary of the legacy protocol
///
/// 27-byte frame:
/// - Bytes 3-4: Elapsed time (u16 little-endian, seconds)
/// - Bytes 7-8: Calories (u16 little-endian, tenths of a kilocalorie)
/// - Bytes 11-12: Total reps (u16 little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Summary {
    /// Workout duration in seconds
    pub elapsed_seconds: u16,
    /// Burned energy in tenths of a kilocalorie
    pub calories: u16,
    /// Total repetitions
    pub reps: u16,
}

impl Summary {
    /// Parse a summary frame
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::ParseError`] unless `data` is exactly 27 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        expect_len(data, SUMMARY_FRAME_SIZE)?;
        Ok(Self {
            elapsed_seconds: decode_at(data, 3, ByteOrder::Little)?,
            calories: decode_at(data, 7, ByteOrder::Little)?,
            reps: decode_at(data, 11, ByteOrder::Little)?,
        })
    }

    /// Burned energy in kilocalories
    #[must_use]
    pub fn kilocalories(&self) -> f32 {
        f32::from(self.calories) / 10.0
    }
}

fn expect_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(SunnyFitError::ParseError(format!(
            "Frame is {} bytes, expected {expected}",
            data.len()
        )));
    }
    Ok(())
}

/// Frame layout family of the notification characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecodeMode {
    /// Status and counter frames told apart by length
    Split,
    /// One summary frame per notification
    Legacy,
}

impl From<ProtocolGeneration> for DecodeMode {
    fn from(generation: ProtocolGeneration) -> Self {
        match generation {
            ProtocolGeneration::Split => Self::Split,
            ProtocolGeneration::Legacy => Self::Legacy,
        }
    }
}

/// Decoded workout notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationValue {
    /// Cadence, energy and time
    Status(Status),
    /// Repetition count
    Counter(Counter),
    /// Everything in one frame (legacy firmware)
    Summary(Summary),
}

impl NotificationValue {
    /// Decode one notification frame
    ///
    /// The split protocol has no type tag; the frame kind is chosen by its exact length.
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::ParseError`] for frames of unrecognized length.
    pub fn decode(data: &[u8], mode: DecodeMode) -> Result<Self> {
        match (mode, data.len()) {
            (DecodeMode::Split, STATUS_FRAME_SIZE) => Status::from_bytes(data).map(Self::Status),
            (DecodeMode::Split, COUNTER_FRAME_SIZE) => {
                Counter::from_bytes(data).map(Self::Counter)
            }
            (DecodeMode::Legacy, SUMMARY_FRAME_SIZE) => {
                Summary::from_bytes(data).map(Self::Summary)
            }
            (_, len) => Err(SunnyFitError::ParseError(format!(
                "Unrecognized {mode:?} frame of {len} bytes"
            ))),
        }
    }
}

/// Fixed command frame written to the command characteristic
///
/// Layout: `[0x5A, length_high, length_low, opcode, argument, 0xA5]` where the length
/// counts the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame(&'static [u8]);

impl CommandFrame {
    /// Wake the console
    pub const WAKE: Self = Self(&[FRAME_HEADER, 0x00, 0x06, 0x01, 0x00, FRAME_TERMINATOR]);
    /// Select free workout mode
    pub const SELECT_WORKOUT: Self = Self(&[FRAME_HEADER, 0x00, 0x06, 0x02, 0x01, FRAME_TERMINATOR]);
    /// Start streaming workout data
    pub const START: Self = Self(&[FRAME_HEADER, 0x00, 0x06, 0x03, 0x01, FRAME_TERMINATOR]);

    /// Raw frame bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &'static [u8] {
        self.0
    }

    /// Check header, declared length and terminator
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        let bytes = self.0;
        bytes.len() >= 5
            && bytes[0] == FRAME_HEADER
            && bytes[bytes.len() - 1] == FRAME_TERMINATOR
            && usize::from(u16::from_be_bytes([bytes[1], bytes[2]])) == bytes.len()
    }
}

/// Activation handshake of the split protocol, in write order
pub const START_SEQUENCE: [CommandFrame; 3] = [
    CommandFrame::WAKE,
    CommandFrame::SELECT_WORKOUT,
    CommandFrame::START,
];

/// Characteristics, handshake and frame layout used by one protocol generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Characteristic receiving command frames
    pub command: Uuid,
    /// Notification characteristic carrying workout frames
    pub notification: Uuid,
    /// Additional notification characteristic subscribed when present
    pub secondary_notification: Option<Uuid>,
    /// Commands written before subscribing
    pub start_sequence: &'static [CommandFrame],
    /// Notification frame layout
    pub decode_mode: DecodeMode,
}

impl DeviceProfile {
    /// Profile of a firmware generation
    #[must_use]
    pub const fn for_generation(generation: ProtocolGeneration) -> Self {
        match generation {
            ProtocolGeneration::Split => Self {
                command: SUNNYFIT_COMMAND_CHAR_UUID_2,
                notification: SUNNYFIT_NOTIFICATION_CHAR_UUID_3,
                secondary_notification: Some(SUNNYFIT_NOTIFICATION_CHAR_UUID_2),
                start_sequence: &START_SEQUENCE,
                decode_mode: DecodeMode::Split,
            },
            ProtocolGeneration::Legacy => Self {
                command: SUNNYFIT_COMMAND_CHAR_UUID,
                notification: SUNNYFIT_NOTIFICATION_CHAR_UUID,
                secondary_notification: None,
                start_sequence: &[],
                decode_mode: DecodeMode::Legacy,
            },
        }
    }

    /// Profile of an accessory model
    #[must_use]
    pub const fn for_type(accessory_type: AccessoryType) -> Self {
        Self::for_generation(accessory_type.generation())
    }

    /// Characteristics that must exist for a session to start
    #[must_use]
    pub fn required_characteristics(&self) -> Vec<Uuid> {
        vec![self.command, self.notification]
    }

    /// Every characteristic the session looks up
    #[must_use]
    pub fn characteristics(&self) -> Vec<Uuid> {
        let mut uuids = self.required_characteristics();
        uuids.extend(self.secondary_notification);
        uuids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_frame() -> [u8; 20] {
        let mut frame = [0u8; 20];
        frame[6..8].copy_from_slice(&[0x22, 0x00]);
        frame[10..12].copy_from_slice(&[0x05, 0x00]);
        frame[16..18].copy_from_slice(&[0x29, 0x00]);
        frame
    }

    #[test]
    fn test_status_frame() {
        let value = NotificationValue::decode(&status_frame(), DecodeMode::Split).unwrap();
        assert_eq!(
            value,
            NotificationValue::Status(Status {
                reps_per_minute: 0x0022,
                calories: 0x0005,
                elapsed_seconds: 0x0029,
            })
        );
        if let NotificationValue::Status(status) = value {
            assert!((status.kilocalories() - 0.5).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_counter_frame() {
        let mut frame = [0xEEu8; 12];
        frame[0..2].copy_from_slice(&[0x25, 0x00]);
        let value = NotificationValue::decode(&frame, DecodeMode::Split).unwrap();
        assert_eq!(value, NotificationValue::Counter(Counter { reps: 0x0025 }));
    }

    #[test]
    fn test_unrecognized_lengths() {
        for len in [0usize, 1, 11, 13, 19, 21, 27, 40] {
            let frame = vec![0u8; len];
            assert!(NotificationValue::decode(&frame, DecodeMode::Split).is_err());
        }
        for len in [12usize, 20, 26, 28] {
            let frame = vec![0u8; len];
            assert!(NotificationValue::decode(&frame, DecodeMode::Legacy).is_err());
        }
    }

    #[test]
    fn test_summary_frame() {
        let mut frame = [0u8; 27];
        frame[3..5].copy_from_slice(&[0x3C, 0x01]);
        frame[7..9].copy_from_slice(&[0x7B, 0x00]);
        frame[11..13].copy_from_slice(&[0x10, 0x02]);
        let value = NotificationValue::decode(&frame, DecodeMode::Legacy).unwrap();
        let NotificationValue::Summary(summary) = value else {
            panic!("expected summary, got {value:?}");
        };
        assert_eq!(summary.elapsed_seconds, 316);
        assert_eq!(summary.calories, 123);
        assert_eq!(summary.reps, 528);
        assert!((summary.kilocalories() - 12.3).abs() < 0.001);
    }

    #[test]
    fn test_frame_constructors_check_length() {
        assert!(Status::from_bytes(&[0u8; 12]).is_err());
        assert!(Counter::from_bytes(&[0u8; 20]).is_err());
        assert!(Summary::from_bytes(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_start_sequence_frames() {
        assert_eq!(START_SEQUENCE.len(), 3);
        for frame in START_SEQUENCE {
            assert!(frame.is_well_formed(), "{frame:?}");
        }
        assert_eq!(
            CommandFrame::START.as_bytes(),
            &[0x5A, 0x00, 0x06, 0x03, 0x01, 0xA5]
        );
    }

    #[test]
    fn test_device_profiles() {
        let split = DeviceProfile::for_type(AccessoryType::StepperMini);
        assert_eq!(split.decode_mode, DecodeMode::Split);
        assert_eq!(split.start_sequence.len(), 3);
        assert_eq!(split.characteristics().len(), 3);
        assert_eq!(split.notification, SUNNYFIT_NOTIFICATION_CHAR_UUID_3);

        let legacy = DeviceProfile::for_type(AccessoryType::TwistStepper);
        assert_eq!(legacy.decode_mode, DecodeMode::Legacy);
        assert!(legacy.start_sequence.is_empty());
        assert_eq!(
            legacy.required_characteristics(),
            vec![SUNNYFIT_COMMAND_CHAR_UUID, SUNNYFIT_NOTIFICATION_CHAR_UUID]
        );
    }
}
