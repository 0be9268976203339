use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

use crate::{
    codec::{self, ByteOrder},
    error::{Result, SunnyFitError},
};

/// Supported SunnyFit accessory models
///
/// Each model is recognized by the exact local name it broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessoryType {
    /// Smart Mini Stepper
    StepperMini,
    /// Total Body Smart Exercise Stepper Machine
    TotalBodyStepper,
    /// Smart Twist Stepper Machine
    TwistStepper,
    /// Row-N-Ride upright trainer
    RowNRideUpright,
    /// Air Walk smart elliptical
    EllipticalAirWalk,
}

impl AccessoryType {
    /// All supported models
    pub const ALL: [Self; 5] = [
        Self::StepperMini,
        Self::TotalBodyStepper,
        Self::TwistStepper,
        Self::RowNRideUpright,
        Self::EllipticalAirWalk,
    ];

    /// Local name broadcast by this model
    #[must_use]
    pub const fn local_name(self) -> &'static str {
        match self {
            Self::StepperMini => "NO. 012 SMART",
            Self::TotalBodyStepper => "SF-S0978SMART",
            Self::TwistStepper => "SF-S0979SMART",
            Self::RowNRideUpright => "NO. 077 SMART-H",
            Self::EllipticalAirWalk => "SF-E902 SMART-H",
        }
    }

    /// Resolve a model by exact local name match
    #[must_use]
    pub fn from_local_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.local_name() == name)
    }

    /// How the hardware address is packed into the manufacturer data
    #[must_use]
    pub const fn family(self) -> AccessoryFamily {
        match self {
            Self::StepperMini
            | Self::TotalBodyStepper
            | Self::TwistStepper
            | Self::RowNRideUpright => AccessoryFamily::EmMicroelectronic,
            Self::EllipticalAirWalk => AccessoryFamily::Elliptical,
        }
    }

    /// Firmware generation of the workout service
    #[must_use]
    pub const fn generation(self) -> ProtocolGeneration {
        match self {
            Self::TotalBodyStepper | Self::TwistStepper => ProtocolGeneration::Legacy,
            Self::StepperMini | Self::RowNRideUpright | Self::EllipticalAirWalk => {
                ProtocolGeneration::Split
            }
        }
    }
}

impl fmt::Display for AccessoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name())
    }
}

/// Device family sharing one advertisement layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessoryFamily {
    /// Steppers and row machines using an EM Microelectronic-Marin radio
    EmMicroelectronic,
    /// Elliptical trainers
    Elliptical,
}

/// Workout service firmware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolGeneration {
    /// Single 27-byte summary frame, no activation handshake
    Legacy,
    /// Separate status and counter frames, activation handshake required
    Split,
}

impl fmt::Display for ProtocolGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "Legacy"),
            Self::Split => write!(f, "Split"),
        }
    }
}

/// 48-bit Bluetooth hardware address, stored most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BluetoothAddress([u8; 6]);

impl BluetoothAddress {
    /// Address width in bytes
    pub const LENGTH: usize = 6;

    /// Create an address from bytes in display order
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Read an address from the first six bytes of `data` in the given byte order
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::InvalidLength`] if `data` holds fewer than six bytes.
    pub fn from_slice(data: &[u8], order: ByteOrder) -> Result<Self> {
        let value = codec::decode_uint(data, Self::LENGTH, order)?;
        Ok(Self::from_u64(value))
    }

    /// Create an address from the low 48 bits of `value`
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&value.to_be_bytes()[2..]);
        Self(bytes)
    }

    /// Address as an integer
    #[must_use]
    pub fn to_u64(self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(bytes)
    }

    /// Address bytes in display order
    #[must_use]
    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = SunnyFitError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != Self::LENGTH {
            return Err(SunnyFitError::ParseError(format!(
                "Invalid address format: {s}"
            )));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16).map_err(|_| {
                SunnyFitError::ParseError(format!("Invalid address byte: {part}"))
            })?;
        }
        Ok(Self(bytes))
    }
}

/// Identified SunnyFit accessory
///
/// Only produced by a successful advertisement match, see
/// [`AccessoryIdentity::from_advertisement`]. Serializes for display and logging but
/// cannot be deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AccessoryIdentity {
    address: BluetoothAddress,
    accessory_type: AccessoryType,
}

impl AccessoryIdentity {
    pub(crate) const fn new(address: BluetoothAddress, accessory_type: AccessoryType) -> Self {
        Self {
            address,
            accessory_type,
        }
    }

    /// Hardware address recovered from the advertisement
    #[must_use]
    pub const fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// Accessory model
    #[must_use]
    pub const fn accessory_type(&self) -> AccessoryType {
        self.accessory_type
    }
}

impl fmt::Display for AccessoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.accessory_type, self.address)
    }
}

/// Manufacturer specific data record of an advertisement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManufacturerData {
    /// Bluetooth SIG assigned company identifier
    pub company_identifier: u16,
    /// Vendor payload following the company identifier
    pub additional_data: Vec<u8>,
}

impl ManufacturerData {
    /// Create a manufacturer data record
    #[must_use]
    pub fn new(company_identifier: u16, additional_data: impl Into<Vec<u8>>) -> Self {
        Self {
            company_identifier,
            additional_data: additional_data.into(),
        }
    }

    /// Parse the AD structure body (`company_id` little-endian, then payload)
    ///
    /// # Errors
    ///
    /// Returns [`SunnyFitError::InvalidLength`] if fewer than two bytes are present.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let company_identifier = codec::decode::<u16>(data, ByteOrder::Little)?;
        Ok(Self::new(company_identifier, &data[2..]))
    }
}

/// Scan parameters
#[derive(Debug, Clone)]
pub struct ScanParams {
    /// Stop scanning after this long; `None` keeps scanning in the background
    pub duration: Option<Duration>,
    /// Ask the transport to coalesce repeated advertisements
    pub filter_duplicates: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            duration: Some(Duration::from_millis(1_500)),
            filter_duplicates: true,
        }
    }
}

/// Session timing and buffering configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Delay after each activation command in milliseconds
    pub command_delay_ms: u64,
    /// Maximum number of decoded frames buffered for a slow consumer
    pub notification_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            command_delay_ms: 200,
            notification_buffer: 1_000,
        }
    }
}
