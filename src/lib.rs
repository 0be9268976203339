#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # SunnyFit
//!
//! A Rust library for discovering SunnyFit smart fitness accessories (steppers,
//! ellipticals and row machines) and streaming live workout data from them via
//! Bluetooth Low Energy.
//!
//! The accessories do not expose their hardware address in a dedicated advertisement
//! field. Each device family hides it inside the manufacturer specific data with its
//! own byte layout, and a device usually needs both its primary advertisement and its
//! scan response before it can be identified. Workout telemetry arrives as fixed-size
//! notification frames that carry no type tag and are told apart by length.
//!
//! ## Layers
//!
//! - [`codec`]: fixed-width integer packing in either byte order
//! - [`advertisement`]: accessory identification from name and manufacturer data
//! - [`protocol`]: notification frame decoding and activation command frames
//! - [`scan`]: per-peer aggregation of partial advertisements
//! - [`session`]: connect, handshake and notification streaming for one accessory
//! - [`manager`]: scan and session facade over any [`transport::Transport`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use sunnyfit::{AccessoryManager, BtleplugTransport, NotificationValue, ScanParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = AccessoryManager::new(BtleplugTransport::new().await?);
//!
//!     // Scan for 1.5 seconds
//!     manager.scan(ScanParams::default()).await?;
//!
//!     let Some(accessory) = manager.accessories().await.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let mut workout = manager.start_exercise(accessory).await?;
//!     while let Some(value) = workout.next().await {
//!         if let NotificationValue::Counter(counter) = value? {
//!             println!("{} reps", counter.reps);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Fixed-width integer encoding
pub mod codec;
/// Accessory identification from advertisements
pub mod advertisement;
/// btleplug transport backend
#[cfg(feature = "btleplug")]
pub mod ble;
/// Error types and handling
pub mod error;
/// Scan and session facade
pub mod manager;
/// Notification frames and command frames
pub mod protocol;
/// Advertisement aggregation
pub mod scan;
/// Accessory connection sessions
pub mod session;
/// Transport boundary consumed by the library
pub mod transport;
/// Type definitions and data structures
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

use uuid::Uuid;

// Re-export the main types for convenient usage
#[cfg(feature = "btleplug")]
pub use ble::BtleplugTransport;
pub use error::{Result, SunnyFitError};
pub use manager::AccessoryManager;
pub use protocol::{Counter, DecodeMode, DeviceProfile, NotificationValue, Status, Summary};
pub use scan::{ScanAggregator, ScanRecord};
pub use session::{NotificationStream, Session, SessionController, SessionState};
pub use transport::{ConnectionEvent, RadioState, ScanData, Transport};
pub use types::{
    AccessoryFamily, AccessoryIdentity, AccessoryType, BluetoothAddress, ManufacturerData,
    ProtocolGeneration, ScanParams, SessionConfig,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// SunnyFit workout service
pub const SUNNYFIT_SERVICE_UUID: Uuid = Uuid::from_u128(0xFD71_0001_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// Command characteristic of the legacy firmware
pub const SUNNYFIT_COMMAND_CHAR_UUID: Uuid =
    Uuid::from_u128(0xFD71_0002_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// Notification characteristic of the legacy firmware
pub const SUNNYFIT_NOTIFICATION_CHAR_UUID: Uuid =
    Uuid::from_u128(0xFD71_0003_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// Secondary notification characteristic of the split firmware
pub const SUNNYFIT_NOTIFICATION_CHAR_UUID_2: Uuid =
    Uuid::from_u128(0xFD71_0004_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// Command characteristic of the split firmware
pub const SUNNYFIT_COMMAND_CHAR_UUID_2: Uuid =
    Uuid::from_u128(0xFD71_0005_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// Notification characteristic of the split firmware
pub const SUNNYFIT_NOTIFICATION_CHAR_UUID_3: Uuid =
    Uuid::from_u128(0xFD71_0006_E950_458E_8A4D_A1CB_C5AA_4CCE);

/// EM Microelectronic-Marin SA company identifier
///
/// The steppers and row machines are built around an EM Microelectronic radio and
/// advertise their address under this identifier.
pub const EM_MICROELECTRONIC_COMPANY_ID: u16 = 0x005A;
