use tracing::trace;

use crate::{
    codec::ByteOrder,
    types::{AccessoryFamily, AccessoryIdentity, AccessoryType, BluetoothAddress, ManufacturerData},
    EM_MICROELECTRONIC_COMPANY_ID,
};

/// Recovers the hardware address a device family hides in its manufacturer data
pub type AddressRule = fn(&ManufacturerData) -> Option<BluetoothAddress>;

/// Address extraction rule for every device family
///
/// These devices do not advertise their address in a dedicated field; each family
/// packs it into the manufacturer data with its own layout and byte order.
pub const ADDRESS_RULES: [(AccessoryFamily, AddressRule); 2] = [
    (AccessoryFamily::EmMicroelectronic, em_microelectronic_address),
    (AccessoryFamily::Elliptical, elliptical_address),
];

/// Look up the address rule of a family
#[must_use]
pub fn address_rule(family: AccessoryFamily) -> AddressRule {
    ADDRESS_RULES
        .iter()
        .find(|(f, _)| *f == family)
        .map_or(no_address as AddressRule, |(_, rule)| *rule)
}

const fn no_address(_: &ManufacturerData) -> Option<BluetoothAddress> {
    None
}

/// Steppers and row machines.
///
/// Layout: `[flags, addr0..addr5, ...]` under the EM Microelectronic-Marin company
/// identifier, address big-endian.
fn em_microelectronic_address(data: &ManufacturerData) -> Option<BluetoothAddress> {
    if data.company_identifier != EM_MICROELECTRONIC_COMPANY_ID || data.additional_data.len() < 7 {
        return None;
    }
    BluetoothAddress::from_slice(&data.additional_data[1..7], ByteOrder::Big).ok()
}

/// Ellipticals.
///
/// The two company identifier bytes are the low end of the address and the four
/// payload bytes the rest; the six bytes read little-endian.
fn elliptical_address(data: &ManufacturerData) -> Option<BluetoothAddress> {
    if data.additional_data.len() != 4 {
        return None;
    }
    let mut bytes = [0u8; BluetoothAddress::LENGTH];
    bytes[..2].copy_from_slice(&data.company_identifier.to_le_bytes());
    bytes[2..].copy_from_slice(&data.additional_data);
    BluetoothAddress::from_slice(&bytes, ByteOrder::Little).ok()
}

impl AccessoryIdentity {
    /// Identify an accessory from its broadcast local name and manufacturer data
    ///
    /// Returns `None` when the advertisement does not belong to a supported accessory,
    /// which is the common case while scanning.
    #[must_use]
    pub fn from_advertisement(local_name: &str, data: &ManufacturerData) -> Option<Self> {
        let accessory_type = AccessoryType::from_local_name(local_name)?;
        let address = address_rule(accessory_type.family())(data)?;
        trace!("Matched {} at {}", accessory_type, address);
        Some(Self::new(address, accessory_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stepper_advertisement() {
        let data = ManufacturerData::new(
            EM_MICROELECTRONIC_COMPANY_ID,
            [
                0x00, 0xA4, 0xC1, 0x38, 0xE0, 0xFC, 0x1D, 0x2A, 0x10, 0x00, 0x00, 0x00, 0x00,
            ],
        );
        let accessory = AccessoryIdentity::from_advertisement("NO. 012 SMART", &data).unwrap();
        assert_eq!(accessory.address().to_string(), "A4:C1:38:E0:FC:1D");
        assert_eq!(accessory.accessory_type(), AccessoryType::StepperMini);
    }

    #[test]
    fn test_row_n_ride_scan_response() {
        // 02 01 06 13 FF 5A 00 00 30 1B 97 BC FE AE 7A 00 00 00 00 00 00 00 C4
        let ad_body = [
            0x5A, 0x00, 0x00, 0x30, 0x1B, 0x97, 0xBC, 0xFE, 0xAE, 0x7A, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0xC4,
        ];
        let data = ManufacturerData::from_bytes(&ad_body).unwrap();
        assert_eq!(data.company_identifier, EM_MICROELECTRONIC_COMPANY_ID);

        let accessory = AccessoryIdentity::from_advertisement("NO. 077 SMART-H", &data).unwrap();
        assert_eq!(accessory.address().to_string(), "30:1B:97:BC:FE:AE");
        assert_eq!(accessory.accessory_type(), AccessoryType::RowNRideUpright);
    }

    #[test]
    fn test_elliptical_scan_response() {
        // 07 FF F8 67 4D 38 C1 A4
        let data = ManufacturerData::from_bytes(&[0xF8, 0x67, 0x4D, 0x38, 0xC1, 0xA4]).unwrap();
        let accessory = AccessoryIdentity::from_advertisement("SF-E902 SMART-H", &data).unwrap();
        assert_eq!(accessory.address().to_string(), "A4:C1:38:4D:67:F8");
        assert_eq!(accessory.accessory_type(), AccessoryType::EllipticalAirWalk);
    }

    #[test]
    fn test_unknown_name_yields_nothing() {
        let data = ManufacturerData::new(
            EM_MICROELECTRONIC_COMPANY_ID,
            [0x00, 0xA4, 0xC1, 0x38, 0xE0, 0xFC, 0x1D],
        );
        for name in ["", "Kitchen Speaker", "NO. 012", "SF-E902 SMART", "NO. 012 SMART-H"] {
            assert!(AccessoryIdentity::from_advertisement(name, &data).is_none());
        }
    }

    #[test]
    fn test_family_a_preconditions() {
        let wrong_company = ManufacturerData::new(0x0059, [0x00, 0xA4, 0xC1, 0x38, 0xE0, 0xFC, 0x1D]);
        assert!(AccessoryIdentity::from_advertisement("NO. 012 SMART", &wrong_company).is_none());

        let too_short =
            ManufacturerData::new(EM_MICROELECTRONIC_COMPANY_ID, [0x00, 0xA4, 0xC1, 0x38, 0xE0]);
        assert!(AccessoryIdentity::from_advertisement("SF-S0978SMART", &too_short).is_none());

        let exactly_seven = ManufacturerData::new(
            EM_MICROELECTRONIC_COMPANY_ID,
            [0x00, 0xA4, 0xC1, 0x38, 0xE0, 0xFC, 0x1D],
        );
        assert!(AccessoryIdentity::from_advertisement("SF-S0979SMART", &exactly_seven).is_some());
    }

    #[test]
    fn test_family_b_requires_exactly_four_bytes() {
        for len in [0usize, 3, 5, 7] {
            let data = ManufacturerData::new(0x67F8, vec![0x11; len]);
            assert!(AccessoryIdentity::from_advertisement("SF-E902 SMART-H", &data).is_none());
        }
        // the elliptical rule does not care about the company identifier
        let data = ManufacturerData::new(EM_MICROELECTRONIC_COMPANY_ID, [0x01, 0x02, 0x03, 0x04]);
        let accessory = AccessoryIdentity::from_advertisement("SF-E902 SMART-H", &data).unwrap();
        assert_eq!(accessory.address().to_string(), "04:03:02:01:00:5A");
    }

    #[test]
    fn test_every_family_has_a_rule() {
        for accessory_type in AccessoryType::ALL {
            let family = accessory_type.family();
            assert!(ADDRESS_RULES.iter().any(|(f, _)| *f == family));
        }
    }
}
