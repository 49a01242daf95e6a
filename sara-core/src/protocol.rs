//! Saratoga protocol constants.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::flags::VERSION_1;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u32 = VERSION_1;

/// Registered UDP port.
pub const PORT: u16 = 7542;

/// Well-known IPv4 multicast group for beacons.
pub const MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 108);

/// Well-known IPv6 (link-local scope) multicast group for beacons.
pub const MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x6c);

/// Largest datagram the receive loop reads.
pub const MAX_DATAGRAM: usize = 65_535;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_are_multicast() {
        assert!(MULTICAST_V4.is_multicast());
        assert!(MULTICAST_V6.is_multicast());
        assert_eq!(MULTICAST_V6.to_string(), "ff02::6c");
        assert_eq!(MULTICAST_V4.to_string(), "224.0.0.108");
    }
}
