//! Network flow records

use prost::Message;
use std::net::Ipv4Addr;

/// Network flow record (event kind 12)
#[derive(Clone, PartialEq, Message)]
pub struct NetworkFlow {
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    #[prost(uint64, tag = "2")]
    pub pid: u64,

    /// IP protocol number
    #[prost(uint32, tag = "3")]
    pub proto: u32,

    #[prost(fixed32, tag = "4")]
    pub srcip: u32,

    #[prost(fixed32, tag = "5")]
    pub dstip: u32,

    #[prost(uint32, tag = "6")]
    pub srcport: u32,

    #[prost(uint32, tag = "7")]
    pub dstport: u32,
}

impl NetworkFlow {
    pub fn source(&self) -> Ipv4Addr {
        int_to_ipv4(self.srcip)
    }

    pub fn destination(&self) -> Ipv4Addr {
        int_to_ipv4(self.dstip)
    }
}

/// Expand a monitor-encoded address. The least significant byte is the first octet.
pub fn int_to_ipv4(ip: u32) -> Ipv4Addr {
    Ipv4Addr::from(ip.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_to_ipv4() {
        assert_eq!(int_to_ipv4(0x0100_A8C0).to_string(), "192.168.0.1");
        assert_eq!(int_to_ipv4(0).to_string(), "0.0.0.0");
        assert_eq!(int_to_ipv4(0x0403_0201).to_string(), "1.2.3.4");
    }

    #[test]
    fn test_flow_addresses() {
        let flow = NetworkFlow {
            srcip: u32::from_le_bytes([10, 0, 0, 5]),
            dstip: u32::from_le_bytes([93, 184, 216, 34]),
            ..Default::default()
        };
        assert_eq!(flow.source(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(flow.destination(), Ipv4Addr::new(93, 184, 216, 34));
    }
}
