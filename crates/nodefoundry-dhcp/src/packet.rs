//! DHCP packet handling
//!
//! This module provides utilities for parsing and building DHCP packets
//! with PXE boot options.

use crate::boot::{BootOptions, ClientArch};
use crate::error::{DhcpError, Result};
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode};
use dhcproto::{Decodable, Encodable};
use nodefoundry_common::mac_from_bytes;
use std::net::Ipv4Addr;

/// Parsed DHCP request with extracted information
#[derive(Debug, Clone)]
pub struct DhcpRequest {
    /// Original message
    pub message: Message,

    /// Message type (DISCOVER, REQUEST, etc.)
    pub message_type: MessageType,

    /// Client MAC address, canonical form
    pub mac_address: String,

    /// Raw client architecture code (option 93)
    pub client_arch: Option<u16>,

    /// Requested IP address (option 50)
    pub requested_ip: Option<Ipv4Addr>,

    /// Is this an iPXE client? (checks user-class option)
    pub is_ipxe: bool,

    /// Transaction ID
    pub xid: u32,

    /// Client IP (ciaddr)
    pub client_ip: Ipv4Addr,

    /// Gateway IP (giaddr) for relayed requests
    pub relay_ip: Ipv4Addr,
}

impl DhcpRequest {
    /// Parse a DHCP request from raw bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let message =
            Message::from_bytes(data).map_err(|e| DhcpError::ParseError(e.to_string()))?;
        Self::from_message(message)
    }

    /// Extract request fields from a decoded message
    pub fn from_message(message: Message) -> Result<Self> {
        if message.opcode() != Opcode::BootRequest {
            return Err(DhcpError::ParseError("not a BOOTREQUEST".to_string()));
        }

        let message_type = message
            .opts()
            .get(OptionCode::MessageType)
            .and_then(|opt| {
                if let DhcpOption::MessageType(mt) = opt {
                    Some(mt.clone())
                } else {
                    None
                }
            })
            .ok_or_else(|| DhcpError::ParseError("missing message type".to_string()))?;

        // Ethernet hardware address; anything shorter or all zeros is unusable
        let chaddr = message.chaddr();
        if chaddr.len() < 6 || chaddr[..6].iter().all(|b| *b == 0) {
            return Err(DhcpError::EmptyHardwareAddress);
        }
        let mac_address = mac_from_bytes(&chaddr[..6]);

        let client_arch = message
            .opts()
            .get(OptionCode::ClientSystemArchitecture)
            .and_then(|opt| {
                if let DhcpOption::ClientSystemArchitecture(arch) = opt {
                    Some(u16::from(*arch))
                } else {
                    None
                }
            });

        let requested_ip = message
            .opts()
            .get(OptionCode::RequestedIpAddress)
            .and_then(|opt| {
                if let DhcpOption::RequestedIpAddress(ip) = opt {
                    Some(*ip)
                } else {
                    None
                }
            });

        // Check if iPXE client (option 77 user-class contains "iPXE")
        let is_ipxe = message
            .opts()
            .get(OptionCode::UserClass)
            .map(|opt| {
                if let DhcpOption::UserClass(user_class) = opt {
                    String::from_utf8_lossy(user_class).contains("iPXE")
                } else {
                    false
                }
            })
            .unwrap_or(false);

        Ok(Self {
            xid: message.xid(),
            client_ip: message.ciaddr(),
            relay_ip: message.giaddr(),
            message,
            message_type,
            mac_address,
            client_arch,
            requested_ip,
            is_ipxe,
        })
    }

    /// Check if this is a PXE boot request
    pub fn is_pxe_request(&self) -> bool {
        // Check vendor class option 60 for "PXEClient"
        self.message
            .opts()
            .get(OptionCode::ClassIdentifier)
            .map(|opt| {
                if let DhcpOption::ClassIdentifier(class) = opt {
                    String::from_utf8_lossy(class).starts_with("PXEClient")
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }

    pub fn arch(&self) -> Option<ClientArch> {
        self.client_arch.map(ClientArch::from)
    }

    /// ciaddr, if the client already has one
    pub fn current_ip(&self) -> Option<Ipv4Addr> {
        Some(self.client_ip).filter(|ip| !ip.is_unspecified())
    }

    /// Whether the request came through a relay agent
    pub fn is_relayed(&self) -> bool {
        !self.relay_ip.is_unspecified()
    }
}

/// DHCP response builder
pub struct DhcpResponseBuilder<'a> {
    request: &'a DhcpRequest,
    message_type: MessageType,
    server_ip: Ipv4Addr,
    offered_ip: Option<Ipv4Addr>,
    subnet_mask: Option<Ipv4Addr>,
    gateway: Option<Ipv4Addr>,
    dns_servers: Vec<Ipv4Addr>,
    lease_time: Option<u32>,
    broadcast_addr: Option<Ipv4Addr>,
    boot: Option<BootOptions>,
    pxe_vendor: bool,
}

impl<'a> DhcpResponseBuilder<'a> {
    /// Create a new response builder
    pub fn new(request: &'a DhcpRequest, message_type: MessageType, server_ip: Ipv4Addr) -> Self {
        Self {
            request,
            message_type,
            server_ip,
            offered_ip: None,
            subnet_mask: None,
            gateway: None,
            dns_servers: Vec::new(),
            lease_time: None,
            broadcast_addr: None,
            boot: None,
            pxe_vendor: false,
        }
    }

    /// Set the offered IP address
    pub fn with_offered_ip(mut self, ip: Ipv4Addr) -> Self {
        self.offered_ip = Some(ip);
        self
    }

    /// Set the subnet mask
    pub fn with_subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.subnet_mask = Some(mask);
        self
    }

    /// Set the gateway
    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set DNS servers
    pub fn with_dns_servers(mut self, servers: Vec<Ipv4Addr>) -> Self {
        self.dns_servers = servers;
        self
    }

    /// Set the lease time
    pub fn with_lease_time(mut self, seconds: u32) -> Self {
        self.lease_time = Some(seconds);
        self
    }

    /// Set the broadcast address option (28)
    pub fn with_broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.broadcast_addr = Some(addr);
        self
    }

    /// Set boot options
    pub fn with_boot_options(mut self, boot: BootOptions) -> Self {
        self.boot = Some(boot);
        self
    }

    /// Add PXE vendor class and discovery control (ProxyDHCP replies)
    pub fn with_pxe_vendor_options(mut self) -> Self {
        self.pxe_vendor = true;
        self
    }

    /// Build the response message
    pub fn build(self) -> Message {
        let request = &self.request.message;
        let mut response = Message::default();

        response.set_opcode(Opcode::BootReply);
        response.set_xid(self.request.xid);
        response.set_flags(request.flags());
        response.set_chaddr(request.chaddr());
        response.set_giaddr(self.request.relay_ip);

        // Set yiaddr (your IP address)
        if let Some(ip) = self.offered_ip {
            response.set_yiaddr(ip);
        }

        response
            .opts_mut()
            .insert(DhcpOption::MessageType(self.message_type));
        response
            .opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.server_ip));

        if let Some(mask) = self.subnet_mask {
            response.opts_mut().insert(DhcpOption::SubnetMask(mask));
        }

        if let Some(gateway) = self.gateway {
            response
                .opts_mut()
                .insert(DhcpOption::Router(vec![gateway]));
        }

        if !self.dns_servers.is_empty() {
            response
                .opts_mut()
                .insert(DhcpOption::DomainNameServer(self.dns_servers));
        }

        if let Some(lease_time) = self.lease_time {
            response
                .opts_mut()
                .insert(DhcpOption::AddressLeaseTime(lease_time));
        }

        if let Some(addr) = self.broadcast_addr {
            response.opts_mut().insert(DhcpOption::BroadcastAddr(addr));
        }

        if let Some(boot) = self.boot {
            // TFTP server (siaddr + option 66)
            if let Some(tftp) = boot.tftp_server {
                response.set_siaddr(tftp);
                response
                    .opts_mut()
                    .insert(DhcpOption::TFTPServerName(tftp.to_string().into_bytes()));
            }

            // Boot filename (option 67); the header field only holds 128 bytes
            if boot.boot_filename.len() < 128 {
                response.set_fname_str(&boot.boot_filename);
            }
            response
                .opts_mut()
                .insert(DhcpOption::BootfileName(boot.boot_filename.into_bytes()));
        }

        if self.pxe_vendor {
            response
                .opts_mut()
                .insert(DhcpOption::ClassIdentifier(b"PXEClient".to_vec()));
            // Sub-option 6 (PXE_DISCOVERY_CONTROL) = 0x08: skip boot server
            // discovery and use the filename as given
            response
                .opts_mut()
                .insert(DhcpOption::VendorExtensions(vec![0x06, 0x01, 0x08, 0xFF]));
        }

        response
    }
}

/// Encode a message for the wire
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    message
        .to_vec()
        .map_err(|e| DhcpError::EncodeError(e.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dhcproto::v4::Architecture;

    /// A client message as a PXE ROM would send it
    pub(crate) fn client_message(mac: [u8; 6], message_type: MessageType) -> Message {
        let mut chaddr = [0u8; 16];
        chaddr[..6].copy_from_slice(&mac);

        let mut msg = Message::default();
        msg.set_opcode(Opcode::BootRequest);
        msg.set_xid(0x12345678);
        msg.set_chaddr(&chaddr);
        msg.opts_mut().insert(DhcpOption::MessageType(message_type));
        msg
    }

    fn round_trip(msg: &Message) -> DhcpRequest {
        DhcpRequest::parse(&msg.to_vec().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_discover() {
        let mut discover = client_message([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], MessageType::Discover);
        discover
            .opts_mut()
            .insert(DhcpOption::RequestedIpAddress(Ipv4Addr::new(10, 0, 0, 15)));

        let request = round_trip(&discover);
        assert_eq!(request.message_type, MessageType::Discover);
        assert_eq!(request.mac_address, "001122334455");
        assert_eq!(request.xid, 0x12345678);
        assert_eq!(request.requested_ip, Some(Ipv4Addr::new(10, 0, 0, 15)));
        assert_eq!(request.client_arch, None);
        assert_eq!(request.current_ip(), None);
        assert!(!request.is_ipxe);
        assert!(!request.is_relayed());
    }

    #[test]
    fn test_parse_pxe_and_ipxe_markers() {
        let mut discover = client_message([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], MessageType::Discover);
        discover.opts_mut().insert(DhcpOption::ClassIdentifier(
            b"PXEClient:Arch:00009:UNDI:003016".to_vec(),
        ));
        discover
            .opts_mut()
            .insert(DhcpOption::ClientSystemArchitecture(Architecture::from(9u16)));
        discover
            .opts_mut()
            .insert(DhcpOption::UserClass(b"iPXE".to_vec()));

        let request = round_trip(&discover);
        assert!(request.is_pxe_request());
        assert!(request.is_ipxe);
        assert_eq!(request.client_arch, Some(9));
        assert_eq!(request.arch(), Some(ClientArch::EfiX64));
    }

    #[test]
    fn test_parse_rejects_missing_type_and_empty_mac() {
        let mut msg = client_message([0, 0, 0, 0, 0, 0], MessageType::Discover);
        assert!(matches!(
            DhcpRequest::parse(&msg.to_vec().unwrap()),
            Err(DhcpError::EmptyHardwareAddress)
        ));

        msg.set_chaddr(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        msg.opts_mut().remove(OptionCode::MessageType);
        assert!(matches!(
            DhcpRequest::parse(&msg.to_vec().unwrap()),
            Err(DhcpError::ParseError(_))
        ));

        assert!(matches!(
            DhcpRequest::parse(&[0x01, 0x02, 0x03]),
            Err(DhcpError::ParseError(_))
        ));
    }

    #[test]
    fn test_build_offer_response() {
        let discover = client_message([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], MessageType::Discover);
        let request = round_trip(&discover);

        let response =
            DhcpResponseBuilder::new(&request, MessageType::Offer, Ipv4Addr::new(192, 168, 1, 1))
                .with_offered_ip(Ipv4Addr::new(192, 168, 1, 100))
                .with_subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
                .with_gateway(Ipv4Addr::new(192, 168, 1, 1))
                .with_dns_servers(vec![Ipv4Addr::new(8, 8, 8, 8)])
                .with_lease_time(86400)
                .build();

        assert_eq!(response.opcode(), Opcode::BootReply);
        assert_eq!(response.xid(), 0x12345678);
        assert_eq!(response.yiaddr(), Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(&response.chaddr()[..6], &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(
            response.opts().get(OptionCode::AddressLeaseTime),
            Some(&DhcpOption::AddressLeaseTime(86400))
        );
        assert_eq!(
            response.opts().get(OptionCode::Router),
            Some(&DhcpOption::Router(vec![Ipv4Addr::new(192, 168, 1, 1)]))
        );
        assert!(response.opts().get(OptionCode::BroadcastAddr).is_none());
        assert!(encode(&response).is_ok());
    }

    #[test]
    fn test_build_response_with_boot_options() {
        let discover = client_message([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF], MessageType::Discover);
        let request = round_trip(&discover);

        let boot = BootOptions {
            tftp_server: Some(Ipv4Addr::new(192, 168, 1, 2)),
            boot_filename: "ipxe.efi".to_string(),
        };

        let response =
            DhcpResponseBuilder::new(&request, MessageType::Offer, Ipv4Addr::new(192, 168, 1, 1))
                .with_boot_options(boot)
                .with_broadcast_addr(Ipv4Addr::BROADCAST)
                .with_pxe_vendor_options()
                .build();

        assert_eq!(response.siaddr(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(response.yiaddr(), Ipv4Addr::UNSPECIFIED);
        assert_eq!(
            response.opts().get(OptionCode::BootfileName),
            Some(&DhcpOption::BootfileName(b"ipxe.efi".to_vec()))
        );
        assert_eq!(
            response.opts().get(OptionCode::TFTPServerName),
            Some(&DhcpOption::TFTPServerName(b"192.168.1.2".to_vec()))
        );
        assert_eq!(
            response.opts().get(OptionCode::BroadcastAddr),
            Some(&DhcpOption::BroadcastAddr(Ipv4Addr::BROADCAST))
        );
        assert_eq!(
            response.opts().get(OptionCode::ServerIdentifier),
            Some(&DhcpOption::ServerIdentifier(Ipv4Addr::new(192, 168, 1, 1)))
        );
        assert!(response.opts().get(OptionCode::ClassIdentifier).is_some());
    }
}
