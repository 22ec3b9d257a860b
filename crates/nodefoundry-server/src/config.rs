//! Server configuration
//!
//! Every option is a long flag that can also be set from an `NF_*`
//! environment variable. Values that booting machines need to reach us
//! (server address, TFTP server) are derived from the HTTP listener when
//! not set explicitly.

use clap::Args;
use nodefoundry_common::strip_port;
use nodefoundry_dhcp::{DhcpConfig, DhcpMode, PoolConfig};
use nodefoundry_ipxe::IpxeConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen address
    #[arg(long, env = "NF_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    /// host:port booting machines use to reach the HTTP server
    #[arg(long, env = "NF_SERVER_ADDR")]
    pub server_addr: Option<String>,

    /// DHCP listen address
    #[arg(long, env = "NF_DHCP_ADDR", default_value = "0.0.0.0:67")]
    pub dhcp_addr: SocketAddr,

    /// Network interface to bind the DHCP socket to
    #[arg(long, env = "NF_DHCP_INTERFACE")]
    pub dhcp_interface: Option<String>,

    /// TFTP server handed to PXE clients
    #[arg(long, env = "NF_DHCP_TFTP_SERVER")]
    pub dhcp_tftp_server: Option<Ipv4Addr>,

    /// Run as ProxyDHCP next to an existing DHCP server
    #[arg(long, env = "NF_DHCP_PROXY_MODE")]
    pub dhcp_proxy_mode: bool,

    /// Do not start the DHCP server at all
    #[arg(long, env = "NF_DHCP_DISABLED")]
    pub dhcp_disabled: bool,

    #[arg(long, env = "NF_DHCP_IP_POOL_START")]
    pub dhcp_pool_start: Option<String>,

    #[arg(long, env = "NF_DHCP_IP_POOL_END")]
    pub dhcp_pool_end: Option<String>,

    #[arg(long, env = "NF_DHCP_NETMASK", default_value = "255.255.255.0")]
    pub dhcp_netmask: String,

    #[arg(long, env = "NF_DHCP_GATEWAY")]
    pub dhcp_gateway: Option<String>,

    /// Comma separated DNS servers
    #[arg(
        long,
        env = "NF_DHCP_DNS",
        value_delimiter = ',',
        default_value = "8.8.8.8,8.8.4.4"
    )]
    pub dhcp_dns: Vec<String>,

    /// Lease time in seconds
    #[arg(long, env = "NF_DHCP_LEASE_TIME", default_value_t = 86400)]
    pub dhcp_lease_time: u32,

    /// Broker address written into the agent environment
    #[arg(long, env = "NF_MQTT_BROKER")]
    pub mqtt_broker: Option<String>,

    /// Debian mirror hostname
    #[arg(long, env = "NF_MIRROR_URL", default_value = "mirrors.ustc.edu.cn")]
    pub mirror_url: String,

    /// Database file, or `memory` for a throwaway in-memory store
    #[arg(long, env = "NF_DB_PATH", default_value = "/var/lib/nodefoundry/nodes.redb")]
    pub db_path: PathBuf,

    /// Agent binary served to installed hosts
    #[arg(long, env = "NF_AGENT_BINARY", default_value = "bin/nodefoundry-agent")]
    pub agent_binary: PathBuf,

    /// Seconds a waiting node sleeps between boot script polls
    #[arg(long, env = "NF_IPXE_SLEEP", default_value_t = 90)]
    pub ipxe_sleep: u32,

    /// Pending status reports held before new ones are refused
    #[arg(long, env = "NF_STATUS_QUEUE", default_value_t = 256)]
    pub status_queue: usize,
}

impl ServerConfig {
    /// Address advertised in boot scripts and preseed URLs.
    pub fn advertised_addr(&self) -> String {
        match self.server_addr.as_deref().map(str::trim) {
            Some(addr) if !addr.is_empty() => addr.to_string(),
            _ if self.http_addr.ip().is_unspecified() => {
                format!("localhost:{}", self.http_addr.port())
            }
            _ => self.http_addr.to_string(),
        }
    }

    /// Host part of the advertised address.
    pub fn advertised_host(&self) -> String {
        strip_port(&self.advertised_addr()).to_string()
    }

    /// TFTP server: explicit setting, else the advertised host when it is
    /// an IPv4 address.
    pub fn tftp_server(&self) -> Option<Ipv4Addr> {
        self.dhcp_tftp_server
            .or_else(|| self.advertised_host().parse().ok())
    }

    /// Address put in the DHCP server identifier option.
    ///
    /// None when no IPv4 address for this host can be determined.
    pub fn dhcp_server_ip(&self) -> Option<Ipv4Addr> {
        if let Ok(ip) = self.advertised_host().parse() {
            return Some(ip);
        }
        match self.http_addr.ip() {
            std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => self.dhcp_tftp_server,
        }
    }

    pub fn dhcp_mode(&self) -> DhcpMode {
        if self.dhcp_proxy_mode {
            DhcpMode::Proxy
        } else {
            DhcpMode::Standard
        }
    }

    /// DHCP engine configuration, or None when no server IP is known.
    pub fn dhcp_config(&self) -> Option<DhcpConfig> {
        let server_ip = self.dhcp_server_ip()?;

        let mut config = DhcpConfig::new(server_ip)
            .with_mode(self.dhcp_mode())
            .with_bind_addr(self.dhcp_addr)
            .with_ipxe_script_url(DhcpConfig::script_url_for(&self.advertised_addr()));
        if let Some(tftp) = self.tftp_server() {
            config = config.with_tftp_server(tftp);
        }
        if let Some(interface) = non_empty(self.dhcp_interface.as_deref()) {
            config = config.with_interface(interface);
        }
        Some(config)
    }

    /// Lease pool configuration; only when both bounds are set.
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let start = non_empty(self.dhcp_pool_start.as_deref())?;
        let end = non_empty(self.dhcp_pool_end.as_deref())?;

        let mut config = PoolConfig::new(start, end)
            .with_netmask(self.dhcp_netmask.trim())
            .with_lease_time(self.dhcp_lease_time);
        if let Some(gateway) = non_empty(self.dhcp_gateway.as_deref()) {
            config = config.with_gateway(gateway);
        }
        for dns in self.dhcp_dns.iter().filter_map(|d| non_empty(Some(d.as_str()))) {
            config = config.with_dns(dns);
        }
        Some(config)
    }

    pub fn ipxe_config(&self) -> IpxeConfig {
        let mut config = IpxeConfig::new(self.advertised_addr())
            .with_mirror(self.mirror_url.trim())
            .with_poll_interval(self.ipxe_sleep);
        if let Some(broker) = non_empty(self.mqtt_broker.as_deref()) {
            config = config.with_broker(broker);
        }
        config
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
