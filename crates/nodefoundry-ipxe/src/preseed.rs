//! Debian preseed generation
//!
//! The installer fetches `/preseed/<mac>/preseed.cfg` once the node is
//! installing. Network settings come from the request's query string
//! first and from the node record second; with no address from either
//! the installer is told to use DHCP. Every profile ends with a
//! late_command that installs the reporting agent.

use crate::error::{IpxeError, Result};
use crate::script::IpxeConfig;
use nodefoundry_common::{parse_ipv4, parse_nameservers, Node};
use serde::Deserialize;
use std::net::Ipv4Addr;

const AGENT_BINARY_PATH: &str = "/usr/local/bin/nodefoundry-agent";
const AGENT_ENV_FILE: &str = "/etc/default/nodefoundry-agent";
const AGENT_UNIT_PATH: &str = "/etc/systemd/system/nodefoundry-agent.service";

/// Request-time network settings, as sent in the preseed query string
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkOverrides {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub netmask: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns: Option<String>,
}

/// Resolved static network settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticNetwork {
    pub ip: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Vec<Ipv4Addr>,
}

impl NetworkOverrides {
    /// Merge with the node's persisted fields, field by field.
    ///
    /// Returns None when neither side supplies an address. Every chosen
    /// value must parse as IPv4, `dns` as a list of them.
    pub fn resolve(&self, node: &Node) -> Result<Option<StaticNetwork>> {
        fn pick<'a>(over: &'a Option<String>, stored: &'a Option<String>) -> Option<&'a str> {
            non_empty(over).or_else(|| non_empty(stored))
        }
        fn ipv4(field: &'static str, value: Option<&str>) -> Result<Option<Ipv4Addr>> {
            value
                .map(|v| parse_ipv4(field, v))
                .transpose()
                .map_err(IpxeError::InvalidNetwork)
        }

        let Some(ip) = ipv4("ip", pick(&self.ip, &node.ip))? else {
            return Ok(None);
        };
        let dns = match pick(&self.dns, &node.dns) {
            Some(dns) => parse_nameservers("dns", dns).map_err(IpxeError::InvalidNetwork)?,
            None => Vec::new(),
        };

        Ok(Some(StaticNetwork {
            ip,
            netmask: ipv4("netmask", pick(&self.netmask, &node.netmask))?,
            gateway: ipv4("gateway", pick(&self.gateway, &node.gateway))?,
            dns,
        }))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Preseed generator
#[derive(Debug, Clone)]
pub struct PreseedGenerator {
    config: IpxeConfig,
}

impl PreseedGenerator {
    pub fn new(config: IpxeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Render the preseed profile for a node
    pub fn generate(&self, node: &Node, overrides: &NetworkOverrides) -> Result<String> {
        node.validate()?;

        let netcfg = match overrides.resolve(node)? {
            Some(network) => static_netcfg(&network),
            None => "\n# DHCP network configuration (default)\nd-i netcfg/disable_dhcp boolean false"
                .to_string(),
        };

        Ok(format!(
            r#"d-i debian-installer/locale string en_US
d-i keyboard-configuration/xkb-keymap select us
d-i netcfg/choose_interface select auto
d-i netcfg/get_hostname string {hostname}
{netcfg}
d-i mirror/country string manual
d-i mirror/http/hostname string {mirror}
d-i mirror/http/directory string /debian
d-i mirror/http/proxy string
d-i time/zone string Asia/Shanghai
d-i clock-setup/utc-auto boolean true
d-i clock-setup/utc boolean true
d-i partman-auto/method string regular
d-i partman-lvm/device_remove_lvm boolean true
d-i partman-md/device_remove_md boolean true
d-i partman-lvm/confirm boolean true
d-i partman-partitioning/confirm_write_new_label boolean true
d-i partman/choose_partition select finish
d-i partman/confirm boolean true
d-i partman/confirm_nooverwrite boolean true
d-i pkgsel/upgrade select none
d-i grub-installer/only_debian boolean true
d-i grub-installer/with_other_os boolean true
d-i grub-installer/bootdev string default
d-i finish-install/reboot_in_progress note

# Install NodeFoundry agent
{late_command}
"#,
            hostname = node.hostname_or_default(),
            netcfg = netcfg,
            mirror = self.config.mirror,
            late_command = self.late_command(),
        ))
    }

    /// Agent install block.
    ///
    /// The MAC written to the agent environment is read from the default
    /// route's interface on the installed system, not taken from the
    /// request.
    fn late_command(&self) -> String {
        let server = &self.config.server_addr;
        let lines = [
            "DHCP_iface=$(ip route | awk '/^default/ {print $5; exit}')".to_string(),
            "DHCP_MAC=$(cat /sys/class/net/${DHCP_iface}/address | tr -d ':')".to_string(),
            "echo \"Detected DHCP MAC: ${DHCP_MAC}\" > /target/var/log/nodefoundry-agent-install.log"
                .to_string(),
            format!(
                "in-target wget http://{}/agent/nodefoundry-agent -O {}",
                server, AGENT_BINARY_PATH
            ),
            format!("in-target chmod +x {}", AGENT_BINARY_PATH),
            format!(
                "in-target wget http://{}/agent/nodefoundry-agent.service -O {}",
                server, AGENT_UNIT_PATH
            ),
            format!(
                "in-target sh -c \"echo NF_MAC=${{DHCP_MAC}} > {}\"",
                AGENT_ENV_FILE
            ),
            format!(
                "in-target sh -c 'echo NF_MQTT_BROKER={} >> {}'",
                self.config.broker_addr(),
                AGENT_ENV_FILE
            ),
            format!("in-target sh -c 'echo NF_LOG_LEVEL=info >> {}'", AGENT_ENV_FILE),
            format!(
                "in-target sh -c 'echo NF_HEARTBEAT_INTERVAL=30 >> {}'",
                AGENT_ENV_FILE
            ),
            "in-target systemctl enable nodefoundry-agent.service".to_string(),
        ];

        format!("d-i preseed/late_command string \\\n  {}", lines.join(" && \\\n  "))
    }
}

fn static_netcfg(network: &StaticNetwork) -> String {
    let mut section = format!(
        "\n# Static network configuration\n\
         d-i netcfg/disable_autoconfig boolean true\n\
         d-i netcfg/disable_dhcp boolean true\n\
         d-i netcfg/get_ipaddress string {}",
        network.ip
    );
    if let Some(netmask) = &network.netmask {
        section.push_str(&format!("\nd-i netcfg/get_netmask string {}", netmask));
    }
    if let Some(gateway) = &network.gateway {
        section.push_str(&format!("\nd-i netcfg/get_gateway string {}", gateway));
    }
    if !network.dns.is_empty() {
        let dns: Vec<String> = network.dns.iter().map(Ipv4Addr::to_string).collect();
        section.push_str(&format!(
            "\nd-i netcfg/get_nameservers string {}",
            dns.join(" ")
        ));
    }
    section.push_str("\nd-i netcfg/confirm_static boolean true");
    section
}

/// systemd unit for the reporting agent
pub fn agent_service_unit() -> &'static str {
    "[Unit]
Description=NodeFoundry Agent
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart=/usr/local/bin/nodefoundry-agent
Restart=always
RestartSec=10
EnvironmentFile=/etc/default/nodefoundry-agent

[Install]
WantedBy=multi-user.target
"
}
