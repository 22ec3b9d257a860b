//! iPXE script generation
//!
//! This module renders the boot script a machine receives each time it
//! chains to `/boot/<mac>/boot.ipxe`. The script depends only on the
//! node's status, so a machine keeps looping until an operator moves it
//! to installing.

use crate::error::{IpxeError, Result};
use nodefoundry_common::{join_host_port, strip_port, Node, NodeStatus};

/// Boot stage for iPXE scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStage {
    /// Sleep and re-chain until the node is marked for install
    WaitLoop,
    /// Boot the Debian netboot installer
    Install,
    /// Boot from local disk
    LocalBoot,
}

impl From<NodeStatus> for BootStage {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Discovered => BootStage::WaitLoop,
            NodeStatus::Installing => BootStage::Install,
            NodeStatus::Installed => BootStage::LocalBoot,
        }
    }
}

/// Configuration for boot script and preseed generation
#[derive(Debug, Clone)]
pub struct IpxeConfig {
    /// host:port booting machines use to reach this server
    pub server_addr: String,

    /// Debian mirror hostname
    pub mirror: String,

    /// Debian suite the installer comes from
    pub suite: String,

    /// Seconds a waiting node sleeps between re-chains
    pub poll_interval: u32,

    /// Broker address written into the agent environment
    /// Defaults to `<server host>:1883`
    pub broker: Option<String>,
}

impl Default for IpxeConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            mirror: "mirrors.ustc.edu.cn".to_string(),
            suite: "bookworm".to_string(),
            poll_interval: 90,
            broker: None,
        }
    }
}

impl IpxeConfig {
    /// Create a new config with the advertised server address
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Default::default()
        }
    }

    /// Set the Debian mirror
    pub fn with_mirror(mut self, mirror: impl Into<String>) -> Self {
        self.mirror = mirror.into();
        self
    }

    /// Set the Debian suite
    pub fn with_suite(mut self, suite: impl Into<String>) -> Self {
        self.suite = suite.into();
        self
    }

    /// Set the wait loop sleep
    pub fn with_poll_interval(mut self, seconds: u32) -> Self {
        self.poll_interval = seconds;
        self
    }

    /// Set the broker address
    pub fn with_broker(mut self, broker: impl Into<String>) -> Self {
        self.broker = Some(broker.into());
        self
    }

    /// Server address without the port
    pub fn server_host(&self) -> &str {
        strip_port(&self.server_addr)
    }

    pub fn broker_addr(&self) -> String {
        match &self.broker {
            Some(broker) => broker.clone(),
            None => join_host_port(self.server_host(), 1883),
        }
    }

    /// Reject configs that would render unusable URLs
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.is_empty() {
            return Err(IpxeError::MissingConfig("server_addr".to_string()));
        }
        if self.mirror.is_empty() {
            return Err(IpxeError::MissingConfig("mirror".to_string()));
        }
        if self.suite.is_empty() {
            return Err(IpxeError::MissingConfig("suite".to_string()));
        }
        Ok(())
    }
}

/// iPXE script generator
#[derive(Debug, Clone)]
pub struct BootScriptGenerator {
    config: IpxeConfig,
}

impl BootScriptGenerator {
    /// Create a new script generator
    pub fn new(config: IpxeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IpxeConfig {
        &self.config
    }

    /// Render the script for the node's current status
    pub fn generate(&self, node: &Node) -> Result<String> {
        node.validate()?;

        Ok(match BootStage::from(node.status) {
            BootStage::WaitLoop => self.wait_loop_script(&node.mac),
            BootStage::Install => self.install_script(&node.mac),
            BootStage::LocalBoot => local_boot_script(),
        })
    }

    fn wait_loop_script(&self, mac: &str) -> String {
        format!(
            r#"#!ipxe
set node_url http://{server}
set mac {mac}

:loop
echo Node in discovered state, waiting for installation trigger...
sleep {interval}
chain ${{node_url}}/boot/${{mac}}/boot.ipxe || goto loop
"#,
            server = self.config.server_addr,
            mac = mac,
            interval = self.config.poll_interval,
        )
    }

    fn install_script(&self, mac: &str) -> String {
        let netboot = format!(
            "https://{}/debian/dists/{}/main/installer-${{arch}}/current/images/netboot/debian-installer/${{arch}}",
            self.config.mirror, self.config.suite
        );

        format!(
            r#"#!ipxe
set node_url http://{server}
set mac {mac}
set arch ${{buildarch}}

kernel {netboot}/linux
initrd {netboot}/initrd.gz
imgargs linux auto=true priority=critical url=${{node_url}}/preseed/${{mac}}/preseed.cfg
boot
"#,
            server = self.config.server_addr,
            mac = mac,
            netboot = netboot,
        )
    }
}

fn local_boot_script() -> String {
    String::from("#!ipxe\necho Booting from local disk...\nexit\n")
}
