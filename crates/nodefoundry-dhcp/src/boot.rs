//! Boot option selection
//!
//! Maps the client architecture signal (option 93) to the chainloader the
//! firmware should fetch over TFTP, and carries the next-server data that
//! goes into siaddr / option 66 / option 67.

use std::fmt;
use std::net::Ipv4Addr;

/// Client architecture types (RFC 4578)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientArch {
    /// Intel x86 BIOS
    IntelX86Bios,
    /// EFI IA32
    EfiIa32,
    /// EFI byte code
    EfiBc,
    /// EFI x86_64
    EfiX64,
    /// EFI ARM32
    EfiArm32,
    /// EFI ARM64
    EfiArm64,
    /// Anything else, raw code kept
    Other(u16),
}

impl From<u16> for ClientArch {
    fn from(value: u16) -> Self {
        match value {
            0 => ClientArch::IntelX86Bios,
            6 => ClientArch::EfiIa32,
            7 => ClientArch::EfiBc,
            9 => ClientArch::EfiX64,
            10 => ClientArch::EfiArm32,
            11 => ClientArch::EfiArm64,
            other => ClientArch::Other(other),
        }
    }
}

impl From<ClientArch> for u16 {
    fn from(arch: ClientArch) -> Self {
        match arch {
            ClientArch::IntelX86Bios => 0,
            ClientArch::EfiIa32 => 6,
            ClientArch::EfiBc => 7,
            ClientArch::EfiX64 => 9,
            ClientArch::EfiArm32 => 10,
            ClientArch::EfiArm64 => 11,
            ClientArch::Other(code) => code,
        }
    }
}

impl fmt::Display for ClientArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientArch::IntelX86Bios => f.write_str("x86-bios"),
            ClientArch::EfiIa32 => f.write_str("efi-ia32"),
            ClientArch::EfiBc => f.write_str("efi-bc"),
            ClientArch::EfiX64 => f.write_str("efi-x86_64"),
            ClientArch::EfiArm32 => f.write_str("efi-arm32"),
            ClientArch::EfiArm64 => f.write_str("efi-arm64"),
            ClientArch::Other(code) => write!(f, "arch-{}", code),
        }
    }
}

/// Firmware family a chainloader is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Firmware {
    Bios,
    Uefi,
}

impl Firmware {
    /// Codes 7 and up get the UEFI binary; 0, 1-6 and a missing option
    /// fall back to the BIOS chainloader.
    pub fn from_arch(arch: Option<u16>) -> Self {
        match arch {
            Some(code) if code >= 7 => Firmware::Uefi,
            _ => Firmware::Bios,
        }
    }
}

/// Chainloader file names served over TFTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFiles {
    pub bios: String,
    pub uefi: String,
}

impl Default for BootFiles {
    fn default() -> Self {
        Self {
            bios: "undionly.kpxe".to_string(),
            uefi: "ipxe.efi".to_string(),
        }
    }
}

impl BootFiles {
    pub fn new(bios: impl Into<String>, uefi: impl Into<String>) -> Self {
        Self {
            bios: bios.into(),
            uefi: uefi.into(),
        }
    }

    /// Pick the boot file for an architecture code.
    pub fn select(&self, arch: Option<u16>) -> &str {
        match Firmware::from_arch(arch) {
            Firmware::Bios => &self.bios,
            Firmware::Uefi => &self.uefi,
        }
    }
}

/// Boot options to staple onto a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootOptions {
    /// Next server (siaddr) and option 66
    pub tftp_server: Option<Ipv4Addr>,
    /// Option 67 and the legacy `file` header field
    pub boot_filename: String,
}

impl BootOptions {
    /// Options for a firmware PXE client: chainload iPXE over TFTP.
    pub fn for_firmware(files: &BootFiles, tftp_server: Option<Ipv4Addr>, arch: Option<u16>) -> Self {
        Self {
            tftp_server,
            boot_filename: files.select(arch).to_string(),
        }
    }

    /// Options for a client already running iPXE: hand it the script URL.
    pub fn for_ipxe(tftp_server: Option<Ipv4Addr>, script_url: impl Into<String>) -> Self {
        Self {
            tftp_server,
            boot_filename: script_url.into(),
        }
    }
}
