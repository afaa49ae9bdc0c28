//! Process-wide configuration derived from [`crate::cli::Cli`].
//!
//! Kept separate from argument parsing the same way `aim`'s `cli.rs` and
//! `config.rs` are split: `cli.rs` owns the clap surface, this module turns
//! it into the plain struct the rest of the crate actually depends on.

use crate::cli::Cli;

/// Behavior on EOF from a `shell:` outbound service. The reference proxy
/// polls rather than closing, on the theory that the process may still be
/// running; §9 of the design notes calls this out as a likely workaround
/// and suggests exposing it as a toggle rather than hardcoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ShellEofMode {
    /// Treat EOF on a `shell:` service as possibly spurious; poll instead
    /// of closing until the peer sends an explicit `CLSE`.
    Poll,
    /// Close the stream immediately on EOF, `shell:` services included.
    Close,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host_adb_host: String,
    pub host_adb_port: u16,
    pub adb_base_port: u16,
    pub scrcpy_base_port: u16,
    /// Enforce inbound payload CRC-32 rather than merely surfacing it.
    /// Default off, matching the reference's permissive stance (§9).
    pub verify_crc: bool,
    pub shell_eof_mode: ShellEofMode,
}

impl From<&Cli> for ProxyConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            host_adb_host: cli.host.clone(),
            host_adb_port: cli.port,
            adb_base_port: cli.adb_base_port,
            scrcpy_base_port: cli.scrcpy_base_port,
            verify_crc: cli.verify_crc,
            shell_eof_mode: cli.shell_eof_mode,
        }
    }
}
