use crate::config::ShellEofMode;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,

    /// Host ADB server hostname
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Host ADB server port
    #[arg(long, short = 'p', default_value_t = 5037)]
    pub port: u16,

    /// Base TCP port for per-device ADB listeners; device `i` (0-indexed by
    /// enumeration order) binds at `base+i`
    #[arg(long = "adb-base-port", default_value_t = 6000)]
    pub adb_base_port: u16,

    /// Base TCP port for per-device scrcpy tunnels; device `i` binds at `base+i`
    #[arg(long = "scrcpy-base-port", default_value_t = 7000)]
    pub scrcpy_base_port: u16,

    /// Validate the inbound payload CRC-32 instead of only surfacing it
    #[arg(long)]
    pub verify_crc: bool,

    /// Behavior on EOF from a `shell:` outbound service
    #[arg(long = "shell-eof-mode", value_enum, default_value_t = ShellEofMode::Poll)]
    pub shell_eof_mode: ShellEofMode,
}
