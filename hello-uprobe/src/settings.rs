use std::path::PathBuf;

use config::{Config, ConfigError, Environment};
use hello_uprobe_common::HELLO_WORLD_SYMBOL;
use log::debug;
use serde::Deserialize;

pub const DEFAULT_BYTECODE_PATH: &str = "target/bpf/hello-uprobe.bpf.o";
pub const DEFAULT_TARGET_BINARY: &str = "target/debug/helloworld";

const ENV_PREFIX: &str = "HELLO_UPROBE";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub bytecode_path: PathBuf,
    pub target_binary: PathBuf,
    pub symbol: String,
    pub offset: u64,
    /// 0 attaches to every process.
    pub pid: u32,
    pub retprobe: bool,
}

/// Values given on the command line. They take precedence over the
/// environment and the defaults.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bytecode_path: Option<PathBuf>,
    pub target_binary: Option<PathBuf>,
    pub symbol: Option<String>,
    pub offset: Option<u64>,
    pub pid: Option<u32>,
    pub retprobe: Option<bool>,
}

impl Settings {
    pub fn new(overrides: Overrides) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path_str = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());

        let s = Config::builder()
            .set_default("bytecode_path", DEFAULT_BYTECODE_PATH)?
            .set_default("target_binary", DEFAULT_TARGET_BINARY)?
            .set_default("symbol", HELLO_WORLD_SYMBOL)?
            .set_default("offset", 0u64)?
            .set_default("pid", 0u64)?
            .set_default("retprobe", false)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("bytecode_path", path_str(overrides.bytecode_path))?
            .set_override_option("target_binary", path_str(overrides.target_binary))?
            .set_override_option("symbol", overrides.symbol)?
            .set_override_option("offset", overrides.offset)?
            .set_override_option("pid", overrides.pid.map(u64::from))?
            .set_override_option("retprobe", overrides.retprobe)?
            .build()?;

        let settings: Self = s.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }
}
