use std::sync::OnceLock;

use serde::Deserialize;

fn default_threads() -> usize {
    match std::thread::available_parallelism() {
        Ok(n) => n.into(),
        Err(_) => 4,
    }
}

fn default_localities() -> usize {
    1
}

fn default_dict_capacity() -> usize {
    100
}

fn default_op_dict_capacity() -> usize {
    16
}

fn default_request_capacity() -> usize {
    1000
}

fn default_match_burst() -> usize {
    100
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Number of worker threads in the task scheduler, default: available parallelism
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Number of emulated localities (nodes) in the world, default: 1
    #[serde(default = "default_localities")]
    pub localities: usize,

    /// Total number of logical ranks; 0 lets `ranks_per_node` (or one per locality) decide
    #[serde(default)]
    pub ranks: usize,

    /// Ranks hosted by every locality; takes precedence over `ranks` when non-zero
    #[serde(default)]
    pub ranks_per_node: usize,

    /// Initial slot capacity of every transaction dictionary, default: 100
    #[serde(default = "default_dict_capacity")]
    pub dict_capacity: usize,

    /// Maximum number of operation kinds a communicator may register, default: 16
    #[serde(default = "default_op_dict_capacity")]
    pub op_dict_capacity: usize,

    /// Initial capacity of each rank's request table, default: 1000
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,

    /// Run a background matcher task per communicator, default: false
    #[serde(default)]
    pub match_thread: bool,

    /// Matching attempts per burst of the background matcher, default: 100
    #[serde(default = "default_match_burst")]
    pub match_burst: usize,

    /// Deadline in seconds applied to every rendezvous wait, default: none (wait forever)
    pub wait_timeout: Option<f64>,

    /// Pin worker threads to cores, default: false
    #[serde(default)]
    pub bind_threads: bool,
}

impl Config {
    /// Read the configuration from `AMMPI_*` environment variables.
    pub fn from_env() -> Result<Config, envy::Error> {
        envy::prefixed("AMMPI_").from_env::<Config>()
    }
}

/// Get the current Environment Variable configuration
pub fn config() -> &'static Config {
    static CONFIG: OnceLock<Config> = OnceLock::new();
    CONFIG.get_or_init(|| match Config::from_env() {
        Ok(config) => config,
        Err(error) => panic!("{}", error),
    })
}
