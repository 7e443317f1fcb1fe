//! Command-line interface.

use clap::Parser;

/// Voice agent worker that hands its audio off to an avatar.
#[derive(Debug, Parser)]
#[command(name = "marionette-worker", version, about)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MARIONETTE_CONFIG_PATH", default_value = "config.toml")]
    pub config: String,

    /// Avatar dispatcher endpoint [default: http://localhost:8089/launch].
    ///
    /// Takes precedence over `avatar.dispatcher_url` and
    /// `MARIONETTE_AVATAR_URL`.
    #[arg(long, value_name = "URL")]
    pub avatar_url: Option<String>,

    /// Remaining arguments, passed through to the worker bootstrap untouched.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub worker_args: Vec<String>,
}
