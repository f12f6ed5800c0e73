mod cli;
mod daemon;

use clap::Parser;
use cli::Cli;
use config::Config;
use tracing::{debug, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The verbosity flag takes precedence over the environment variable:
    // `SENTINEL_LOG` can tune levels per crate, but `-v`/`-vv` always raises
    // the default directive.
    let env_filter = EnvFilter::builder()
        .with_env_var("SENTINEL_LOG")
        .from_env()?
        .add_directive(cli.log_directive().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    let candidates = cli.resolve_config_paths()?;
    trace!(?candidates, "config file candidates");
    let mut config = Config::load_multiple(candidates)?;
    cli.apply_overrides(&mut config);
    debug!(?config, ?cli);

    daemon::run(config)
}
