use eyre::Result as EyreResult;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, registry, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` decides at verbosity 0, falling back to `info` for
/// the skein crates; 1 logs everything at `debug`, anything above at `trace`.
pub fn init_tracing(verbosity: u8) -> EyreResult<()> {
    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("skein_gossip=info,skein_reconnect=info,skein_shadowgraph=info")
        }),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    registry().with(filter).with(fmt::layer()).try_init()?;

    Ok(())
}
