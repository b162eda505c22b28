use clap::Parser as _;
use luxtronik_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Catalog(commands::catalog::Args),
    Read(commands::read::Args),
    Write(commands::write::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn log_filter() -> tracing_subscriber::filter::targets::Targets {
    let default = tracing_subscriber::filter::targets::Targets::new()
        .with_default(tracing::Level::WARN);
    let Ok(description) = std::env::var("LUXTRONIK_TOOLS_LOG") else {
        return default;
    };
    match description.parse() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("warning: ignoring LUXTRONIK_TOOLS_LOG: {e}");
            default
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_filter())
        .init();
    match Commands::parse() {
        Commands::Catalog(args) => end(commands::catalog::run(args)),
        Commands::Read(args) => end(commands::read::run(args).await),
        Commands::Write(args) => end(commands::write::run(args).await),
    }
}
