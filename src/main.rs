//! `tolog [FILE]` prints the query in FILE (or on stdin) in the configured
//! output form, with imported modules read from local files.
//! `tolog --serve` starts the HTTP service, `tolog --passes` lists the
//! optimizer passes.

use std::io::Read;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tolog::error::{Result, TologError};
use tolog::settings::Settings;
use tolog::source::Source;

const USAGE: &str = "usage: tolog [FILE] | tolog --serve | tolog --passes";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "tolog failed");
            eprintln!("{e}");
            if e.is_query_error() || e.is_lexical_error() { 2 } else { 1 }
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<()> {
    let settings = Settings::load()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [flag] if flag == "--serve" => serve(settings).await,
        [flag] if flag == "--passes" => {
            for pass in tolog::optimizer::PASSES {
                let default = if tolog::optimizer::DEFAULT_PASSES.contains(&pass.name) { " (default)" } else { "" };
                println!("{:<22}{}{default}", pass.name, pass.description);
            }
            Ok(())
        }
        [flag] if flag == "--help" || flag == "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        [path] => print(Source::from_file(path)?, &settings),
        [] => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            print(Source::from_text(text, settings.base_iri()?), &settings)
        }
        _ => Err(TologError::Config(USAGE.into())),
    }
}

fn print(source: Source, settings: &Settings) -> Result<()> {
    let output = tolog::transform(&source, &settings.parse_options(), settings.output, settings.hints)?;
    println!("{output}");
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    info!(bind = %settings.bind, "listening");
    let app = tolog::server::router(Arc::new(settings));
    axum::serve(listener, app).await?;
    Ok(())
}
