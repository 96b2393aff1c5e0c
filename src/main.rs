use std::process::ExitCode;

use mping::{
    configuration::{Configuration, Parser, RunMode},
    prober::Prober,
    responder::run_responder,
};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    let conf = Configuration::parse();
    let mode = match conf.validate() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!("Configuration valid. Starting up...");
    match &mode {
        RunMode::Probe(s) => log::info!(
            "Prober mode: group={}:{} interface={} interval={:?} count={} ttl={} size={}",
            s.group, s.port, s.interface, s.interval, s.count, s.ttl, s.payload_size
        ),
        RunMode::Respond(s) => log::info!(
            "Responder mode: group={}:{} interface={}",
            s.group, s.port, s.interface
        ),
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("Cannot listen for ctrl-c: {}", e);
                return;
            }
            log::info!("Received interrupt, shutting down");
            shutdown.cancel();
        });
    }

    match mode {
        RunMode::Probe(settings) => {
            let mut prober = match Prober::bind(&settings) {
                Ok(prober) => prober,
                Err(e) => {
                    eprintln!("{}", e);
                    return ExitCode::FAILURE;
                }
            };

            println!("{}", prober.banner(settings.payload_size));
            let termination = prober.run(&shutdown).await;
            log::debug!("Prober stopped: {:?}", termination);
            prober.summary().print(settings.output_format);
        }
        RunMode::Respond(settings) => match run_responder(&settings, &shutdown).await {
            Ok(stats) => stats.print(),
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
    }

    ExitCode::SUCCESS
}
