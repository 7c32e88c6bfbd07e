use crate::cli::app_config::Cli;
use clap::Parser;
use http::header::AUTHORIZATION;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rslow::http::handler::demo_router;
use rslow::{SlowLayer, TracingSink};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Instrument, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    serve(cli).await
}

fn init_logging(cli: &Cli) -> Result<WorkerGuard, anyhow::Error> {
    let log_level = match cli.verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("hyper_util=off".parse()?)
        .add_directive("hyper=off".parse()?);
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let builder = tracing_subscriber::fmt()
        .with_level(true)
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .with_env_filter(filter)
        .with_writer(writer);
    let _ = if cli.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    Ok(guard)
}

async fn serve(cli: Cli) -> Result<(), anyhow::Error> {
    let options = cli.slow_options()?;
    info!(
        threshold = options.threshold,
        verbose = options.verbose,
        lifecycle = options.request_lifecycle,
        tags = ?options.tags,
        "slow request reporting enabled"
    );

    let mut router = demo_router::<Incoming>();
    if let Some(token) = cli.token_option.as_ref() {
        let expected = format!("Bearer {token}");
        router = router.authenticate(move |req| {
            req.headers()
                .get(AUTHORIZATION)
                .is_some_and(|v| v.as_bytes() == expected.as_bytes())
        });
    }
    let service = SlowLayer::new(options, Arc::new(TracingSink::new())).layer(router);

    let listener = TcpListener::bind(cli.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let service = TowerToHyperService::new(service.clone());
                tokio::task::spawn(
                    async move {
                        if let Err(err) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("connection closed: {:?}", err);
                        }
                    }
                    .instrument(info_span!("conn", remoteAddr = %remote_addr)),
                );
            }
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}
