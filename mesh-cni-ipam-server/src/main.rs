use clap::Parser;
use mesh_cni_ipam_server::config::{Cli, Commands};
use mesh_cni_ipam_server::{Error, Result, daemon, http};
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_subscriber();
    match cli.command {
        Commands::Serve(args) => {
            let cancel = tokio_util::sync::CancellationToken::new();
            let ready = tokio_util::sync::CancellationToken::new();

            let mut metrics_handle = tokio::spawn(http::serve_metrics(
                args.metrics_address,
                ready.child_token(),
                cancel.child_token(),
            ));
            let mut ipam_handle = tokio::spawn(daemon::start(args, ready, cancel.child_token()));
            let mut shutdown_handle = tokio::spawn(shutdown_signal());
            // watch for shutdown and errors
            let res = tokio::select! {
                h = &mut metrics_handle => exit("metrics", h),
                h = &mut ipam_handle => exit("ipam", h),
                h = &mut shutdown_handle => {
                    cancel.cancel();
                    let (metrics, ipam) = tokio::join!(metrics_handle, ipam_handle);
                    exit("shutdown", h)
                        .and(exit("metrics", metrics))
                        .and(exit("ipam", ipam))
                },
            };
            info!("Exiting...");
            res?;
        }
        Commands::Crdgen => mesh_cni_crds::crd_gen_all()?,
    }
    Ok(())
}

fn setup_subscriber() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mesh_cni_ipam=info,mesh_cni_ipam_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("captured ctrl_c signal");
        },
        _ = terminate.recv() => {
            info!("captured terminate signal");
        },
    }
    Ok(())
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) -> Result<()> {
    match out {
        Ok(Ok(_)) => {
            info!("{task} exited");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("{task} failed with error: {e}");
            Err(e)
        }
        Err(e) => {
            error!("{task} task failed to complete: {e}");
            Err(Error::Task(e.to_string()))
        }
    }
}
