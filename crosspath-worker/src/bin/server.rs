use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
use tonic::transport::Server;

use crosspath_core::crosspath::pusher_server::PusherServer;
use crosspath_core::crosspath::seeker_server::SeekerServer;
use crosspath_core::db::Db;
use crosspath_core::tool::{init_log, MESSAGE_LIMIT};

use crosspath_worker::config::WorkerConfig;
use crosspath_worker::gc::Gc;
use crosspath_worker::pusher::Pusher;
use crosspath_worker::request_handler::{PusherImpl, SeekerImpl};
use crosspath_worker::seeker::Seeker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/worker.toml")]
    config: String,

    /// Database directory, overrides the config; a temporary directory is
    /// used when neither is set.
    #[arg(short, long)]
    path: Option<String>,
}

async fn serve() -> Result<()> {
    let args = Args::parse();

    let mut config = WorkerConfig::from_file(&args.config)?;
    if args.path.is_some() {
        config.db_path = args.path;
    }

    let addr: SocketAddr = config.listen_addr.parse()?;

    let db = Arc::new(Db::open(config.db_path.as_deref().map(Path::new))?);
    info!("initialized db, path: {}", db.path().display());

    let pusher = PusherImpl::new(Arc::new(Pusher::new(db.clone())));
    info!("initialized pusher");

    let seeker = SeekerImpl::new(Arc::new(Seeker::new(db.clone(), config.correlator.clone())));
    info!("initialized seeker");

    let gc = Gc::new(db.clone(), &config);
    info!("initialized gc");

    info!("starting gRPC server, addr: {}", addr);

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("gc", move |handle| gc.run(handle)));
        s.start(SubsystemBuilder::new("grpc", move |handle| async move {
            Server::builder()
                .add_service(
                    PusherServer::new(pusher)
                        .max_decoding_message_size(MESSAGE_LIMIT)
                        .max_encoding_message_size(MESSAGE_LIMIT),
                )
                .add_service(
                    SeekerServer::new(seeker)
                        .max_decoding_message_size(MESSAGE_LIMIT)
                        .max_encoding_message_size(MESSAGE_LIMIT),
                )
                .serve_with_shutdown(addr, handle.on_shutdown_requested())
                .await?;

            Ok::<(), anyhow::Error>(())
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(|e| anyhow::anyhow!("worker shutdown with error: {}", e))
}

fn main() -> Result<()> {
    init_log();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(serve())?;

    Ok(())
}
