use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use log::info;
use tonic::transport::Server;

use crosspath_core::crosspath::mixer_server::MixerServer;
use crosspath_core::tool::{init_log, wait_for_signal, MESSAGE_LIMIT};

use crosspath_mixer::config::MixerConfig;
use crosspath_mixer::request_handler::MixerImpl;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/mixer.toml")]
    config: String,
}

async fn serve() -> Result<()> {
    let args = Args::parse();

    let config = MixerConfig::from_file(&args.config)?;
    let addr: SocketAddr = config.listen_addr.parse()?;

    let mixer = MixerImpl::new(&config)?;

    let signal = wait_for_signal();

    info!(
        "starting gRPC server, addr: {}, shards: {}",
        addr,
        config.shards.len()
    );

    Server::builder()
        .add_service(
            MixerServer::new(mixer)
                .max_decoding_message_size(MESSAGE_LIMIT)
                .max_encoding_message_size(MESSAGE_LIMIT),
        )
        .serve_with_shutdown(addr, signal)
        .await?;

    Ok(())
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
