//! Run one shard member from a YAML config file.

use {
    clap::{crate_description, crate_name, App, Arg},
    log::{error, info},
    shardline_consensus_net::{NodeConfig, ShardNode},
    std::{process::exit, sync::Arc},
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = App::new(crate_name!())
        .about(crate_description!())
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .takes_value(true)
                .required(true)
                .help("Node configuration file (YAML)"),
        )
        .arg(
            Arg::with_name("keypair")
                .long("keypair")
                .value_name("KEYPAIR")
                .takes_value(true)
                .help("Keypair file, overriding keypair_path from the config"),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap_or_default();
    let mut config = match NodeConfig::from_yaml_file(config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load {config_path}: {err}");
            exit(1);
        }
    };
    if let Some(keypair) = matches.value_of("keypair") {
        config.keypair_path = Some(keypair.into());
    }
    let keypair = match config.load_keypair() {
        Ok(keypair) => keypair,
        Err(err) => {
            error!("{err}");
            exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("shardNode")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to build runtime: {err}");
            exit(1);
        }
    };

    let result = runtime.block_on(async move {
        let (handle, mut join) = ShardNode::start(config, Arc::new(keypair)).await?;
        info!(
            "{} listening on {}, ctrl-c to stop",
            handle.identity(),
            handle.local_addr()
        );
        let interrupted = tokio::select! {
            _ = tokio::signal::ctrl_c() => true,
            _ = &mut join => false,
        };
        if interrupted {
            info!("interrupted, shutting down");
            handle.shutdown();
            let _ = join.await;
        } else {
            error!("node stopped unexpectedly");
        }
        info!("{} blocks committed", handle.committed_blocks().len());
        Ok::<_, shardline_consensus_net::ConsensusNetError>(())
    });
    if let Err(err) = result {
        error!("{err}");
        exit(1);
    }
}
