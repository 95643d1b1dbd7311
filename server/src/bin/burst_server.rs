#![deny(warnings)]

use {
    anyhow::{anyhow, Result},
    burst_server::Options,
    futures::{
        channel::mpsc::{self, Sender},
        future, FutureExt, SinkExt, StreamExt, TryFutureExt,
    },
    std::{process, sync::Arc, time::Duration},
    structopt::StructOpt,
    tokio::{fs, task, time},
    tracing::{error, info},
};

const CERT_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Restart the server whenever the TLS cert or key changes on disk.
async fn cert_loop(options: Arc<Options>, mut restart_tx: Sender<()>) -> Result<()> {
    let (cert_file, key_file) = match (&options.cert_file, &options.key_file) {
        (Some(cert_file), Some(key_file)) => (cert_file, key_file),
        _ => return Ok(()),
    };

    let mut old_cert = fs::read(cert_file).await?;
    let mut old_key = fs::read(key_file).await?;

    loop {
        time::sleep(CERT_CHECK_INTERVAL).await;

        let new_cert = fs::read(cert_file).await?;
        let new_key = fs::read(key_file).await?;

        if old_cert != new_cert || old_key != new_key {
            old_cert = new_cert;
            old_key = new_key;

            info!("cert or key changed -- restarting");
            restart_tx.send(()).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init_timed();

    let options = Arc::new(Options::from_args());

    let state = Arc::new(burst_server::open(&options).await?);

    let (restart_tx, mut restart_rx) = mpsc::channel(2);

    task::spawn(cert_loop(options.clone(), restart_tx).map_err(|e| {
        error!("cert watch error: {:?}", e);
        process::exit(-1)
    }));

    loop {
        future::select(
            burst_server::serve(&state, &options).boxed(),
            restart_rx
                .next()
                .map(|o| o.ok_or_else(|| anyhow!("unexpected end of stream"))),
        )
        .await
        .factor_first()
        .0?;
    }
}
