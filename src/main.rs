use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use m2m_bus::{
    device::Direction,
    format::CodecKind,
    loopback::LoopbackDevice,
    pump::PumpTask,
    session::Session,
};

mod config;
mod manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => config::HalConfig::load(&path)?,
        None => config::HalConfig::default(),
    };

    let session = Arc::new(Session::new(config.format_table()?));
    session.open(CodecKind::H264, Box::new(LoopbackDevice::new()))?;
    session.configure(config.session_config())?;
    session.start()?;
    manager::add_session("default", Arc::clone(&session), true).await?;

    let pump = PumpTask::new();
    let mut stream = PumpTask::completed_stream(pump.subscribe());
    pump.start(Arc::clone(&session)).await;

    // Prime both queues: every output slot waits for a frame, every input
    // slot carries one.
    for index in 0..config.output_buffers {
        session.submit(Direction::Output, index)?;
    }
    for index in 0..config.input_buffers {
        session.submit(Direction::Input, index)?;
    }

    let cancel = CancellationToken::new();
    let mut received = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
            item = stream.next() => {
                match item {
                    Some(Some(done)) => {
                        received += 1;
                        log::info!(
                            "completed slot {}: {} bytes, flags {:#x}, ts {}ns",
                            done.index, done.bytes_used, done.flags, done.timestamp_ns
                        );
                        if received >= config.input_buffers.min(config.output_buffers) {
                            cancel.cancel();
                        }
                    }
                    Some(None) | None => {
                        log::info!("completed stream ended");
                        break;
                    }
                }
            },
        }
    }

    pump.stop();
    if let Some(session) = manager::get_session("default").await {
        session.stop();
    }
    manager::remove_session("default").await;
    Ok(())
}
