use std::sync::Arc;

use futures::StreamExt;
use m2m_bus::{
    device::Direction,
    format::{CodecKind, FormatTable},
    loopback::LoopbackDevice,
    pump::PumpTask,
    session::{Session, SessionConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let session = Arc::new(Session::new(FormatTable::default()));
    session.open(CodecKind::H264, Box::new(LoopbackDevice::new()))?;
    session.configure(SessionConfig::new(1920, 1080).with_buffers(4, 4))?;
    session.start()?;

    let pump = PumpTask::new();
    let mut stream = PumpTask::completed_stream(pump.subscribe());
    pump.start(Arc::clone(&session)).await;

    for index in 0..4 {
        session.submit(Direction::Output, index)?;
        session.submit(Direction::Input, index)?;
    }

    let mut received = 0;
    while received < 4 {
        match stream.next().await {
            Some(Some(done)) => {
                println!(
                    "completed: slot {}, {} bytes, flags {:#x}, ts {}ns",
                    done.index, done.bytes_used, done.flags, done.timestamp_ns
                );
                received += 1;
            }
            Some(None) | None => break,
        }
    }

    pump.stop();
    session.stop();
    session.close();
    Ok(())
}
