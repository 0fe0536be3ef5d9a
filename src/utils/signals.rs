//! Termination signal handling.
//!
//! [`wait_for_shutdown_signal`] resolves with the numeric identity of the
//! signal that was received, which the binary uses as its exit status.

pub const SIGINT: i32 = 2;
pub const SIGTERM: i32 = 15;

#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<i32> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let signum = tokio::select! {
        _ = sigint.recv() => SIGINT,
        _ = sigterm.recv() => SIGTERM,
    };
    Ok(signum)
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(SIGINT)
}
