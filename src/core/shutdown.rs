//! # Termination signal listener.
//!
//! [`wait_for_termination`] completes when the process is asked to stop:
//! - **Unix**: `SIGINT`, `SIGTERM`, `SIGQUIT`
//! - **elsewhere**: Ctrl-C

/// Waits for a termination signal and returns its name.
///
/// Registration failures are returned as `Err`.
#[cfg(unix)]
pub(crate) async fn wait_for_termination() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_termination() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
