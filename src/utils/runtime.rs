use anyhow::Result;

/// The tracker is driven by one cooperative event loop: commands, the ticker and the refresh
/// listener interleave on a single thread.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
