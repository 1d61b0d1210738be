use std::thread;

use tracing::warn;

/// Run one callback on its own thread so the reader loop never waits on it.
pub(crate) fn spawn_callback<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(err) = thread::Builder::new()
        .name("tlj-callback".to_string())
        .spawn(f)
    {
        warn!(error = %err, "failed to spawn callback thread; callback skipped");
    }
}
