use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Drives `fut` unless `token` fires first; the future is dropped on cancel.
pub(crate) async fn run<F, T>(token: Option<&CancellationToken>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(token) = token else {
        return fut.await;
    };
    if token.is_cancelled() {
        return Err(Error::cancelled());
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::cancelled()),
        res = fut => res,
    }
}

pub(crate) fn check(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(Error::cancelled()),
        _ => Ok(()),
    }
}
