//! Misc utilities.

use std::future::Future;

use tokio::task;

/// Runs a future when dropped.
///
/// This is used to release external resources that are
/// difficult to correctly model using ownerships, such as
/// a garbage collector lock held across an archive write.
pub struct Finally<F: Future + Send + 'static>
where
    F::Output: Send + 'static,
{
    f: Option<F>,
}

impl<F: Future + Send + 'static> Finally<F>
where
    F::Output: Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Some(f) }
    }

    /// Disarms the guard without running the future.
    pub fn cancel(mut self) {
        self.f = None;
    }
}

impl<F: Future + Send + 'static> Drop for Finally<F>
where
    F::Output: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            task::spawn(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_finally() {
        let (sender, receiver) = oneshot::channel();
        {
            let _guard = Finally::new(async move {
                let _ = sender.send(());
            });
        }
        receiver.await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let guard = Finally::new({
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        guard.cancel();
        tokio::task::yield_now().await;
        assert_eq!(0, counter.load(Ordering::SeqCst));
    }
}
