//! Delay source between deploy steps.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send>>;

pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// Real wall-clock delays.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Ignores the requested duration and only yields to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTimer;

impl Timer for ImmediateTimer {
    fn sleep(&self, _duration: Duration) -> Sleep {
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn immediate_timer_does_not_wait() {
        let start = Instant::now();
        ImmediateTimer.sleep(Duration::from_secs(3600)).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn tokio_timer_waits() {
        let start = Instant::now();
        TokioTimer.sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
