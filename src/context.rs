use crate::errors::NotnetsError;
use crate::metadata::Metadata;
use crate::NResult;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-call context: deadline, outgoing metadata and cancellation.
///
/// The deadline reaches the server as a `grpc-timeout` header. Locally both the
/// deadline and the cancellation token are checked before the call touches the
/// connection; a read or write already waiting on the queue is not interrupted.
#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct CallContext {
    #[get_copy = "pub"]
    deadline: Option<Instant>,
    #[get = "pub"]
    metadata: Metadata,
    #[get = "pub"]
    cancellation: CancellationToken,
}

impl CallContext {
    pub fn new() -> CallContext {
        CallContext::default()
    }

    pub fn with_timeout(self, timeout: Duration) -> CallContext {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> CallContext {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> CallContext {
        self.metadata = metadata;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> CallContext {
        self.cancellation = cancellation;
        self
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn cancel(&self) {
        self.cancellation.cancel()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time left until the deadline, zero once it passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`NotnetsError::Canceled`] or [`NotnetsError::DeadlineExceeded`] when the call must not proceed.
    pub fn check(&self) -> NResult<()> {
        if self.is_canceled() {
            return Err(NotnetsError::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Err(NotnetsError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let context = CallContext::new().with_timeout(Duration::from_millis(100));
        assert_eq!(Ok(()), context.check());
        assert_eq!(Some(Duration::from_millis(100)), context.remaining());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(Some(Duration::ZERO), context.remaining());
        assert_eq!(Err(NotnetsError::DeadlineExceeded), context.check());
    }

    #[test]
    fn cancellation_wins_over_deadline() {
        let token = CancellationToken::new();
        let context = CallContext::new()
            .with_deadline(Instant::now())
            .with_cancellation(token.clone());
        token.cancel();
        assert!(context.is_canceled());
        assert_eq!(Err(NotnetsError::Canceled), context.check());
    }
}
