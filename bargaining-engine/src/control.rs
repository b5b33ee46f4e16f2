use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests cancellation of running negotiation. Cancellation is observed
/// at round boundaries only.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (sender, receiver) = watch::channel(false);
    (
        CancelHandle {
            sender: Arc::new(sender),
        },
        CancelToken { receiver },
    )
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl CancelToken {
    /// Token that is never cancelled.
    pub fn never() -> CancelToken {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Limits applied by asynchronous round driver.
#[derive(Clone, Debug)]
pub struct RoundControl {
    pub cancel: CancelToken,
    pub round_timeout: Duration,
}

impl RoundControl {
    pub fn new(cancel: CancelToken, round_timeout: Duration) -> RoundControl {
        RoundControl {
            cancel,
            round_timeout,
        }
    }
}

impl Default for RoundControl {
    fn default() -> Self {
        RoundControl {
            cancel: CancelToken::never(),
            round_timeout: DEFAULT_ROUND_TIMEOUT,
        }
    }
}
