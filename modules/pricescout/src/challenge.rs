//! Human-in-the-loop challenge handling.
//!
//! When a search lands on a bot-check page the batch cannot make progress
//! on its own. The scout suspends on a [`ChallengeGate`] until someone
//! signals that the challenge was solved, then re-renders the same query.
//! The gate only carries the resume signal; aborting the wait is the
//! scout's job (it races the gate against its cancellation token).

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use pricescout_common::PriceScoutError;

/// Whether the browser was redirected onto a challenge page.
pub fn is_challenge(url: &str, pattern: &str) -> bool {
    !pattern.is_empty() && url.contains(pattern)
}

#[async_trait]
pub trait ChallengeGate: Send + Sync {
    /// Resolve once the challenge at `url` has been dealt with. An error
    /// means no resume signal can ever arrive.
    async fn wait_for_resolution(&self, url: &str) -> Result<(), PriceScoutError>;
}

/// Waits for the operator to press Enter on the terminal.
pub struct ConsoleGate;

#[async_trait]
impl ChallengeGate for ConsoleGate {
    async fn wait_for_resolution(&self, url: &str) -> Result<(), PriceScoutError> {
        warn!(url, "Challenge page detected. Solve it in the browser, then press Enter to resume");

        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Err(PriceScoutError::Challenge(format!(
                "stdin closed while waiting on {url}"
            )));
        }
        Ok(())
    }
}

/// Resumes when a message arrives on the paired sender. For embedding the
/// scout in something other than a terminal.
pub struct ChannelGate {
    resume: Mutex<mpsc::Receiver<()>>,
}

impl ChannelGate {
    pub fn new() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                resume: Mutex::new(rx),
            },
            tx,
        )
    }
}

#[async_trait]
impl ChallengeGate for ChannelGate {
    async fn wait_for_resolution(&self, url: &str) -> Result<(), PriceScoutError> {
        warn!(url, "Challenge page detected, waiting for resume signal");
        self.resume
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| PriceScoutError::Challenge(format!("resume channel closed on {url}")))
    }
}
