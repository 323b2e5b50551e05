use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures::{channel::oneshot, pin_mut, select, FutureExt};
use parking_lot::Mutex;

use crate::{
    api::{ConversationId, Error, RealtimeDelta, RealtimeResponse},
    Config, Remote,
};

/// Receives the deltas fetched by a `RealtimePoller`
pub trait DeltaSink: Send + Sync + 'static {
    fn deliver(&self, delta: RealtimeDelta);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollerTiming {
    /// Floor for the delay the server asks for
    pub min_delay: Duration,

    /// Fetch attempts within one cycle before giving up on it
    pub attempts: u32,

    /// Wait before the second attempt of a cycle, doubled before each further one
    pub backoff: Duration,

    /// Delay used after a cycle whose attempts all failed
    pub retry_delay: Duration,
}

impl From<&Config> for PollerTiming {
    fn from(cfg: &Config) -> PollerTiming {
        PollerTiming {
            min_delay: cfg.realtime_min_delay(),
            attempts: cfg.realtime_attempts,
            backoff: cfg.realtime_backoff(),
            retry_delay: cfg.realtime_retry_delay(),
        }
    }
}

struct Running {
    ids: BTreeSet<ConversationId>,

    /// `false` once stopped; held during each delivery
    gate: Arc<Mutex<bool>>,

    // Dropping it cancels the loop
    _cancel: oneshot::Receiver<()>,
}

/// Periodically fetches realtime deltas for a set of conversations
pub struct RealtimePoller {
    remote: Remote,
    timing: PollerTiming,
    sink: Arc<dyn DeltaSink>,
    running: Mutex<Option<Running>>,
}

impl RealtimePoller {
    pub fn new(remote: Remote, timing: PollerTiming, sink: Arc<dyn DeltaSink>) -> RealtimePoller {
        RealtimePoller {
            remote,
            timing,
            sink,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Starts polling for `ids`, replacing any loop running for another set of ids
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<I>(&self, ids: I)
    where
        I: IntoIterator<Item = ConversationId>,
    {
        let ids = ids.into_iter().collect::<BTreeSet<_>>();
        let mut running = self.running.lock();
        if let Some(r) = &*running {
            if r.ids == ids {
                return;
            }
        }
        if let Some(previous) = running.take() {
            *previous.gate.lock() = false;
        }
        tracing::debug!(conversations = ?ids, "starting realtime poller");
        let gate = Arc::new(Mutex::new(true));
        let (cancel_sender, cancel) = oneshot::channel();
        tokio::spawn(run(
            self.remote.clone(),
            ids.iter().cloned().collect(),
            self.timing,
            self.sink.clone(),
            gate.clone(),
            cancel_sender,
        ));
        *running = Some(Running {
            ids,
            gate,
            _cancel: cancel,
        });
    }

    /// Stops the loop
    ///
    /// Waits for a delivery in progress to finish, and no delta is delivered once this
    /// returns.
    pub fn stop(&self) {
        if let Some(r) = self.running.lock().take() {
            *r.gate.lock() = false;
            tracing::debug!(conversations = ?r.ids, "stopped realtime poller");
        }
    }
}

impl Drop for RealtimePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fetch_with_backoff(
    remote: &Remote,
    ids: &[ConversationId],
    timing: PollerTiming,
) -> Result<RealtimeResponse, Error> {
    let mut backoff = timing.backoff;
    let mut attempt = 1;
    loop {
        match remote.fetch_realtime(ids).await {
            Ok(resp) => return Ok(resp),
            Err(err) if attempt < timing.attempts => {
                tracing::debug!(?err, attempt, ?backoff, "realtime fetch failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn run(
    remote: Remote,
    ids: Vec<ConversationId>,
    timing: PollerTiming,
    sink: Arc<dyn DeltaSink>,
    gate: Arc<Mutex<bool>>,
    mut cancel: oneshot::Sender<()>,
) {
    let mut cancellation = cancel.cancellation().fuse();
    loop {
        let fetch = fetch_with_backoff(&remote, &ids, timing).fuse();
        pin_mut!(fetch);
        let delay = select! {
            _ = cancellation => return,
            res = fetch => match res {
                Err(err) => {
                    tracing::warn!(?err, attempts = timing.attempts, "realtime fetch failed, skipping this cycle");
                    timing.retry_delay
                }
                Ok(resp) => {
                    let delay = Duration::from_millis(resp.next_fetch_delay_ms);
                    let deltas = resp.into_deltas(&ids);
                    let active = gate.lock();
                    if !*active {
                        return;
                    }
                    for d in deltas {
                        match d.validate() {
                            Ok(()) => sink.deliver(d),
                            Err(err) => tracing::warn!(
                                conversation = %d.conversation_id,
                                ?err,
                                "dropping undecodable realtime delta"
                            ),
                        }
                    }
                    std::cmp::max(delay, timing.min_delay)
                }
            },
        };
        let sleep = tokio::time::sleep(delay).fuse();
        pin_mut!(sleep);
        select! {
            _ = cancellation => return,
            _ = sleep => (),
        }
    }
}
