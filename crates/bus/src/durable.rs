//! [`MessageChannel`] over any [`Broker`], with guarded reconnects.
//!
//! ## Connections
//!
//! Two sessions are in play:
//!
//! - the **command session**, shared by `publish` and every ack/reject. It
//!   lives behind one async mutex which is held across reconnect and the
//!   command itself, so a publish never races a reconnect.
//! - the **read session**, owned exclusively by the background read loop.
//!
//! A command finding its session closed, or failing with a connection error,
//! reopens it once and retries once. A second failure is returned to the
//! caller. The read loop instead reconnects until it succeeds or the channel
//! is shut down, sleeping `reconnect_interval` between attempts and reporting
//! each outcome on the notice stream.
//!
//! ## Shutdown
//!
//! `shutdown` cancels the read loop, waits for it to exit (which closes both
//! output streams), then closes the command session. A delivery the read loop
//! holds when it stops is rejected, never dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracker_core::JobDescriptor;

use crate::ack::{AckHandle, AckJob, Acknowledger};
use crate::channel::{
    ChannelConfig, ChannelError, ChannelNotice, Consumer, MalformedPolicy, MessageChannel,
};
use crate::transport::{Broker, Delivery, DeliveryTag, Session, Settlement, TransportError};

enum Command<'a> {
    Publish(&'a [u8]),
    Settle(&'a DeliveryTag, Settlement),
}

impl Command<'_> {
    async fn run<S: Session>(&self, session: &S) -> Result<(), TransportError> {
        match self {
            Command::Publish(body) => session.publish(body).await,
            Command::Settle(tag, settlement) => session.settle(tag, settlement.clone()).await,
        }
    }
}

struct Shared<B: Broker> {
    broker: B,
    config: ChannelConfig,
    commands: Mutex<Option<Arc<B::Session>>>,
    stop: CancellationToken,
}

impl<B: Broker> Shared<B> {
    async fn execute(&self, command: Command<'_>) -> Result<(), TransportError> {
        let mut slot = self.commands.lock().await;

        let current = slot.as_ref().filter(|session| session.is_open()).cloned();
        let (session, fresh) = match current {
            Some(session) => (session, false),
            None => (self.reopen(&mut slot).await?, true),
        };

        match command.run(session.as_ref()).await {
            Err(err) if err.is_connection() && !fresh => {
                warn!(error = %err, "command failed on a broken connection, reconnecting");
                let session = self.reopen(&mut slot).await?;
                command.run(session.as_ref()).await
            }
            other => other,
        }
    }

    async fn reopen(
        &self,
        slot: &mut Option<Arc<B::Session>>,
    ) -> Result<Arc<B::Session>, TransportError> {
        if self.stop.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if let Some(stale) = slot.take() {
            if let Err(err) = stale.close().await {
                debug!(error = %err, "closing stale session failed");
            }
        }
        let session = Arc::new(self.broker.open().await?);
        info!("command connection reopened");
        *slot = Some(session.clone());
        Ok(session)
    }
}

struct DeliveryAcker<B: Broker> {
    shared: Arc<Shared<B>>,
    tag: DeliveryTag,
    body: Vec<u8>,
}

#[async_trait]
impl<B: Broker> Acknowledger for DeliveryAcker<B> {
    async fn ack(&self) -> Result<(), ChannelError> {
        self.shared
            .execute(Command::Settle(&self.tag, Settlement::Ack))
            .await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), ChannelError> {
        let settlement = Settlement::Requeue {
            body: self.body.clone(),
        };
        self.shared
            .execute(Command::Settle(&self.tag, settlement))
            .await?;
        Ok(())
    }
}

/// Reconnecting channel over a [`Broker`].
pub struct DurableChannel<B: Broker> {
    shared: Arc<Shared<B>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Broker> DurableChannel<B> {
    /// Open the command session eagerly; failure here is a startup error.
    pub async fn connect(broker: B, config: ChannelConfig) -> Result<Self, ChannelError> {
        let session = broker.open().await?;
        Ok(Self {
            shared: Arc::new(Shared {
                broker,
                config,
                commands: Mutex::new(Some(Arc::new(session))),
                stop: CancellationToken::new(),
            }),
            reader: Mutex::new(None),
        })
    }

    pub fn broker(&self) -> &B {
        &self.shared.broker
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }
}

#[async_trait]
impl<B: Broker> MessageChannel for DurableChannel<B> {
    async fn publish(&self, job: &JobDescriptor) -> Result<(), ChannelError> {
        if self.shared.stop.is_cancelled() {
            return Err(ChannelError::Stopped);
        }
        let body = serde_json::to_vec(job).map_err(|e| ChannelError::Encode {
            id: job.id(),
            reason: e.to_string(),
        })?;
        self.shared.execute(Command::Publish(&body)).await?;
        debug!(job_id = %job.id(), "job published");
        Ok(())
    }

    async fn consume(&self) -> Result<Consumer, ChannelError> {
        let mut reader = self.reader.lock().await;
        if self.shared.stop.is_cancelled() {
            return Err(ChannelError::Stopped);
        }
        if reader.is_some() {
            return Err(ChannelError::AlreadyConsuming);
        }

        let session = self.shared.broker.open().await?;
        let (jobs_tx, jobs) = mpsc::channel(self.shared.config.prefetch.max(1));
        let (notices_tx, notices) = mpsc::unbounded_channel();

        let read_loop = ReadLoop {
            shared: self.shared.clone(),
            jobs: jobs_tx,
            notices: notices_tx,
        };
        *reader = Some(tokio::spawn(read_loop.run(session)));

        Ok(Consumer { jobs, notices })
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.shared.stop.cancel();

        let handle = self.reader.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "read loop terminated abnormally");
            }
        }

        let session = self.shared.commands.lock().await.take();
        if let Some(session) = session {
            session.close().await?;
        }
        info!("channel shut down");
        Ok(())
    }
}

enum Flow {
    Continue,
    Stop,
}

struct ReadLoop<B: Broker> {
    shared: Arc<Shared<B>>,
    jobs: mpsc::Sender<AckJob>,
    notices: mpsc::UnboundedSender<ChannelNotice>,
}

impl<B: Broker> ReadLoop<B> {
    async fn run(self, mut session: B::Session) {
        match session.recover().await {
            Ok(pending) => {
                if !pending.is_empty() {
                    info!(count = pending.len(), "redelivering pending messages");
                }
                for delivery in pending {
                    if let Flow::Stop = self.deliver(delivery).await {
                        self.close(&session).await;
                        return;
                    }
                }
            }
            Err(err) => self.notify(ChannelNotice::RecoveryFailed(err)),
        }

        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => break,
                fetched = session.fetch() => fetched,
            };

            match fetched {
                Ok(Some(delivery)) => {
                    if let Flow::Stop = self.deliver(delivery).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.notify(ChannelNotice::ConnectionLost(err));
                    self.close(&session).await;
                    match self.reconnect().await {
                        Some(fresh) => session = fresh,
                        None => return,
                    }
                }
            }
        }

        self.close(&session).await;
    }

    async fn reconnect(&self) -> Option<B::Session> {
        let interval = self.shared.config.reconnect_interval;
        loop {
            tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => return None,
                _ = sleep(interval) => {}
            }

            let opened = tokio::select! {
                biased;
                _ = self.shared.stop.cancelled() => return None,
                opened = self.shared.broker.open() => opened,
            };

            match opened {
                Ok(session) => {
                    self.notify(ChannelNotice::Reconnected);
                    return Some(session);
                }
                Err(err) => self.notify(ChannelNotice::ReconnectFailed(err)),
            }
        }
    }

    async fn deliver(&self, delivery: Delivery) -> Flow {
        let Delivery { tag, body } = delivery;

        let job = match serde_json::from_slice::<JobDescriptor>(&body) {
            Ok(job) => job,
            Err(err) => {
                self.malformed(tag, body, err.to_string()).await;
                return Flow::Continue;
            }
        };

        let permit = tokio::select! {
            biased;
            _ = self.shared.stop.cancelled() => None,
            permit = self.jobs.reserve() => permit.ok(),
        };

        let job_id = job.id();
        let acker = DeliveryAcker {
            shared: self.shared.clone(),
            tag,
            body,
        };
        let ack_job = AckJob::new(job, AckHandle::new(acker));

        match permit {
            Some(permit) => {
                debug!(job_id = %job_id, "job consumed");
                permit.send(ack_job);
                Flow::Continue
            }
            None => {
                if let Err(err) = ack_job.reject().await {
                    warn!(job_id = %job_id, error = %err, "cannot return undelivered job");
                }
                Flow::Stop
            }
        }
    }

    async fn malformed(&self, tag: DeliveryTag, body: Vec<u8>, error: String) {
        self.notify(ChannelNotice::Decode {
            tag: tag.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
            error: error.clone(),
        });

        let settlement = match self.shared.config.malformed {
            MalformedPolicy::Leave => return,
            MalformedPolicy::Discard => Settlement::Discard,
            MalformedPolicy::DeadLetter => Settlement::DeadLetter {
                body,
                reason: error,
            },
        };

        if let Err(error) = self.shared.execute(Command::Settle(&tag, settlement)).await {
            self.notify(ChannelNotice::SettleFailed { tag, error });
        }
    }

    async fn close(&self, session: &B::Session) {
        if let Err(err) = session.close().await {
            debug!(error = %err, "closing read session failed");
        }
    }

    fn notify(&self, notice: ChannelNotice) {
        // The receiver may already be gone during shutdown.
        let _ = self.notices.send(notice);
    }
}
