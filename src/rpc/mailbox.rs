use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::error::{DispatchError, Result};

/// Sender half of an endpoint's mailbox.
///
/// The mailbox is an unbounded FIFO queue; enqueuing from another task is the
/// only cross-task interaction point with an endpoint. Exactly one worker
/// drains the queue, so all state mutations behind it are linearized without
/// locking.
pub struct Mailbox<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Mailbox<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").finish_non_exhaustive()
    }
}

impl<M: Send> Mailbox<M> {
    /// Enqueue a message in arrival order. Fails once the owning endpoint has
    /// stopped and dropped its receiver.
    pub fn enqueue(&self, msg: M) -> Result<()> {
        self.tx.send(msg).map_err(|_| DispatchError::MailboxClosed)
    }

    /// Request/response helper: enqueue a message carrying a `oneshot` reply
    /// channel and await the reply under `call_timeout`.
    ///
    /// A timeout fails the returned future but does not stop the handler; the
    /// eventual reply is dropped and the caller must treat the outcome as
    /// unknown.
    pub async fn call<R>(
        &self,
        make_msg: impl FnOnce(oneshot::Sender<R>) -> M,
        call_timeout: Duration,
    ) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(make_msg(reply_tx))?;

        match timeout(call_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(DispatchError::MailboxClosed),
            Err(_) => Err(DispatchError::Timeout(call_timeout)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiver half, owned by the endpoint's worker task.
pub struct MailboxReceiver<M> {
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M> MailboxReceiver<M> {
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Stop accepting new messages while keeping already-enqueued ones
    /// available through [`try_recv`](Self::try_recv). Used to drain the
    /// queue during endpoint shutdown.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected mailbox pair.
pub fn mailbox<M>() -> (Mailbox<M>, MailboxReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Mailbox { tx }, MailboxReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let (mb, mut rx) = mailbox();
        for i in 0..100 {
            mb.enqueue(i).unwrap();
        }

        for expected in 0..100 {
            assert_eq!(rx.recv().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn enqueue_fails_after_receiver_dropped() {
        let (mb, rx) = mailbox::<u32>();
        drop(rx);
        assert!(matches!(
            mb.enqueue(1),
            Err(DispatchError::MailboxClosed)
        ));
        assert!(mb.is_closed());
    }

    #[tokio::test]
    async fn call_completes_with_handler_reply() {
        let (mb, mut rx) = mailbox::<oneshot::Sender<u32>>();

        let worker = tokio::spawn(async move {
            let reply = rx.recv().await.unwrap();
            let _ = reply.send(7);
        });

        let got = mb.call(|tx| tx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(got, 7);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn call_times_out_when_handler_never_replies() {
        let (mb, mut rx) = mailbox::<oneshot::Sender<u32>>();

        // Hold the reply channel without answering.
        let worker = tokio::spawn(async move {
            let _held = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let err = mb
            .call(|tx| tx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        worker.abort();
    }

    #[tokio::test]
    async fn close_then_drain_sees_pending_messages() {
        let (mb, mut rx) = mailbox();
        mb.enqueue("a").unwrap();
        mb.enqueue("b").unwrap();

        rx.close();
        assert!(mb.enqueue("c").is_err());

        assert_eq!(rx.try_recv(), Some("a"));
        assert_eq!(rx.try_recv(), Some("b"));
        assert_eq!(rx.try_recv(), None);
    }
}
