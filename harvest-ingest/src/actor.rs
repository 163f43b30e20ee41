use anyhow::Result;
use std::marker::PhantomData;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Minimal actor trait. `Self: Sized` avoids object-safety issues when using `Context<Self>`.
#[async_trait::async_trait]
pub trait Actor: Send + Sized + 'static {
    type Msg: Send + 'static;

    /// Handle a single message. Return `Err` to stop the actor.
    async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()>;
}

/// Runtime context for an actor instance. It holds no sender, so the mailbox
/// closes once every external `Addr` is dropped.
pub struct Context<A: Actor> {
    stop: bool,
    _actor: PhantomData<fn() -> A>,
}

impl<A: Actor> Context<A> {
    /// Request a graceful stop after processing the current message.
    pub fn stop(&mut self) {
        self.stop = true;
    }
}

/// Address for sending messages to an actor.
pub struct Addr<A: Actor>(mpsc::Sender<A::Msg>);

/// Manual Clone to avoid unnecessary bounds on `A`/`A::Msg`.
impl<A: Actor> Clone for Addr<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Actor> Addr<A> {
    /// Async send; awaits backpressure. Returns the message if the actor is gone.
    ///
    /// ```
    /// # use anyhow::Result;
    /// # use async_trait::async_trait;
    /// # use harvest_ingest::actor::{self, Actor, Context};
    /// # use tokio_util::sync::CancellationToken;
    /// # struct Counter(u8);
    /// # #[async_trait]
    /// # impl Actor for Counter {
    /// #     type Msg = u8;
    /// #     async fn handle(&mut self, msg: Self::Msg, ctx: &mut Context<Self>) -> Result<()> {
    /// #         self.0 += msg;
    /// #         if self.0 >= 3 {
    /// #             ctx.stop();
    /// #         }
    /// #         Ok(())
    /// #     }
    /// # }
    /// let rt = tokio::runtime::Runtime::new().unwrap();
    /// rt.block_on(async {
    ///     let actor::ActorHandle { addr, task } =
    ///         actor::spawn_actor(Counter(0), 4, CancellationToken::new());
    ///     addr.send(1).await.unwrap();
    ///     addr.send(2).await.unwrap();
    ///     drop(addr);
    ///     task.await.unwrap().unwrap();
    /// });
    /// ```
    pub async fn send(&self, msg: A::Msg) -> std::result::Result<(), A::Msg> {
        self.0.send(msg).await.map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Handle to a running actor task.
pub struct ActorHandle<A: Actor> {
    pub addr: Addr<A>,
    pub task: JoinHandle<anyhow::Result<()>>,
}

/// Spawn an actor with a bounded mailbox.
///
/// Stop conditions:
/// - `handle` returns `Err`
/// - all senders are dropped
/// - `ctx.stop()` is called
/// - `cancel` fires
pub fn spawn_actor<A: Actor>(
    mut actor: A,
    capacity: usize,
    cancel: CancellationToken,
) -> ActorHandle<A> {
    let (tx, mut rx) = mpsc::channel::<A::Msg>(capacity.max(1));
    let addr = Addr(tx);
    let mut ctx = Context {
        stop: false,
        _actor: PhantomData,
    };

    let task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_msg = rx.recv() => match maybe_msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Err(e) = actor.handle(msg, &mut ctx).await {
                tracing::error!(target = "harvest-ingest", error = ?e, "actor returned error; stopping");
                return Err(e);
            }
            if ctx.stop {
                break;
            }
        }
        Ok(())
    });

    ActorHandle { addr, task }
}
