use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::connection::{ConnectionState, StateMachine};
use super::protocol::decode_frame;
use super::stats::LinkStats;
use super::transport::{Connector, RecvError, Socket};
use crate::config::LinkConfig;
use crate::dispatch::{ChannelDispatcher, DispatchOutcome, Handler};
use crate::error::{ConfigError, HandlerResult, LinkError};
use crate::event::{EventBus, LinkEvent};
use crate::outbound::{OutboundFrame, OutboundQueue, Submission};

enum Command<P> {
    Register {
        channel: String,
        params: P,
        handler: Handler<P>,
    },
    Unregister {
        channel: String,
    },
    Send(OutboundFrame),
    TakePending(oneshot::Sender<Vec<OutboundFrame>>),
}

type SharedStats = Arc<Mutex<LinkStats>>;

fn lock_stats(stats: &SharedStats) -> MutexGuard<'_, LinkStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedState = Arc<watch::Sender<ConnectionState>>;

/// Publishes `next` unless the link already reached `Closed`.
fn publish_state(state: &SharedState, next: ConnectionState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Cloneable access to a link from handlers, the debug console, or any
/// other task.
pub struct LinkHandle<P = ()> {
    commands: mpsc::UnboundedSender<Command<P>>,
    shutdown: Arc<watch::Sender<bool>>,
    state: SharedState,
    stats: SharedStats,
    events: EventBus,
}

impl<P> Clone for LinkHandle<P> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            shutdown: Arc::clone(&self.shutdown),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            events: self.events.clone(),
        }
    }
}

impl<P: Send + 'static> LinkHandle<P> {
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.commands.send(Command::Send(frame)).is_ok()
    }

    pub fn register_channel<F>(&self, channel: impl Into<String>, params: P, handler: F) -> bool
    where
        F: FnMut(&str, &Value, &P) -> HandlerResult + Send + 'static,
    {
        self.commands
            .send(Command::Register {
                channel: channel.into(),
                params,
                handler: Box::new(handler),
            })
            .is_ok()
    }

    pub fn unregister_channel(&self, channel: impl Into<String>) -> bool {
        self.commands
            .send(Command::Unregister {
                channel: channel.into(),
            })
            .is_ok()
    }

    /// Frames held while the link was down.
    pub async fn take_pending(&self) -> Vec<OutboundFrame> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::TakePending(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        // A link that never started has no driver to publish this.
        self.state.send_if_modified(|current| {
            if *current != ConnectionState::Idle {
                return false;
            }
            *current = ConnectionState::Closed;
            true
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// `false` if the link closed before reaching `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> bool {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| *s == state || s.is_terminal()).await {
            Ok(reached) => *reached == state,
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> LinkStats {
        lock_stats(&self.stats).clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

/// Connects, dispatches inbound frames, and reconnects after loss until
/// shut down.
pub struct ConnectionManager<C, P = ()> {
    handle: LinkHandle<P>,
    driver: Option<Driver<C, P>>,
    task: Option<JoinHandle<()>>,
}

impl<C: Connector, P: Send + 'static> ConnectionManager<C, P> {
    pub fn new(config: LinkConfig, connector: C) -> Result<Self, ConfigError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let state = SharedState::new(state_tx);
        let stats = SharedStats::default();
        let events = EventBus::new();

        let core = LinkCore {
            machine: StateMachine::new(),
            dispatcher: ChannelDispatcher::new(),
            queue: OutboundQueue::new(config.max_pending_outbound, config.outbound),
            events: events.clone(),
            stats: Arc::clone(&stats),
            state: Arc::clone(&state),
            reset_dedup_on_reconnect: config.reset_dedup_on_reconnect,
        };

        let driver = Driver {
            connector,
            config,
            commands: command_rx,
            shutdown: shutdown_rx,
            core,
        };

        let handle = LinkHandle {
            commands: command_tx,
            shutdown: Arc::new(shutdown_tx),
            state,
            stats,
            events,
        };

        Ok(Self {
            handle,
            driver: Some(driver),
            task: None,
        })
    }

    /// `false` if already started or shut down.
    pub fn start(&mut self) -> bool {
        let Some(mut driver) = self.driver.take() else {
            return false;
        };

        if *driver.shutdown.borrow() {
            driver.core.close();
            return false;
        }

        self.task = Some(tokio::spawn(driver.run()));
        true
    }

    pub fn register_channel<F>(&self, channel: impl Into<String>, params: P, handler: F) -> bool
    where
        F: FnMut(&str, &Value, &P) -> HandlerResult + Send + 'static,
    {
        self.handle.register_channel(channel, params, handler)
    }

    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.handle.send(frame)
    }

    pub fn shutdown(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.core.close();
        }
        self.handle.shutdown();
    }

    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Link task failed: {}", e);
            }
        }
    }

    pub fn handle(&self) -> LinkHandle<P> {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn stats(&self) -> LinkStats {
        self.handle.stats()
    }

    pub fn events(&self) -> &EventBus {
        self.handle.events()
    }
}

struct LinkCore<P> {
    machine: StateMachine,
    dispatcher: ChannelDispatcher<P>,
    queue: OutboundQueue,
    events: EventBus,
    stats: SharedStats,
    state: SharedState,
    reset_dedup_on_reconnect: bool,
}

impl<P: Send + 'static> LinkCore<P> {
    fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    fn transition(&mut self, next: ConnectionState) -> bool {
        match self.machine.transition(next) {
            Ok(_) => {
                publish_state(&self.state, next);
                true
            }
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    fn begin_attempt(&mut self) {
        if self.transition(ConnectionState::Connecting) {
            lock_stats(&self.stats).connect_attempts += 1;
            self.events.emit(LinkEvent::Connect);
        }
    }

    fn connected(&mut self) {
        let reconnected = self.machine.has_connected();
        if !self.transition(ConnectionState::Connected) {
            return;
        }
        if reconnected && self.reset_dedup_on_reconnect {
            self.dispatcher.reset_last_seen();
        }
        self.events.emit(LinkEvent::Connected);
    }

    fn disconnected(&mut self) {
        if self.transition(ConnectionState::Disconnected) {
            self.events.emit(LinkEvent::Disconnected);
        }
    }

    fn begin_reconnect_cycle(&mut self) {
        lock_stats(&self.stats).reconnect_cycles += 1;
        self.events.emit(LinkEvent::Reconnect);
    }

    fn close(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        if self.transition(ConnectionState::Closed) {
            log::info!("Link closed");
        }
    }

    fn handle_frame(&mut self, text: &str) {
        lock_stats(&self.stats).frames_received += 1;

        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                lock_stats(&self.stats).frames_malformed += 1;
                log::warn!("Dropping malformed frame: {}", e);
                return;
            }
        };

        if !frame.rejected.is_empty() {
            lock_stats(&self.stats).entries_rejected += frame.rejected.len() as u64;
            for e in &frame.rejected {
                log::warn!("Dropping frame entry: {}", e);
            }
        }

        for envelope in frame.envelopes {
            let outcome = self.dispatcher.receive(envelope);
            let mut stats = lock_stats(&self.stats);
            match outcome {
                DispatchOutcome::Delivered => stats.envelopes_dispatched += 1,
                DispatchOutcome::Duplicate => stats.duplicates_suppressed += 1,
                DispatchOutcome::Unrouted => stats.unknown_channel_drops += 1,
                DispatchOutcome::HandlerFailed => stats.handler_failures += 1,
            }
        }
    }

    async fn handle_command<S: Socket>(
        &mut self,
        command: Command<P>,
        socket: Option<&mut S>,
    ) -> Result<(), LinkError> {
        match command {
            Command::Register {
                channel,
                params,
                handler,
            } => {
                if self.dispatcher.register(channel.clone(), params, handler) {
                    log::debug!("Replaced handler for {}", channel);
                }
            }
            Command::Unregister { channel } => {
                self.dispatcher.unregister(&channel);
            }
            Command::Send(frame) => {
                let state = match socket {
                    Some(_) => self.state(),
                    None => ConnectionState::Disconnected,
                };
                match self.queue.submit(frame, state) {
                    Ok(Submission::Transmit(text)) => {
                        if let Some(socket) = socket {
                            socket.send(text).await?;
                            lock_stats(&self.stats).frames_sent += 1;
                        }
                    }
                    Ok(Submission::Queued) => {
                        lock_stats(&self.stats).frames_queued += 1;
                    }
                    Ok(Submission::Empty) => {}
                    Err(e) => log::warn!("Dropping outbound frame: {}", e),
                }
            }
            Command::TakePending(reply) => {
                let _ = reply.send(self.queue.take_pending());
            }
        }
        Ok(())
    }

    async fn replay_pending<S: Socket>(&mut self, socket: &mut S) -> Result<(), LinkError> {
        for frame in self.queue.on_connected() {
            match frame.encode() {
                Ok(text) => {
                    socket.send(text).await?;
                    lock_stats(&self.stats).frames_sent += 1;
                }
                Err(e) => log::warn!("Dropping queued frame: {}", e),
            }
        }
        Ok(())
    }
}

enum SessionEnd {
    Lost(Option<LinkError>),
    Shutdown,
}

struct Driver<C, P> {
    connector: C,
    config: LinkConfig,
    commands: mpsc::UnboundedReceiver<Command<P>>,
    shutdown: watch::Receiver<bool>,
    core: LinkCore<P>,
}

impl<C: Connector, P: Send + 'static> Driver<C, P> {
    async fn run(mut self) {
        while let Ok(command) = self.commands.try_recv() {
            let _ = self.core.handle_command::<C::Socket>(command, None).await;
        }

        let mut retry: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            self.core.begin_attempt();
            log::info!("Connecting to {}", self.config.endpoint);

            let Some(result) = self.connect().await else {
                break;
            };

            match result {
                Ok(mut socket) => {
                    retry = 0;
                    self.core.connected();
                    log::info!("Connected to {}", self.config.endpoint);

                    let end = match self.core.replay_pending(&mut socket).await {
                        Ok(()) => self.session(&mut socket).await,
                        Err(e) => SessionEnd::Lost(Some(e)),
                    };

                    match end {
                        SessionEnd::Shutdown => {
                            socket.close().await;
                            break;
                        }
                        SessionEnd::Lost(reason) => {
                            match reason {
                                Some(e) => log::warn!("Connection lost: {}", e),
                                None => log::warn!("Connection closed by peer"),
                            }
                            socket.close().await;
                            self.core.disconnected();
                        }
                    }
                }
                Err(e) => {
                    log::warn!("{}", e);
                    self.core.disconnected();
                }
            }

            if retry == 0 {
                self.core.begin_reconnect_cycle();
            }
            retry += 1;

            let delay = self.config.reconnect.delay(retry);
            log::info!("Reconnecting in {:?} (attempt {})", delay, retry);
            if !self.wait(delay).await {
                break;
            }
        }

        self.core.close();
    }

    /// `None` when shut down while connecting.
    async fn connect(&mut self) -> Option<Result<C::Socket, LinkError>> {
        let connect = self.connector.connect(&self.config.endpoint);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    if self.is_shutdown() {
                        return None;
                    }
                }
                result = &mut connect => return Some(result),
                Some(command) = self.commands.recv() => {
                    let _ = self.core.handle_command::<C::Socket>(command, None).await;
                }
            }
        }
    }

    async fn session(&mut self, socket: &mut C::Socket) -> SessionEnd {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    if self.is_shutdown() {
                        return SessionEnd::Shutdown;
                    }
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.core.handle_command(command, Some(&mut *socket)).await {
                        return SessionEnd::Lost(Some(e));
                    }
                }
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => self.core.handle_frame(&text),
                    Some(Err(RecvError::Malformed(e))) => {
                        lock_stats(&self.core.stats).frames_malformed += 1;
                        log::warn!("Dropping malformed frame: {}", e);
                    }
                    Some(Err(RecvError::Fatal(e))) => return SessionEnd::Lost(Some(e)),
                    None => return SessionEnd::Lost(None),
                },
            }
        }
    }

    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    if self.is_shutdown() {
                        return false;
                    }
                }
                _ = &mut sleep => return true,
                Some(command) = self.commands.recv() => {
                    let _ = self.core.handle_command::<C::Socket>(command, None).await;
                }
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        // A dropped sender means every handle is gone.
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }
}
