//! The synchronization engine.
//!
//! One engine instance tracks one identity provider's session. Every
//! session change begins a new *epoch*: the previous epoch's subscription
//! and in-flight queries are cancelled, the collection is cleared, and the
//! new identity (if any) is resolved, bulk-loaded and then kept live
//! through the store's insert subscription.
//!
//! All mutable state lives inside a single dispatch task. Session changes,
//! resolution results, bulk-load results and push events all enter through
//! one input channel, tagged with the epoch that issued them; anything
//! tagged with an old epoch is discarded on arrival, so a slow response can
//! never clobber a newer epoch's collection. Readers observe immutable
//! snapshots through a watch channel and never touch the collection itself.

use std::sync::Arc;

use letterbox_core::{
    Identity, IdentityProvider, Letter, LetterStore, NewLetter, Session, StoreError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::compose::{Draft, SendError};
use crate::projection::{Tab, project};
use crate::recipient::RecipientPolicy;
use crate::resolver::{Resolution, resolve_identity};

/// Capacity of the engine's input channel.
const INPUT_CAPACITY: usize = 64;

/// Where the engine stands for the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// No identity is resolved; the collection is empty.
    #[default]
    Idle,
    /// The bulk load for the resolved identity is in flight. Push events
    /// observed in the meantime are queued, not dropped.
    Loading,
    /// The collection reflects the bulk load plus every admitted push event.
    Live,
    /// The bulk load failed; the collection stays empty for this epoch.
    /// Carries the store's message. There is no automatic retry.
    LoadFailed(String),
    /// The insert feed died. The collection keeps its contents but is no
    /// longer receiving events; it is stale, not live.
    Disconnected,
}

/// A snapshot of the engine's observable state.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    /// The identity epoch this snapshot belongs to.
    pub epoch: u64,
    /// Where the engine stands within the epoch.
    pub phase: Phase,
    /// The resolved identity, if any.
    pub identity: Option<Identity>,
    /// The synchronized collection, newest first.
    pub letters: Arc<[Letter]>,
}

/// Everything that can happen to the engine, funnelled through one channel.
enum Input {
    Session(Option<Session>),
    Resolved {
        epoch: u64,
        resolution: Resolution,
    },
    Loaded {
        epoch: u64,
        outcome: Result<Vec<Letter>, StoreError>,
    },
    Arrived {
        epoch: u64,
        letter: Letter,
    },
    FeedClosed {
        epoch: u64,
    },
    Send {
        draft: Draft,
        reply: oneshot::Sender<Result<(), SendError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running synchronization engine.
///
/// Cheap to query: state reads are watch-channel borrows. Dropping the
/// handle without [`SyncEngine::close`] also shuts the engine down, just
/// without waiting for it.
pub struct SyncEngine {
    inputs: mpsc::Sender<Input>,
    state: watch::Receiver<EngineState>,
    task: JoinHandle<()>,
}

impl SyncEngine {
    /// Opens an engine against a store, an identity provider and a
    /// recipient policy.
    ///
    /// The engine immediately picks up the provider's current session and
    /// follows every subsequent session change.
    #[must_use]
    pub fn open(
        store: Arc<dyn LetterStore>,
        provider: Arc<dyn IdentityProvider>,
        recipients: Arc<dyn RecipientPolicy>,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(EngineState::default());

        // The handle owns the only strong sender; every internal producer
        // goes through a weak one. Dropping the handle therefore closes the
        // channel and the dispatch task tears itself down.
        let weak_inputs = inputs_tx.downgrade();

        // Forward the current session and every change into the input
        // channel; the dispatcher never reads the watch directly.
        let mut sessions = provider.subscribe_sessions();
        let session_inputs = weak_inputs.clone();
        tokio::spawn(async move {
            loop {
                let current = sessions.borrow_and_update().clone();
                let Some(inputs) = session_inputs.upgrade() else {
                    break;
                };
                if inputs.send(Input::Session(current)).await.is_err() {
                    break;
                }
                drop(inputs);
                if sessions.changed().await.is_err() {
                    break;
                }
            }
        });

        let dispatcher = Dispatcher {
            store,
            provider,
            recipients,
            inputs: weak_inputs,
            state: state_tx,
            epoch: 0,
            phase: Phase::Idle,
            identity: None,
            collection: Collection::new(),
            queued: Vec::new(),
            resolve_task: None,
            load_task: None,
            feed_task: None,
        };
        let task = tokio::spawn(dispatcher.run(inputs_rx));

        Self {
            inputs: inputs_tx,
            state: state_rx,
            task,
        }
    }

    /// The current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Snapshot of the synchronized collection, newest first.
    #[must_use]
    pub fn letters(&self) -> Arc<[Letter]> {
        self.state.borrow().letters.clone()
    }

    /// The tab-scoped projection for the current identity.
    ///
    /// Empty when no identity is resolved. Recomputed from the current
    /// snapshot on every call; nothing is cached across epochs.
    #[must_use]
    pub fn project(&self, tab: Tab) -> Vec<Letter> {
        let state = self.state.borrow();
        match &state.identity {
            Some(identity) => project(&state.letters, tab, identity),
            None => Vec::new(),
        }
    }

    /// Submits a new letter.
    ///
    /// A successful send only means the store accepted the insert. The
    /// letter does not appear in the collection until its insert event
    /// comes back through the subscription; the push echo is the single
    /// source of truth for visibility.
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if validation fails, no recipient resolves,
    /// or the store rejects the insert. Failure leaves the collection
    /// untouched and is not retried.
    pub async fn send(&self, draft: Draft) -> Result<(), SendError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inputs
            .send(Input::Send {
                draft,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SendError::Closed)?;
        reply_rx.await.map_err(|_| SendError::Closed)?
    }

    /// Shuts the engine down, closing the insert subscription whatever the
    /// current phase, and waits for the dispatch task to finish.
    pub async fn close(self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .inputs
            .send(Input::Close { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        let _ = self.task.await;
    }
}

/// The dispatch task's state. Exclusively owns the collection.
struct Dispatcher {
    store: Arc<dyn LetterStore>,
    provider: Arc<dyn IdentityProvider>,
    recipients: Arc<dyn RecipientPolicy>,
    inputs: mpsc::WeakSender<Input>,
    state: watch::Sender<EngineState>,
    epoch: u64,
    phase: Phase,
    identity: Option<Identity>,
    collection: Collection,
    /// Events observed while the bulk load is in flight.
    queued: Vec<Letter>,
    resolve_task: Option<JoinHandle<()>>,
    load_task: Option<JoinHandle<()>>,
    feed_task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    async fn run(mut self, mut inputs: mpsc::Receiver<Input>) {
        while let Some(input) = inputs.recv().await {
            match input {
                Input::Session(session) => self.begin_epoch(session),
                Input::Resolved { epoch, resolution } if epoch == self.epoch => {
                    self.on_resolved(resolution);
                }
                Input::Loaded { epoch, outcome } if epoch == self.epoch => {
                    self.on_loaded(outcome);
                }
                Input::Arrived { epoch, letter } if epoch == self.epoch => {
                    self.on_arrived(letter);
                }
                Input::FeedClosed { epoch } if epoch == self.epoch => self.on_feed_closed(),
                Input::Send { draft, reply } => self.on_send(draft, reply),
                Input::Close { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                }
                Input::Resolved { epoch, .. }
                | Input::Loaded { epoch, .. }
                | Input::Arrived { epoch, .. }
                | Input::FeedClosed { epoch } => {
                    debug!(epoch, current = self.epoch, "discarded event from stale epoch");
                }
            }
        }
        // Handle dropped without close(); tear down the same way.
        self.shutdown();
    }

    /// Starts a new epoch for a session-change event.
    fn begin_epoch(&mut self, session: Option<Session>) {
        self.epoch += 1;
        // Cancel the previous epoch before acting on the new one. The feed
        // receiver drops here; anything it already queued carries the old
        // epoch tag and is discarded on arrival.
        self.cancel_io();
        self.collection.clear();
        self.queued.clear();
        self.identity = None;
        self.phase = Phase::Idle;

        if let Some(session) = session {
            info!(epoch = self.epoch, user = %session.user_id, "session changed, resolving identity");
            let provider = Arc::clone(&self.provider);
            let inputs = self.inputs.clone();
            let epoch = self.epoch;
            self.resolve_task = Some(tokio::spawn(async move {
                let resolution = resolve_identity(provider.as_ref(), Some(&session)).await;
                if let Some(inputs) = inputs.upgrade() {
                    let _ = inputs.send(Input::Resolved { epoch, resolution }).await;
                }
            }));
        } else {
            info!(epoch = self.epoch, "no session, engine idle");
        }
        self.publish();
    }

    fn on_resolved(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::NoIdentity => {
                // Resolution failures degrade to a signed-out view.
                self.phase = Phase::Idle;
            }
            Resolution::Resolved(identity) => {
                info!(epoch = self.epoch, %identity, "identity resolved, loading letters");
                self.identity = Some(identity.clone());
                self.phase = Phase::Loading;

                // Subscribe before issuing the bulk query so no insert can
                // fall between them; events wait in `queued` until the bulk
                // result is installed.
                let mut feed = self.store.subscribe_inserts();
                let inputs = self.inputs.clone();
                let epoch = self.epoch;
                self.feed_task = Some(tokio::spawn(async move {
                    while let Some(letter) = feed.recv().await {
                        let Some(inputs) = inputs.upgrade() else {
                            return;
                        };
                        if inputs.send(Input::Arrived { epoch, letter }).await.is_err() {
                            return;
                        }
                    }
                    if let Some(inputs) = inputs.upgrade() {
                        let _ = inputs.send(Input::FeedClosed { epoch }).await;
                    }
                }));

                let store = Arc::clone(&self.store);
                let inputs = self.inputs.clone();
                let epoch = self.epoch;
                self.load_task = Some(tokio::spawn(async move {
                    let outcome = store.letters_for(&identity).await;
                    if let Some(inputs) = inputs.upgrade() {
                        let _ = inputs.send(Input::Loaded { epoch, outcome }).await;
                    }
                }));
            }
        }
        self.publish();
    }

    fn on_loaded(&mut self, outcome: Result<Vec<Letter>, StoreError>) {
        match outcome {
            Ok(letters) => {
                info!(epoch = self.epoch, count = letters.len(), "bulk load complete");
                self.collection.install(letters);
                // Replay events observed during the load, in arrival order.
                for letter in std::mem::take(&mut self.queued) {
                    self.collection.admit(letter);
                }
                self.phase = Phase::Live;
            }
            Err(err) => {
                warn!(epoch = self.epoch, "bulk load failed: {err}");
                self.queued.clear();
                self.phase = Phase::LoadFailed(err.to_string());
            }
        }
        self.publish();
    }

    fn on_arrived(&mut self, letter: Letter) {
        let Some(identity) = &self.identity else {
            return;
        };
        if !letter.involves(identity) {
            return;
        }

        match &self.phase {
            Phase::Loading => self.queued.push(letter),
            Phase::Live => {
                if self.collection.admit(letter) {
                    self.publish();
                }
            }
            Phase::Idle | Phase::LoadFailed(_) | Phase::Disconnected => {}
        }
    }

    fn on_feed_closed(&mut self) {
        if matches!(self.phase, Phase::Loading | Phase::Live) {
            warn!(epoch = self.epoch, "insert feed dropped; collection is no longer live");
            self.phase = Phase::Disconnected;
            self.publish();
        }
    }

    fn on_send(&mut self, draft: Draft, reply: oneshot::Sender<Result<(), SendError>>) {
        if let Some(err) = draft.validate() {
            let _ = reply.send(Err(err));
            return;
        }
        let Some(sender) = self.identity.clone() else {
            let _ = reply.send(Err(SendError::NoIdentity));
            return;
        };
        let recipient = draft
            .recipient
            .clone()
            .or_else(|| {
                self.recipients
                    .resolve(&sender, &self.collection.correspondents())
            });
        let Some(recipient) = recipient else {
            let _ = reply.send(Err(SendError::NoRecipient));
            return;
        };
        if recipient == sender {
            let _ = reply.send(Err(SendError::SelfAddressed));
            return;
        }

        debug!(%sender, %recipient, "submitting letter");
        let letter = NewLetter {
            title: draft.title,
            content: draft.content,
            date: draft.date,
            sender,
            recipient,
            is_read: false,
        };

        // The collection is not touched here. The letter becomes visible
        // only when its insert event is admitted through the subscription.
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let result = store
                .insert(letter)
                .await
                .map_err(|err| SendError::Store(err.to_string()));
            let _ = reply.send(result);
        });
    }

    fn shutdown(&mut self) {
        info!(epoch = self.epoch, "engine closing");
        self.cancel_io();
        self.collection.clear();
        self.queued.clear();
        self.identity = None;
        self.phase = Phase::Idle;
        self.publish();
    }

    fn cancel_io(&mut self) {
        for task in [
            self.resolve_task.take(),
            self.load_task.take(),
            self.feed_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    fn publish(&self) {
        let _ = self.state.send_replace(EngineState {
            epoch: self.epoch,
            phase: self.phase.clone(),
            identity: self.identity.clone(),
            letters: self.collection.snapshot(),
        });
    }
}
