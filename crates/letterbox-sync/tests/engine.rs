//! Engine behavior tests against programmable mock collaborators.
//!
//! The mock store scripts bulk-load responses (including responses that
//! complete only when the test releases them) and exposes the insert feed
//! directly, so event arrival can be interleaved with loads, session
//! changes and sends in any order the scenarios need.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{broadcast, oneshot, watch};

use letterbox_core::{
    AuthError, Identity, IdentityProvider, InsertFeed, Letter, LetterId, LetterStore, NewLetter,
    Profile, Session, StoreError, UserId,
};
use letterbox_sync::{Counterpart, Draft, EngineState, Phase, SyncEngine, Tab};

/// A scripted bulk-load response.
enum Bulk {
    /// Answer immediately.
    Ready(Result<Vec<Letter>, StoreError>),
    /// Answer when the test releases the sender half.
    Held(oneshot::Receiver<Vec<Letter>>),
}

struct MockStore {
    /// Scripted bulk responses, keyed by the querying identity.
    bulks: Mutex<HashMap<String, VecDeque<Bulk>>>,
    bulk_calls: Mutex<usize>,
    feed: Mutex<Option<broadcast::Sender<Letter>>>,
    inserted: Mutex<Vec<NewLetter>>,
    reject_next: Mutex<Option<String>>,
}

impl MockStore {
    fn new() -> Arc<Self> {
        let (feed, _) = broadcast::channel(64);
        Arc::new(Self {
            bulks: Mutex::new(HashMap::new()),
            bulk_calls: Mutex::new(0),
            feed: Mutex::new(Some(feed)),
            inserted: Mutex::new(Vec::new()),
            reject_next: Mutex::new(None),
        })
    }

    fn queue_bulk(&self, identity: &str, letters: Vec<Letter>) {
        self.bulks
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_default()
            .push_back(Bulk::Ready(Ok(letters)));
    }

    fn queue_bulk_error(&self, identity: &str, message: &str) {
        self.bulks
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_default()
            .push_back(Bulk::Ready(Err(StoreError::Unavailable(message.to_string()))));
    }

    /// Queues a bulk response that blocks until the returned sender fires.
    fn queue_held_bulk(&self, identity: &str) -> oneshot::Sender<Vec<Letter>> {
        let (tx, rx) = oneshot::channel();
        self.bulks
            .lock()
            .unwrap()
            .entry(identity.to_string())
            .or_default()
            .push_back(Bulk::Held(rx));
        tx
    }

    fn reject_next_insert(&self, message: &str) {
        *self.reject_next.lock().unwrap() = Some(message.to_string());
    }

    /// Delivers a push event to every open subscription.
    fn push(&self, letter: Letter) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|feed| feed.send(letter).is_ok())
    }

    /// Drops the broadcast sender, killing every open feed.
    fn kill_feed(&self) {
        self.feed.lock().unwrap().take();
    }

    fn subscriber_count(&self) -> usize {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn inserted(&self) -> Vec<NewLetter> {
        self.inserted.lock().unwrap().clone()
    }

    fn bulk_calls(&self) -> usize {
        *self.bulk_calls.lock().unwrap()
    }
}

#[async_trait]
impl LetterStore for MockStore {
    async fn letters_for(&self, identity: &Identity) -> Result<Vec<Letter>, StoreError> {
        *self.bulk_calls.lock().unwrap() += 1;
        let next = self
            .bulks
            .lock()
            .unwrap()
            .get_mut(identity.as_str())
            .and_then(VecDeque::pop_front);
        match next {
            None => Ok(Vec::new()),
            Some(Bulk::Ready(result)) => result,
            Some(Bulk::Held(rx)) => Ok(rx.await.unwrap_or_default()),
        }
    }

    async fn insert(&self, letter: NewLetter) -> Result<(), StoreError> {
        if let Some(message) = self.reject_next.lock().unwrap().take() {
            return Err(StoreError::Rejected(message));
        }
        self.inserted.lock().unwrap().push(letter);
        Ok(())
    }

    fn subscribe_inserts(&self) -> InsertFeed {
        let guard = self.feed.lock().unwrap();
        let feed = guard.as_ref().expect("feed killed before subscribe");
        InsertFeed::new(feed.subscribe())
    }
}

struct MockProvider {
    sessions: watch::Sender<Option<Session>>,
    profiles: Mutex<HashMap<i64, Identity>>,
}

impl MockProvider {
    fn new() -> Arc<Self> {
        let (sessions, _) = watch::channel(None);
        Arc::new(Self {
            sessions,
            profiles: Mutex::new(HashMap::new()),
        })
    }

    fn with_profile(user: i64, username: &str) -> Arc<Self> {
        let provider = Self::new();
        provider
            .profiles
            .lock()
            .unwrap()
            .insert(user, Identity::from(username));
        provider
    }

    fn sign_in(&self, user: i64) {
        self.sessions.send_replace(Some(Session {
            user_id: UserId::new(user),
            email: format!("user{user}@letters.example"),
        }));
    }

    fn sign_out(&self) {
        self.sessions.send_replace(None);
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn current_session(&self) -> Option<Session> {
        self.sessions.borrow().clone()
    }

    fn subscribe_sessions(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    async fn profile(&self, user_id: UserId) -> Result<Profile, AuthError> {
        self.profiles
            .lock()
            .unwrap()
            .get(&user_id.0)
            .cloned()
            .map(|username| Profile { user_id, username })
            .ok_or(AuthError::ProfileNotFound(user_id))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sessions.send_replace(None);
        Ok(())
    }

    async fn update_password(&self, _new_password: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

fn letter(id: i64, sender: &str, recipient: &str, minute: u32) -> Letter {
    Letter {
        id: LetterId(id),
        title: format!("letter {id}"),
        content: "body".to_string(),
        date: "June 14th, 1782".to_string(),
        sender: Identity::from(sender),
        recipient: Identity::from(recipient),
        created_at: Utc.with_ymd_and_hms(1782, 6, 14, 12, minute, 0).unwrap(),
        is_read: false,
    }
}

fn open_engine(store: &Arc<MockStore>, provider: &Arc<MockProvider>) -> SyncEngine {
    SyncEngine::open(
        Arc::clone(store) as Arc<dyn LetterStore>,
        Arc::clone(provider) as Arc<dyn IdentityProvider>,
        Arc::new(Counterpart),
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<EngineState>,
    what: &str,
    predicate: impl Fn(&EngineState) -> bool,
) -> EngineState {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update();
                if predicate(&state) {
                    return state.clone();
                }
            }
            rx.changed().await.expect("engine state channel closed");
        }
    })
    .await;
    match result {
        Ok(state) => state,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

fn ids(state: &EngineState) -> Vec<i64> {
    state.letters.iter().map(|l| l.id.0).collect()
}

#[tokio::test]
async fn bulk_load_populates_collection_on_sign_in() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![
        letter(2, "Merciful", "Peter", 2),
        letter(1, "Peter", "Merciful", 1),
    ]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();

    let state = wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;
    assert_eq!(state.identity, Some(Identity::from("Peter")));
    assert_eq!(ids(&state), vec![2, 1]);

    engine.close().await;
}

#[tokio::test]
async fn push_event_is_admitted_ahead_of_bulk_letters() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![
        letter(2, "Merciful", "Peter", 2),
        letter(1, "Peter", "Merciful", 1),
    ]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    assert!(store.push(letter(3, "Merciful", "Peter", 3)));
    let state = wait_for(&mut states, "event admission", |s| s.letters.len() == 3).await;
    assert_eq!(ids(&state), vec![3, 2, 1]);

    engine.close().await;
}

#[tokio::test]
async fn duplicate_push_event_is_admitted_once() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    store.push(letter(7, "Merciful", "Peter", 1));
    store.push(letter(7, "Merciful", "Peter", 1));
    // A later distinct event proves both deliveries were processed.
    store.push(letter(8, "Merciful", "Peter", 2));

    let state = wait_for(&mut states, "sentinel admission", |s| {
        s.letters.iter().any(|l| l.id == LetterId(8))
    })
    .await;
    assert_eq!(ids(&state), vec![8, 7]);

    engine.close().await;
}

#[tokio::test]
async fn events_for_other_correspondents_are_filtered_out() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    store.push(letter(5, "Rosaline", "Benvolio", 1));
    store.push(letter(6, "Merciful", "Peter", 2));

    let state = wait_for(&mut states, "own event admission", |s| !s.letters.is_empty()).await;
    assert_eq!(ids(&state), vec![6]);

    engine.close().await;
}

#[tokio::test]
async fn events_during_bulk_load_are_queued_and_merged_after() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    let release = store.queue_held_bulk("Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "loading state", |s| s.phase == Phase::Loading).await;

    // Arrives while the bulk query is still in flight; one of them is also
    // part of the bulk result and must not be duplicated.
    assert!(store.push(letter(5, "Merciful", "Peter", 5)));
    assert!(store.push(letter(4, "Peter", "Merciful", 4)));

    release
        .send(vec![
            letter(4, "Peter", "Merciful", 4),
            letter(3, "Merciful", "Peter", 3),
        ])
        .unwrap();

    let state = wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;
    assert_eq!(ids(&state), vec![5, 4, 3]);

    engine.close().await;
}

#[tokio::test]
async fn late_bulk_result_from_previous_identity_is_discarded() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    provider
        .profiles
        .lock()
        .unwrap()
        .insert(2, Identity::from("Merciful"));

    let release_peter = store.queue_held_bulk("Peter");
    store.queue_bulk("Merciful", vec![letter(10, "Peter", "Merciful", 1)]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "first epoch loading", |s| {
        s.phase == Phase::Loading && s.identity == Some(Identity::from("Peter"))
    })
    .await;

    // Switch identities while the first bulk query is still in flight.
    provider.sign_in(2);
    wait_for(&mut states, "second epoch live", |s| {
        s.phase == Phase::Live && s.identity == Some(Identity::from("Merciful"))
    })
    .await;

    // The first epoch's query completes only now. Its result must not
    // overwrite the newer epoch's collection.
    let _ = release_peter.send(vec![letter(1, "Peter", "Merciful", 9), letter(2, "Peter", "Merciful", 8)]);

    store.push(letter(99, "Peter", "Merciful", 10));
    let state = wait_for(&mut states, "sentinel admission", |s| {
        s.letters.iter().any(|l| l.id == LetterId(99))
    })
    .await;

    assert_eq!(state.identity, Some(Identity::from("Merciful")));
    assert_eq!(ids(&state), vec![99, 10]);

    engine.close().await;
}

#[tokio::test]
async fn send_is_invisible_until_the_echo_event_arrives() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    engine
        .send(Draft::new("T", "Hello", "Jan 1").to("Merciful"))
        .await
        .unwrap();

    // The insert reached the store, but nothing is visible yet.
    let inserted = store.inserted();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].sender, Identity::from("Peter"));
    assert_eq!(inserted[0].recipient, Identity::from("Merciful"));
    assert!(!inserted[0].is_read);
    assert!(engine.letters().is_empty());

    // Only the echoed insert event makes the letter visible, exactly once.
    store.push(Letter {
        id: LetterId(42),
        title: "T".to_string(),
        content: "Hello".to_string(),
        date: "Jan 1".to_string(),
        sender: Identity::from("Peter"),
        recipient: Identity::from("Merciful"),
        created_at: Utc::now(),
        is_read: false,
    });

    let state = wait_for(&mut states, "echo admission", |s| !s.letters.is_empty()).await;
    assert_eq!(ids(&state), vec![42]);
    assert_eq!(state.letters[0].content, "Hello");

    engine.close().await;
}

#[tokio::test]
async fn counterpart_policy_derives_recipient_from_collection() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![letter(1, "Merciful", "Peter", 1)]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    engine.send(Draft::new("Re", "My reply", "Jan 2")).await.unwrap();

    let inserted = store.inserted();
    assert_eq!(inserted[0].recipient, Identity::from("Merciful"));

    engine.close().await;
}

#[tokio::test]
async fn send_without_a_resolvable_recipient_is_refused() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    // Empty correspondence: the counterpart policy has nobody to pick.
    let err = engine.send(Draft::new("T", "Hello", "Jan 1")).await.unwrap_err();
    assert_eq!(err, letterbox_sync::SendError::NoRecipient);

    let err = engine
        .send(Draft::new("T", "Hello", "Jan 1").to("Peter"))
        .await
        .unwrap_err();
    assert_eq!(err, letterbox_sync::SendError::SelfAddressed);

    let err = engine.send(Draft::new("T", "  \n ", "Jan 1")).await.unwrap_err();
    assert_eq!(err, letterbox_sync::SendError::EmptyContent);

    assert!(store.inserted().is_empty());
    engine.close().await;
}

#[tokio::test]
async fn rejected_insert_surfaces_the_store_message_and_changes_nothing() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.reject_next_insert("the postmaster refuses this letter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    let err = engine
        .send(Draft::new("T", "Hello", "Jan 1").to("Merciful"))
        .await
        .unwrap_err();
    match err {
        letterbox_sync::SendError::Store(message) => {
            assert!(message.contains("the postmaster refuses this letter"));
        }
        other => panic!("expected store error, got {other:?}"),
    }
    assert!(engine.letters().is_empty());

    engine.close().await;
}

#[tokio::test]
async fn bulk_load_failure_is_surfaced_without_retry() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk_error("Peter", "the archive is sealed");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();

    let state = wait_for(&mut states, "load failure", |s| {
        matches!(s.phase, Phase::LoadFailed(_))
    })
    .await;
    assert!(matches!(&state.phase, Phase::LoadFailed(m) if m.contains("the archive is sealed")));
    assert!(state.letters.is_empty());

    // One attempt per epoch, no automatic retry.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.bulk_calls(), 1);

    engine.close().await;
}

#[tokio::test]
async fn failed_profile_lookup_degrades_to_idle() {
    let store = MockStore::new();
    let provider = MockProvider::new(); // no profile rows at all

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();

    wait_for(&mut states, "session epoch", |s| s.epoch >= 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let state = engine.state();
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.identity, None);
    assert_eq!(store.bulk_calls(), 0);

    engine.close().await;
}

#[tokio::test]
async fn sign_out_closes_the_subscription_and_clears_the_collection() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![letter(1, "Merciful", "Peter", 1)]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;
    assert_eq!(store.subscriber_count(), 1);

    provider.sign_out();
    wait_for(&mut states, "idle state", |s| {
        s.phase == Phase::Idle && s.identity.is_none()
    })
    .await;

    // The feed closes with the epoch, and a matching event delivered after
    // logout is never admitted.
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription not closed after sign-out");

    store.push(letter(2, "Merciful", "Peter", 2));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.letters().is_empty());

    engine.close().await;
}

#[tokio::test]
async fn close_tears_down_whatever_the_phase() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    engine.close().await;

    // The aborted feed task lets go of its receiver shortly after.
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription not closed by engine close");

    let final_state = states.borrow().clone();
    assert_eq!(final_state.phase, Phase::Idle);
    assert!(final_state.letters.is_empty());
}

#[tokio::test]
async fn dead_insert_feed_is_reported_as_disconnected() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![letter(1, "Merciful", "Peter", 1)]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    store.kill_feed();
    let state = wait_for(&mut states, "disconnected state", |s| {
        s.phase == Phase::Disconnected
    })
    .await;

    // The collection keeps its contents but no longer claims to be live.
    assert_eq!(ids(&state), vec![1]);

    engine.close().await;
}

#[tokio::test]
async fn projections_follow_the_live_collection() {
    let store = MockStore::new();
    let provider = MockProvider::with_profile(1, "Peter");
    store.queue_bulk("Peter", vec![
        letter(2, "Peter", "Merciful", 2),
        letter(1, "Merciful", "Peter", 1),
    ]);

    provider.sign_in(1);
    let engine = open_engine(&store, &provider);
    let mut states = engine.subscribe();
    wait_for(&mut states, "live state", |s| s.phase == Phase::Live).await;

    let inbox = engine.project(Tab::Inbox);
    let sent = engine.project(Tab::Sent);
    assert_eq!(inbox.iter().map(|l| l.id.0).collect::<Vec<_>>(), vec![1]);
    assert_eq!(sent.iter().map(|l| l.id.0).collect::<Vec<_>>(), vec![2]);

    store.push(letter(3, "Merciful", "Peter", 3));
    wait_for(&mut states, "event admission", |s| s.letters.len() == 3).await;

    let inbox = engine.project(Tab::Inbox);
    assert_eq!(inbox.iter().map(|l| l.id.0).collect::<Vec<_>>(), vec![3, 1]);

    engine.close().await;
}
