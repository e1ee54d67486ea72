//! Two-party correspondence demo.
//!
//! Seeds the two demo correspondents, replays the starter letters into the
//! shared store, then has Peter reply while both engines are live.
//!
//! Run with `cargo run --example correspondence`.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use letterbox_core::{
    Identity, LetterRepository, LetterStore, NewLetter, RegistryProvider,
};
use letterbox_sync::{Counterpart, Draft, Phase, SyncEngine, Tab};

/// The starter letters Merciful wrote in 1782.
const STARTER_LETTERS: [(&str, &str, &str); 3] = [
    (
        "The First Glimpse",
        "June 14th, 1782",
        "The days grow long without you. I find myself staring at the horizon, wondering if the wind that brushes my cheek has touched yours. Every sunset brings the promise of another dawn closer to our reunion.",
    ),
    (
        "A Midnight Thought",
        "July 2nd, 1782",
        "Each moment apart feels like an eternity. The moon shines bright tonight, and I take comfort knowing we sleep under the same sky, though separated by miles of earth and sea.",
    ),
    (
        "The Promise",
        "August 10th, 1782",
        "I shall return to you before the first snow falls. Hold fast to our memories, for they are the bridge that connects our souls until my arms can hold you once more.",
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "correspondence=info,letterbox_sync=debug,letterbox_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Arc::new(LetterRepository::in_memory().await?);

    // One provider per device; each correspondent registers and signs in.
    let peter_auth = Arc::new(RegistryProvider::in_memory().await?);
    peter_auth
        .register("peter@letters.example", "Password123!", "Peter")
        .await?;
    peter_auth
        .sign_in("peter@letters.example", "Password123!")
        .await?;

    let merciful_auth = Arc::new(RegistryProvider::in_memory().await?);
    merciful_auth
        .register("merciful@letters.example", "Password123!", "Merciful")
        .await?;
    merciful_auth
        .sign_in("merciful@letters.example", "Password123!")
        .await?;

    let peter = SyncEngine::open(
        Arc::clone(&store) as Arc<dyn LetterStore>,
        Arc::clone(&peter_auth) as _,
        Arc::new(Counterpart),
    );
    let merciful = SyncEngine::open(
        Arc::clone(&store) as Arc<dyn LetterStore>,
        Arc::clone(&merciful_auth) as _,
        Arc::new(Counterpart),
    );

    wait_until(&peter, |p| p == &Phase::Live).await;
    wait_until(&merciful, |p| p == &Phase::Live).await;
    info!("both correspondents are live");

    // Replay the starter letters straight into the store; the engines pick
    // them up through their insert subscriptions.
    for (title, date, content) in STARTER_LETTERS {
        store
            .insert(NewLetter {
                title: title.to_string(),
                content: content.to_string(),
                date: date.to_string(),
                sender: Identity::from("Merciful"),
                recipient: Identity::from("Peter"),
                is_read: false,
            })
            .await?;
    }
    wait_for_letters(&peter, 3).await;
    info!(inbox = peter.project(Tab::Inbox).len(), "Peter's shoebox is full");

    // Peter replies; the counterpart policy works out who to address.
    peter
        .send(Draft::today(
            "A Reply at Last",
            "Your letters arrived all at once,\nlike three summers in a single day.",
        ))
        .await?;

    wait_for_letters(&merciful, 4).await;
    for letter in merciful.project(Tab::Inbox) {
        info!(%letter.sender, title = %letter.title, date = %letter.date, "in Merciful's inbox");
    }

    info!(
        peter_sent = peter.project(Tab::Sent).len(),
        merciful_sent = merciful.project(Tab::Sent).len(),
        "correspondence complete"
    );

    peter.close().await;
    merciful.close().await;
    Ok(())
}

async fn wait_until(engine: &SyncEngine, ready: impl Fn(&Phase) -> bool) {
    let mut states = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready(&states.borrow_and_update().phase.clone()) {
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

async fn wait_for_letters(engine: &SyncEngine, count: usize) {
    let mut states = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while states.borrow_and_update().letters.len() < count {
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}
