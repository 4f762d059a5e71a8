//! Buyer chat session
//!
//! Buyer-facing controller for the one conversation between the current user
//! and a listing's seller. Opening the session resolves (or idempotently
//! creates) the conversation and subscribes to its message stream; sends are
//! best-effort, with failures absorbed at the session boundary.

use crate::error::ChatError;
use crate::identity::{self, Role, Viewer};
use crate::session::FailureCounter;
use crate::store::{ChatStore, Message, MetadataPatch};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Buyer session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyerPhase {
    /// Dialog closed or viewer not signed in
    Idle,
    /// Resolving the conversation and waiting for the first snapshot
    Resolving,
    /// Thread loaded; sends accepted
    Ready,
    /// A send is in flight
    Sending,
}

/// State shared with the subscription task
struct BuyerShared {
    phase: watch::Sender<BuyerPhase>,
    messages: watch::Sender<Vec<Message>>,
    failures: FailureCounter,
}

/// Buyer-facing chat controller for one (listing, buyer) conversation
pub struct BuyerChatSession {
    store: ChatStore,
    viewer: Viewer,
    listing_id: String,
    seller_id: String,
    conversation_id: Option<String>,
    shared: Arc<BuyerShared>,
    thread_task: Option<JoinHandle<()>>,
}

impl BuyerChatSession {
    /// Create a session for the given viewer snapshot and listing context
    ///
    /// The session starts `Idle`; call [`open`](Self::open) when the dialog
    /// opens.
    pub fn new(
        store: ChatStore,
        viewer: Viewer,
        listing_id: impl Into<String>,
        seller_id: impl Into<String>,
    ) -> Self {
        let (phase, _) = watch::channel(BuyerPhase::Idle);
        let (messages, _) = watch::channel(Vec::new());
        Self {
            store,
            viewer,
            listing_id: listing_id.into(),
            seller_id: seller_id.into(),
            conversation_id: None,
            shared: Arc::new(BuyerShared {
                phase,
                messages,
                failures: FailureCounter::default(),
            }),
            thread_task: None,
        }
    }

    /// Open the dialog: resolve the conversation and subscribe to its thread
    ///
    /// With no signed-in user the session never leaves `Idle` and
    /// `AuthRequired` is returned, so the UI shows a sign-in prompt instead
    /// of a thread. A store failure while ensuring the conversation is
    /// absorbed (the session returns to `Idle`; the failure counter records
    /// it). On the first delivered snapshot the session becomes `Ready`.
    pub async fn open(&mut self) -> Result<(), ChatError> {
        let Some(user) = self.viewer.user.clone() else {
            return Err(ChatError::AuthRequired(
                "sign in to message the seller".to_string(),
            ));
        };
        if self.thread_task.is_some() {
            debug!(listing_id = %self.listing_id, "Session already open");
            return Ok(());
        }

        self.shared.phase.send_replace(BuyerPhase::Resolving);

        let buyer_name = identity::resolve_display_name(&self.viewer, Role::Buyer);
        let conversation = match self
            .store
            .ensure_conversation(&self.listing_id, &user.uid, &self.seller_id, &buyer_name)
            .await
        {
            Ok(conversation) => conversation,
            Err(err) => {
                self.shared.failures.record("ensure conversation", &err);
                self.shared.phase.send_replace(BuyerPhase::Idle);
                return Ok(());
            }
        };

        let conversation_id = conversation.id;
        info!(
            conversation_id = %conversation_id,
            listing_id = %self.listing_id,
            "Buyer session resolved conversation"
        );

        let stream = self.store.subscribe_messages(&conversation_id);
        self.conversation_id = Some(conversation_id);

        let shared = Arc::clone(&self.shared);
        self.thread_task = Some(tokio::spawn(async move {
            let mut stream = pin!(stream);
            let mut first = true;
            while let Some(snapshot) = stream.next().await {
                shared.messages.send_replace(snapshot);
                if first {
                    first = false;
                    shared.phase.send_replace(BuyerPhase::Ready);
                }
            }
        }));

        Ok(())
    }

    /// Send a message to the seller
    ///
    /// No-op when the text is blank or the session is not `Ready`. The send
    /// transitions through `Sending` and returns to `Ready` regardless of
    /// outcome; failures are absorbed and recorded. After a successful
    /// append, the resolved buyer name is re-asserted on the conversation in
    /// case it was missing at creation.
    pub async fn send(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let Some(user) = self.viewer.user.as_ref() else {
            return;
        };
        let Some(conversation_id) = self.conversation_id.as_deref() else {
            return;
        };
        if *self.shared.phase.borrow() != BuyerPhase::Ready {
            return;
        }

        self.shared.phase.send_replace(BuyerPhase::Sending);

        match self
            .store
            .append_message(conversation_id, &user.uid, trimmed)
            .await
        {
            Ok(_) => {
                let buyer_name = identity::resolve_display_name(&self.viewer, Role::Buyer);
                if let Err(err) = self
                    .store
                    .patch_metadata(conversation_id, MetadataPatch::buyer_name(buyer_name))
                    .await
                {
                    self.shared.failures.record("patch buyer name", &err);
                }
            }
            Err(err) => self.shared.failures.record("send message", &err),
        }

        self.shared.phase.send_replace(BuyerPhase::Ready);
    }

    /// Close the dialog: release the thread subscription and return to `Idle`
    pub fn close(&mut self) {
        if let Some(task) = self.thread_task.take() {
            task.abort();
        }
        self.conversation_id = None;
        self.shared.phase.send_replace(BuyerPhase::Idle);
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> BuyerPhase {
        *self.shared.phase.borrow()
    }

    /// Watch lifecycle phase changes
    pub fn watch_phase(&self) -> watch::Receiver<BuyerPhase> {
        self.shared.phase.subscribe()
    }

    /// Current message snapshot
    pub fn messages(&self) -> Vec<Message> {
        self.shared.messages.borrow().clone()
    }

    /// Watch message snapshot updates
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.messages.subscribe()
    }

    /// The resolved conversation id, once the session has opened
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Handle to the failure seam (count of absorbed store failures)
    pub fn failures(&self) -> &FailureCounter {
        &self.shared.failures
    }
}

impl Drop for BuyerChatSession {
    fn drop(&mut self) {
        // A subscription outliving its session is a resource leak
        if let Some(task) = self.thread_task.take() {
            task.abort();
        }
    }
}
