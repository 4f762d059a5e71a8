//! Seller inbox session
//!
//! Seller-facing controller that triages every buyer conversation for one
//! listing. Subscribes to the conversation set, tracks a selected thread (at
//! most one live thread subscription at a time), and lazily backfills missing
//! buyer display names through the identity resolver.

use crate::directory::UserDirectory;
use crate::error::ChatError;
use crate::identity::{self, Viewer};
use crate::session::FailureCounter;
use crate::store::{ChatStore, Conversation, Message};
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Seller inbox lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxPhase {
    /// Dialog closed or viewer not signed in
    Idle,
    /// Conversation list delivered; no thread loaded yet
    ListLoaded,
    /// A selected conversation's thread is live
    ThreadLoaded,
}

/// State shared between the session and its subscription tasks
struct InboxShared {
    store: ChatStore,
    directory: Arc<dyn UserDirectory>,
    phase: watch::Sender<InboxPhase>,
    conversations: watch::Sender<Vec<Conversation>>,
    messages: watch::Sender<Vec<Message>>,
    selected: Mutex<Option<String>>,
    /// buyer_id -> resolved display name, session-scoped
    names: Mutex<HashMap<String, String>>,
    /// buyer_ids already sent to backfill; each is looked up at most once
    /// per session, whether or not the lookup succeeded
    requested: Mutex<HashSet<String>>,
    thread_task: Mutex<Option<JoinHandle<()>>>,
    failures: FailureCounter,
}

/// Seller-facing inbox controller for one listing
pub struct SellerInboxSession {
    shared: Arc<InboxShared>,
    viewer: Viewer,
    listing_id: String,
    list_task: Option<JoinHandle<()>>,
}

impl SellerInboxSession {
    /// Create a session for the given viewer snapshot and listing
    pub fn new(
        store: ChatStore,
        directory: Arc<dyn UserDirectory>,
        viewer: Viewer,
        listing_id: impl Into<String>,
    ) -> Self {
        let (phase, _) = watch::channel(InboxPhase::Idle);
        let (conversations, _) = watch::channel(Vec::new());
        let (messages, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(InboxShared {
                store,
                directory,
                phase,
                conversations,
                messages,
                selected: Mutex::new(None),
                names: Mutex::new(HashMap::new()),
                requested: Mutex::new(HashSet::new()),
                thread_task: Mutex::new(None),
                failures: FailureCounter::default(),
            }),
            viewer,
            listing_id: listing_id.into(),
            list_task: None,
        }
    }

    /// Open the inbox: subscribe to the listing's conversation set
    ///
    /// With no signed-in user the session never leaves `Idle` and
    /// `AuthRequired` is returned. On the first delivered list snapshot the
    /// session becomes `ListLoaded` and the most recently active conversation
    /// is auto-selected if none is selected yet.
    pub async fn open(&mut self) -> Result<(), ChatError> {
        let Some(user) = self.viewer.user.clone() else {
            return Err(ChatError::AuthRequired(
                "sign in to view buyer messages".to_string(),
            ));
        };
        if self.list_task.is_some() {
            debug!(listing_id = %self.listing_id, "Inbox already open");
            return Ok(());
        }

        info!(
            listing_id = %self.listing_id,
            seller_id = %user.uid,
            "Opening seller inbox"
        );

        let shared = Arc::clone(&self.shared);
        let listing_id = self.listing_id.clone();
        self.list_task = Some(tokio::spawn(run_list(shared, listing_id, user.uid)));
        Ok(())
    }

    /// Select a conversation from the current list and load its thread
    ///
    /// Switching selection releases the prior thread subscription before
    /// subscribing to the new one. Selecting a conversation that is not in
    /// the current list, or the one already selected, is a no-op.
    pub async fn select(&self, conversation_id: &str) {
        let known = self
            .shared
            .conversations
            .borrow()
            .iter()
            .any(|c| c.id == conversation_id);
        if !known {
            debug!(conversation_id = %conversation_id, "Ignoring select of unknown conversation");
            return;
        }
        select_conversation(&self.shared, conversation_id.to_string()).await;
    }

    /// Send a message in the selected conversation
    ///
    /// No-op when nothing is selected or the text is blank; failures are
    /// absorbed and recorded at the failure seam.
    pub async fn send(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let Some(user) = self.viewer.user.as_ref() else {
            return;
        };
        let Some(conversation_id) = self.shared.selected.lock().await.clone() else {
            return;
        };

        if let Err(err) = self
            .shared
            .store
            .append_message(&conversation_id, &user.uid, trimmed)
            .await
        {
            self.shared.failures.record("send message", &err);
        }
    }

    /// Display label for a conversation row
    ///
    /// The stored buyer name, else the session-cached backfill result, else
    /// the raw buyer id.
    pub async fn buyer_label(&self, conversation: &Conversation) -> String {
        if let Some(name) = conversation.buyer_name.as_deref() {
            if !name.trim().is_empty() {
                return name.to_string();
            }
        }
        self.shared
            .names
            .lock()
            .await
            .get(&conversation.buyer_id)
            .cloned()
            .unwrap_or_else(|| conversation.buyer_id.clone())
    }

    /// Close the inbox: release all subscriptions and return to `Idle`
    pub async fn close(&mut self) {
        if let Some(task) = self.list_task.take() {
            task.abort();
        }
        if let Some(task) = self.shared.thread_task.lock().await.take() {
            task.abort();
        }
        *self.shared.selected.lock().await = None;
        self.shared.phase.send_replace(InboxPhase::Idle);
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> InboxPhase {
        *self.shared.phase.borrow()
    }

    /// Watch lifecycle phase changes
    pub fn watch_phase(&self) -> watch::Receiver<InboxPhase> {
        self.shared.phase.subscribe()
    }

    /// Current conversation list snapshot, most recently active first
    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.conversations.borrow().clone()
    }

    /// Watch conversation list updates
    pub fn watch_conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.shared.conversations.subscribe()
    }

    /// Current message snapshot for the selected thread
    pub fn messages(&self) -> Vec<Message> {
        self.shared.messages.borrow().clone()
    }

    /// Watch message snapshot updates for the selected thread
    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.shared.messages.subscribe()
    }

    /// Id of the currently selected conversation
    pub async fn selected(&self) -> Option<String> {
        self.shared.selected.lock().await.clone()
    }

    /// Handle to the failure seam (count of absorbed store failures)
    pub fn failures(&self) -> &FailureCounter {
        &self.shared.failures
    }
}

impl Drop for SellerInboxSession {
    fn drop(&mut self) {
        // A subscription outliving its session is a resource leak
        if let Some(task) = self.list_task.take() {
            task.abort();
        }
        if let Ok(mut slot) = self.shared.thread_task.try_lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Consume the conversation-list subscription for the lifetime of the session
async fn run_list(shared: Arc<InboxShared>, listing_id: String, seller_id: String) {
    let stream = shared.store.subscribe_conversations(&listing_id, &seller_id);
    let mut stream = pin!(stream);

    while let Some(snapshot) = stream.next().await {
        for conversation in &snapshot {
            maybe_backfill(&shared, conversation).await;
        }

        shared.conversations.send_replace(snapshot.clone());
        if *shared.phase.borrow() == InboxPhase::Idle {
            shared.phase.send_replace(InboxPhase::ListLoaded);
        }

        // Auto-select the most recently active conversation on first load
        let nothing_selected = shared.selected.lock().await.is_none();
        if nothing_selected {
            if let Some(first) = snapshot.first() {
                select_conversation(&shared, first.id.clone()).await;
            }
        }
    }
}

/// Switch the live thread subscription to `conversation_id`
async fn select_conversation(shared: &Arc<InboxShared>, conversation_id: String) {
    {
        let mut selected = shared.selected.lock().await;
        if selected.as_deref() == Some(conversation_id.as_str()) {
            return;
        }
        *selected = Some(conversation_id.clone());
    }

    // Stale thread content must not show under the new selection
    shared.messages.send_replace(Vec::new());
    if *shared.phase.borrow() == InboxPhase::ThreadLoaded {
        shared.phase.send_replace(InboxPhase::ListLoaded);
    }

    debug!(conversation_id = %conversation_id, "Selecting conversation");

    let task_shared = Arc::clone(shared);
    let handle = tokio::spawn(async move {
        let stream = task_shared.store.subscribe_messages(&conversation_id);
        let mut stream = pin!(stream);
        let mut first = true;
        while let Some(snapshot) = stream.next().await {
            task_shared.messages.send_replace(snapshot);
            if first {
                first = false;
                task_shared.phase.send_replace(InboxPhase::ThreadLoaded);
            }
        }
    });

    let mut slot = shared.thread_task.lock().await;
    if let Some(prev) = slot.replace(handle) {
        prev.abort();
    }
}

/// Fire-and-forget backfill for a conversation lacking a buyer name
///
/// Deduplicated through the session-scoped requested-set: each missing buyer
/// is looked up at most once per session. Failures are absorbed per buyer,
/// leaving the label to fall back to the raw buyer id; the next session
/// retries.
async fn maybe_backfill(shared: &Arc<InboxShared>, conversation: &Conversation) {
    if conversation.has_buyer_name() {
        return;
    }
    {
        let mut requested = shared.requested.lock().await;
        if !requested.insert(conversation.buyer_id.clone()) {
            return;
        }
    }

    let shared = Arc::clone(shared);
    let conversation = conversation.clone();
    tokio::spawn(async move {
        match identity::backfill_buyer_name(
            &shared.store,
            shared.directory.as_ref(),
            &conversation,
        )
        .await
        {
            Ok(name) => {
                shared
                    .names
                    .lock()
                    .await
                    .insert(conversation.buyer_id.clone(), name);
            }
            Err(err) => shared.failures.record("backfill buyer name", &err),
        }
    });
}
