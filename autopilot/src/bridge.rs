//! Pending-question bridge between the running agent and a single human.
//!
//! At most one question is active at a time; further requests queue in FIFO
//! order. Submitting an answer resolves the active request and promotes the
//! next one. Subscribers are told about every change of the active question
//! after the change has committed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::core::types::{Question, QuestionResponse};

/// Snapshot of a question awaiting an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    /// Identifier of the tool call or turn that asked.
    pub owner_id: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("question for {0} was withdrawn before it was answered")]
    Withdrawn(String),
}

type Listener = Arc<dyn Fn(Option<&PendingQuestion>) + Send + Sync>;

struct Entry {
    question: PendingQuestion,
    resolver: oneshot::Sender<QuestionResponse>,
}

#[derive(Default)]
struct BridgeState {
    active: Option<Entry>,
    queue: VecDeque<Entry>,
}

impl BridgeState {
    fn promote_next(&mut self) {
        self.active = self.queue.pop_front();
    }

    fn snapshot(&self) -> Option<PendingQuestion> {
        self.active.as_ref().map(|entry| entry.question.clone())
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Single-active FIFO queue of human questions.
#[derive(Default)]
pub struct PendingQuestionBridge {
    state: Mutex<BridgeState>,
    listeners: Arc<Mutex<Listeners>>,
    // Serializes deliveries; reentrant so listeners may call back into the bridge.
    dispatch: ReentrantMutex<()>,
}

impl std::fmt::Debug for PendingQuestionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PendingQuestionBridge")
            .field("active", &state.active.as_ref().map(|e| &e.question.owner_id))
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl PendingQuestionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a question and return a future for its answer.
    ///
    /// The question is enqueued before this returns, so FIFO order follows
    /// call order rather than poll order.
    pub fn request(
        &self,
        owner_id: impl Into<String>,
        questions: Vec<Question>,
    ) -> impl Future<Output = Result<QuestionResponse, BridgeError>> + Send + 'static {
        let owner_id = owner_id.into();
        let (resolver, answer) = oneshot::channel();
        let entry = Entry {
            question: PendingQuestion {
                owner_id: owner_id.clone(),
                questions,
            },
            resolver,
        };

        let became_active = {
            let mut state = self.state.lock();
            if state.active.is_none() {
                state.active = Some(entry);
                true
            } else {
                state.queue.push_back(entry);
                false
            }
        };
        debug!(owner_id = %owner_id, became_active, "question requested");
        if became_active {
            self.notify();
        }

        async move { answer.await.map_err(|_| BridgeError::Withdrawn(owner_id)) }
    }

    /// Answer the active question. Returns `false` (and does nothing) when no
    /// question is active.
    pub fn submit(&self, response: QuestionResponse) -> bool {
        let answered = {
            let mut state = self.state.lock();
            let Some(entry) = state.active.take() else {
                return false;
            };
            // The requester may have gone away; the queue still advances.
            let _ = entry.resolver.send(response);
            state.promote_next();
            entry.question.owner_id
        };
        info!(owner_id = %answered, "question answered");
        self.notify();
        true
    }

    /// Drop every question owned by `owner_id`, active or queued.
    ///
    /// Their requesters resolve with [`BridgeError::Withdrawn`].
    pub fn withdraw(&self, owner_id: &str) -> bool {
        let (removed, active_changed) = {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.retain(|entry| entry.question.owner_id != owner_id);
            let mut removed = before - state.queue.len();
            let active_matches = state
                .active
                .as_ref()
                .is_some_and(|entry| entry.question.owner_id == owner_id);
            if active_matches {
                state.active = None;
                state.promote_next();
                removed += 1;
            }
            (removed, active_matches)
        };
        if removed > 0 {
            debug!(owner_id, removed, "questions withdrawn");
        }
        if active_changed {
            self.notify();
        }
        removed > 0
    }

    pub fn get_active(&self) -> Option<PendingQuestion> {
        self.state.lock().snapshot()
    }

    /// Number of questions waiting behind the active one.
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Register `listener`; it is invoked immediately with the current active
    /// question and again after every change. Dropping the returned handle
    /// does not unsubscribe; call [`Subscription::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&PendingQuestion>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let _dispatch = self.dispatch.lock();
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::clone(&listener)));
            id
        };
        let current = self.get_active();
        listener(current.as_ref());
        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    fn notify(&self) {
        let _dispatch = self.dispatch.lock();
        // Read the state at delivery time so the last delivery is never stale.
        let current = self.get_active();
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(current.as_ref());
        }
    }
}

/// Handle returned by [`PendingQuestionBridge::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    listeners: Weak<Mutex<Listeners>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Build a response from a line of human input.
///
/// Answers for several questions are separated by `;`. A number selects the
/// matching option (1-based); comma-separated numbers select several options
/// when the question allows it. Anything else is taken verbatim.
pub fn answer_from_text(pending: &PendingQuestion, text: &str) -> QuestionResponse {
    let mut parts = text.split(';').map(str::trim);
    let mut answers = serde_json::Map::new();
    for question in &pending.questions {
        let part = parts.next().unwrap_or_default();
        answers.insert(question.text.clone(), Value::String(resolve_choice(question, part)));
    }
    json!({ "answers": answers })
}

fn resolve_choice(question: &Question, part: &str) -> String {
    let pick = |token: &str| {
        token
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| question.options.get(i))
            .map(|option| option.label.clone())
    };
    if question.allow_multiple && part.contains(',') {
        let picked: Option<Vec<String>> = part.split(',').map(pick).collect();
        if let Some(labels) = picked {
            return labels.join(", ");
        }
    }
    pick(part).unwrap_or_else(|| part.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::QuestionOption;

    fn question(text: &str) -> Vec<Question> {
        vec![Question {
            text: text.to_string(),
            options: Vec::new(),
            allow_multiple: false,
        }]
    }

    fn active_owner(bridge: &PendingQuestionBridge) -> Option<String> {
        bridge.get_active().map(|q| q.owner_id)
    }

    #[tokio::test]
    async fn requests_are_answered_in_fifo_order() {
        let bridge = PendingQuestionBridge::new();
        let a = bridge.request("A", question("first?"));
        let b = bridge.request("B", question("second?"));
        assert_eq!(active_owner(&bridge).as_deref(), Some("A"));
        assert_eq!(bridge.queued(), 1);

        assert!(bridge.submit(json!("one")));
        assert_eq!(a.await, Ok(json!("one")));
        assert_eq!(active_owner(&bridge).as_deref(), Some("B"));

        let c = bridge.request("C", question("third?"));
        assert_eq!(active_owner(&bridge).as_deref(), Some("B"), "queued B precedes C");

        assert!(bridge.submit(json!("two")));
        assert_eq!(b.await, Ok(json!("two")));
        assert_eq!(active_owner(&bridge).as_deref(), Some("C"));

        assert!(bridge.submit(json!("three")));
        assert_eq!(c.await, Ok(json!("three")));
        assert_eq!(bridge.get_active(), None);
    }

    #[test]
    fn submit_without_active_question_is_a_no_op() {
        let bridge = PendingQuestionBridge::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = Arc::clone(&calls);
        let _sub = bridge.subscribe(move |_| *calls_clone.lock() += 1);

        assert!(!bridge.submit(json!("ignored")));
        assert_eq!(*calls.lock(), 1, "only the initial delivery");
        assert_eq!(bridge.get_active(), None);
    }

    #[test]
    fn subscribers_see_every_transition_after_commit() {
        let bridge = Arc::new(PendingQuestionBridge::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let observed = Arc::downgrade(&bridge);
        let _sub = bridge.subscribe(move |active| {
            let owner = active.map(|q| q.owner_id.clone());
            // State is already committed when the listener runs.
            if let Some(bridge) = observed.upgrade() {
                assert_eq!(bridge.get_active().map(|q| q.owner_id), owner);
            }
            seen_clone.lock().push(owner);
        });

        let _a = bridge.request("A", question("first?"));
        let _b = bridge.request("B", question("second?"));
        bridge.submit(json!(1));
        bridge.submit(json!(2));

        assert_eq!(
            *seen.lock(),
            vec![
                None,
                Some("A".to_string()),
                Some("B".to_string()),
                None,
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_deliveries() {
        let bridge = PendingQuestionBridge::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = Arc::clone(&calls);
        let sub = bridge.subscribe(move |_| *calls_clone.lock() += 1);
        sub.unsubscribe();

        let _a = bridge.request("A", question("first?"));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn withdraw_rejects_requester_and_promotes_next() {
        let bridge = PendingQuestionBridge::new();
        let a = bridge.request("A", question("first?"));
        let b = bridge.request("B", question("second?"));

        assert!(bridge.withdraw("A"));
        assert_eq!(a.await, Err(BridgeError::Withdrawn("A".to_string())));
        assert_eq!(active_owner(&bridge).as_deref(), Some("B"));
        assert!(!bridge.withdraw("A"));

        bridge.submit(json!("ok"));
        assert_eq!(b.await, Ok(json!("ok")));
    }

    #[test]
    fn listener_may_answer_reentrantly() {
        let bridge = Arc::new(PendingQuestionBridge::new());
        let weak = Arc::downgrade(&bridge);
        let _sub = bridge.subscribe(move |active| {
            if active.is_some_and(|q| q.owner_id == "auto")
                && let Some(bridge) = weak.upgrade()
            {
                bridge.submit(json!("auto-answer"));
            }
        });

        let _answer = bridge.request("auto", question("skip?"));
        assert_eq!(bridge.get_active(), None);
    }

    #[test]
    fn text_answers_resolve_option_numbers() {
        let pending = PendingQuestion {
            owner_id: "q1".to_string(),
            questions: vec![
                Question {
                    text: "Store?".to_string(),
                    options: vec![
                        QuestionOption {
                            label: "postgres".to_string(),
                        },
                        QuestionOption {
                            label: "sqlite".to_string(),
                        },
                    ],
                    allow_multiple: true,
                },
                Question {
                    text: "Name?".to_string(),
                    options: Vec::new(),
                    allow_multiple: false,
                },
            ],
        };

        assert_eq!(
            answer_from_text(&pending, "2; search-v2"),
            json!({"answers": {"Store?": "sqlite", "Name?": "search-v2"}})
        );
        assert_eq!(
            answer_from_text(&pending, "1,2"),
            json!({"answers": {"Store?": "postgres, sqlite", "Name?": ""}})
        );
        assert_eq!(
            answer_from_text(&pending, "9"),
            json!({"answers": {"Store?": "9", "Name?": ""}})
        );
    }
}
