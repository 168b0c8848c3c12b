//! End-to-end turns over an in-memory store and a scripted model.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use concierge_action::intent::tool::ToolSpec;
use concierge_action::{DuplicateEcho, OperationRouter, RouterSettings, SmartRouter, CRM_TOOL_NAME};
use concierge_chat::{
    ChatError, ChatMessage, ChatService, ChatSettings, Completion, CompletionService,
    ConversationTracker, LlmError, MemoryConversationStore, ModelMessage, ToolCall, TurnPath,
    Usage,
};
use concierge_core::{
    Alert, AlertDraft, AlertPatch, CalendarEvent, CanonicalId, Contact, ContactDraft,
    ContactPatch, EntityKind, EventDraft, EventPatch, ProfilePatch, SettingsProfile, UserId,
};
use concierge_storage::{
    AlertQuery, ContactQuery, EntityStore, EventQuery, MemoryStore, StoreResult,
};

// =============================================================================
// Fakes
// =============================================================================

/// Model that replays a fixed script and counts calls.
#[derive(Default)]
struct ScriptedLlm {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    calls: Mutex<Vec<Vec<ModelMessage>>>,
    previous_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedLlm {
    fn new(script: Vec<Result<Completion, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            previous_ids: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Queue more completions, for turns whose ids depend on earlier ones.
    fn push(&self, completion: Result<Completion, LlmError>) {
        self.script.lock().unwrap().push_back(completion);
    }

    /// The previous-response reference passed with each call, in order.
    fn previous_ids(&self) -> Vec<Option<String>> {
        self.previous_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(
        &self,
        _system: &str,
        messages: &[ModelMessage],
        _tools: &[ToolSpec],
        previous_response_id: Option<&str>,
    ) -> Result<Completion, LlmError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        self.previous_ids
            .lock()
            .unwrap()
            .push(previous_response_id.map(str::to_string));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("script exhausted".to_string())))
    }
}

/// Memory store that records every delete call in order.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    deletes: Mutex<Vec<(EntityKind, CanonicalId)>>,
}

impl RecordingStore {
    fn deletes(&self) -> Vec<(EntityKind, CanonicalId)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntityStore for RecordingStore {
    async fn insert_contact(&self, user: &UserId, draft: ContactDraft) -> StoreResult<Contact> {
        self.inner.insert_contact(user, draft).await
    }
    async fn get_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Contact>> {
        self.inner.get_contact(user, id).await
    }
    async fn find_contacts(&self, user: &UserId, query: &ContactQuery) -> StoreResult<Vec<Contact>> {
        self.inner.find_contacts(user, query).await
    }
    async fn update_contact(&self, user: &UserId, id: CanonicalId, patch: &ContactPatch) -> StoreResult<Contact> {
        self.inner.update_contact(user, id, patch).await
    }
    async fn delete_contact(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.deletes.lock().unwrap().push((EntityKind::Contact, id));
        self.inner.delete_contact(user, id).await
    }
    async fn insert_event(&self, user: &UserId, draft: EventDraft) -> StoreResult<CalendarEvent> {
        self.inner.insert_event(user, draft).await
    }
    async fn get_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<CalendarEvent>> {
        self.inner.get_event(user, id).await
    }
    async fn find_events(&self, user: &UserId, query: &EventQuery) -> StoreResult<Vec<CalendarEvent>> {
        self.inner.find_events(user, query).await
    }
    async fn update_event(&self, user: &UserId, id: CanonicalId, patch: &EventPatch) -> StoreResult<CalendarEvent> {
        self.inner.update_event(user, id, patch).await
    }
    async fn delete_event(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.deletes.lock().unwrap().push((EntityKind::CalendarEvent, id));
        self.inner.delete_event(user, id).await
    }
    async fn insert_alert(&self, user: &UserId, draft: AlertDraft) -> StoreResult<Alert> {
        self.inner.insert_alert(user, draft).await
    }
    async fn get_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<Option<Alert>> {
        self.inner.get_alert(user, id).await
    }
    async fn find_alerts(&self, user: &UserId, query: &AlertQuery) -> StoreResult<Vec<Alert>> {
        self.inner.find_alerts(user, query).await
    }
    async fn update_alert(&self, user: &UserId, id: CanonicalId, patch: &AlertPatch) -> StoreResult<Alert> {
        self.inner.update_alert(user, id, patch).await
    }
    async fn delete_alert(&self, user: &UserId, id: CanonicalId) -> StoreResult<bool> {
        self.deletes.lock().unwrap().push((EntityKind::Alert, id));
        self.inner.delete_alert(user, id).await
    }
    async fn get_profile(&self, user: &UserId) -> StoreResult<Option<SettingsProfile>> {
        self.inner.get_profile(user).await
    }
    async fn upsert_profile(&self, user: &UserId, patch: &ProfilePatch) -> StoreResult<SettingsProfile> {
        self.inner.upsert_profile(user, patch).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn service(store: Arc<RecordingStore>, llm: Option<Arc<ScriptedLlm>>) -> ChatService {
    let router = Arc::new(OperationRouter::new(store, RouterSettings::default()));
    let tracker = ConversationTracker::new(Arc::new(MemoryConversationStore::new()), 30);
    ChatService::new(
        router,
        SmartRouter::new(60),
        tracker,
        llm.map(|l| l as Arc<dyn CompletionService>),
        ChatSettings::default(),
    )
}

fn user() -> UserId {
    UserId::from("user-1")
}

fn crm_call(id: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: CRM_TOOL_NAME.to_string(),
        arguments: args.to_string(),
    }
}

fn tools(calls: Vec<ToolCall>) -> Result<Completion, LlmError> {
    Ok(Completion {
        text: None,
        tool_calls: calls,
        usage: Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        },
        response_id: Some("resp-tools".to_string()),
    })
}

fn text(reply: &str) -> Result<Completion, LlmError> {
    text_with_id(reply, "resp-reply")
}

fn text_with_id(reply: &str, response_id: &str) -> Result<Completion, LlmError> {
    Ok(Completion {
        text: Some(reply.to_string()),
        tool_calls: Vec::new(),
        usage: Usage {
            prompt_tokens: 150,
            completion_tokens: 30,
            total_tokens: 180,
        },
        response_id: Some(response_id.to_string()),
    })
}

async fn jane_with(store: &RecordingStore, email: Option<&str>, company: Option<&str>, phone: Option<&str>) -> Contact {
    store
        .insert_contact(
            &user(),
            ContactDraft {
                first_name: "Jane".to_string(),
                last_name: Some("Doe".to_string()),
                email: email.map(str::to_string),
                company: company.map(str::to_string),
                phone: phone.map(str::to_string),
                ..ContactDraft::default()
            },
        )
        .await
        .unwrap()
}

async fn jane_pair(store: &RecordingStore) -> (Contact, Contact) {
    let sparse = store
        .insert_contact(
            &user(),
            ContactDraft {
                first_name: "Jane".to_string(),
                last_name: Some("Doe".to_string()),
                ..ContactDraft::default()
            },
        )
        .await
        .unwrap();
    let rich = store
        .insert_contact(
            &user(),
            ContactDraft {
                first_name: "Jane".to_string(),
                last_name: Some("Doe".to_string()),
                email: Some("jane@example.com".to_string()),
                company: Some("Acme".to_string()),
                ..ContactDraft::default()
            },
        )
        .await
        .unwrap();
    (sparse, rich)
}

// =============================================================================
// Fast path
// =============================================================================

#[tokio::test]
async fn test_fast_delete_skips_model() {
    let store = Arc::new(RecordingStore::default());
    let start = Utc::now() + Duration::days(2);
    let event = store
        .insert_event(
            &user(),
            EventDraft {
                title: "Standup".to_string(),
                description: None,
                location: None,
                start_time: start,
                end_time: Some(start + Duration::minutes(15)),
                attendees: Vec::new(),
            },
        )
        .await
        .unwrap();
    let llm = ScriptedLlm::new(Vec::new());
    let chat = service(store.clone(), Some(llm.clone()));

    let reply = chat
        .process_turn(&[ChatMessage::user(format!("delete event {}", event.id))], user(), None)
        .await
        .unwrap();

    assert_eq!(llm.call_count(), 0);
    assert_eq!(reply.metadata.path, TurnPath::Fast);
    assert!(reply.metadata.wrote);
    assert_eq!(reply.metadata.entities_written, vec![EntityKind::CalendarEvent]);
    assert_eq!(store.deletes(), vec![(EntityKind::CalendarEvent, event.id)]);
}

#[tokio::test]
async fn test_failed_fast_path_falls_back_to_model() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![text("I couldn't find that event.")]);
    let chat = service(store, Some(llm.clone()));
    let missing = CanonicalId::new_v4();

    let reply = chat
        .process_turn(&[ChatMessage::user(format!("delete event {}", missing))], user(), None)
        .await
        .unwrap();

    assert_eq!(llm.call_count(), 1);
    assert_eq!(reply.metadata.path, TurnPath::Model);
    assert_eq!(reply.reply, "I couldn't find that event.");
}

#[tokio::test]
async fn test_no_model_configured() {
    let store = Arc::new(RecordingStore::default());
    let chat = service(store, None);
    let err = chat
        .process_turn(&[ChatMessage::user("who is Jane?")], user(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Llm(LlmError::NotConfigured(_))));
}

// =============================================================================
// Model path
// =============================================================================

#[tokio::test]
async fn test_tool_calls_run_in_order_and_failures_do_not_abort() {
    let store = Arc::new(RecordingStore::default());
    let ghost = CanonicalId::new_v4();
    let llm = ScriptedLlm::new(vec![
        tools(vec![
            crm_call(
                "c1",
                json!({"operation_type": "contact", "action": "delete", "search_criteria": {"id": ghost.to_string()}}),
            ),
            crm_call(
                "c2",
                json!({"operation_type": "contact", "action": "create", "entity_data": {"first_name": "Ada", "last_name": "Lovelace"}}),
            ),
        ]),
        text("I added Ada, but the record to delete was not found."),
    ]);
    let chat = service(store.clone(), Some(llm.clone()));

    let reply = chat
        .process_turn(&[ChatMessage::user("delete the old one and add Ada Lovelace")], user(), None)
        .await
        .unwrap();

    assert_eq!(reply.metadata.tool_calls, 2);
    assert_eq!(reply.metadata.failed_tool_calls, 1);
    assert!(reply.metadata.wrote);
    assert_eq!(reply.metadata.entities_written, vec![EntityKind::Contact]);
    assert_eq!(reply.metadata.usage.total_tokens, 300);
    assert_eq!(reply.metadata.response_id.as_deref(), Some("resp-reply"));

    let found = store
        .find_contacts(
            &user(),
            &ContactQuery::FullName {
                first: "Ada".to_string(),
                last: Some("Lovelace".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    // The reply pass resumes from the tool-call response.
    assert_eq!(llm.previous_ids(), vec![None, Some("resp-tools".to_string())]);

    // The reply pass sees both tool results after the assistant call.
    let calls = llm.calls.lock().unwrap();
    let second = &calls[1];
    assert!(matches!(second[second.len() - 2], ModelMessage::Tool { .. }));
    assert!(matches!(second[second.len() - 1], ModelMessage::Tool { .. }));
}

#[tokio::test]
async fn test_reply_pass_failure_assembles_locally() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![
        tools(vec![crm_call(
            "c1",
            json!({"operation_type": "alert", "action": "create", "entity_data": {"title": "Renew passport", "priority": "high"}}),
        )]),
        Err(LlmError::Status {
            status: 503,
            message: "overloaded".to_string(),
        }),
    ]);
    let chat = service(store, Some(llm));

    let reply = chat
        .process_turn(&[ChatMessage::user("remind me to renew my passport")], user(), None)
        .await
        .unwrap();

    assert!(reply.reply.contains("Renew passport"));
    assert!(reply.metadata.wrote);
    assert_eq!(reply.metadata.response_id.as_deref(), Some("resp-tools"));
}

#[tokio::test]
async fn test_first_model_failure_is_an_error() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![Err(LlmError::Transport("refused".to_string()))]);
    let chat = service(store, Some(llm));
    let err = chat
        .process_turn(&[ChatMessage::user("list my contacts")], user(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Llm(LlmError::Transport(_))));
}

#[tokio::test]
async fn test_unparseable_tool_arguments_are_reported() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![
        tools(vec![ToolCall {
            id: "bad".to_string(),
            name: CRM_TOOL_NAME.to_string(),
            arguments: "{not json".to_string(),
        }]),
        text("Sorry, something went wrong."),
    ]);
    let chat = service(store, Some(llm));
    let reply = chat
        .process_turn(&[ChatMessage::user("do the thing")], user(), None)
        .await
        .unwrap();
    assert_eq!(reply.metadata.failed_tool_calls, 1);
    assert!(!reply.metadata.wrote);
}

// =============================================================================
// Duplicate workflow
// =============================================================================

#[tokio::test]
async fn test_analysis_echo_then_delete_next_turn() {
    let store = Arc::new(RecordingStore::default());
    let (sparse, rich) = jane_pair(&store).await;
    let llm = ScriptedLlm::new(vec![
        tools(vec![crm_call(
            "a1",
            json!({"operation_type": "duplicate_management", "action": "analyze", "search_criteria": {"search_term": "Jane Doe"}}),
        )]),
        text("You have two Jane Doe records. I recommend keeping the one with an email."),
        tools(vec![crm_call(
            "d1",
            json!({"operation_type": "duplicate_management", "action": "delete", "search_criteria": {"ids": [sparse.id.to_string()]}}),
        )]),
        text("Deleted the extra Jane Doe."),
    ]);
    let chat = service(store.clone(), Some(llm));

    let first_user = ChatMessage::user("find duplicates of Jane Doe");
    let first = chat
        .process_turn(&[first_user.clone()], user(), None)
        .await
        .unwrap();
    assert!(!first.metadata.wrote);
    let echo = format!("keep {}; consider deleting: {}", rich.id, sparse.id);
    assert!(first.reply.contains(&echo));
    assert!(store.deletes().is_empty());

    let history = vec![
        first_user,
        ChatMessage::assistant(first.reply),
        ChatMessage::user("delete the duplicates"),
    ];
    let second = chat.process_turn(&history, user(), None).await.unwrap();
    assert!(second.metadata.wrote);
    assert_eq!(store.deletes(), vec![(EntityKind::Contact, sparse.id)]);
    assert!(store.get_contact(&user(), rich.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_follows_echoed_candidates_in_order() {
    let store = Arc::new(RecordingStore::default());
    let bare = jane_with(&store, None, None, None).await;
    let low = jane_with(&store, Some("jd@old.example"), None, None).await;
    let rich = jane_with(&store, Some("jane@example.com"), Some("Acme"), Some("555-0100")).await;
    let medium = jane_with(&store, Some("jane@acme.example"), Some("Acme"), None).await;
    let llm = ScriptedLlm::new(vec![
        tools(vec![crm_call(
            "a1",
            json!({"operation_type": "duplicate_management", "action": "analyze", "search_criteria": {"search_term": "Jane Doe"}}),
        )]),
        text("There are four Jane Doe records."),
    ]);
    let chat = service(store.clone(), Some(llm.clone()));

    let first_user = ChatMessage::user("find duplicates of Jane Doe");
    let first = chat
        .process_turn(&[first_user.clone()], user(), None)
        .await
        .unwrap();
    let echoes = DuplicateEcho::parse_all(&first.reply);
    assert_eq!(echoes.len(), 1);
    let echo = &echoes[0];
    assert_eq!(echo.keep, rich.id);
    assert_eq!(echo.consider_deleting, vec![medium.id, low.id, bare.id]);

    let ids: Vec<String> = echo.consider_deleting.iter().map(|id| id.to_string()).collect();
    llm.push(tools(vec![crm_call(
        "d1",
        json!({"operation_type": "duplicate_management", "action": "delete", "search_criteria": {"ids": ids}}),
    )]));
    llm.push(text("Deleted three duplicates."));

    let history = vec![
        first_user,
        ChatMessage::assistant(first.reply.clone()),
        ChatMessage::user("delete the duplicates"),
    ];
    let second = chat.process_turn(&history, user(), None).await.unwrap();
    assert!(second.metadata.wrote);
    assert_eq!(second.metadata.failed_tool_calls, 0);

    let expected: Vec<(EntityKind, CanonicalId)> = echo
        .consider_deleting
        .iter()
        .map(|id| (EntityKind::Contact, *id))
        .collect();
    let deletes = store.deletes();
    assert_eq!(deletes, expected);
    assert_eq!(deletes.iter().map(|(_, id)| *id).collect::<HashSet<_>>().len(), 3);
    assert!(store.get_contact(&user(), rich.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_without_analysis_is_blocked() {
    let store = Arc::new(RecordingStore::default());
    let (sparse, _) = jane_pair(&store).await;
    let llm = ScriptedLlm::new(vec![
        tools(vec![crm_call(
            "d1",
            json!({"operation_type": "duplicate_management", "action": "delete", "search_criteria": {"ids": [sparse.id.to_string()]}}),
        )]),
        text("I need to analyze duplicates first."),
    ]);
    let chat = service(store.clone(), Some(llm));

    let reply = chat
        .process_turn(&[ChatMessage::user("delete jane's duplicates")], user(), None)
        .await
        .unwrap();

    assert_eq!(reply.metadata.failed_tool_calls, 1);
    assert!(!reply.metadata.wrote);
    assert!(store.deletes().is_empty());
}

#[tokio::test]
async fn test_analyze_then_delete_in_one_turn() {
    let store = Arc::new(RecordingStore::default());
    let (sparse, rich) = jane_pair(&store).await;
    let llm = ScriptedLlm::new(vec![
        tools(vec![
            crm_call(
                "a1",
                json!({"operation_type": "duplicate_management", "action": "analyze", "search_criteria": {"first_name": "Jane", "last_name": "Doe"}}),
            ),
            crm_call(
                "d1",
                json!({"operation_type": "duplicate_management", "action": "delete", "search_criteria": {"ids": [sparse.id.to_string(), rich.id.to_string()]}}),
            ),
        ]),
        text("Done."),
    ]);
    let chat = service(store.clone(), Some(llm));

    let reply = chat
        .process_turn(&[ChatMessage::user("clean up jane doe duplicates")], user(), None)
        .await
        .unwrap();

    // The kept record is not in the analysis' delete list, so the whole
    // delete call is refused.
    assert_eq!(reply.metadata.failed_tool_calls, 1);
    assert!(store.deletes().is_empty());
}

// =============================================================================
// Conversation state
// =============================================================================

#[tokio::test]
async fn test_short_conversation_resets_state() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![text("Hello!")]);
    let chat = service(store, Some(llm));
    let now = Utc::now();
    for _ in 0..5 {
        chat.tracker().touch(&user(), None, now).await.unwrap();
    }

    chat.process_turn(&[ChatMessage::user("hi")], user(), None)
        .await
        .unwrap();

    let state = chat.tracker().get_or_create(&user(), Utc::now()).await.unwrap();
    assert_eq!(state.message_count, 1);
    assert_eq!(state.last_response_id.as_deref(), Some("resp-reply"));
}

#[tokio::test]
async fn test_previous_response_reused_until_reset() {
    let store = Arc::new(RecordingStore::default());
    let llm = ScriptedLlm::new(vec![
        text_with_id("Hello!", "resp-1"),
        text_with_id("Sure.", "resp-2"),
        text_with_id("Noted.", "resp-3"),
        text_with_id("New topic.", "resp-4"),
        text_with_id("Starting over.", "resp-5"),
    ]);
    let chat = service(store, Some(llm.clone()));
    let transcript = |n: usize| -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("message {}", i))
                } else {
                    ChatMessage::assistant(format!("reply {}", i))
                }
            })
            .collect()
    };

    for n in [1, 3, 5] {
        chat.process_turn(&transcript(n), user(), None).await.unwrap();
    }
    // Three tracked turns against one inbound message: the client started over.
    chat.process_turn(&transcript(1), user(), None).await.unwrap();
    // An explicit reset also drops the reference.
    assert!(chat.reset(&user()).await.unwrap());
    chat.process_turn(&transcript(3), user(), None).await.unwrap();

    assert_eq!(
        llm.previous_ids(),
        vec![
            None,
            Some("resp-1".to_string()),
            Some("resp-2".to_string()),
            None,
            None,
        ]
    );
}

#[tokio::test]
async fn test_validation_errors() {
    let store = Arc::new(RecordingStore::default());
    let chat = service(store, Some(ScriptedLlm::new(Vec::new())));
    let err = chat
        .process_turn(&[ChatMessage::assistant("hello")], user(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::EmptyConversation));

    let long = "x".repeat(8001);
    let err = chat
        .process_turn(&[ChatMessage::user(long)], user(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::MessageTooLong(8000)));
}
