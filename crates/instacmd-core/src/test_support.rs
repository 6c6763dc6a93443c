//! Shared fixtures for the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use instacmd_script::{Capabilities, CompiledSnippet, Owners, ScriptRuntime, SnippetCompiler};
use instacmd_storage::SnippetStorage;
use instacmd_types::{Attachment, InboundMessage, OutboundMessage, SnippetKind};

use crate::conversation::{Conversation, ConversationError};
use crate::dispatcher::Dispatcher;
use crate::lifecycle::{ConfirmReplace, InstantCommands};

/// Runtime with prefix `!` and owner `1`.
pub fn runtime() -> (ScriptRuntime, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let caps = Capabilities {
        prefix: "!".into(),
        owners: Owners::new(["1"]),
        outbound: tx,
    };
    (ScriptRuntime::new(caps, None), rx)
}

pub fn compile(runtime: &ScriptRuntime, source: &str) -> CompiledSnippet {
    SnippetCompiler::new(runtime.clone(), None)
        .compile(source)
        .unwrap()
}

/// A message in channel `42`.
pub fn message(author_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        message_id: "100".into(),
        channel_id: "42".into(),
        guild_id: Some("7".into()),
        author_id: author_id.into(),
        author_name: format!("user{author_id}"),
        content: content.into(),
        attachments: Vec::new(),
        timestamp: 0,
    }
}

/// Manager over an in-memory store and a dispatcher with dev mode on.
pub fn manager() -> (
    InstantCommands,
    Arc<Dispatcher>,
    mpsc::UnboundedReceiver<OutboundMessage>,
) {
    let (runtime, rx) = runtime();
    let dispatcher = Arc::new(Dispatcher::new(runtime.clone(), true));
    let storage = SnippetStorage::open_in_memory().unwrap();
    let compiler = SnippetCompiler::new(runtime, None);
    let manager = InstantCommands::new(storage, compiler, dispatcher.clone());
    (manager, dispatcher, rx)
}

/// Fixed answer to replacement prompts, counting how often it was asked.
pub struct Answer {
    reply: bool,
    asked: AtomicUsize,
}

impl Answer {
    pub fn yes() -> Self {
        Self {
            reply: true,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn no() -> Self {
        Self {
            reply: false,
            asked: AtomicUsize::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmReplace for Answer {
    async fn confirm_replace(&self, _kind: SnippetKind, _name: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.reply
    }
}

/// Scripted conversation. Unanswered questions and missing follow-ups wait
/// out their full timeout.
pub struct FakeConversation {
    message: InboundMessage,
    said: Mutex<Vec<String>>,
    answers: Mutex<VecDeque<Option<bool>>>,
    followups: Mutex<VecDeque<InboundMessage>>,
    files: HashMap<String, Vec<u8>>,
    deny_reactions: bool,
}

impl FakeConversation {
    pub fn new(message: InboundMessage) -> Self {
        Self {
            message,
            said: Mutex::new(Vec::new()),
            answers: Mutex::new(VecDeque::new()),
            followups: Mutex::new(VecDeque::new()),
            files: HashMap::new(),
            deny_reactions: false,
        }
    }

    pub fn with_answer(self, answer: Option<bool>) -> Self {
        self.answers.lock().unwrap().push_back(answer);
        self
    }

    pub fn with_followup(self, message: InboundMessage) -> Self {
        self.followups.lock().unwrap().push_back(message);
        self
    }

    pub fn with_file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), bytes);
        self
    }

    pub fn deny_reactions(mut self) -> Self {
        self.deny_reactions = true;
        self
    }

    pub fn said(&self) -> Vec<String> {
        self.said.lock().unwrap().clone()
    }
}

#[async_trait]
impl Conversation for FakeConversation {
    fn message(&self) -> &InboundMessage {
        &self.message
    }

    async fn say(&self, text: &str) -> Result<(), ConversationError> {
        self.said.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn say_paged(&self, text: &str) -> Result<(), ConversationError> {
        self.say(text).await
    }

    async fn say_code(&self, code: &str, language: &str) -> Result<(), ConversationError> {
        self.say(&format!("```{language}\n{code}\n```")).await
    }

    async fn ask_yes_no(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<bool>, ConversationError> {
        if self.deny_reactions {
            return Err(ConversationError::MissingPermissions("Add reactions".into()));
        }
        self.say(prompt).await?;
        let answer = self.answers.lock().unwrap().pop_front();
        match answer {
            Some(answer) => Ok(answer),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn next_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, ConversationError> {
        let next = self.followups.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }

    async fn read_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ConversationError> {
        self.files
            .get(&attachment.url)
            .cloned()
            .ok_or_else(|| ConversationError::Transport(format!("no file at {}", attachment.url)))
    }
}
