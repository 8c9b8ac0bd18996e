//! The dispatcher: takes normalized inbound messages, runs each through
//! admission, access control, speech, context assembly and the provider,
//! and delivers the reply.
//!
//! Every temp file a message carries, plus every one created while handling
//! it, is owned by a [`CleanupScope`] that is released on every exit path,
//! panics included.

use crate::admission::Admission;
use crate::stage::{Outcome, Stage, StageTracker};
use parley_channels::ChannelRegistry;
use parley_context::ContextEngine;
use parley_core::access::AccessControl;
use parley_core::channel::{Channel, InboundMessage};
use parley_core::error::{ChannelError, ContextError};
use parley_core::ids::{ChatId, MessageId, UserId};
use parley_core::message::ImageRef;
use parley_core::scope::CleanupScope;
use parley_providers::{ProviderAdapter, Reply, SpeechServices};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// Sent when neither the user nor the chat is allowed.
pub const ACCESS_DENIED_NOTICE: &str = "Sorry, this AI assistant is not allowed in this conversation. Please contact the administrator for access.";

const TOO_LONG_NOTICE: &str = "Sorry, that message is too long for me to answer.";
const UNREADABLE_NOTICE: &str = "Sorry, I could not read that message.";
const UNAVAILABLE_NOTICE: &str = "Sorry, I am shutting down and cannot answer right now.";

/// `/draw <size> <description>`. Recognized so it is not sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRequest {
    pub size: String,
    pub description: String,
}

pub fn draw_request(text: &str) -> Option<DrawRequest> {
    let rest = text.trim().strip_prefix("/draw")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (size, description) = rest.trim().split_once(char::is_whitespace)?;
    let description = description.trim();
    if description.is_empty() {
        return None;
    }
    Some(DrawRequest {
        size: size.to_string(),
        description: description.to_string(),
    })
}

/// If `text` mentions `@bot`, return it with the mention removed.
pub fn strip_mention(text: &str, bot: &str) -> Option<String> {
    if bot.is_empty() {
        return None;
    }
    let (at, _) = text.match_indices('@').find(|(i, _)| {
        let end = i + 1 + bot.len();
        let name_matches = text
            .get(i + 1..end)
            .is_some_and(|name| name.eq_ignore_ascii_case(bot));
        // `@parley_botfan` is a different user
        name_matches
            && text[end..]
                .chars()
                .next()
                .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'))
    })?;
    let mut stripped = String::with_capacity(text.len());
    stripped.push_str(&text[..at]);
    stripped.push_str(&text[at + 1 + bot.len()..]);
    Some(stripped.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Read each image into memory. The files are released with the message but
/// the images stay in the chat's history. Unreadable images are dropped.
async fn load_images(message: &MessageId, paths: &[PathBuf]) -> Vec<ImageRef> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match tokio::fs::read(path).await {
            Ok(bytes) => images.push(ImageRef::new(path.clone()).with_data(bytes)),
            Err(e) => warn!(message = %message, path = %path.display(), error = %e, "Dropping unreadable image"),
        }
    }
    images
}

pub struct Dispatcher {
    channels: Arc<ChannelRegistry>,
    access: Arc<dyn AccessControl>,
    engine: Arc<ContextEngine>,
    adapter: Arc<ProviderAdapter>,
    admission: Arc<Admission>,
    speech: Option<SpeechServices>,
    workers: usize,
}

impl Dispatcher {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        access: Arc<dyn AccessControl>,
        engine: Arc<ContextEngine>,
        adapter: Arc<ProviderAdapter>,
        admission: Arc<Admission>,
    ) -> Self {
        Self {
            channels,
            access,
            engine,
            adapter,
            admission,
            speech: None,
            workers: 4,
        }
    }

    /// Enable voice input and voice replies.
    pub fn with_speech(mut self, speech: SpeechServices) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Number of worker tasks pulling from the inbound stream (at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn engine(&self) -> &Arc<ContextEngine> {
        &self.engine
    }

    pub fn admission(&self) -> &Arc<Admission> {
        &self.admission
    }

    /// Drain the merged inbound stream with a pool of workers.
    ///
    /// Each message runs in its own task so a panic is contained to that
    /// message. Returns when the stream ends.
    pub async fn run(
        self: Arc<Self>,
        rx: mpsc::Receiver<(String, Result<InboundMessage, ChannelError>)>,
    ) {
        let rx = Arc::new(Mutex::new(rx));
        info!(workers = self.workers, capacity = self.admission.capacity(), "Dispatcher started");

        let handles: Vec<_> = (0..self.workers)
            .map(|worker| {
                let rx = rx.clone();
                let this = self.clone();
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some((channel, item)) = next else {
                            break;
                        };
                        let msg = match item {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!(worker, channel = %channel, error = %e, "Channel error");
                                continue;
                            }
                        };

                        let id = msg.id.clone();
                        let task = this.clone();
                        match tokio::spawn(async move { task.handle_message(msg).await }).await {
                            Ok(outcome) => debug!(worker, message = %id, ?outcome, "Message done"),
                            Err(e) if e.is_panic() => {
                                error!(worker, message = %id, "Message handler panicked")
                            }
                            Err(e) => warn!(worker, message = %id, error = %e, "Message handler aborted"),
                        }
                    }
                    debug!(worker, "Worker exiting");
                })
            })
            .collect();

        futures::future::join_all(handles).await;
        info!("Dispatcher stopped");
    }

    /// Handle one message end to end.
    pub async fn handle_message(&self, msg: InboundMessage) -> Outcome {
        let mut stage = StageTracker::new(&msg.id);
        let InboundMessage {
            channel,
            id,
            user,
            user_name,
            chat,
            text,
            voice,
            images,
            member_count,
            bot_username,
        } = msg;

        let mut scope = CleanupScope::new();
        let voice = voice.map(|v| scope.adopt(v));
        let images: Vec<PathBuf> = images.into_iter().map(|m| scope.adopt(m)).collect();

        let outcome = match (user, chat, self.channels.get(&channel)) {
            (Some(user), Some(chat), Some(surface)) => {
                let incoming = Incoming {
                    surface: surface.as_ref(),
                    id: &id,
                    user: &user,
                    user_name: user_name.as_deref().unwrap_or("unknown"),
                    chat: &chat,
                    text,
                    voice: voice.as_deref(),
                    images,
                    is_group: member_count > 2,
                    bot_username: bot_username.as_deref(),
                };
                self.process(incoming, &mut stage, &mut scope).await
            }
            (user, chat, surface) => {
                warn!(
                    message = %id,
                    channel = %channel,
                    has_user = user.is_some(),
                    has_chat = chat.is_some(),
                    known_channel = surface.is_some(),
                    "Received unusable message, skipping"
                );
                Outcome::Skipped
            }
        };

        debug!(message = %id, stage = %stage.current(), ?outcome, "Message finished");
        scope.close();
        stage.enter(Stage::Cleaned);
        outcome
    }

    async fn process(
        &self,
        msg: Incoming<'_>,
        stage: &mut StageTracker,
        scope: &mut CleanupScope,
    ) -> Outcome {
        stage.enter(Stage::AdmissionPending);
        let guard = match self.admission.admit(msg.user).await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(message = %msg.id, error = %e, "Not admitted");
                stage.enter(Stage::Failed);
                self.notify(&msg, UNAVAILABLE_NOTICE).await;
                return Outcome::Failed(e.to_string());
            }
        };
        stage.enter(Stage::Admitted);

        let allowed = self.access.allows(msg.user, msg.chat);
        if !allowed && !msg.is_group {
            info!(user = %msg.user, chat = %msg.chat, text = ?msg.text, "Access denied");
            return self.reject(&msg, stage).await;
        }

        let transcript = match msg.voice {
            Some(path) => self.transcribe(path, scope).await,
            None => None,
        };
        let from_voice = transcript.is_some();
        let mut text = transcript.or_else(|| msg.text.clone());

        if let Some(draw) = text.as_deref().and_then(draw_request) {
            debug!(message = %msg.id, size = %draw.size, "Draw request ignored");
            return Outcome::Ignored;
        }

        if msg.is_group {
            let mention = match (text.as_deref(), msg.bot_username) {
                (Some(t), Some(bot)) => strip_mention(t, bot),
                _ => None,
            };
            match mention {
                Some(stripped) if !from_voice => text = Some(stripped),
                Some(_) => {}
                None => return Outcome::Ignored,
            }
        }

        if !allowed {
            info!(user = %msg.user, chat = %msg.chat, text = ?text, "Access denied");
            return self.reject(&msg, stage).await;
        }

        let text = text.filter(|t| !t.trim().is_empty());
        let images = load_images(msg.id, &msg.images).await;
        if text.is_none() && images.is_empty() {
            debug!(message = %msg.id, "Nothing to answer");
            return Outcome::Ignored;
        }

        info!(
            user = %msg.user_name,
            user_id = %msg.user,
            chat = %msg.chat,
            images = images.len(),
            voice = from_voice,
            "Received question"
        );

        let turn = match self.engine.prepare_turn(msg.chat, text.as_deref(), images) {
            Ok(turn) => turn,
            Err(e) => {
                warn!(message = %msg.id, error = %e, "Context assembly failed");
                stage.enter(Stage::Failed);
                drop(guard);
                let notice = match e {
                    ContextError::BudgetExceeded { .. } => TOO_LONG_NOTICE,
                    ContextError::EmptyTurn => UNREADABLE_NOTICE,
                };
                self.notify(&msg, notice).await;
                return Outcome::Failed(e.to_string());
            }
        };
        stage.enter(Stage::ContextAssembled);

        let reply = self.adapter.send(&turn.entries).await;
        stage.enter(Stage::ProviderCalled);
        if let Reply::Answered(answer) = &reply {
            self.engine.record_answer_for(msg.chat, turn.turn, answer);
        }
        drop(guard);

        let delivered = match (from_voice, text.as_deref()) {
            (true, Some(transcript)) => self.deliver_voice(&msg, reply.text(), transcript, scope).await,
            _ => msg
                .surface
                .reply_message(msg.chat, reply.text(), msg.id)
                .await,
        };

        match delivered {
            Ok(()) => {
                stage.enter(Stage::Replied);
                Outcome::Replied {
                    answered: reply.is_answer(),
                }
            }
            Err(e) => {
                error!(message = %msg.id, channel = msg.surface.name(), error = %e, "Reply delivery failed");
                stage.enter(Stage::Failed);
                Outcome::Failed(e.to_string())
            }
        }
    }

    /// Voice in, voice out. A failed transcription means no text.
    async fn transcribe(&self, voice: &Path, scope: &mut CleanupScope) -> Option<String> {
        let Some(speech) = &self.speech else {
            warn!("Voice message received but speech is not configured");
            return None;
        };

        let mp3 = match speech.transcoder.to_mp3(voice).await {
            Ok(file) => scope.adopt(file),
            Err(e) => {
                warn!(file = %voice.display(), error = %e, "Audio conversion failed");
                return None;
            }
        };

        match speech.stt.transcribe(&mp3).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                warn!("Transcription came back empty");
                None
            }
            Err(e) => {
                warn!(error = %e, "Transcription failed");
                None
            }
        }
    }

    async fn deliver_voice(
        &self,
        msg: &Incoming<'_>,
        answer: &str,
        transcript: &str,
        scope: &mut CleanupScope,
    ) -> Result<(), ChannelError> {
        msg.surface
            .quote_message(msg.chat, answer, msg.id, &format!("Transcription:\n{transcript}"))
            .await?;

        let Some(speech) = &self.speech else {
            return Ok(());
        };
        match speech.tts.synthesize(answer).await {
            Ok(file) => {
                let audio = scope.adopt(file);
                msg.surface.reply_voice(msg.chat, &audio, msg.id).await?;
                info!(user = %msg.user_name, "Voice replied");
            }
            Err(e) => error!(message = %msg.id, error = %e, "Speech synthesis failed"),
        }
        Ok(())
    }

    async fn reject(&self, msg: &Incoming<'_>, stage: &mut StageTracker) -> Outcome {
        stage.enter(Stage::Rejected);
        self.notify(msg, ACCESS_DENIED_NOTICE).await;
        Outcome::Rejected
    }

    /// Best-effort notice; failures are only logged.
    async fn notify(&self, msg: &Incoming<'_>, notice: &str) {
        if let Err(e) = msg.surface.reply_message(msg.chat, notice, msg.id).await {
            warn!(message = %msg.id, error = %e, "Could not deliver notice");
        }
    }
}

/// A message that passed the structural checks, borrowed from its parts.
struct Incoming<'a> {
    surface: &'a dyn Channel,
    id: &'a MessageId,
    user: &'a UserId,
    user_name: &'a str,
    chat: &'a ChatId,
    text: Option<String>,
    voice: Option<&'a Path>,
    images: Vec<PathBuf>,
    is_group: bool,
    bot_username: Option<&'a str>,
}
