//! The flow engine: session bookkeeping and state advancement.
//!
//! Sessions are keyed by (scope, flow) where the scope is the sender's person
//! handle, or the room for room flows. Work for one sender runs on its own
//! lane of the engine's private [`WorkerPool`], so messages from one person
//! are processed in arrival order while different people advance
//! independently. Each session additionally holds an async turn lock, which
//! serializes room flows that several people can advance at once.
//!
//! Processing a message:
//!
//! 1. Live sessions of the sender (or the sender's room) are offered the
//!    message; the first transition that matches advances its session.
//! 2. Otherwise flow entry triggers are checked in registration order. A
//!    matching flow with a live session is resumed (its hints are repeated);
//!    a flow without one gets a new session in its initial state, and the
//!    same message is then offered to that initial state.
//!
//! Entering a state runs its action, then follows eager (`When`/`Auto`)
//! transitions up to `max_auto_advances` times. Terminal states end the
//! session. Failures end the session and are reported to its owner.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::{Mutex as TurnLock, OwnedMutexGuard, oneshot};
use tokio::time::Instant;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use super::{FlowDefinition, FlowScope, FlowVars};
use crate::command::CommandParser;
use crate::error::{FlowError, FlowResult, PoolError};
use crate::pool::{WorkerPool, panic_message};
use natter_core::{Address, BoxedMessenger, Identifier, Message};

// =============================================================================
// Public types
// =============================================================================

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub workers: usize,
    pub backlog: usize,
    /// Consecutive eager transitions allowed per trigger.
    pub max_auto_advances: usize,
    /// Sessions idle for longer than this are dropped.
    pub session_timeout: Option<Duration>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            workers: WorkerPool::default_workers(),
            backlog: 256,
            max_auto_advances: 32,
            session_timeout: None,
        }
    }
}

/// Public view of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub flow: String,
    pub owner: Identifier,
    pub state: String,
    /// Set for room flows.
    pub room: Option<String>,
}

/// Public view of a registered flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSummary {
    pub name: String,
    pub description: String,
    pub room_flow: bool,
    pub entry_commands: Vec<String>,
    pub owner: Option<String>,
}

/// Resolves to whether the flow engine consumed a message.
///
/// The verdict is known as soon as a session is chosen, before any state
/// action runs; [`finished`](Self::finished) also waits for the actions.
#[derive(Debug)]
pub struct FlowTicket {
    verdict: Option<oneshot::Receiver<bool>>,
    done: Option<oneshot::Receiver<()>>,
}

impl FlowTicket {
    fn ignored() -> Self {
        FlowTicket {
            verdict: None,
            done: None,
        }
    }

    /// `true` once a session advances, starts or resumes on the message.
    pub async fn handled(self) -> bool {
        match self.verdict {
            Some(rx) => rx.await.unwrap_or(false),
            None => false,
        }
    }

    /// Like [`handled`](Self::handled), but returns only after the
    /// triggered actions have run.
    pub async fn finished(mut self) -> bool {
        let done = self.done.take();
        let handled = self.handled().await;
        if let Some(done) = done {
            let _ = done.await;
        }
        handled
    }
}

/// Sends the consume decision of one trigger once; `false` if dropped
/// undecided.
struct Verdict(Option<oneshot::Sender<bool>>);

impl Verdict {
    fn consumed(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(true);
        }
    }
}

impl Drop for Verdict {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(false);
        }
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Scope {
    Person(String),
    Room(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    scope: Scope,
    flow: String,
}

impl SessionKey {
    fn new(definition: &FlowDefinition, who: &Identifier) -> Self {
        let scope = match who.room() {
            Some(room) if definition.is_room_flow() => Scope::Room(room.to_owned()),
            _ => Scope::Person(who.person().to_owned()),
        };
        Self {
            scope,
            flow: definition.name().to_owned(),
        }
    }
}

struct Session {
    id: u64,
    key: SessionKey,
    definition: Arc<FlowDefinition>,
    owner: Identifier,
    vars: FlowVars,
    state: Mutex<String>,
    last_active: Mutex<Instant>,
    closed: AtomicBool,
    turn: Arc<TurnLock<()>>,
}

impl Session {
    fn state(&self) -> String {
        self.state.lock().clone()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            flow: self.key.flow.clone(),
            owner: self.owner.clone(),
            state: self.state(),
            room: match &self.key.scope {
                Scope::Room(room) => Some(room.clone()),
                Scope::Person(_) => None,
            },
        }
    }
}

enum Opened {
    New(Arc<Session>, OwnedMutexGuard<()>),
    Existing(Arc<Session>),
}

// =============================================================================
// FlowEngine
// =============================================================================

struct Registered {
    definition: Arc<FlowDefinition>,
    owner: Option<String>,
}

struct Inner {
    definitions: RwLock<Vec<Registered>>,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    pool: WorkerPool,
    messenger: BoxedMessenger,
    parser: Arc<CommandParser>,
    options: FlowOptions,
    next_id: AtomicU64,
}

/// Coordinates flow sessions. Cheap to clone.
#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<Inner>,
}

impl FlowEngine {
    pub fn new(messenger: BoxedMessenger, parser: Arc<CommandParser>, options: FlowOptions) -> Self {
        let pool = WorkerPool::new("flows", options.workers, options.backlog);
        Self {
            inner: Arc::new(Inner {
                definitions: RwLock::new(Vec::new()),
                sessions: Mutex::new(HashMap::new()),
                pool,
                messenger,
                parser,
                options,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    // ─── Definitions ─────────────────────────────────────────────────────────

    /// Registers a flow. Names are unique across all owners.
    pub fn register(&self, definition: FlowDefinition, owner: Option<&str>) -> FlowResult<()> {
        let mut definitions = self.inner.definitions.write();
        if definitions
            .iter()
            .any(|r| r.definition.name() == definition.name())
        {
            return Err(FlowError::DuplicateFlow(definition.name().to_owned()));
        }
        info!(flow = %definition.name(), owner = ?owner, "Flow registered");
        definitions.push(Registered {
            definition: Arc::new(definition),
            owner: owner.map(str::to_owned),
        });
        Ok(())
    }

    /// Removes every flow owned by `owner` and ends their sessions.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let removed: Vec<String> = {
            let mut definitions = self.inner.definitions.write();
            let (gone, kept) = std::mem::take(&mut *definitions)
                .into_iter()
                .partition::<Vec<_>, _>(|r| r.owner.as_deref() == Some(owner));
            *definitions = kept;
            gone.into_iter()
                .map(|r| r.definition.name().to_owned())
                .collect()
        };
        if !removed.is_empty() {
            let mut sessions = self.inner.sessions.lock();
            sessions.retain(|key, session| {
                let keep = !removed.contains(&key.flow);
                if !keep {
                    session.closed.store(true, Ordering::SeqCst);
                }
                keep
            });
            debug!(owner = %owner, flows = ?removed, "Flows unregistered");
        }
        removed.len()
    }

    pub fn definitions(&self) -> Vec<FlowSummary> {
        self.inner
            .definitions
            .read()
            .iter()
            .map(|r| FlowSummary {
                name: r.definition.name().to_owned(),
                description: r.definition.description().to_owned(),
                room_flow: r.definition.is_room_flow(),
                entry_commands: r
                    .definition
                    .entry()
                    .iter()
                    .filter_map(|t| t.command_text())
                    .collect(),
                owner: r.owner.clone(),
            })
            .collect()
    }

    fn definition(&self, name: &str) -> Option<Arc<FlowDefinition>> {
        self.inner
            .definitions
            .read()
            .iter()
            .find(|r| r.definition.name() == name)
            .map(|r| Arc::clone(&r.definition))
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    /// Live sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.prune_expired();
        let mut sessions: Vec<SessionInfo> = self
            .inner
            .sessions
            .lock()
            .values()
            .map(|s| s.info())
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Live sessions `who` can advance.
    pub fn sessions_for(&self, who: &Identifier) -> Vec<SessionInfo> {
        self.candidates(who).iter().map(|s| s.info()).collect()
    }

    /// Offers `message` to the engine. Processing happens on the sender's
    /// lane of the flow pool; the ticket reports whether it was consumed.
    pub async fn trigger(&self, message: &Message) -> Result<FlowTicket, PoolError> {
        if self.inner.definitions.read().is_empty() {
            return Ok(FlowTicket::ignored());
        }
        let (verdict_tx, verdict) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();
        let engine = self.clone();
        let message = message.clone();
        let lane = message.frm.person().to_owned();
        self.inner
            .pool
            .submit_laned(lane, "flow trigger", async move {
                engine.process(message, Verdict(Some(verdict_tx))).await;
                let _ = done_tx.send(());
                Ok(())
            })
            .await?;
        Ok(FlowTicket {
            verdict: Some(verdict),
            done: Some(done),
        })
    }

    /// Starts `flow` for `requestor` explicitly, returning the session id.
    pub async fn start(
        &self,
        flow: &str,
        requestor: &Identifier,
        vars: Map<String, Value>,
        origin: Option<Message>,
    ) -> FlowResult<u64> {
        let definition = self
            .definition(flow)
            .ok_or_else(|| FlowError::UnknownFlow(flow.to_owned()))?;
        match self.open(&definition, requestor, FlowVars::from_map(vars)).await {
            Opened::Existing(_) => Err(FlowError::AlreadyRunning {
                flow: flow.to_owned(),
                owner: requestor.to_string(),
            }),
            Opened::New(session, _turn) => {
                let initial = definition.initial().to_owned();
                self.advance(&session, initial, origin, false).await?;
                Ok(session.id)
            }
        }
    }

    /// Ends the session of `flow` that `who` owns (or whose room owns it).
    pub fn stop(&self, flow: &str, who: &Identifier) -> bool {
        let mut scopes = vec![Scope::Person(who.person().to_owned())];
        if let Some(room) = who.room() {
            scopes.push(Scope::Room(room.to_owned()));
        }
        let mut sessions = self.inner.sessions.lock();
        for scope in scopes {
            let key = SessionKey {
                scope,
                flow: flow.to_owned(),
            };
            if let Some(session) = sessions.remove(&key) {
                session.closed.store(true, Ordering::SeqCst);
                info!(flow = %flow, session = session.id, "Flow session stopped");
                return true;
            }
        }
        false
    }

    /// Stops accepting triggers.
    pub fn close(&self) {
        self.inner.pool.close();
    }

    /// Waits for in-flight flow work to finish.
    pub async fn join(&self) {
        self.inner.pool.join().await;
    }

    // ─── Processing ──────────────────────────────────────────────────────────

    async fn process(&self, message: Message, mut verdict: Verdict) {
        self.prune_expired();
        let text = self.inner.parser.command_text(&message).to_owned();

        for session in self.candidates(&message.frm) {
            let _turn = session.turn.lock().await;
            if session.is_closed() {
                continue;
            }
            let Some(target) = self.matching_transition(&session, &text, &message) else {
                continue;
            };
            session.touch();
            verdict.consumed();
            let _ = self
                .advance(&session, target, Some(message.clone()), false)
                .await;
            return;
        }

        let definitions: Vec<Arc<FlowDefinition>> = self
            .inner
            .definitions
            .read()
            .iter()
            .map(|r| Arc::clone(&r.definition))
            .collect();
        let empty = FlowVars::default();

        for definition in definitions {
            if !definition
                .entry()
                .iter()
                .any(|t| t.matches_message(&text, &message, &empty))
            {
                continue;
            }
            match self.open(&definition, &message.frm, FlowVars::default()).await {
                Opened::Existing(session) => {
                    let _turn = session.turn.lock().await;
                    if session.is_closed() {
                        continue;
                    }
                    debug!(flow = %definition.name(), session = session.id, "Flow resumed");
                    session.touch();
                    verdict.consumed();
                    self.hint(&session, Some(&message)).await;
                }
                Opened::New(session, _turn) => {
                    verdict.consumed();
                    // The message that opened the session is also offered to
                    // the initial state, so `yes` can both start and answer.
                    let initial = definition.initial().to_owned();
                    let origin = Some(message.clone());
                    if let Ok(true) = self.advance(&session, initial.clone(), origin.clone(), true).await {
                        let next = (session.state() == initial)
                            .then(|| self.matching_transition(&session, &text, &message))
                            .flatten();
                        match next {
                            Some(target) => {
                                let _ = self.advance(&session, target, origin, false).await;
                            }
                            None => self.hint(&session, Some(&message)).await,
                        }
                    }
                }
            }
            return;
        }
    }

    fn matching_transition(&self, session: &Session, text: &str, message: &Message) -> Option<String> {
        let state = session.definition.state(&session.state()).ok()?;
        state
            .transitions()
            .iter()
            .find(|t| t.trigger.matches_message(text, message, &session.vars))
            .map(|t| t.target.clone())
    }

    /// Opens a session unless one already exists for the same key. A new
    /// session is returned with its turn already held.
    async fn open(&self, definition: &Arc<FlowDefinition>, who: &Identifier, vars: FlowVars) -> Opened {
        let key = SessionKey::new(definition, who);
        let turn = Arc::new(TurnLock::new(()));
        let guard = Arc::clone(&turn).lock_owned().await;
        let session = Arc::new(Session {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            key: key.clone(),
            definition: Arc::clone(definition),
            owner: who.clone(),
            vars,
            state: Mutex::new(definition.initial().to_owned()),
            last_active: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            turn,
        });

        let mut sessions = self.inner.sessions.lock();
        if let Some(existing) = sessions.get(&key) {
            return Opened::Existing(Arc::clone(existing));
        }
        sessions.insert(key, Arc::clone(&session));
        info!(
            flow = %definition.name(),
            session = session.id,
            owner = %who,
            "Flow session started"
        );
        Opened::New(session, guard)
    }

    /// Enters `target` and follows eager transitions. Returns whether the
    /// session is still alive and waiting for input.
    async fn advance(
        &self,
        session: &Arc<Session>,
        target: String,
        message: Option<Message>,
        quiet: bool,
    ) -> FlowResult<bool> {
        let definition = Arc::clone(&session.definition);
        let mut target = target;
        let mut eager_steps = 0usize;

        loop {
            let state = match definition.state(&target) {
                Ok(state) => state,
                Err(e) => return Err(self.fail(session, e).await),
            };
            *session.state.lock() = target.clone();
            debug!(flow = %definition.name(), state = %target, session = session.id, "Entered state");

            if let Some(action) = state.action() {
                let scope = FlowScope {
                    session_id: session.id,
                    flow: Arc::from(definition.name()),
                    state: target.clone(),
                    owner: session.owner.clone(),
                    message: message.clone(),
                    vars: session.vars.clone(),
                    messenger: Arc::clone(&self.inner.messenger),
                };
                let reason = match AssertUnwindSafe(action.clone().oneshot(scope))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(panic) => Some(format!("panicked: {}", panic_message(&panic))),
                };
                if let Some(reason) = reason {
                    let err = FlowError::ActionFailed {
                        flow: definition.name().to_owned(),
                        state: target,
                        reason,
                    };
                    return Err(self.fail(session, err).await);
                }
            }

            if session.is_closed() {
                return Ok(false);
            }
            if state.is_terminal() {
                self.destroy(session, "completed");
                return Ok(false);
            }

            let next = state
                .transitions()
                .iter()
                .find(|t| t.trigger.matches_entry(&session.vars))
                .map(|t| t.target.clone());
            match next {
                Some(next) => {
                    eager_steps += 1;
                    if eager_steps > self.inner.options.max_auto_advances {
                        let err = FlowError::AutoChainExceeded {
                            flow: definition.name().to_owned(),
                            state: target,
                            limit: self.inner.options.max_auto_advances,
                        };
                        return Err(self.fail(session, err).await);
                    }
                    target = next;
                }
                None => {
                    if !quiet {
                        self.hint(session, message.as_ref()).await;
                    }
                    return Ok(true);
                }
            }
        }
    }

    async fn fail(&self, session: &Arc<Session>, err: FlowError) -> FlowError {
        error!(
            flow = %session.key.flow,
            session = session.id,
            owner = %session.owner,
            error = %err,
            "Flow session failed"
        );
        self.destroy(session, "failed");
        let notice = format!("Flow \"{}\" stopped: {err}", session.key.flow);
        let to = Address::Person(session.owner.to_person());
        if let Err(e) = self.inner.messenger.send_text(to, notice).await {
            warn!(flow = %session.key.flow, error = %e, "Could not notify flow owner");
        }
        err
    }

    fn destroy(&self, session: &Arc<Session>, reason: &'static str) {
        session.closed.store(true, Ordering::SeqCst);
        let mut sessions = self.inner.sessions.lock();
        if sessions
            .get(&session.key)
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            sessions.remove(&session.key);
        }
        info!(flow = %session.key.flow, session = session.id, reason, "Flow session ended");
    }

    async fn hint(&self, session: &Session, message: Option<&Message>) {
        if !session.definition.hints() {
            return;
        }
        let Ok(state) = session.definition.state(&session.state()) else {
            return;
        };
        let commands = state.next_commands();
        if commands.is_empty() {
            return;
        }
        let prefix = self.inner.parser.prefix();
        let mut body = format!(
            "You are in the flow \"{}\", you can continue with:",
            session.key.flow
        );
        for command in commands {
            body.push_str(&format!("\n• {prefix}{command}"));
        }
        let messenger = &self.inner.messenger;
        let sent = match message {
            Some(message) => messenger.reply(message, body).await,
            None => {
                let to = match &session.key.scope {
                    Scope::Room(room) => Address::Room(room.clone()),
                    Scope::Person(_) => Address::Person(session.owner.to_person()),
                };
                messenger.send_text(to, body).await
            }
        };
        if let Err(e) = sent {
            warn!(flow = %session.key.flow, error = %e, "Could not send flow hints");
        }
    }

    /// Live sessions `who` can advance, oldest first.
    fn candidates(&self, who: &Identifier) -> Vec<Arc<Session>> {
        let mut found: Vec<Arc<Session>> = self
            .inner
            .sessions
            .lock()
            .iter()
            .filter(|(key, _)| match &key.scope {
                Scope::Person(person) => person == who.person(),
                Scope::Room(room) => who.room() == Some(room.as_str()),
            })
            .map(|(_, s)| Arc::clone(s))
            .collect();
        found.sort_by_key(|s| s.id);
        found
    }

    fn prune_expired(&self) {
        let Some(timeout) = self.inner.options.session_timeout else {
            return;
        };
        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|_, session| {
            let expired = session.last_active.lock().elapsed() > timeout;
            if expired {
                session.closed.store(true, Ordering::SeqCst);
                info!(flow = %session.key.flow, session = session.id, "Flow session timed out");
            }
            !expired
        });
    }
}
