//! Event routing.
//!
//! The [`Dispatcher`] turns one inbound [`Event`] into handler invocations on
//! the [`WorkerPool`]. For a message:
//!
//! 1. Messages the bot sent itself are dropped.
//! 2. The flow engine sees the message first. With exclusive flows a message
//!    consumed by a flow stops here; otherwise routing continues (a message
//!    may both advance a flow and reach ordinary handlers).
//! 3. If the message names a known command, only that command's handler is
//!    invoked. An explicitly prefixed message naming no command gets a
//!    "not found" reply and goes on to the message handlers.
//! 4. Without a command, every message handler is invoked.
//! 5. If `@name` tokens resolve to known participants, mention handlers are
//!    invoked with the resolved identifiers, independently of 3 and 4.
//!
//! Presence and room events go to their own handler kinds only.
//!
//! Each handler runs as its own pool task. `dispatch` returns once all of
//! them are submitted, so submission order follows dispatch order while
//! completion order across tasks is not defined.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tower::ServiceExt;
use tracing::{Instrument, Level, debug, span, warn};

use crate::command::Invocation;
use crate::context::{BotHandle, Context, Payload};
use crate::error::{BoxError, PoolError};
use crate::handler::{BoxedHandler, Reply};
use crate::pool::{WorkerPool, panic_message};
use crate::registry::{CallbackKind, CommandEntry};
use natter_core::{Event, Identifier, Message, RoomEvent};

/// Reply sent when a non-admin invokes an admin-only command.
pub const NOT_ALLOWED: &str = "You're not allowed to access this command from this user.";

/// Routing switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Do not answer unknown prefixed commands.
    pub suppress_cmd_not_found: bool,
    /// A message consumed by a flow is not routed any further.
    pub exclusive_flows: bool,
}

/// Routes events to handlers. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    bot: BotHandle,
    workers: WorkerPool,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(bot: BotHandle, workers: WorkerPool, options: DispatchOptions) -> Self {
        Self {
            bot,
            workers,
            options,
        }
    }

    pub fn bot(&self) -> &BotHandle {
        &self.bot
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Routes one event. Fails only when a pool refuses the work.
    pub async fn dispatch(&self, event: Event) -> Result<(), PoolError> {
        let span = span!(Level::DEBUG, "dispatch", event = event.kind());
        async {
            match event {
                Event::Message(message) => self.dispatch_message(message).await,
                Event::Presence(presence) => {
                    self.fire(CallbackKind::Presence, Payload::Presence(presence))
                        .await
                }
                Event::Room(room_event) => {
                    let kind = match &room_event {
                        RoomEvent::Joined { .. } => CallbackKind::RoomJoined,
                        RoomEvent::Left { .. } => CallbackKind::RoomLeft,
                        RoomEvent::Topic { .. } => CallbackKind::RoomTopic,
                    };
                    self.fire(kind, Payload::Room(room_event)).await
                }
                Event::Control(control) => {
                    debug!(?control, "Control event reached the dispatcher, ignored");
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Invokes the connect handlers.
    pub async fn fire_connect(&self) -> Result<(), PoolError> {
        self.fire(CallbackKind::Connect, Payload::Connect).await
    }

    async fn dispatch_message(&self, message: Message) -> Result<(), PoolError> {
        if message.frm.same_person(&self.bot.identifier()) {
            debug!("Ignoring message sent by the bot itself");
            return Ok(());
        }

        // ── Flows ────────────────────────────────────────────────────────────
        let ticket = self.bot.flows().trigger(&message).await?;
        if self.options.exclusive_flows && ticket.handled().await {
            debug!(from = %message.frm, "Message consumed by a flow");
            return Ok(());
        }

        // ── Commands ─────────────────────────────────────────────────────────
        let mut command_matched = false;
        if let Some(stripped) = self.bot.parser().strip(&message) {
            match self.bot.registry().match_command(stripped.text) {
                Some((entry, args)) => {
                    command_matched = true;
                    let invocation = Invocation {
                        command: entry.spec.name().to_owned(),
                        args: crate::command::Args::new(args),
                    };
                    self.submit_command(entry, message.clone(), invocation).await?;
                }
                None if stripped.explicit && !self.options.suppress_cmd_not_found => {
                    if let Some(name) = stripped.text.split_whitespace().next() {
                        let body = format!("Command \"{name}\" not found.");
                        self.submit_reply("command not found", message.clone(), body)
                            .await?;
                    }
                }
                None => {}
            }
        }

        // ── Plain messages ───────────────────────────────────────────────────
        if !command_matched {
            self.fire(CallbackKind::Message, Payload::Message(message.clone()))
                .await?;
        }

        // ── Mentions ─────────────────────────────────────────────────────────
        let mentioned = self.resolve_mentions(&message.body);
        if !mentioned.is_empty() {
            self.fire(CallbackKind::Mention, Payload::Mention { message, mentioned })
                .await?;
        }
        Ok(())
    }

    /// Known participants named by `@name` tokens, without duplicates.
    fn resolve_mentions(&self, body: &str) -> Vec<Identifier> {
        let mut resolved: Vec<Identifier> = Vec::new();
        for token in mention_tokens(body) {
            match self.bot.messenger().resolve_identifier(token) {
                Some(id) if !resolved.iter().any(|r| r.same_person(&id)) => resolved.push(id),
                Some(_) => {}
                None => debug!(name = %token, "Mention does not resolve to a known identifier"),
            }
        }
        resolved
    }

    // ─── Submission ──────────────────────────────────────────────────────────

    async fn fire(&self, kind: CallbackKind, payload: Payload) -> Result<(), PoolError> {
        let registrations = self.bot.registry().lookup(kind);
        if registrations.is_empty() {
            return Ok(());
        }
        for registration in registrations {
            let ctx = Arc::new(Context::new(
                payload.clone(),
                self.bot.clone(),
                registration.scope.clone(),
            ));
            let label = format!("{} <- {kind:?}", registration.name);
            let handler = registration.handler.clone();
            self.workers.submit(label, run_handler(handler, ctx)).await?;
        }
        Ok(())
    }

    async fn submit_command(
        &self,
        entry: Arc<CommandEntry>,
        message: Message,
        invocation: Invocation,
    ) -> Result<(), PoolError> {
        let name = entry.spec.name().to_owned();
        if entry.spec.is_admin_only() && !self.bot.is_admin(&message.frm) {
            warn!(command = %name, from = %message.frm, "Admin command refused");
            return self.submit_reply("command refused", message, NOT_ALLOWED.to_owned()).await;
        }

        debug!(command = %name, args = %invocation.args.raw(), "Command matched");
        let ctx = Arc::new(Context::new(
            Payload::Command {
                message,
                invocation,
            },
            self.bot.clone(),
            entry.scope.clone(),
        ));
        let handler = entry.handler.clone();
        let label = format!("command {name}");
        self.workers
            .submit(label, async move {
                let outcome = AssertUnwindSafe(run_handler(handler, Arc::clone(&ctx)))
                    .catch_unwind()
                    .await;
                let reason = match outcome {
                    Ok(Ok(())) => return Ok(()),
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => format!("panicked: {}", panic_message(&panic)),
                };
                ctx.reply(format!("Command \"{name}\" failed: {reason}")).await?;
                Err::<(), BoxError>(reason.into())
            })
            .await?;
        Ok(())
    }

    async fn submit_reply(
        &self,
        label: &str,
        message: Message,
        body: String,
    ) -> Result<(), PoolError> {
        let messenger = Arc::clone(self.bot.messenger());
        self.workers
            .submit(label, async move {
                messenger.reply(&message, body).await?;
                Ok::<_, BoxError>(())
            })
            .await?;
        Ok(())
    }
}

async fn run_handler(handler: BoxedHandler, ctx: Arc<Context>) -> Result<(), BoxError> {
    match handler.oneshot(Arc::clone(&ctx)).await? {
        Reply::Silent => Ok(()),
        Reply::Text(body) => {
            ctx.reply(body).await?;
            Ok(())
        }
    }
}

/// The names of `@name` tokens in `body`, trailing punctuation removed.
fn mention_tokens(body: &str) -> impl Iterator<Item = &str> {
    body.split_whitespace()
        .filter_map(|word| word.strip_prefix('@'))
        .map(|name| name.trim_end_matches([',', '.', ':', ';', '!', '?']))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::command::CommandSpec;
    use crate::context::PluginScope;
    use crate::flow::{FlowDefinition, Trigger};
    use crate::handler::handler;
    use crate::registry::Priority;
    use crate::test_support::{RecordingMessenger, bot_handle, direct, in_room};
    use natter_core::{Presence, Status};

    struct Fixture {
        messenger: Arc<RecordingMessenger>,
        dispatcher: Dispatcher,
    }

    impl Fixture {
        fn new(options: DispatchOptions) -> Self {
            let messenger = RecordingMessenger::new();
            let bot = bot_handle(messenger.clone());
            let dispatcher = Dispatcher::new(bot, WorkerPool::new("workers", 4, 32), options);
            Self {
                messenger,
                dispatcher,
            }
        }

        fn bot(&self) -> &BotHandle {
            self.dispatcher.bot()
        }

        fn command(&self, spec: impl Into<CommandSpec>, handler: BoxedHandler) {
            self.bot()
                .registry()
                .register_command(spec.into(), Priority::Normal, None, handler);
        }

        fn counter(&self, kind: CallbackKind) -> Arc<AtomicUsize> {
            let count = Arc::new(AtomicUsize::new(0));
            let seen = Arc::clone(&count);
            self.bot().registry().register(
                kind,
                Priority::Normal,
                format!("{kind:?} counter"),
                None,
                handler(move |_ctx| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
            count
        }

        async fn send(&self, message: Message) {
            self.dispatcher.dispatch(Event::Message(message)).await.unwrap();
        }

        /// Waits for every submitted handler to finish.
        async fn drain(&self) {
            self.dispatcher.workers().shutdown().await;
            self.bot().flows().close();
            self.bot().flows().join().await;
        }
    }

    fn echo() -> BoxedHandler {
        handler(|ctx: Arc<Context>| async move { Ok(ctx.args().raw().to_owned()) })
    }

    #[tokio::test]
    async fn test_command_suppresses_message_handlers() {
        let fx = Fixture::new(DispatchOptions::default());
        fx.command("echo", echo());
        let plain = fx.counter(CallbackKind::Message);

        fx.send(in_room("alice", "#r", "!echo hello")).await;
        fx.send(in_room("alice", "#r", "just chatting")).await;
        fx.drain().await;

        assert_eq!(fx.messenger.bodies(), vec!["hello"]);
        assert_eq!(plain.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.messenger.sent()[0].to,
            natter_core::Address::Room("#r".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_command_replies_and_still_reaches_message_handlers() {
        let fx = Fixture::new(DispatchOptions::default());
        let plain = fx.counter(CallbackKind::Message);

        fx.send(direct("alice", "!frobnicate now")).await;
        fx.send(direct("alice", "!")).await;
        fx.drain().await;

        assert_eq!(fx.messenger.bodies(), vec!["Command \"frobnicate\" not found."]);
        assert_eq!(plain.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_command_can_be_suppressed() {
        let fx = Fixture::new(DispatchOptions {
            suppress_cmd_not_found: true,
            ..DispatchOptions::default()
        });
        fx.send(direct("alice", "!frobnicate")).await;
        fx.drain().await;
        assert!(fx.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_admin_only_command_refused_for_others() {
        let fx = Fixture::new(DispatchOptions::default());
        fx.command(CommandSpec::new("reboot").admin_only(), handler(|_ctx| async { Ok("rebooting") }));

        fx.send(direct("mallory", "!reboot")).await;
        fx.send(direct("admin", "!reboot")).await;
        fx.drain().await;

        let mut bodies = fx.messenger.bodies();
        bodies.sort();
        assert_eq!(bodies, vec!["You're not allowed to access this command from this user.", "rebooting"]);
    }

    #[tokio::test]
    async fn test_failing_command_reports_error() {
        let fx = Fixture::new(DispatchOptions::default());
        fx.command(
            "fail",
            handler(|_ctx| async { Err::<(), BoxError>("disk full".into()) }),
        );
        fx.command(
            "explode",
            handler(|_ctx| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            }),
        );

        fx.send(direct("alice", "!fail")).await;
        fx.send(direct("alice", "!explode")).await;
        fx.drain().await;

        let mut bodies = fx.messenger.bodies();
        bodies.sort();
        assert_eq!(
            bodies,
            vec![
                "Command \"explode\" failed: panicked: boom",
                "Command \"fail\" failed: disk full",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_mentions_do_not_fire_mention_handlers() {
        let fx = Fixture::new(DispatchOptions::default());
        let plain = fx.counter(CallbackKind::Message);
        let mentions = fx.counter(CallbackKind::Mention);

        fx.send(in_room("alice", "#r", "@nobody1 @nobody2 hi")).await;
        fx.drain().await;

        assert_eq!(plain.load(Ordering::SeqCst), 1);
        assert_eq!(mentions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_known_mentions_are_resolved() {
        let fx = Fixture::new(DispatchOptions::default());
        fx.messenger.know(Identifier::new("bob").with_nick("Bobby"));
        fx.bot().registry().register(
            CallbackKind::Mention,
            Priority::Normal,
            "who",
            None,
            handler(|ctx: Arc<Context>| async move {
                let names: Vec<&str> = ctx.mentioned().iter().map(|id| id.person()).collect();
                Ok(names.join(","))
            }),
        );

        fx.send(in_room("alice", "#r", "hey @bob, @Bobby and @ghost!")).await;
        fx.drain().await;
        assert_eq!(fx.messenger.bodies(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let fx = Fixture::new(DispatchOptions::default());
        let plain = fx.counter(CallbackKind::Message);
        fx.send(direct("bot", "!echo loop")).await;
        fx.drain().await;
        assert_eq!(plain.load(Ordering::SeqCst), 0);
        assert!(fx.messenger.sent().is_empty());
    }

    fn greeting_flow() -> FlowDefinition {
        FlowDefinition::builder("greet")
            .hints(false)
            .entry(Trigger::command("hello"))
            .state("wait", |s| s.on_command("bye", "done"))
            .state("done", |s| s)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_flow_and_message_handlers_both_see_message() {
        let fx = Fixture::new(DispatchOptions::default());
        fx.bot().flows().register(greeting_flow(), None).unwrap();
        let plain = fx.counter(CallbackKind::Message);

        fx.send(direct("alice", "hello")).await;
        fx.drain().await;

        assert_eq!(plain.load(Ordering::SeqCst), 1);
        assert_eq!(fx.bot().flows().sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_exclusive_flows_consume_message() {
        let fx = Fixture::new(DispatchOptions {
            exclusive_flows: true,
            ..DispatchOptions::default()
        });
        fx.bot().flows().register(greeting_flow(), None).unwrap();
        let plain = fx.counter(CallbackKind::Message);

        fx.send(direct("alice", "hello")).await;
        fx.send(direct("alice", "unrelated")).await;
        fx.drain().await;

        assert_eq!(plain.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_presence_and_room_events_route_by_kind() {
        let fx = Fixture::new(DispatchOptions::default());
        let plain = fx.counter(CallbackKind::Message);
        let presence = fx.counter(CallbackKind::Presence);
        let joined = fx.counter(CallbackKind::RoomJoined);
        let topic = fx.counter(CallbackKind::RoomTopic);

        let alice = Identifier::new("alice");
        fx.dispatcher
            .dispatch(Event::Presence(Presence::new(alice.clone(), Status::Away)))
            .await
            .unwrap();
        fx.dispatcher
            .dispatch(Event::Room(RoomEvent::Joined {
                room: "#r".into(),
                occupant: alice.in_room("#r"),
            }))
            .await
            .unwrap();
        fx.dispatcher
            .dispatch(Event::Room(RoomEvent::Topic {
                room: "#r".into(),
                topic: Some("news".into()),
            }))
            .await
            .unwrap();
        fx.drain().await;

        assert_eq!(presence.load(Ordering::SeqCst), 1);
        assert_eq!(joined.load(Ordering::SeqCst), 1);
        assert_eq!(topic.load(Ordering::SeqCst), 1);
        assert_eq!(plain.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flood_with_concurrent_registration_completes() {
        let messenger = RecordingMessenger::new();
        let bot = bot_handle(messenger.clone());
        let dispatcher = Dispatcher::new(bot.clone(), WorkerPool::new("workers", 2, 4), DispatchOptions::default());
        let count = Arc::new(AtomicUsize::new(0));

        let churn = {
            let registry = Arc::clone(bot.registry());
            tokio::spawn(async move {
                for i in 0..200 {
                    let scope = PluginScope::new(format!("p{}", i % 3), serde_json::Value::Null);
                    registry.register(
                        CallbackKind::Message,
                        Priority::Normal,
                        "churn",
                        Some(scope),
                        handler(|_ctx| async { Ok(()) }),
                    );
                    registry.unregister_owner(&format!("p{}", (i + 1) % 3));
                    tokio::task::yield_now().await;
                }
            })
        };

        let seen = Arc::clone(&count);
        bot.registry().register(
            CallbackKind::Message,
            Priority::System,
            "slow",
            None,
            handler(move |_ctx| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        for i in 0..100 {
            dispatcher
                .dispatch(Event::Message(direct("alice", &format!("msg {i}"))))
                .await
                .unwrap();
        }
        churn.await.unwrap();
        dispatcher.workers().shutdown().await;

        assert_eq!(count.load(Ordering::SeqCst), 100);
        assert_eq!(dispatcher.workers().in_flight(), 0);
    }

    #[test]
    fn test_mention_tokens() {
        let tokens: Vec<&str> = mention_tokens("@a, hi @b. mail@example.org @ @c!").collect();
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }
}
