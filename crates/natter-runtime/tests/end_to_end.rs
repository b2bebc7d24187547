//! End-to-end tests: a full bot over the in-memory transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use natter_core::{
    Address, Event, EventSender, Identifier, Message, Presence, Status, Transport,
    TransportResult,
};
use natter_framework::prelude::*;
use natter_framework::{BoxedHandler, FlowAction, Priority};
use natter_runtime::testing::{TestBot, TestTransport};
use natter_runtime::{LoopState, NatterConfig, NatterRuntime, RuntimeError};

const QUIET: Duration = Duration::from_millis(200);

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

/// Pops `count` replies and returns their bodies sorted.
async fn replies(bot: &TestBot, count: usize) -> Vec<String> {
    let mut bodies = Vec::new();
    for _ in 0..count {
        let message = bot
            .pop_message(Duration::from_secs(5))
            .await
            .expect("missing reply");
        bodies.push(message.body);
    }
    bodies.sort();
    bodies
}

fn counting(counter: &Arc<AtomicUsize>) -> BoxedHandler {
    let counter = Arc::clone(counter);
    handler(move |_ctx: Arc<Context>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        }
    })
}

fn say(text: &'static str) -> FlowAction {
    action(move |scope: FlowScope| async move {
        scope.say(text).await?;
        Ok::<_, BoxError>(())
    })
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_start_echo_and_stop() {
    let bot = TestBot::builder().start().await;
    let transport = Arc::clone(bot.transport());
    assert_eq!(bot.state(), LoopState::Running);
    assert_eq!(transport.connect_count(), 1);

    assert_eq!(bot.exec_command("!echo hello world").await, "hello world");

    bot.stop().await.unwrap();
    assert_eq!(transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let mut bot = TestBot::builder().start().await;
    assert!(matches!(bot.start().await, Err(RuntimeError::AlreadyStarted)));
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_loop_states_and_plugin_shutdown() {
    let deactivated = Arc::new(AtomicUsize::new(0));
    let hook_counter = Arc::clone(&deactivated);
    let plugin = Plugin::builder("tracker")
        .on_deactivate(move |_scope, _bot| {
            let counter = Arc::clone(&hook_counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        })
        .build();

    let runtime = NatterRuntime::builder()
        .config(NatterConfig::default())
        .without_builtin_plugins()
        .plugin(plugin)
        .build()
        .unwrap();
    let transport = Arc::new(TestTransport::new(
        Identifier::new("natter"),
        Identifier::new("alice"),
    ));
    let running = runtime.start(transport.clone()).await.unwrap();
    let state = running.watch_state();
    assert_eq!(running.state(), LoopState::Running);
    assert_eq!(running.handle().identifier().person(), "natter");

    running.stop().await.unwrap();
    assert_eq!(*state.borrow(), LoopState::Stopped);
    assert_eq!(deactivated.load(Ordering::SeqCst), 1);
    assert_eq!(transport.disconnect_count(), 1);
    assert!(transport.push_message("late").await.is_err());
}

#[tokio::test]
async fn test_closed_transport_stops_the_loop() {
    let bot = TestBot::builder().start().await;
    let transport = Arc::clone(bot.transport());

    transport.hang_up();
    bot.push_message("!echo anyone there").await.unwrap();

    eventually(|| bot.state() == LoopState::Stopped).await;
    assert_eq!(transport.disconnect_count(), 1);
    assert!(bot.push_message("!echo hi").await.is_err());

    bot.stop().await.unwrap();
    assert_eq!(transport.disconnect_count(), 1);
}

/// Ends its input as soon as it connects, like a console at end of file.
#[derive(Default)]
struct HangsUpOnConnect {
    disconnects: AtomicUsize,
}

#[async_trait]
impl Transport for HangsUpOnConnect {
    fn bot_identifier(&self) -> Identifier {
        Identifier::new("natter")
    }

    async fn connect(&self, events: EventSender) -> TransportResult<()> {
        events.enqueue(Event::stop()).await?;
        Ok(())
    }

    async fn send_message(&self, _message: Message) -> TransportResult<()> {
        Ok(())
    }

    fn resolve_identifier(&self, _name: &str) -> Option<Identifier> {
        None
    }

    async fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_connect_still_runs_connect_callbacks() {
    let connected = Arc::new(AtomicUsize::new(0));
    let plugin = Plugin::builder("greeter")
        .on_connect(counting(&connected))
        .build();
    let runtime = NatterRuntime::builder()
        .config(NatterConfig::default())
        .without_builtin_plugins()
        .plugin(plugin)
        .build()
        .unwrap();
    let transport = Arc::new(HangsUpOnConnect::default());

    let running = runtime.start(transport.clone()).await.unwrap();
    assert_ne!(running.state(), LoopState::Idle);
    running.wait().await.unwrap();

    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_callbacks_and_room_presence() {
    let connected = Arc::new(AtomicUsize::new(0));
    let joined = Arc::new(AtomicUsize::new(0));
    let plugin = Plugin::builder("watcher")
        .on_connect(counting(&connected))
        .on_room_joined(counting(&joined))
        .build();
    let bot = TestBot::builder().plugin(plugin).start().await;

    eventually(|| connected.load(Ordering::SeqCst) == 1).await;
    eventually(|| joined.load(Ordering::SeqCst) == 1).await;

    let rooms = bot.handle().rooms();
    assert!(rooms.exists("testroom"));
    let occupants = rooms.occupants("testroom").unwrap();
    assert_eq!(occupants.len(), 1);
    assert_eq!(occupants[0].person(), "natter");

    // Leaving a room one is not in changes nothing.
    assert!(!rooms.leave("testroom", &Identifier::new("ghost")));
    assert_eq!(rooms.occupants("testroom").unwrap().len(), 1);

    bot.stop().await.unwrap();
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_command_suppresses_message_handlers() {
    let plugin = Plugin::builder("greeter")
        .command(
            CommandSpec::new("hello"),
            handler(|_ctx: Arc<Context>| async move { Ok::<_, BoxError>("command") }),
        )
        .on_message(handler(|_ctx: Arc<Context>| async move {
            Ok::<_, BoxError>("message")
        }))
        .build();
    let bot = TestBot::builder().plugin(plugin).start().await;

    assert_eq!(bot.exec_command("!hello").await, "command");
    assert!(bot.pop_message(QUIET).await.is_none());

    assert_eq!(bot.exec_command("just chatting").await, "message");
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_mentions_only_reach_message_handlers() {
    let plugin = Plugin::builder("mentions")
        .on_message(handler(|_ctx: Arc<Context>| async move {
            Ok::<_, BoxError>("plain")
        }))
        .on_mention(handler(|ctx: Arc<Context>| async move {
            Ok::<_, BoxError>(format!("mentioned {}", ctx.mentioned().len()))
        }))
        .build();
    let bot = TestBot::builder().plugin(plugin).start().await;

    assert_eq!(bot.exec_command("@nobody1 @nobody2 hi").await, "plain");
    assert!(bot.pop_message(QUIET).await.is_none());

    bot.transport().know(Identifier::new("bob"));
    bot.push_message("@bob, hi").await.unwrap();
    assert_eq!(replies(&bot, 2).await, vec!["mentioned 1", "plain"]);
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_command_errors_are_reported() {
    let plugin = Plugin::builder("risky")
        .command(
            CommandSpec::new("reboot").admin_only(),
            handler(|_ctx: Arc<Context>| async move { Ok::<_, BoxError>("rebooting") }),
        )
        .command(
            CommandSpec::new("boom"),
            handler(|_ctx: Arc<Context>| async move { Err::<(), BoxError>("kaput".into()) }),
        )
        .command(
            CommandSpec::new("explode"),
            handler(|_ctx: Arc<Context>| async move {
                let fail = true;
                if fail {
                    panic!("handler exploded");
                }
                Ok::<_, BoxError>(())
            }),
        )
        .build();
    let bot = TestBot::builder().plugin(plugin).start().await;

    assert_eq!(bot.exec_command("!reboot").await, "rebooting");
    assert_eq!(bot.exec_command("!boom").await, "Command \"boom\" failed: kaput");
    assert!(
        bot.exec_command("!explode")
            .await
            .starts_with("Command \"explode\" failed:")
    );
    assert_eq!(
        bot.exec_command("!nosuch thing").await,
        "Command \"nosuch\" not found."
    );

    bot.transport().set_sender(Identifier::new("mallory"));
    assert_eq!(
        bot.exec_command("!reboot").await,
        natter_framework::dispatcher::NOT_ALLOWED
    );

    // The bot survives all of the above.
    bot.transport().set_sender(Identifier::new("alice"));
    assert_eq!(bot.exec_command("!echo still here").await, "still here");
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_suppressed_not_found() {
    let bot = TestBot::builder()
        .config(|c| c.bot.suppress_cmd_not_found = true)
        .start()
        .await;
    bot.push_message("!nosuch").await.unwrap();
    assert!(bot.pop_message(QUIET).await.is_none());
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_presence_reaches_presence_handlers() {
    let seen = Arc::new(AtomicUsize::new(0));
    let plugin = Plugin::builder("presence")
        .on_presence(counting(&seen))
        .build();
    let bot = TestBot::builder().plugin(plugin).start().await;

    bot.push_presence(Presence::new(Identifier::new("bob"), Status::Away))
        .await
        .unwrap();
    eventually(|| seen.load(Ordering::SeqCst) == 1).await;
    assert!(bot.pop_message(QUIET).await.is_none());
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_room_replies_are_nick_prefixed() {
    let bot = TestBot::builder()
        .config(|c| c.bot.groupchat_nick_prefixed = true)
        .start()
        .await;

    bot.push_room_message("testroom", "!echo hi").await.unwrap();
    let reply = bot.pop_message(Duration::from_secs(5)).await.unwrap();
    assert_eq!(reply.body, "@alice hi");
    assert_eq!(reply.to, Address::Room("testroom".into()));

    // Direct replies are left alone.
    assert_eq!(bot.exec_command("!echo hi").await, "hi");
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_flood_completes_with_concurrent_registration() {
    let plugin = Plugin::builder("slow")
        .command(
            CommandSpec::new("work"),
            handler(|_ctx: Arc<Context>| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, BoxError>("done")
            }),
        )
        .build();
    let bot = TestBot::builder()
        .config(|c| {
            c.workers.size = 2;
            c.workers.backlog = 4;
            c.queue.capacity = 8;
        })
        .plugin(plugin)
        .start()
        .await;

    let registry = Arc::clone(bot.handle().registry());
    let churn = tokio::spawn(async move {
        for _ in 0..200 {
            let id = registry.register(
                CallbackKind::Presence,
                Priority::Normal,
                "churn",
                None,
                handler(|_ctx: Arc<Context>| async move { Ok::<_, BoxError>(()) }),
            );
            tokio::task::yield_now().await;
            registry.unregister(id);
        }
    });

    let transport = Arc::clone(bot.transport());
    let producer = tokio::spawn(async move {
        for _ in 0..60 {
            transport.push_message("!work").await.unwrap();
        }
    });

    let bodies = replies(&bot, 60).await;
    assert!(bodies.iter().all(|b| b == "done"));
    producer.await.unwrap();
    churn.await.unwrap();
    bot.stop().await.unwrap();
}

// =============================================================================
// Flows
// =============================================================================

fn poll_flow() -> FlowDefinition {
    FlowDefinition::builder("poll")
        .description("A yes/no question")
        .entry(Trigger::command("poll"))
        .hints(false)
        .state("A", |s| s.on_command("yes", "B").on_command("no", "C"))
        .state("B", |s| s.action(say("in B")))
        .state("C", |s| s.action(say("in C")))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_yes_no_flow_and_fresh_session() {
    let plugin = Plugin::builder("polls").flow(poll_flow()).build();
    let bot = TestBot::builder().plugin(plugin).start().await;
    let flows = bot.handle().flows().clone();

    bot.push_message("poll").await.unwrap();
    eventually(|| flows.sessions().len() == 1).await;
    let first = flows.sessions()[0].id;
    assert_eq!(flows.sessions()[0].state, "A");

    assert_eq!(bot.exec_command("yes").await, "in B");
    eventually(|| flows.sessions().is_empty()).await;

    bot.push_message("poll").await.unwrap();
    eventually(|| flows.sessions().len() == 1).await;
    let sessions = flows.sessions();
    assert_ne!(sessions[0].id, first);
    assert_eq!(sessions[0].state, "A");

    assert_eq!(bot.exec_command("no").await, "in C");
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_flow_outputs_follow_intake_order() {
    let collect = FlowDefinition::builder("collect")
        .entry(Trigger::command("collect"))
        .hints(false)
        .state("wait", |s| s.on(Trigger::message(|_, _| true), "record"))
        .state("record", |s| {
            s.action(action(|scope: FlowScope| async move {
                let body = scope.message().map(|m| m.body.clone()).unwrap_or_default();
                scope.say(body).await?;
                Ok::<_, BoxError>(())
            }))
            .on(Trigger::message(|_, _| true), "record")
        })
        .build()
        .unwrap();
    let bot = TestBot::builder()
        .plugin(Plugin::builder("collector").flow(collect).build())
        .start()
        .await;

    bot.push_message("collect").await.unwrap();
    for i in 0..30 {
        bot.push_message(i.to_string()).await.unwrap();
    }

    let mut bodies = Vec::new();
    for _ in 0..31 {
        bodies.push(bot.pop_message(Duration::from_secs(5)).await.unwrap().body);
    }
    let expected: Vec<String> = std::iter::once("collect".to_owned())
        .chain((0..30).map(|i| i.to_string()))
        .collect();
    assert_eq!(bodies, expected);
    bot.stop().await.unwrap();
}

fn quiz_flow() -> FlowDefinition {
    FlowDefinition::builder("quiz")
        .entry(Trigger::command("quiz"))
        .hints(false)
        .state("ask", |s| s.action(say("question?")).on_command("42", "right"))
        .state("right", |s| s.action(say("correct")))
        .build()
        .unwrap()
}

fn quiz_plugin() -> Plugin {
    Plugin::builder("quiz")
        .flow(quiz_flow())
        .on_message(handler(|_ctx: Arc<Context>| async move {
            Ok::<_, BoxError>("heard")
        }))
        .build()
}

#[tokio::test]
async fn test_flow_messages_also_reach_handlers_by_default() {
    let bot = TestBot::builder().plugin(quiz_plugin()).start().await;

    bot.push_message("!quiz").await.unwrap();
    assert_eq!(
        replies(&bot, 3).await,
        vec!["Command \"quiz\" not found.", "heard", "question?"]
    );
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_exclusive_flows_consume_messages() {
    let bot = TestBot::builder()
        .config(|c| c.flows.exclusive = true)
        .plugin(quiz_plugin())
        .start()
        .await;

    assert_eq!(bot.exec_command("!quiz").await, "question?");
    assert!(bot.pop_message(QUIET).await.is_none());

    assert_eq!(bot.exec_command("42").await, "correct");
    assert!(bot.pop_message(QUIET).await.is_none());

    assert_eq!(bot.exec_command("hello").await, "heard");
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_exclusive_flows_do_not_wait_for_slow_actions() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let held = Arc::clone(&gate);
    let slow = FlowDefinition::builder("report")
        .entry(Trigger::command("report"))
        .hints(false)
        .state("working", move |s| {
            s.action(action(move |scope: FlowScope| {
                let held = Arc::clone(&held);
                async move {
                    held.notified().await;
                    scope.say("report ready").await?;
                    Ok::<_, BoxError>(())
                }
            }))
        })
        .build()
        .unwrap();
    let bot = TestBot::builder()
        .config(|c| c.flows.exclusive = true)
        .plugin(Plugin::builder("reports").flow(slow).build())
        .start()
        .await;
    let flows = bot.handle().flows().clone();

    bot.push_message("!report").await.unwrap();
    eventually(|| flows.sessions().len() == 1).await;

    bot.transport().set_sender(Identifier::new("bob"));
    assert_eq!(bot.exec_command("!echo still here").await, "still here");

    gate.notify_one();
    bot.push_message("!echo later").await.unwrap();
    assert_eq!(replies(&bot, 2).await, vec!["later", "report ready"]);
    bot.stop().await.unwrap();
}

#[tokio::test]
async fn test_flow_commands_from_builtin_plugin() {
    let bot = TestBot::builder()
        .plugin(Plugin::builder("polls").flow(poll_flow()).build())
        .start()
        .await;

    let listing = bot.exec_command("!flows list").await;
    assert!(listing.contains("poll: A yes/no question"), "{listing}");

    assert_eq!(bot.exec_command("!flows start poll").await, "Flow \"poll\" started.");
    let status = bot.exec_command("!flows status").await;
    assert!(status.contains("poll [A]"), "{status}");

    assert_eq!(bot.exec_command("!flows stop poll").await, "Flow \"poll\" stopped.");
    assert_eq!(bot.exec_command("!flows status").await, "No flows running.");
    bot.stop().await.unwrap();
}
