//! Console Bot Example
//!
//! A natter bot whose chat network is the terminal: every line typed on
//! stdin is a direct message from `you`, every reply is printed to stdout.
//! End of input stops the bot.
//!
//! # Commands
//!
//! ```text
//! !help            - built-in command list
//! !shout <text>    - echoes the text in capitals
//! !add <n> <n> ... - sums numbers
//! !order           - starts a short ordering conversation
//! !flows status    - shows running conversations
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package console-bot -- --prefix '!'
//! ```

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use natter::prelude::*;
use natter::runtime::config::{ConfigLoader, LogOutput};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "console-bot", about = "Chat with a natter bot on the terminal")]
struct Cli {
    /// Configuration file to load instead of searching for natter.toml
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Configuration profile (development, production, ...)
    #[arg(short, long)]
    profile: Option<String>,

    /// Overrides the command prefix
    #[arg(long)]
    prefix: Option<String>,

    /// Your name in the conversation
    #[arg(long, default_value = "you")]
    user: String,
}

// ============================================================================
// Transport
// ============================================================================

/// Talks to one person over stdin and stdout.
struct ConsoleTransport {
    me: Identifier,
    user: Identifier,
}

#[async_trait]
impl Transport for ConsoleTransport {
    fn name(&self) -> &str {
        "console"
    }

    fn bot_identifier(&self) -> Identifier {
        self.me.clone()
    }

    async fn connect(&self, events: EventSender) -> TransportResult<()> {
        let me = self.me.clone();
        let user = self.user.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let message = Message::direct(line, user.clone(), me.clone());
                        if events.enqueue(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("End of input");
                        let _ = events.enqueue(Event::stop()).await;
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        let _ = events.enqueue(Event::stop()).await;
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn send_message(&self, message: Message) -> TransportResult<()> {
        println!("{}> {}", self.me.nick(), message.body);
        Ok(())
    }

    fn resolve_identifier(&self, name: &str) -> Option<Identifier> {
        [&self.user, &self.me]
            .into_iter()
            .find(|id| id.person() == name || id.nick() == name)
            .cloned()
    }
}

// ============================================================================
// Plugins
// ============================================================================

fn toolbox() -> Plugin {
    Plugin::builder("toolbox")
        .description("Small text and number utilities")
        .command(
            CommandSpec::new("shout").help("shout <text> - echoes the text in capitals"),
            handler(|ctx: Arc<Context>| async move {
                Ok::<_, BoxError>(ctx.args().raw().to_uppercase())
            }),
        )
        .command(
            CommandSpec::new("add").help("add <n> <n> ... - sums numbers"),
            handler(|ctx: Arc<Context>| async move {
                let mut sum = 0.0;
                for word in ctx.args().split() {
                    sum += word.parse::<f64>()?;
                }
                Ok::<_, BoxError>(format!("{sum}"))
            }),
        )
        .build()
}

fn ordering() -> Result<Plugin> {
    let order = FlowDefinition::builder("order")
        .description("Orders a coffee")
        .entry(Trigger::command("order"))
        .state("size", |s| {
            s.action(action(|scope: FlowScope| async move {
                scope.say("Small or large?").await?;
                Ok::<_, BoxError>(())
            }))
            .on_command("small", "small")
            .on_command("large", "large")
        })
        .state("small", |s| s.action(choose("small")).auto("confirm"))
        .state("large", |s| s.action(choose("large")).auto("confirm"))
        .state("confirm", |s| {
            s.action(action(|scope: FlowScope| async move {
                let size: String = scope.vars().get("size").unwrap_or_default();
                scope.say(format!("One {size} coffee. Confirm? (yes/no)")).await?;
                Ok::<_, BoxError>(())
            }))
            .on_command("yes", "done")
            .on_command("no", "cancelled")
        })
        .state("done", |s| {
            s.action(action(|scope: FlowScope| async move {
                scope.say("Coming right up.").await?;
                Ok::<_, BoxError>(())
            }))
        })
        .state("cancelled", |s| {
            s.action(action(|scope: FlowScope| async move {
                scope.say("Order cancelled.").await?;
                Ok::<_, BoxError>(())
            }))
        })
        .build()?;

    Ok(Plugin::builder("ordering")
        .description("A coffee ordering conversation")
        .flow(order)
        .build())
}

/// Records the chosen size in the session.
fn choose(size: &'static str) -> FlowAction {
    action(move |scope: FlowScope| async move {
        scope.vars().set("size", size)?;
        Ok::<_, BoxError>(())
    })
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new().with_current_dir();
    if let Some(path) = &cli.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &cli.profile {
        loader = loader.profile(profile);
    }
    let mut config = loader.load()?;

    if let Some(prefix) = cli.prefix {
        config.bot.prefix = prefix;
    }
    // Replies go to stdout.
    config.logging.output = LogOutput::Stderr;
    let prefix = config.bot.prefix.clone();

    let runtime = NatterRuntime::builder()
        .config(config)
        .plugin(toolbox())
        .plugin(ordering()?)
        .build()?;

    let transport = ConsoleTransport {
        me: Identifier::new("natter"),
        user: Identifier::new(cli.user),
    };

    println!("Type {prefix}help for commands, Ctrl+D to quit.");
    runtime.run(Arc::new(transport)).await?;
    Ok(())
}
