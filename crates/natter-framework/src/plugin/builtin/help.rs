//! `help`: lists commands and shows the help text of one.

use std::sync::Arc;

use crate::command::CommandSpec;
use crate::context::Context;
use crate::handler::handler;
use crate::plugin::Plugin;

pub const NAME: &str = "help";

pub fn plugin() -> Plugin {
    Plugin::builder(NAME)
        .description("Lists the available commands")
        .system()
        .command(
            CommandSpec::new("help").help("help [command]: list commands or describe one"),
            handler(|ctx: Arc<Context>| async move { Ok(help(&ctx)) }),
        )
        .build()
}

fn help(ctx: &Context) -> String {
    let bot = ctx.bot();
    let prefix = bot.parser().prefix();
    let is_admin = ctx.sender().is_some_and(|who| bot.is_admin(who));
    let args = ctx.args();

    if !args.is_empty() {
        return match bot.registry().match_command(args.raw()) {
            Some((entry, _)) if !entry.spec.is_hidden() => describe(prefix, &entry.spec),
            _ => format!("Command \"{}\" not found.", args.raw()),
        };
    }

    let mut body = String::from("Available commands:");
    for entry in bot.registry().commands() {
        let spec = &entry.spec;
        if spec.is_hidden() || (spec.is_admin_only() && !is_admin) {
            continue;
        }
        body.push_str("\n• ");
        body.push_str(&describe(prefix, spec));
    }
    body
}

fn describe(prefix: &str, spec: &CommandSpec) -> String {
    let help = match spec.help_text() {
        "" => "no description",
        text => text,
    };
    format!("{prefix}{}: {help}", spec.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::builtin::fixture::{bot_with, run};
    use crate::test_support::direct;

    fn extras() -> Plugin {
        Plugin::builder("extras")
            .command(
                CommandSpec::new("ping").help("answers pong"),
                handler(|_ctx| async { Ok("pong") }),
            )
            .command(
                CommandSpec::new("secret").hidden(),
                handler(|_ctx| async { Ok(()) }),
            )
            .command(
                CommandSpec::new("restart").admin_only(),
                handler(|_ctx| async { Ok(()) }),
            )
            .build()
    }

    #[tokio::test]
    async fn test_lists_visible_commands() {
        let (_, bot) = bot_with(vec![plugin(), extras()]).await;

        let listing = run(&bot, direct("alice", "!help")).await;
        assert_eq!(
            listing,
            "Available commands:\n\
             • !help: help [command]: list commands or describe one\n\
             • !ping: answers pong"
        );

        let listing = run(&bot, direct("admin", "!help")).await;
        assert!(listing.ends_with("• !restart: no description"));
    }

    #[tokio::test]
    async fn test_describes_one_command() {
        let (_, bot) = bot_with(vec![plugin(), extras()]).await;
        assert_eq!(run(&bot, direct("alice", "!help ping")).await, "!ping: answers pong");
        assert_eq!(
            run(&bot, direct("alice", "!help secret")).await,
            "Command \"secret\" not found."
        );
        assert_eq!(
            run(&bot, direct("alice", "!help nothing")).await,
            "Command \"nothing\" not found."
        );
    }
}
