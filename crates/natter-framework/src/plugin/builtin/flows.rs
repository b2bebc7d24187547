//! `flows`: inspect and control conversational flows from chat.

use std::sync::Arc;

use serde_json::Map;

use crate::command::CommandSpec;
use crate::context::Context;
use crate::error::BoxError;
use crate::flow::SessionInfo;
use crate::handler::handler;
use crate::plugin::Plugin;
use natter_core::Identifier;

pub const NAME: &str = "flows";

pub fn plugin() -> Plugin {
    Plugin::builder(NAME)
        .description("Flow inspection and control")
        .system()
        .command(
            CommandSpec::new("flows list").help("list the available flows"),
            handler(|ctx: Arc<Context>| async move { Ok(list(&ctx)) }),
        )
        .command(
            CommandSpec::new("flows status").help("show your running flows"),
            handler(|ctx: Arc<Context>| async move { Ok(status(&ctx)) }),
        )
        .command(
            CommandSpec::new("flows start").help("flows start <name>: start a flow"),
            handler(|ctx: Arc<Context>| async move { start(&ctx).await }),
        )
        .command(
            CommandSpec::new("flows stop").help("flows stop <name>: stop one of your flows"),
            handler(|ctx: Arc<Context>| async move { Ok(stop(&ctx)) }),
        )
        .command(
            CommandSpec::new("flows kill")
                .help("flows kill <user> <name>: stop somebody's flow")
                .admin_only(),
            handler(|ctx: Arc<Context>| async move { Ok(kill(&ctx)) }),
        )
        .build()
}

fn list(ctx: &Context) -> String {
    let bot = ctx.bot();
    let definitions = bot.flows().definitions();
    if definitions.is_empty() {
        return "No flows available.".to_owned();
    }
    let prefix = bot.parser().prefix();
    let mut body = String::from("Available flows:");
    for flow in definitions {
        body.push_str(&format!("\n• {}", flow.name));
        if !flow.description.is_empty() {
            body.push_str(&format!(": {}", flow.description));
        }
        if !flow.entry_commands.is_empty() {
            let commands: Vec<String> = flow
                .entry_commands
                .iter()
                .map(|c| format!("{prefix}{c}"))
                .collect();
            body.push_str(&format!(" (start with {})", commands.join(", ")));
        }
    }
    body
}

fn status(ctx: &Context) -> String {
    let Some(who) = ctx.sender() else {
        return String::new();
    };
    let bot = ctx.bot();
    // Admins see every session.
    let sessions = if bot.is_admin(who) {
        bot.flows().sessions()
    } else {
        bot.flows().sessions_for(who)
    };
    if sessions.is_empty() {
        return "No flows running.".to_owned();
    }
    let mut body = String::from("Running flows:");
    for session in &sessions {
        body.push_str(&format!("\n• {}", describe(session)));
    }
    body
}

fn describe(session: &SessionInfo) -> String {
    let owner = match &session.room {
        Some(room) => room.clone(),
        None => session.owner.person().to_owned(),
    };
    format!("{} [{}] for {owner}", session.flow, session.state)
}

async fn start(ctx: &Context) -> Result<String, BoxError> {
    let name = ctx.args().raw().to_owned();
    if name.is_empty() {
        return Ok(format!("Usage: {}flows start <name>", ctx.bot().parser().prefix()));
    }
    let (Some(message), Some(who)) = (ctx.message(), ctx.sender()) else {
        return Ok(String::new());
    };
    let started = ctx
        .bot()
        .flows()
        .start(&name, who, Map::new(), Some(message.clone()))
        .await;
    Ok(match started {
        Ok(_) => format!("Flow \"{name}\" started."),
        Err(e) => format!("Cannot start flow \"{name}\": {e}"),
    })
}

fn stop(ctx: &Context) -> String {
    let name = ctx.args().raw().to_owned();
    match ctx.sender() {
        Some(who) if !name.is_empty() && ctx.bot().flows().stop(&name, who) => {
            format!("Flow \"{name}\" stopped.")
        }
        _ => format!("No running flow \"{name}\"."),
    }
}

fn kill(ctx: &Context) -> String {
    let args = ctx.args().split();
    let [user, name] = args.as_slice() else {
        return format!("Usage: {}flows kill <user> <name>", ctx.bot().parser().prefix());
    };
    if ctx.bot().flows().stop(name, &Identifier::new(user.as_str())) {
        format!("Flow \"{name}\" of {user} killed.")
    } else {
        format!("{user} has no running flow \"{name}\".")
    }
}
