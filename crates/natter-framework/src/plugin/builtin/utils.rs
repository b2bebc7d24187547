//! `utils`: small diagnostic commands.

use std::sync::Arc;

use crate::command::CommandSpec;
use crate::context::Context;
use crate::handler::handler;
use crate::plugin::Plugin;
use natter_core::Identifier;

pub const NAME: &str = "utils";

pub fn plugin() -> Plugin {
    Plugin::builder(NAME)
        .description("Echo and identity diagnostics")
        .system()
        .command(
            CommandSpec::new("echo").help("echo <text>: repeat the text back"),
            handler(|ctx: Arc<Context>| async move { Ok(ctx.args().raw().to_owned()) }),
        )
        .command(
            CommandSpec::new("whoami").help("show how the bot identifies you"),
            handler(|ctx: Arc<Context>| async move { Ok(ctx.sender().map(whoami)) }),
        )
        .build()
}

fn whoami(who: &Identifier) -> String {
    let mut lines = vec![format!("person: {}", who.person()), format!("nick: {}", who.nick())];
    if let Some(client) = who.client() {
        lines.push(format!("client: {client}"));
    }
    if let Some(fullname) = who.fullname() {
        lines.push(format!("fullname: {fullname}"));
    }
    if let Some(room) = who.room() {
        lines.push(format!("room: {room}"));
    }
    lines.join("\n")
}
