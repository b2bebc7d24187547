//! Built-in plugins shipped with the natter framework.
//!
//! Enabled by the `builtin-plugins` feature flag (on by default). All of
//! them run at system priority.
//!
//! | Plugin | Commands |
//! |--------|----------|
//! | [`help`] | `help`, `help <command>` |
//! | [`utils`] | `echo <text>`, `whoami` |
//! | [`flows`] | `flows list`, `flows status`, `flows start <name>`, `flows stop <name>`, `flows kill <user> <name>` |
//!
//! # Loading built-in plugins
//!
//! ```rust,ignore
//! for plugin in natter_framework::plugin::builtin::all() {
//!     manager.register_plugin(plugin).await?;
//! }
//! ```

pub mod flows;
pub mod help;
pub mod utils;

use super::Plugin;

/// Every built-in plugin, ready to register.
pub fn all() -> Vec<Plugin> {
    vec![help::plugin(), utils::plugin(), flows::plugin()]
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::sync::Arc;

    use crate::context::{Context, Payload};
    use crate::test_support::{RecordingMessenger, bot_handle};
    use crate::{BotHandle, Plugin, PluginManager, Reply};
    use natter_core::Message;

    /// A bot with the given plugins activated.
    pub(crate) async fn bot_with(plugins: Vec<Plugin>) -> (Arc<RecordingMessenger>, BotHandle) {
        let messenger = RecordingMessenger::new();
        let bot = bot_handle(messenger.clone());
        let manager = PluginManager::new(bot.clone(), Default::default());
        for plugin in plugins {
            manager.register_plugin(plugin).await.unwrap();
        }
        manager.activate_all().await;
        (messenger, bot)
    }

    /// Runs the command `message` invokes and returns its reply text.
    pub(crate) async fn run(bot: &BotHandle, message: Message) -> String {
        let stripped = bot.parser().strip(&message).unwrap().text.to_owned();
        let (entry, args) = bot.registry().match_command(&stripped).unwrap();
        let invocation = crate::command::Invocation {
            command: entry.spec.name().to_owned(),
            args: crate::command::Args::new(args),
        };
        let ctx = Arc::new(Context::new(
            Payload::Command {
                message,
                invocation,
            },
            bot.clone(),
            entry.scope.clone(),
        ));
        let reply = tower::ServiceExt::oneshot(entry.handler.clone(), ctx)
            .await
            .unwrap();
        match reply {
            Reply::Text(body) => body,
            Reply::Silent => String::new(),
        }
    }
}
