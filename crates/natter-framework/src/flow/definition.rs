//! Declarative flow definitions.
//!
//! A flow is a directed graph of named states. Each state may run an action
//! on entry and declares its outgoing transitions in order:
//!
//! | Trigger | Fires |
//! |---------|-------|
//! | [`Trigger::Command`] | on a message whose leading words equal the text (prefix optional) |
//! | [`Trigger::Message`] | on a message the predicate accepts |
//! | [`Trigger::When`]    | right after entry, if the predicate on the session vars holds |
//! | [`Trigger::Auto`]    | right after entry, unconditionally |
//!
//! A state without transitions is terminal: entering it ends the session.
//!
//! # Example
//!
//! ```rust,ignore
//! let confirm = FlowDefinition::builder("confirm")
//!     .entry(Trigger::command("deploy"))
//!     .state("ask", |s| {
//!         s.action(action(|scope: FlowScope| async move {
//!             scope.say("Are you sure? (yes/no)").await?;
//!             Ok(())
//!         }))
//!         .on(Trigger::command("yes"), "deploy")
//!         .on(Trigger::command("no"), "cancelled")
//!     })
//!     .state("deploy", |s| s.action(do_deploy))
//!     .state("cancelled", |s| s)
//!     .build()?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{FlowError, FlowResult};
use crate::flow::{FlowAction, FlowVars};
use natter_core::Message;

pub type MessagePredicate = Arc<dyn Fn(&Message, &FlowVars) -> bool + Send + Sync>;
pub type VarsPredicate = Arc<dyn Fn(&FlowVars) -> bool + Send + Sync>;

// =============================================================================
// Trigger
// =============================================================================

/// What moves a session out of a state, or starts a flow.
#[derive(Clone)]
pub enum Trigger {
    Command(Vec<String>),
    Message(MessagePredicate),
    When(VarsPredicate),
    Auto,
}

impl Trigger {
    pub fn command(text: impl AsRef<str>) -> Self {
        Trigger::Command(
            text.as_ref()
                .split_whitespace()
                .map(str::to_lowercase)
                .collect(),
        )
    }

    pub fn message<F>(predicate: F) -> Self
    where
        F: Fn(&Message, &FlowVars) -> bool + Send + Sync + 'static,
    {
        Trigger::Message(Arc::new(predicate))
    }

    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&FlowVars) -> bool + Send + Sync + 'static,
    {
        Trigger::When(Arc::new(predicate))
    }

    pub fn auto() -> Self {
        Trigger::Auto
    }

    /// `true` for triggers evaluated on state entry rather than on messages.
    pub fn is_eager(&self) -> bool {
        matches!(self, Trigger::When(_) | Trigger::Auto)
    }

    /// Evaluates a message trigger. `text` is the message with any command
    /// prefix removed.
    pub(crate) fn matches_message(&self, text: &str, message: &Message, vars: &FlowVars) -> bool {
        match self {
            Trigger::Command(words) => crate::command::match_words(words, text).is_some(),
            Trigger::Message(predicate) => predicate(message, vars),
            Trigger::When(_) | Trigger::Auto => false,
        }
    }

    pub(crate) fn matches_entry(&self, vars: &FlowVars) -> bool {
        match self {
            Trigger::When(predicate) => predicate(vars),
            Trigger::Auto => true,
            Trigger::Command(_) | Trigger::Message(_) => false,
        }
    }

    /// The command text of a command trigger.
    pub fn command_text(&self) -> Option<String> {
        match self {
            Trigger::Command(words) => Some(words.join(" ")),
            _ => None,
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Command(words) => write!(f, "Command({:?})", words.join(" ")),
            Trigger::Message(_) => f.write_str("Message(..)"),
            Trigger::When(_) => f.write_str("When(..)"),
            Trigger::Auto => f.write_str("Auto"),
        }
    }
}

// =============================================================================
// States
// =============================================================================

#[derive(Debug, Clone)]
pub struct Transition {
    pub trigger: Trigger,
    pub target: String,
}

#[derive(Clone)]
pub struct FlowState {
    name: String,
    action: Option<FlowAction>,
    transitions: Vec<Transition>,
}

impl FlowState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn action(&self) -> Option<&FlowAction> {
        self.action.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Command texts that continue the flow from this state.
    pub fn next_commands(&self) -> Vec<String> {
        self.transitions
            .iter()
            .filter_map(|t| t.trigger.command_text())
            .collect()
    }
}

/// Builds one state inside [`FlowBuilder::state`].
pub struct StateBuilder {
    state: FlowState,
}

impl StateBuilder {
    /// The action run on entering this state.
    pub fn action(mut self, action: FlowAction) -> Self {
        self.state.action = Some(action);
        self
    }

    /// Adds a transition; transitions are evaluated in declaration order.
    pub fn on(mut self, trigger: Trigger, target: impl Into<String>) -> Self {
        self.state.transitions.push(Transition {
            trigger,
            target: target.into(),
        });
        self
    }

    pub fn on_command(self, text: &str, target: impl Into<String>) -> Self {
        self.on(Trigger::command(text), target)
    }

    pub fn auto(self, target: impl Into<String>) -> Self {
        self.on(Trigger::Auto, target)
    }
}

// =============================================================================
// FlowDefinition
// =============================================================================

/// A validated flow graph.
#[derive(Clone)]
pub struct FlowDefinition {
    name: String,
    description: String,
    initial: String,
    states: Vec<FlowState>,
    entry: Vec<Trigger>,
    hints: bool,
    room_flow: bool,
}

impl FlowDefinition {
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder {
            name: name.into(),
            description: String::new(),
            initial: None,
            states: Vec::new(),
            entry: Vec::new(),
            hints: true,
            room_flow: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    /// Triggers that start this flow on their own. Empty means the flow can
    /// only be started explicitly.
    pub fn entry(&self) -> &[Trigger] {
        &self.entry
    }

    pub fn hints(&self) -> bool {
        self.hints
    }

    /// Whether sessions belong to a room rather than a single person.
    pub fn is_room_flow(&self) -> bool {
        self.room_flow
    }

    pub fn state(&self, name: &str) -> FlowResult<&FlowState> {
        self.states
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| FlowError::UndefinedState {
                flow: self.name.clone(),
                state: name.to_owned(),
            })
    }

    pub fn states(&self) -> &[FlowState] {
        &self.states
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field(
                "states",
                &self.states.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .field("entry", &self.entry)
            .field("room_flow", &self.room_flow)
            .finish()
    }
}

pub struct FlowBuilder {
    name: String,
    description: String,
    initial: Option<String>,
    states: Vec<FlowState>,
    entry: Vec<Trigger>,
    hints: bool,
    room_flow: bool,
}

impl FlowBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a trigger that starts the flow. Only command and message
    /// triggers are accepted here.
    pub fn entry(mut self, trigger: Trigger) -> Self {
        self.entry.push(trigger);
        self
    }

    /// Declares a state. The first declared state is the initial one unless
    /// [`initial`](Self::initial) says otherwise.
    pub fn state(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(StateBuilder) -> StateBuilder,
    ) -> Self {
        let builder = StateBuilder {
            state: FlowState {
                name: name.into(),
                action: None,
                transitions: Vec::new(),
            },
        };
        self.states.push(build(builder).state);
        self
    }

    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    /// Whether waiting sessions tell their owner how to continue (default on).
    pub fn hints(mut self, hints: bool) -> Self {
        self.hints = hints;
        self
    }

    /// Scopes sessions to the room the flow started in: any occupant can
    /// advance it.
    pub fn room_flow(mut self, room_flow: bool) -> Self {
        self.room_flow = room_flow;
        self
    }

    /// Validates and builds the definition.
    pub fn build(self) -> FlowResult<FlowDefinition> {
        let name = self.name;
        if name.trim().is_empty() {
            return Err(FlowError::invalid(&name, "flow name is empty"));
        }
        if self.states.is_empty() {
            return Err(FlowError::invalid(&name, "flow declares no states"));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(state.name.as_str()) {
                return Err(FlowError::invalid(
                    &name,
                    format!("state '{}' is declared twice", state.name),
                ));
            }
        }
        for state in &self.states {
            for transition in &state.transitions {
                if !seen.contains(transition.target.as_str()) {
                    return Err(FlowError::UndefinedState {
                        flow: name,
                        state: transition.target.clone(),
                    });
                }
            }
        }
        if let Some(eager) = self.entry.iter().find(|t| t.is_eager()) {
            return Err(FlowError::invalid(
                &name,
                format!("{eager:?} cannot start a flow"),
            ));
        }

        let initial = match self.initial {
            Some(initial) if seen.contains(initial.as_str()) => initial,
            Some(initial) => {
                return Err(FlowError::UndefinedState {
                    flow: name,
                    state: initial,
                });
            }
            None => self.states[0].name.clone(),
        };

        Ok(FlowDefinition {
            name,
            description: self.description,
            initial,
            states: self.states,
            entry: self.entry,
            hints: self.hints,
            room_flow: self.room_flow,
        })
    }
}
