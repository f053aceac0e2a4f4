//! The tube selection a session wants, independent of any connection.

use std::collections::BTreeSet;

use tubewire_protocol::Command;

/// Name of the tube every new connection starts out using and watching.
pub const DEFAULT_TUBE: &str = "default";

/// Which tube the session writes to and which tubes it reads from.
///
/// This is the caller's intent, updated as soon as `use`/`watch`/`ignore`
/// are issued. It survives disconnects and is written back to every new
/// connection by [`replay_plan`](Self::replay_plan).
///
/// `watched` is a `BTreeSet` so the replay order is sorted and therefore
/// the same on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TubeState {
    used: String,
    watched: BTreeSet<String>,
}

impl Default for TubeState {
    fn default() -> Self {
        Self {
            used: DEFAULT_TUBE.to_string(),
            watched: BTreeSet::from([DEFAULT_TUBE.to_string()]),
        }
    }
}

impl TubeState {
    /// The tube `put` writes to.
    pub fn used(&self) -> &str {
        &self.used
    }

    /// The tubes `reserve` reads from.
    pub fn watched(&self) -> &BTreeSet<String> {
        &self.watched
    }

    /// Records the effect of a command that was just issued.
    ///
    /// Commands other than `use`, `watch` and `ignore` leave the state
    /// alone. Ignoring the last watched tube is refused by the server
    /// (`NOT_IGNORED`), so the set never becomes empty here either.
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::Use(tube) => self.used.clone_from(tube),
            Command::Watch(tube) => {
                self.watched.insert(tube.clone());
            }
            Command::Ignore(tube) => {
                if self.watched.len() > 1 {
                    self.watched.remove(tube);
                }
            }
            _ => {}
        }
    }

    /// Back to `use default` / `watch default` only.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The commands that bring a fresh connection in line with this state.
    ///
    /// In order: `use` (unless the default tube is used), one `watch` per
    /// non-default tube in sorted order, then `ignore default` if the
    /// default tube is not wanted. A default state yields nothing.
    pub fn replay_plan(&self) -> Vec<Command> {
        let mut plan = Vec::new();
        if self.used != DEFAULT_TUBE {
            plan.push(Command::Use(self.used.clone()));
        }
        plan.extend(
            self.watched
                .iter()
                .filter(|tube| tube.as_str() != DEFAULT_TUBE)
                .map(|tube| Command::Watch(tube.clone())),
        );
        if !self.watched.contains(DEFAULT_TUBE) {
            plan.push(Command::Ignore(DEFAULT_TUBE.to_string()));
        }
        plan
    }
}
