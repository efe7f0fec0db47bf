//! Boundary to the host game server.
//!
//! The host delivers raw join/leave signals synchronously on its main thread
//! to observers registered with an explicit [`ObserverPriority`], and accepts
//! command descriptors during its bootstrap phase. Both sides are traits so
//! the bridge can be embedded in any host; [`LocalHost`] is an in-process
//! implementation used by the reference binary and the tests.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ============================================================================
// Raw Signals
// ============================================================================

/// A player finished joining the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerArrived {
    pub name: String,
    pub id: String,
}

impl PlayerArrived {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

/// A player left the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerDeparted {
    pub name: String,
    pub id: String,
}

impl PlayerDeparted {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

// ============================================================================
// Observer Registration
// ============================================================================

/// Position of an observer in the host's dispatch order.
///
/// Observers run in ascending order: `Earliest` first, `Latest` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObserverPriority {
    Earliest,
    Early,
    Normal,
    Late,
    Latest,
}

/// Callback for [`PlayerArrived`] signals.
pub type ArrivalObserver = Box<dyn FnMut(&PlayerArrived) + Send>;

/// Callback for [`PlayerDeparted`] signals.
pub type DepartureObserver = Box<dyn FnMut(&PlayerDeparted) + Send>;

/// Host-side registration of session observers.
pub trait HostEvents {
    fn observe_arrival(&mut self, priority: ObserverPriority, observer: ArrivalObserver);

    fn observe_departure(&mut self, priority: ObserverPriority, observer: DepartureObserver);
}

// ============================================================================
// Commands
// ============================================================================

/// A command definition to expose through the host's command dispatcher.
///
/// The bridge forwards descriptors without interpreting them. Two
/// descriptors are the same command when their names match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            usage: None,
            aliases: Vec::new(),
            permission: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// True if `label` is the name or one of the aliases (case-insensitive).
    pub fn matches(&self, label: &str) -> bool {
        self.name.eq_ignore_ascii_case(label)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(label))
    }
}

/// Host-side command registration API.
pub trait CommandRegistry {
    /// Registers a batch of commands with the host dispatcher.
    fn register(&mut self, commands: Vec<CommandDescriptor>);
}

// ============================================================================
// Local Host
// ============================================================================

/// Observers of one signal type, kept in dispatch order.
struct ObserverTable<S> {
    entries: Vec<(ObserverPriority, Box<dyn FnMut(&S) + Send>)>,
}

impl<S> ObserverTable<S> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts after every observer of equal or earlier priority, so equal
    /// priorities run in registration order.
    fn insert(&mut self, priority: ObserverPriority, observer: Box<dyn FnMut(&S) + Send>) {
        let at = self.entries.partition_point(|(p, _)| *p <= priority);
        self.entries.insert(at, (priority, observer));
    }

    fn dispatch(&mut self, signal: &S) {
        for (_, observer) in &mut self.entries {
            observer(signal);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A minimal in-process host: observer tables plus a command table.
pub struct LocalHost {
    arrivals: ObserverTable<PlayerArrived>,
    departures: ObserverTable<PlayerDeparted>,
    commands: Vec<CommandDescriptor>,
    registration_calls: usize,
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            arrivals: ObserverTable::new(),
            departures: ObserverTable::new(),
            commands: Vec::new(),
            registration_calls: 0,
        }
    }

    /// Dispatches a join signal to every arrival observer.
    pub fn player_arrived(&mut self, name: &str, id: &str) {
        let signal = PlayerArrived::new(name, id);
        debug!(player = name, observers = self.arrivals.len(), "Dispatching arrival");
        self.arrivals.dispatch(&signal);
    }

    /// Dispatches a leave signal to every departure observer.
    pub fn player_departed(&mut self, name: &str, id: &str) {
        let signal = PlayerDeparted::new(name, id);
        debug!(player = name, observers = self.departures.len(), "Dispatching departure");
        self.departures.dispatch(&signal);
    }

    /// Registered commands in registration order.
    pub fn commands(&self) -> &[CommandDescriptor] {
        &self.commands
    }

    /// Looks a command up by name or alias.
    pub fn find_command(&self, label: &str) -> Option<&CommandDescriptor> {
        self.commands.iter().find(|c| c.matches(label))
    }

    /// How many times `register` has been called.
    pub fn registration_calls(&self) -> usize {
        self.registration_calls
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostEvents for LocalHost {
    fn observe_arrival(&mut self, priority: ObserverPriority, observer: ArrivalObserver) {
        self.arrivals.insert(priority, observer);
    }

    fn observe_departure(&mut self, priority: ObserverPriority, observer: DepartureObserver) {
        self.departures.insert(priority, observer);
    }
}

impl CommandRegistry for LocalHost {
    fn register(&mut self, commands: Vec<CommandDescriptor>) {
        self.registration_calls += 1;
        for command in commands {
            if self.commands.iter().any(|c| c.name == command.name) {
                warn!(command = %command.name, "Command already registered with host, ignoring");
                continue;
            }
            debug!(command = %command.name, "Command registered with host");
            self.commands.push(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> ArrivalObserver {
        let log = Arc::clone(log);
        Box::new(move |signal: &PlayerArrived| {
            log.lock().unwrap().push(format!("{label}:{}", signal.name));
        })
    }

    #[test]
    fn test_priority_order() {
        assert!(ObserverPriority::Earliest < ObserverPriority::Early);
        assert!(ObserverPriority::Normal < ObserverPriority::Latest);
    }

    #[test]
    fn test_observers_dispatch_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut host = LocalHost::new();

        host.observe_arrival(ObserverPriority::Normal, recorder(&log, "normal"));
        host.observe_arrival(ObserverPriority::Latest, recorder(&log, "latest"));
        host.observe_arrival(ObserverPriority::Earliest, recorder(&log, "earliest"));

        host.player_arrived("Alice", "11111111");

        assert_eq!(
            *log.lock().unwrap(),
            vec!["earliest:Alice", "normal:Alice", "latest:Alice"]
        );
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut host = LocalHost::new();

        host.observe_arrival(ObserverPriority::Normal, recorder(&log, "first"));
        host.observe_arrival(ObserverPriority::Normal, recorder(&log, "second"));

        host.player_arrived("Bob", "22222222");

        assert_eq!(*log.lock().unwrap(), vec!["first:Bob", "second:Bob"]);
    }

    #[test]
    fn test_departure_dispatch() {
        let seen = Arc::new(Mutex::new(None));
        let mut host = LocalHost::new();
        {
            let seen = Arc::clone(&seen);
            host.observe_departure(
                ObserverPriority::Latest,
                Box::new(move |signal: &PlayerDeparted| *seen.lock().unwrap() = Some(signal.clone())),
            );
        }

        host.player_departed("Alice", "11111111");

        assert_eq!(
            *seen.lock().unwrap(),
            Some(PlayerDeparted::new("Alice", "11111111"))
        );
    }

    #[test]
    fn test_register_commands_skips_known_names() {
        let mut host = LocalHost::new();

        host.register(vec![
            CommandDescriptor::new("lobby", "Return to the lobby").with_alias("hub"),
            CommandDescriptor::new("party", "Manage your party"),
        ]);
        host.register(vec![CommandDescriptor::new("lobby", "Duplicate")]);

        assert_eq!(host.registration_calls(), 2);
        assert_eq!(host.commands().len(), 2);
        assert_eq!(
            host.find_command("HUB").map(|c| c.name.as_str()),
            Some("lobby")
        );
        assert!(host.find_command("unknown").is_none());
    }

    #[test]
    fn test_command_descriptor_toml() {
        let toml = r#"
            name = "party"
            description = "Manage your party"
            aliases = ["p"]
            permission = "cloud.party"
        "#;

        let command: CommandDescriptor = toml::from_str(toml).unwrap();

        assert_eq!(
            command,
            CommandDescriptor {
                permission: Some("cloud.party".to_string()),
                ..CommandDescriptor::new("party", "Manage your party").with_alias("p")
            }
        );
        assert_eq!(command.usage, None);
    }
}
