//! Navigation through the season → meeting → session → driver hierarchy
//!
//! `NavigationContext` is an owned stack of selected levels. The command layer
//! drills down with `push`, goes back with `pop`, and uses the active keys to
//! fill in request parameters the user left out.

use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::cache::Params;
use crate::data::endpoint::{self, DRIVER_NUMBER, MEETING_KEY, SESSION_KEY, YEAR};

/// One level of the hierarchy, ordered shallowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Year,
    Meeting,
    Session,
    Driver,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::Year, Level::Meeting, Level::Session, Level::Driver];

    /// Position in the hierarchy, starting at 0 for `Year`
    pub fn depth(self) -> usize {
        self as usize
    }

    /// Request parameter identifying this level
    pub fn param_name(self) -> &'static str {
        match self {
            Level::Year => YEAR,
            Level::Meeting => MEETING_KEY,
            Level::Session => SESSION_KEY,
            Level::Driver => DRIVER_NUMBER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Year => "Year",
            Level::Meeting => "Meeting",
            Level::Session => "Session",
            Level::Driver => "Driver",
        }
    }

    /// The next level down, if any
    pub fn child(self) -> Option<Level> {
        Level::ALL.get(self.depth() + 1).copied()
    }

    /// Record fields that give a readable name for a selection at this level
    fn label_fields(self) -> &'static [&'static str] {
        match self {
            Level::Year => &[],
            Level::Meeting => &["meeting_name", "meeting_official_name"],
            Level::Session => &["session_name", "session_type"],
            Level::Driver => &["full_name", "broadcast_name", "name_acronym"],
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn position(current: &Option<Level>) -> String {
    match current {
        Some(level) => format!("while at {} level", level),
        None => "before choosing a year".to_string(),
    }
}

/// Errors from misusing the navigation stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    /// The requested level is not exactly one below the current one
    #[error("cannot select a {attempted} {}", position(.current))]
    InvalidTransition {
        attempted: Level,
        current: Option<Level>,
    },

    /// There is nothing to go back from
    #[error("already at the main menu")]
    EmptyContext,
}

/// A selected level plus the records listed beneath it, if loaded
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub level: Level,
    pub key: String,
    /// Children of this selection (meetings of a year, sessions of a meeting, ...)
    pub listing: Option<Vec<Value>>,
}

/// One breadcrumb entry for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breadcrumb {
    pub level: Level,
    pub key: String,
    /// Human-readable name found in the parent's listing
    pub label: Option<String>,
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.label, self.level) {
            (_, Level::Year) => write!(f, "Year: {}", self.key),
            (_, Level::Driver) => match &self.label {
                Some(label) => write!(f, "Driver: #{} {}", self.key, label),
                None => write!(f, "Driver: #{}", self.key),
            },
            (Some(label), level) => write!(f, "{}: {} (key: {})", level, label, self.key),
            (None, level) => write!(f, "{}: key {}", level, self.key),
        }
    }
}

/// Where the user currently is in the hierarchy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationContext {
    stack: Vec<Frame>,
}

impl NavigationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Deepest active level
    pub fn current_level(&self) -> Option<Level> {
        self.stack.last().map(|frame| frame.level)
    }

    /// Active key at `level`
    pub fn key(&self, level: Level) -> Option<&str> {
        self.stack.get(level.depth()).map(|frame| frame.key.as_str())
    }

    /// Drills down into `level`, which must be exactly one below the current
    /// deepest level (or `Year` on an empty context)
    pub fn push(&mut self, level: Level, key: impl ToString) -> Result<(), NavigationError> {
        if level.depth() != self.stack.len() {
            return Err(NavigationError::InvalidTransition {
                attempted: level,
                current: self.current_level(),
            });
        }

        let key = key.to_string();
        debug!(level = %level, key = %key, "Drill down");
        self.stack.push(Frame {
            level,
            key,
            listing: None,
        });
        Ok(())
    }

    /// Goes back one level, returning the frame that was left
    pub fn pop(&mut self) -> Result<Frame, NavigationError> {
        let frame = self.stack.pop().ok_or(NavigationError::EmptyContext)?;
        debug!(level = %frame.level, key = %frame.key, "Back");
        Ok(frame)
    }

    /// Returns to the main menu
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Attaches the records listed beneath the deepest selection
    pub fn set_listing(&mut self, records: Vec<Value>) -> Result<(), NavigationError> {
        let frame = self.stack.last_mut().ok_or(NavigationError::EmptyContext)?;
        frame.listing = Some(records);
        Ok(())
    }

    /// Records listed beneath `level`, if that level is active and loaded
    pub fn listing(&self, level: Level) -> Option<&[Value]> {
        self.stack
            .get(level.depth())
            .and_then(|frame| frame.listing.as_deref())
    }

    /// Whether the deepest selection's listing has a child identified by `key`
    ///
    /// Lets the command layer reject e.g. a session key that does not belong
    /// to the current meeting. Always false when no listing is loaded.
    pub fn listing_contains(&self, key: &str) -> bool {
        let Some(frame) = self.stack.last() else {
            return false;
        };
        let Some(child) = frame.level.child() else {
            return false;
        };
        frame
            .listing
            .as_deref()
            .is_some_and(|records| find_record(records, child.param_name(), key).is_some())
    }

    /// Identifying keys of every active level, by canonical parameter name
    pub fn current_params(&self) -> Params {
        self.stack
            .iter()
            .map(|frame| (frame.level.param_name().to_string(), frame.key.clone()))
            .collect()
    }

    /// Breadcrumb trail from the shallowest level down
    pub fn describe(&self) -> Vec<Breadcrumb> {
        self.stack
            .iter()
            .enumerate()
            .map(|(depth, frame)| {
                let label = depth
                    .checked_sub(1)
                    .and_then(|parent| self.stack[parent].listing.as_deref())
                    .and_then(|records| find_record(records, frame.level.param_name(), &frame.key))
                    .and_then(|record| label_for(record, frame.level));
                Breadcrumb {
                    level: frame.level,
                    key: frame.key.clone(),
                    label,
                }
            })
            .collect()
    }

    /// Fills parameters missing from `explicit` using the active selection
    ///
    /// # Behavior
    /// - Explicit values are never overridden
    /// - If no scope parameter (`year`, `meeting_key`, `session_key`) was
    ///   given, the deepest active scope key that `endpoint` accepts is
    ///   added; a session already implies its meeting and year
    /// - `driver_number` is added when a driver is selected and the endpoint
    ///   accepts it
    pub fn resolve_params(&self, endpoint: &str, explicit: &Params) -> Params {
        let mut resolved = explicit.clone();

        let scope_given = [Level::Year, Level::Meeting, Level::Session]
            .iter()
            .any(|level| explicit.contains_key(level.param_name()));

        if !scope_given {
            let deepest_scope = self
                .stack
                .iter()
                .rev()
                .filter(|frame| frame.level != Level::Driver)
                .find(|frame| endpoint::accepts(endpoint, frame.level.param_name()));

            if let Some(frame) = deepest_scope {
                debug!(param = frame.level.param_name(), value = %frame.key, "Using current context");
                resolved.insert(frame.level.param_name().to_string(), frame.key.clone());
            }
        }

        if let Some(driver) = self.key(Level::Driver) {
            if !explicit.contains_key(DRIVER_NUMBER) && endpoint::accepts(endpoint, DRIVER_NUMBER) {
                debug!(param = DRIVER_NUMBER, value = %driver, "Using current context");
                resolved.insert(DRIVER_NUMBER.to_string(), driver.to_string());
            }
        }

        resolved
    }
}

/// Record in `records` whose `field` equals `key`, comparing numbers and
/// strings by their text
fn find_record<'a>(records: &'a [Value], field: &str, key: &str) -> Option<&'a Value> {
    records.iter().find(|record| match record.get(field) {
        Some(Value::String(s)) => s == key,
        Some(Value::Number(n)) => n.to_string() == key,
        _ => false,
    })
}

fn label_for(record: &Value, level: Level) -> Option<String> {
    level
        .label_fields()
        .iter()
        .find_map(|field| record.get(*field).and_then(Value::as_str))
        .map(str::to_string)
}
