//! Console line classification.
//!
//! Turns one raw line of game server output into a typed [`Event`].
//! The grammar is a fixed, ordered list; the first pattern that matches wins.
//! Compiled patterns are immutable and carry no scan position between calls,
//! so classifying a line never depends on the line before it.

use fancy_regex::{Captures, Regex};
use tracing::warn;

use crate::common::types::{ClientId, Event, MasterOp};

/// Line shapes recognized by the classifier, in match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Chat,
    GeoIp,
    Connect,
    Disconnect,
    Master,
    Rename,
    Kick,
}

/// Classifies game console lines.
#[derive(Debug, Clone)]
pub struct LineClassifier {
    grammar: Vec<(LineKind, Regex)>,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LineClassifier {
    /// Build the classifier with the zeromod event grammar.
    pub fn new() -> Self {
        Self {
            grammar: vec![
                // highest frequency first
                (
                    LineKind::Chat,
                    Regex::new(r"^chat: (?P<author>[^ ]+?) \((?P<cid>\d+)\): (?P<message>.+)$")
                        .unwrap(),
                ),
                (
                    LineKind::GeoIp,
                    Regex::new(r"^geoip: client (?P<cid>\d+) connected from (?P<location>.+)$")
                        .unwrap(),
                ),
                (
                    LineKind::Connect,
                    Regex::new(r"^connect: (?P<name>[^ ]+) \((?P<cid>\d+)\) joined$").unwrap(),
                ),
                (
                    LineKind::Disconnect,
                    Regex::new(r"^disconnect: (?P<name>[^ ]+) \((?P<cid>\d+)\) left$").unwrap(),
                ),
                (
                    LineKind::Master,
                    Regex::new(
                        r"^master: (?P<name>.+) (?P<op>claimed|relinquished) (?P<privilege>.+)$",
                    )
                    .unwrap(),
                ),
                (
                    LineKind::Rename,
                    Regex::new(
                        r"^rename: (?P<old>.+) \((?P<cid>\d+)\) is now known as (?P<new>.+)$",
                    )
                    .unwrap(),
                ),
                (
                    LineKind::Kick,
                    Regex::new(r"^kick: (?P<actor>.+) kicked (?P<target>.+)$").unwrap(),
                ),
            ],
        }
    }

    /// Classify one line. Never fails: unknown shapes become [`Event::Unrecognized`].
    pub fn classify(&self, line: &str) -> Event {
        let line = line.strip_suffix('\r').unwrap_or(line);

        for (kind, pattern) in &self.grammar {
            let caps = match pattern.captures(line) {
                Ok(Some(caps)) => caps,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Pattern {:?} failed on line '{}': {}", kind, line, e);
                    continue;
                }
            };

            if let Some(event) = build_event(*kind, &caps) {
                return event;
            }
        }

        Event::Unrecognized {
            raw: line.to_string(),
        }
    }
}

fn build_event(kind: LineKind, caps: &Captures) -> Option<Event> {
    let event = match kind {
        LineKind::Chat => Event::Chat {
            author: group(caps, "author")?,
            client_id: client_id(caps)?,
            message: group(caps, "message")?,
        },
        LineKind::GeoIp => Event::GeoIp {
            client_id: client_id(caps)?,
            location: group(caps, "location")?,
        },
        LineKind::Connect => Event::Connect {
            client_id: client_id(caps)?,
            name: group(caps, "name")?,
        },
        LineKind::Disconnect => Event::Disconnect {
            client_id: client_id(caps)?,
            name: group(caps, "name")?,
        },
        LineKind::Master => Event::MasterChange {
            name: group(caps, "name")?,
            op: MasterOp::parse(caps.name("op")?.as_str())?,
            privilege: group(caps, "privilege")?,
        },
        LineKind::Rename => Event::Rename {
            client_id: client_id(caps)?,
            old_name: group(caps, "old")?,
            new_name: group(caps, "new")?,
        },
        LineKind::Kick => Event::Kick {
            actor: group(caps, "actor")?,
            target: group(caps, "target")?,
        },
    };
    Some(event)
}

fn group(caps: &Captures, name: &str) -> Option<String> {
    caps.name(name).map(|m| m.as_str().to_string())
}

/// Out-of-range ids make the line unrecognized rather than wrapping.
fn client_id(caps: &Captures) -> Option<ClientId> {
    caps.name("cid")?.as_str().parse().ok()
}
