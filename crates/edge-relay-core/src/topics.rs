//! Topic graph model.
//!
//! Parses topic specs (`"name"` or `"source:destination"`) into directed
//! topic relations and validates the whole set once at startup: non-empty,
//! no duplicates, no circular push/pull pair over the same names.

use std::collections::HashMap;
use std::fmt;

use crate::config::AgentConfig;
use crate::error::{ConfigError, ConfigResult};

/// Topic names that are internal to the brokers and never provisioned
/// or forwarded by the agent.
pub const RESERVED_TOPICS: &[&str] = &["_schemas"];

/// Forwarding direction of a topic relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Push from a source (edge) topic to a destination (core) topic.
    Push,
    /// Pull from a destination (core) topic back to a source (edge) topic.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

/// A directed relation between an edge-side topic name and a core-side
/// topic name. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    source_name: String,
    destination_name: String,
    direction: Direction,
}

impl Topic {
    /// The edge-side topic name.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The core-side topic name.
    #[must_use]
    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The name of the topic to consume from: the source topic for push
    /// relations, the destination topic for pull relations.
    #[must_use]
    pub fn consume_from(&self) -> &str {
        match self.direction {
            Direction::Push => &self.source_name,
            Direction::Pull => &self.destination_name,
        }
    }

    /// The name of the topic to produce to: the opposite side of
    /// [`Topic::consume_from`].
    #[must_use]
    pub fn produce_to(&self) -> &str {
        match self.direction {
            Direction::Push => &self.destination_name,
            Direction::Pull => &self.source_name,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Push => write!(f, "{} > {}", self.source_name, self.destination_name),
            Direction::Pull => write!(f, "{} < {}", self.source_name, self.destination_name),
        }
    }
}

/// Parse topic specs into directed relations.
///
/// Each spec is either a bare name (source and destination are the same
/// after trimming) or a `"a:b"` pair. For push relations `a` is the
/// source; for pull relations the pair is reversed so that `a` remains
/// the edge-side name either way.
///
/// # Errors
///
/// Returns [`ConfigError::MalformedTopicSpec`] for specs with more than
/// one separator.
pub fn parse_topics(specs: &[String], direction: Direction) -> ConfigResult<Vec<Topic>> {
    let mut all = Vec::with_capacity(specs.len());
    for spec in specs {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [name] => {
                let name = name.trim().to_string();
                all.push(Topic {
                    source_name: name.clone(),
                    destination_name: name,
                    direction,
                });
            }
            [a, b] => {
                let (source_name, destination_name) = match direction {
                    Direction::Push => (a.trim().to_string(), b.trim().to_string()),
                    Direction::Pull => (b.trim().to_string(), a.trim().to_string()),
                };
                all.push(Topic {
                    source_name,
                    destination_name,
                    direction,
                });
            }
            _ => return Err(ConfigError::MalformedTopicSpec(spec.clone())),
        }
    }
    Ok(all)
}

/// The union of all configured push and pull relations, validated once
/// at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct TopicSet {
    topics: Vec<Topic>,
}

impl TopicSet {
    /// Build and validate the topic set from the agent configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed specs, an empty set, duplicate
    /// entries, or a circular push/pull pair.
    pub fn from_config(config: &AgentConfig) -> ConfigResult<Self> {
        let mut topics = parse_topics(&config.source.topics, Direction::Push)?;
        topics.extend(parse_topics(&config.destination.topics, Direction::Pull)?);
        Self::validate(&topics)?;
        Ok(Self { topics })
    }

    /// Validate invariants over the full set. O(n²) over the topics,
    /// run once at startup and never re-checked at runtime.
    fn validate(topics: &[Topic]) -> ConfigResult<()> {
        if topics.is_empty() {
            return Err(ConfigError::EmptyTopicSet);
        }
        for (i, t1) in topics.iter().enumerate() {
            for (k, t2) in topics.iter().enumerate() {
                if i != k && t1 == t2 {
                    return Err(ConfigError::DuplicateTopic(t1.to_string()));
                }
                if circular(t1, t2) {
                    return Err(ConfigError::CircularTopics(t1.to_string(), t2.to_string()));
                }
            }
        }
        Ok(())
    }

    /// All relations in the set.
    #[must_use]
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Whether any relation flows in the given direction.
    #[must_use]
    pub fn has_direction(&self, direction: Direction) -> bool {
        self.topics.iter().any(|t| t.direction == direction)
    }

    /// Names consumed by the forwarder for the given direction.
    #[must_use]
    pub fn consume_names(&self, direction: Direction) -> Vec<String> {
        self.topics
            .iter()
            .filter(|t| t.direction == direction)
            .map(|t| t.consume_from().to_string())
            .collect()
    }

    /// The `consume_from -> produce_to` remap table for one direction.
    #[must_use]
    pub fn route_table(&self, direction: Direction) -> HashMap<String, String> {
        self.topics
            .iter()
            .filter(|t| t.direction == direction)
            .map(|t| (t.consume_from().to_string(), t.produce_to().to_string()))
            .collect()
    }

    /// All edge-side names the source cluster must host, reserved
    /// internal topics excluded.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.role_names(|t| t.source_name())
    }

    /// All core-side names the destination cluster must host, reserved
    /// internal topics excluded.
    #[must_use]
    pub fn destination_names(&self) -> Vec<String> {
        self.role_names(|t| t.destination_name())
    }

    fn role_names(&self, pick: impl Fn(&Topic) -> &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for topic in &self.topics {
            let name = pick(topic);
            if RESERVED_TOPICS.contains(&name) {
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

/// A push and a pull over the same `{source, destination}` pair form a
/// forwarding loop.
fn circular(t1: &Topic, t2: &Topic) -> bool {
    t1.direction != t2.direction
        && t1.source_name == t2.source_name
        && t1.destination_name == t2.destination_name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_parse_bare_name() {
        let topics = parse_topics(&specs(&["telemetry"]), Direction::Push).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].source_name(), "telemetry");
        assert_eq!(topics[0].destination_name(), "telemetry");
        assert_eq!(topics[0].consume_from(), "telemetry");
        assert_eq!(topics[0].produce_to(), "telemetry");
    }

    #[test]
    fn test_parse_pair_push() {
        let topics = parse_topics(&specs(&["edge-data:core-data"]), Direction::Push).unwrap();
        assert_eq!(topics[0].source_name(), "edge-data");
        assert_eq!(topics[0].destination_name(), "core-data");
        assert_eq!(topics[0].consume_from(), "edge-data");
        assert_eq!(topics[0].produce_to(), "core-data");
    }

    #[test]
    fn test_parse_pair_pull_reverses_names() {
        // A pull spec reads "consume-from:produce-to" like a push spec, so
        // the names land on the opposite sides of the relation.
        let topics = parse_topics(&specs(&["core-cmd:edge-cmd"]), Direction::Pull).unwrap();
        assert_eq!(topics[0].source_name(), "edge-cmd");
        assert_eq!(topics[0].destination_name(), "core-cmd");
        assert_eq!(topics[0].consume_from(), "core-cmd");
        assert_eq!(topics[0].produce_to(), "edge-cmd");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let topics = parse_topics(&specs(&[" a : b "]), Direction::Push).unwrap();
        assert_eq!(topics[0].source_name(), "a");
        assert_eq!(topics[0].destination_name(), "b");
    }

    #[test]
    fn test_parse_rejects_extra_separator() {
        let result = parse_topics(&specs(&["a:b:c"]), Direction::Push);
        assert!(matches!(result, Err(ConfigError::MalformedTopicSpec(_))));
    }

    #[test]
    fn test_validate_rejects_empty_set() {
        assert!(matches!(
            TopicSet::validate(&[]),
            Err(ConfigError::EmptyTopicSet)
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate() {
        let topics = parse_topics(&specs(&["a:b", "a:b"]), Direction::Push).unwrap();
        assert!(matches!(
            TopicSet::validate(&topics),
            Err(ConfigError::DuplicateTopic(_))
        ));
    }

    #[test]
    fn test_validate_rejects_circular_pair() {
        let mut topics = parse_topics(&specs(&["a:b"]), Direction::Push).unwrap();
        topics.extend(parse_topics(&specs(&["a:b"]), Direction::Pull).unwrap());
        assert!(matches!(
            TopicSet::validate(&topics),
            Err(ConfigError::CircularTopics(_, _))
        ));
    }

    #[test]
    fn test_validate_allows_disjoint_directions() {
        let mut topics = parse_topics(&specs(&["a:b"]), Direction::Push).unwrap();
        topics.extend(parse_topics(&specs(&["c:d"]), Direction::Pull).unwrap());
        assert!(TopicSet::validate(&topics).is_ok());
    }

    #[test]
    fn test_route_table_per_direction() {
        let mut topics = parse_topics(&specs(&["a:b"]), Direction::Push).unwrap();
        topics.extend(parse_topics(&specs(&["c:d"]), Direction::Pull).unwrap());
        let set = TopicSet { topics };

        let push = set.route_table(Direction::Push);
        assert_eq!(push.get("a").map(String::as_str), Some("b"));
        assert_eq!(push.len(), 1);

        // Pull consumes the core-side name "c" and produces to "d" on the edge.
        let pull = set.route_table(Direction::Pull);
        assert_eq!(pull.get("c").map(String::as_str), Some("d"));
        assert_eq!(pull.len(), 1);
    }

    #[test]
    fn test_role_names_exclude_reserved_and_dedup() {
        let mut topics = parse_topics(&specs(&["a:b", "_schemas"]), Direction::Push).unwrap();
        topics.extend(parse_topics(&specs(&["b:a"]), Direction::Pull).unwrap());
        let set = TopicSet { topics };

        // "a" appears as source of the push and source of the pull relation.
        assert_eq!(set.source_names(), vec!["a".to_string()]);
        assert_eq!(set.destination_names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_display_shows_direction() {
        let push = parse_topics(&specs(&["a:b"]), Direction::Push).unwrap();
        assert_eq!(push[0].to_string(), "a > b");
        let pull = parse_topics(&specs(&["a:b"]), Direction::Pull).unwrap();
        assert_eq!(pull[0].to_string(), "b < a");
    }
}
