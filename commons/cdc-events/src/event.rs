use std::{fmt, str::FromStr};

use cdc_stream::OperationType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }

    pub const ALL: [EventType; 3] =
        [EventType::Created, EventType::Updated, EventType::Deleted];
}

impl From<OperationType> for EventType {
    fn from(value: OperationType) -> Self {
        match value {
            OperationType::Insert => EventType::Created,
            OperationType::Modify => EventType::Updated,
            OperationType::Remove => EventType::Deleted,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventType::Created),
            "updated" => Ok(EventType::Updated),
            "deleted" => Ok(EventType::Deleted),
            other => Err(format!("unknown event type `{other}`")),
        }
    }
}

/// An event between domains, derived from one change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub source: String,
    pub event_type: EventType,
    pub id: String,
    pub pk: String,
    pub sk: String,
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event{{Source:{:?}, Type:{:?}, ID:{:?}, PK:{:?}, SK:{:?}}}",
            self.source,
            self.event_type.as_str(),
            self.id,
            self.pk,
            self.sk
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_map_to_event_types() {
        assert_eq!(EventType::from(OperationType::Insert), EventType::Created);
        assert_eq!(EventType::from(OperationType::Modify), EventType::Updated);
        assert_eq!(EventType::from(OperationType::Remove), EventType::Deleted);
    }

    #[test]
    fn display_lists_every_field() {
        let event = DomainEvent {
            source: "orders".into(),
            event_type: EventType::Updated,
            id: "42".into(),
            pk: "orders#42".into(),
            sk: "meta".into(),
        };
        assert_eq!(
            event.to_string(),
            concat!(
                r#"Event{Source:"orders", Type:"updated", ID:"42", "#,
                r#"PK:"orders#42", SK:"meta"}"#,
            )
        );
    }
}
