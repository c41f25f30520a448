use std::sync::Arc;

use cdc_stream::{BoxError, ChangeRecord, Envconfig, Invoker};
use tracing::info;

use crate::{
    event::{DomainEvent, EventType},
    handler::{EventHandler, HandlerRegistry},
};

#[derive(Envconfig, Clone, Debug)]
pub struct ProcessorConfig {
    #[envconfig(from = "CDC_PK_ATTR", default = "PK")]
    pub partition_key: String,
    #[envconfig(from = "CDC_SK_ATTR", default = "SK")]
    pub sort_key: String,
    #[envconfig(from = "CDC_KEY_DELIMITER", default = "#")]
    pub delimiter: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            partition_key: "PK".into(),
            sort_key: "SK".into(),
            delimiter: "#".into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("record `{event_id}` has no string key `{attribute}`")]
    MissingKey { event_id: String, attribute: String },
    #[error("invalid pk: {0}")]
    InvalidKey(String),
    #[error("handler for ({source_name}, {event_type}) failed: {error}")]
    Handler {
        source_name: String,
        event_type: EventType,
        #[source]
        error: BoxError,
    },
}

/// Converts change records into [`DomainEvent`]s and runs the handlers
/// registered for each event. Handlers must be registered before the
/// processor is handed to a subscription.
pub struct EventProcessor {
    config: ProcessorConfig,
    registry: HandlerRegistry,
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl EventProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
        }
    }

    pub fn register_handler<H>(
        &mut self,
        source: impl Into<String>,
        event_type: EventType,
        handler: H,
    ) where
        H: EventHandler,
    {
        self.registry.register(source, event_type, Arc::new(handler));
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Derives the event for a record without dispatching it.
    pub fn to_event(
        &self,
        record: &ChangeRecord,
    ) -> Result<DomainEvent, ProcessError> {
        let pk = self.string_key(record, &self.config.partition_key)?;
        let sk = record
            .key(&self.config.sort_key)
            .and_then(|v| v.as_s())
            .unwrap_or_default();

        let mut parts = pk.split(self.config.delimiter.as_str());
        let (source, id) = match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(id), None) => (source, id),
            _ => return Err(ProcessError::InvalidKey(pk.to_string())),
        };

        Ok(DomainEvent {
            source: source.to_string(),
            event_type: EventType::from(record.operation),
            id: id.to_string(),
            pk: pk.to_string(),
            sk: sk.to_string(),
        })
    }

    fn string_key<'r>(
        &self,
        record: &'r ChangeRecord,
        attribute: &str,
    ) -> Result<&'r str, ProcessError> {
        record
            .key(attribute)
            .and_then(|v| v.as_s())
            .ok_or_else(|| ProcessError::MissingKey {
                event_id: record.event_id.clone(),
                attribute: attribute.to_string(),
            })
    }

    /// Processes the batch in order. The first malformed key or handler
    /// error stops the batch and is returned.
    pub async fn process(
        &self,
        records: &[ChangeRecord],
    ) -> Result<(), ProcessError> {
        for record in records {
            let event = self.to_event(record)?;
            info!(event = %event, "processing change event");

            let handlers =
                self.registry.handlers(&event.source, event.event_type);
            for handler in handlers {
                info!(event = %event, "invoking registered handler");
                handler
                    .handle(&event)
                    .await
                    .map_err(|error| ProcessError::Handler {
                        source_name: event.source.clone(),
                        event_type: event.event_type,
                        error,
                    })?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Invoker for EventProcessor {
    async fn invoke(&self, records: &[ChangeRecord]) -> Result<(), BoxError> {
        self.process(records).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cdc_stream::OperationType;
    use tracing_test::traced_test;

    use super::*;
    use crate::handler::handler_fn;

    type Seen = Arc<Mutex<Vec<String>>>;

    fn record(op: OperationType, pk: &str) -> ChangeRecord {
        ChangeRecord::new(op, "1")
            .with_key("PK", pk)
            .with_key("SK", "meta")
    }

    fn recording(
        seen: &Seen,
        label: &'static str,
    ) -> impl EventHandler + use<> {
        let seen = seen.clone();
        handler_fn(move |event: DomainEvent| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(format!("{label}:{}", event.id));
                Ok::<(), BoxError>(())
            }
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn insert_is_routed_to_created_handlers_only() {
        let seen = Seen::default();
        let mut processor = EventProcessor::default();
        processor.register_handler(
            "orders",
            EventType::Created,
            recording(&seen, "created"),
        );
        processor.register_handler(
            "orders",
            EventType::Updated,
            recording(&seen, "updated"),
        );
        processor.register_handler(
            "users",
            EventType::Created,
            recording(&seen, "users"),
        );

        let insert = record(OperationType::Insert, "orders#1234");
        let event = processor.to_event(&insert).unwrap();
        assert_eq!(
            event,
            DomainEvent {
                source: "orders".into(),
                event_type: EventType::Created,
                id: "1234".into(),
                pk: "orders#1234".into(),
                sk: "meta".into(),
            }
        );

        processor.process(&[insert]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["created:1234"]);
        assert!(logs_contain("processing change event"));
    }

    #[tokio::test]
    async fn key_without_delimiter_fails_before_any_handler() {
        let seen = Seen::default();
        let mut processor = EventProcessor::default();
        processor.register_handler(
            "orders",
            EventType::Created,
            recording(&seen, "created"),
        );

        let err = processor
            .process(&[record(OperationType::Insert, "orders1234")])
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProcessError::InvalidKey(pk) if pk == "orders1234")
        );

        let err = processor
            .process(&[record(OperationType::Insert, "orders#12#34")])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::InvalidKey(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_partition_key_is_an_error() {
        let processor = EventProcessor::default();
        let bare = ChangeRecord::new(OperationType::Remove, "7");
        let err = processor.process(&[bare]).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessError::MissingKey { attribute, .. } if attribute == "PK"
        ));
    }

    #[tokio::test]
    async fn handler_error_stops_the_rest_of_the_batch() {
        let seen = Seen::default();
        let mut processor = EventProcessor::default();
        let calls = seen.clone();
        processor.register_handler(
            "orders",
            EventType::Updated,
            handler_fn(move |event: DomainEvent| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(event.id.clone());
                    if event.id == "2" {
                        return Err::<(), BoxError>(
                            "handler rejected 2".into(),
                        );
                    }
                    Ok(())
                }
            }),
        );

        let batch = [
            record(OperationType::Modify, "orders#1"),
            record(OperationType::Modify, "orders#2"),
            record(OperationType::Modify, "orders#3"),
        ];
        let err = processor.process(&batch).await.unwrap_err();
        assert!(matches!(
            &err,
            ProcessError::Handler {
                source_name,
                event_type: EventType::Updated,
                ..
            } if source_name == "orders"
        ));
        assert!(err.to_string().contains("handler rejected 2"));
        assert_eq!(*seen.lock().unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn handlers_run_in_order_and_unmatched_records_are_skipped() {
        let seen = Seen::default();
        let mut processor = EventProcessor::default();
        processor.register_handler(
            "orders",
            EventType::Deleted,
            recording(&seen, "first"),
        );
        processor.register_handler(
            "orders",
            EventType::Deleted,
            recording(&seen, "second"),
        );
        assert_eq!(processor.registry().len(), 2);

        let batch = [
            record(OperationType::Insert, "users#9"),
            record(OperationType::Remove, "orders#5"),
        ];
        processor.invoke(&batch).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first:5", "second:5"]);
    }

    #[tokio::test]
    async fn custom_key_layout() {
        let processor = EventProcessor::new(ProcessorConfig {
            partition_key: "pk".into(),
            sort_key: "sk".into(),
            delimiter: "::".into(),
        });
        let record = ChangeRecord::new(OperationType::Modify, "1")
            .with_key("pk", "invoices::77");
        let event = processor.to_event(&record).unwrap();
        assert_eq!(event.source, "invoices");
        assert_eq!(event.id, "77");
        assert_eq!(event.sk, "");
    }
}
