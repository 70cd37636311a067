//! Turns application events into facts ready for publication.

use serde::Serialize;

use crate::codec::PayloadCodec;
use crate::error::Result;
use crate::fact::Fact;

/// An application event that can be converted into a fact.
///
/// Mirrors the naming convention of a stable, versioned type identifier
/// (e.g. `"OrderPlaced.v1"`) so schema evolution can be tracked the same
/// way event type identifiers are tracked elsewhere in the codebase.
pub trait ToFact: Serialize {
    /// The namespace this event's facts belong to.
    fn namespace(&self) -> &str;

    /// The fact type identifier, including its schema version suffix,
    /// e.g. `"OrderPlaced.v1"`.
    fn fact_type(&self) -> &'static str;

    /// The schema version encoded in this event's payload.
    fn schema_version(&self) -> u32;

    /// The aggregate id this event pertains to, if any.
    fn aggregate_id(&self) -> Option<&str> {
        None
    }
}

/// Converts typed application events into facts using a configured codec.
pub struct FactConverter<C> {
    codec: C,
}

impl<C: PayloadCodec> FactConverter<C> {
    /// Build a converter over the given codec.
    #[must_use]
    pub const fn new(codec: C) -> Self {
        Self { codec }
    }

    /// Convert `event` into a fact ready for publication.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::Serialization`] if the codec
    /// cannot encode the event's payload.
    pub fn to_fact<E: ToFact>(&self, event: &E) -> Result<Fact> {
        let payload = self.codec.encode(event)?;
        let mut fact = Fact::new(event.namespace(), event.fact_type(), event.schema_version(), payload);
        if let Some(aggregate_id) = event.aggregate_id() {
            fact = fact.with_header("aggregateId", aggregate_id);
        }
        Ok(fact)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::BincodeCodec;
    use serde::Serialize;

    #[derive(Serialize)]
    struct OrderPlaced {
        order_id: String,
    }

    impl ToFact for OrderPlaced {
        fn namespace(&self) -> &str {
            "orders"
        }

        fn fact_type(&self) -> &'static str {
            "OrderPlaced.v1"
        }

        fn schema_version(&self) -> u32 {
            1
        }

        fn aggregate_id(&self) -> Option<&str> {
            Some(&self.order_id)
        }
    }

    #[test]
    fn converts_event_into_fact_with_headers() {
        let converter = FactConverter::new(BincodeCodec);
        let event = OrderPlaced {
            order_id: "order-1".to_string(),
        };

        let fact = converter.to_fact(&event).unwrap();

        assert_eq!(fact.namespace, "orders");
        assert_eq!(fact.r#type, "OrderPlaced.v1");
        assert_eq!(fact.version, 1);
        assert_eq!(fact.headers.get("aggregateId"), Some(&"order-1".to_string()));
        assert!(!fact.payload.is_empty());
    }
}
