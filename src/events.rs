// Audit trail: every change to a balance history is recorded as an event.
// Events are written inside the batch transaction and roll back with it.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{named_params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::corrector::CorrectionOutcome;
use crate::error::Result;
use crate::gap_fill::GapFillReport;
use crate::model::Correction;

pub const ENTITY_CREDIT_CARD: &str = "credit_card";
pub const EVENT_BALANCE_CORRECTED: &str = "balance_corrected";
pub const EVENT_GAPS_FILLED: &str = "balance_gaps_filled";
pub const EVENT_HISTORY_RECORDED: &str = "balance_recorded";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    /// Event for a correction applied by a batch
    pub fn correction_applied(
        correction: &Correction,
        outcome: &CorrectionOutcome,
        actor: &str,
    ) -> Self {
        Event::new(
            EVENT_BALANCE_CORRECTED,
            ENTITY_CREDIT_CARD,
            &correction.card_number,
            serde_json::json!({
                "date": correction.date,
                "amount": correction.amount.to_string(),
                "outcome": outcome,
            }),
            actor,
        )
    }

    /// Event for days synthesized before a correction
    pub fn gaps_filled(card_number: &str, report: &GapFillReport, actor: &str) -> Self {
        Event::new(
            EVENT_GAPS_FILLED,
            ENTITY_CREDIT_CARD,
            card_number,
            serde_json::json!(report),
            actor,
        )
    }

    // ------------------------------------------------------------------------
    // Persistence (`events` table, see `db::setup_database`)
    // ------------------------------------------------------------------------

    /// Append this event to the audit trail of `conn`
    pub fn append_to(&self, conn: &Connection) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
             VALUES (:event_id, :timestamp, :event_type, :entity_type, :entity_id, :data, :actor)",
        )?
        .execute(named_params! {
            ":event_id": self.event_id,
            ":timestamp": self.timestamp.to_rfc3339(),
            ":event_type": self.event_type,
            ":entity_type": self.entity_type,
            ":entity_id": self.entity_id,
            ":data": self.data.to_string(),
            ":actor": self.actor,
        })?;
        Ok(())
    }

    /// Audit trail of one entity in insertion order
    pub fn trail(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = :entity_type AND entity_id = :entity_id
             ORDER BY id",
        )?;
        let trail = stmt
            .query_map(
                named_params! { ":entity_type": entity_type, ":entity_id": entity_id },
                Event::from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(trail)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
        let timestamp: String = row.get("timestamp")?;
        let data: String = row.get("data")?;
        let invalid = |idx: usize, e: Box<dyn std::error::Error + Send + Sync>| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e)
        };

        Ok(Event {
            event_id: row.get("event_id")?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| invalid(1, Box::new(e)))?
                .with_timezone(&Utc),
            event_type: row.get("event_type")?,
            entity_type: row.get("entity_type")?,
            entity_id: row.get("entity_id")?,
            data: serde_json::from_str(&data).map_err(|e| invalid(5, Box::new(e)))?,
            actor: row.get("actor")?,
        })
    }
}
