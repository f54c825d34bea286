//! Cross-context message protocol.
//!
//! Contexts share no memory; enforcement agents and configuration surfaces
//! talk to the background engine exclusively through these messages. The
//! wire names (`action` tag, camelCase fields) are part of the synchronized
//! schema and must stay stable across contexts.

use serde::{Deserialize, Serialize};

/// A message addressed to the background policy engine.
///
/// Delivery is asynchronous and unordered across contexts; a message may be
/// delayed arbitrarily or dropped if the target context is torn down. The
/// engine's handlers are pure recomputations from store state, so a dropped
/// message self-heals on the next trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    /// Report elapsed minutes for a monitored domain.
    ///
    /// `time_spent_minutes` is signed on the wire so that a malformed peer
    /// is rejected with `NegativeUsageDelta` instead of corrupting the
    /// ledger.
    #[serde(rename_all = "camelCase")]
    UpdateUsage {
        domain: String,
        time_spent_minutes: i64,
    },
    /// Force a rule recompilation pass.
    UpdateRules,
    /// Trigger the companion-state sync bridge.
    SyncFromApp,
    /// Forwarded to the external UI collaborator.
    OpenOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_match_schema() {
        let msg = Message::UpdateUsage {
            domain: "instagram.com".to_string(),
            time_spent_minutes: 3,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "updateUsage");
        assert_eq!(value["domain"], "instagram.com");
        assert_eq!(value["timeSpentMinutes"], 3);

        assert_eq!(
            serde_json::to_value(Message::UpdateRules).unwrap()["action"],
            "updateRules"
        );
        assert_eq!(
            serde_json::to_value(Message::SyncFromApp).unwrap()["action"],
            "syncFromApp"
        );
        assert_eq!(
            serde_json::to_value(Message::OpenOptions).unwrap()["action"],
            "openOptions"
        );
    }

    #[test]
    fn round_trips_from_wire_json() {
        let msg: Message = serde_json::from_str(
            r#"{"action":"updateUsage","domain":"tiktok.com","timeSpentMinutes":-2}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::UpdateUsage {
                domain: "tiktok.com".to_string(),
                time_spent_minutes: -2,
            }
        );
    }
}
