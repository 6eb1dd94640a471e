use gather_models::gateway::SendTarget;
use gather_models::{DeliveryReceipt, DeliveryState};

/// A message shown in the UI before the server confirmed it.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub client_id: String,
    pub to: SendTarget,
    pub content: String,
    pub state: DeliveryState,
}

/// Outcome of applying a receipt to the optimistic list.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Confirmed {
        client_id: String,
        id: String,
    },
    /// The entry left the visible list; `content` goes back to the
    /// compose field so the user can retry deliberately.
    Failed {
        client_id: String,
        content: String,
    },
}

/// Pure reconciliation step: remove the optimistic entry the receipt
/// correlates with and report what happened to it. A receipt for an
/// unknown client id (e.g. one that already timed out) is a no-op.
pub fn reconcile(entries: &mut Vec<OutboxEntry>, receipt: &DeliveryReceipt) -> Option<Reconciled> {
    let index = entries
        .iter()
        .position(|entry| entry.client_id == receipt.client_id())?;
    let entry = entries.remove(index);
    match receipt {
        DeliveryReceipt::Confirmed { id, .. } => Some(Reconciled::Confirmed {
            client_id: entry.client_id,
            id: id.clone(),
        }),
        DeliveryReceipt::Failed { .. } => Some(Reconciled::Failed {
            client_id: entry.client_id,
            content: entry.content,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gather_models::RoomKey;

    fn entry(client_id: &str) -> OutboxEntry {
        OutboxEntry {
            client_id: client_id.into(),
            to: SendTarget::Room(RoomKey::topic("t")),
            content: format!("content of {client_id}"),
            state: DeliveryState::Optimistic,
        }
    }

    #[test]
    fn confirmation_removes_the_entry_and_yields_the_server_id() {
        let mut entries = vec![entry("c1"), entry("c2")];
        let outcome = reconcile(
            &mut entries,
            &DeliveryReceipt::Confirmed {
                client_id: "c1".into(),
                id: "srv-9".into(),
                created_at: chrono::Utc::now(),
            },
        );
        assert_eq!(
            outcome,
            Some(Reconciled::Confirmed {
                client_id: "c1".into(),
                id: "srv-9".into(),
            })
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].client_id, "c2");
    }

    #[test]
    fn failure_returns_the_content_for_the_compose_field() {
        let mut entries = vec![entry("c1")];
        let outcome = reconcile(
            &mut entries,
            &DeliveryReceipt::Failed {
                client_id: "c1".into(),
                reason: "store down".into(),
            },
        );
        assert_eq!(
            outcome,
            Some(Reconciled::Failed {
                client_id: "c1".into(),
                content: "content of c1".into(),
            })
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn unknown_receipt_is_a_no_op() {
        let mut entries = vec![entry("c1")];
        let outcome = reconcile(
            &mut entries,
            &DeliveryReceipt::Failed {
                client_id: "ghost".into(),
                reason: "late".into(),
            },
        );
        assert_eq!(outcome, None);
        assert_eq!(entries.len(), 1);
    }
}
