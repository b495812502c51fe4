use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::order::{
        ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        StatusHistoryEntry,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::NotificationService,
};

/// Admin-settable fulfillment stages, in canonical forward order. The data
/// model carries more statuses (pending, delivered, cancelled) but only these
/// are reachable through the guarded transition path.
pub const WORKFLOW_SEQUENCE: &[&str] = &["confirmed", "preparing", "shipped"];

fn sequence_index(status: &str) -> Option<usize> {
    WORKFLOW_SEQUENCE.iter().position(|s| *s == status)
}

/// Outcome of a status-update request, including the soft notification result.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusChangeOutcome {
    #[serde(skip)]
    pub order: OrderModel,
    pub status_changed: bool,
    pub previous_status: String,
    pub notification_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_error: Option<String>,
}

/// Forward-only fulfillment pipeline with notification side effects.
#[derive(Clone)]
pub struct OrderStatusService {
    db: Arc<DatabaseConnection>,
    config: AppConfig,
    notifier: Arc<dyn NotificationService>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderStatusService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        notifier: Arc<dyn NotificationService>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            config,
            notifier,
            event_sender,
        }
    }

    /// Validates if a requested transition is allowed from the current status.
    /// Regressions within the canonical sequence are rejected; equal and
    /// forward moves (including skips) are accepted. A current status outside
    /// the sequence does not block the move.
    fn is_valid_transition(from_status: &str, to_status: &str) -> bool {
        match (sequence_index(from_status), sequence_index(to_status)) {
            (Some(from), Some(to)) => to >= from,
            (None, Some(_)) => true,
            // Requested status must always be a sequence member; callers
            // validate this first, so this arm only guards internal misuse.
            (_, None) => false,
        }
    }

    /// Updates the fulfillment status of an order with validation, appending
    /// to the status history and dispatching the per-status notification.
    /// Actor and note are explicit parameters; nothing is staged on the
    /// record between calls.
    #[instrument(skip(self, note), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: &str,
        actor: Option<String>,
        note: Option<String>,
    ) -> Result<StatusChangeOutcome, ServiceError> {
        if sequence_index(new_status).is_none() {
            error!("Invalid order status: {}", new_status);
            return Err(ServiceError::ValidationError(format!(
                "Invalid status: {}. Valid statuses are: {:?}",
                new_status, WORKFLOW_SEQUENCE
            )));
        }

        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.order_status.clone();

        if !Self::is_valid_transition(&old_status, new_status) {
            error!(
                "Invalid status transition from {} to {}",
                old_status, new_status
            );
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition from status '{}' to '{}'",
                old_status, new_status
            )));
        }

        if old_status == new_status {
            info!("Status unchanged, accepting as no-op");
            return Ok(StatusChangeOutcome {
                order,
                status_changed: false,
                previous_status: old_status,
                notification_sent: false,
                notification_error: None,
            });
        }

        let mut history = order.history().map_err(|e| {
            ServiceError::SerializationError(format!(
                "order {} has undecodable status history: {}",
                order_id, e
            ))
        })?;
        history.push(StatusHistoryEntry {
            status: new_status.to_string(),
            timestamp: Utc::now(),
            actor: actor.unwrap_or_else(|| "admin".to_string()),
            note: note.clone(),
        });

        let mut active: OrderActiveModel = order.into();
        active.order_status = Set(new_status.to_string());
        active.status_history = Set(serde_json::to_value(&history)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?);
        if let Some(note) = note {
            active.notes = Set(Some(note));
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        info!(
            "Order {} status updated from '{}' to '{}'",
            order_id, old_status, new_status
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.clone(),
                    new_status: new_status.to_string(),
                })
                .await
            {
                warn!(error = %e, "Failed to send status changed event");
            }
        }

        // Notification is best-effort: a failed send never rolls back the
        // committed status change.
        let (notification_sent, notification_error) =
            match self.config.template_for_status(new_status) {
                Some(template_id) => match self.notifier.send_status_email(&updated, template_id).await
                {
                    Ok(()) => (true, None),
                    Err(e) => {
                        warn!(error = %e, "Status notification failed");
                        (false, Some(e.to_string()))
                    }
                },
                None => (false, None),
            };

        Ok(StatusChangeOutcome {
            order: updated,
            status_changed: true,
            previous_status: old_status,
            notification_sent,
            notification_error,
        })
    }

    /// Gets the current fulfillment status of an order
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_status(&self, order_id: Uuid) -> Result<String, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        Ok(order.order_status)
    }

    /// The canonical sequence and per-status template mapping, for client UI.
    pub fn workflow_info(&self) -> WorkflowInfo {
        WorkflowInfo {
            sequence: WORKFLOW_SEQUENCE.iter().map(|s| s.to_string()).collect(),
            templates: WORKFLOW_SEQUENCE
                .iter()
                .filter_map(|status| {
                    self.config
                        .template_for_status(status)
                        .map(|template_id| StatusTemplate {
                            status: status.to_string(),
                            template_id,
                        })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowInfo {
    pub sequence: Vec<String>,
    pub templates: Vec<StatusTemplate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusTemplate {
    pub status: String,
    pub template_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regressions_are_rejected() {
        assert!(!OrderStatusService::is_valid_transition("shipped", "preparing"));
        assert!(!OrderStatusService::is_valid_transition("preparing", "confirmed"));
    }

    #[test]
    fn forward_and_skip_transitions_are_accepted() {
        assert!(OrderStatusService::is_valid_transition("confirmed", "preparing"));
        assert!(OrderStatusService::is_valid_transition("confirmed", "shipped"));
    }

    #[test]
    fn same_status_is_accepted() {
        assert!(OrderStatusService::is_valid_transition("preparing", "preparing"));
    }

    #[test]
    fn unmanaged_current_status_does_not_block() {
        assert!(OrderStatusService::is_valid_transition("pending", "confirmed"));
        assert!(OrderStatusService::is_valid_transition("pending", "shipped"));
    }

    #[test]
    fn target_outside_sequence_is_rejected() {
        assert!(!OrderStatusService::is_valid_transition("confirmed", "delivered"));
        assert!(!OrderStatusService::is_valid_transition("confirmed", "cancelled"));
    }
}
