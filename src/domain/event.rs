use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Amount, ServiceId};

/// Append-only notifications, recorded in the same transaction as the
/// state change they describe. A failed operation records nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ServiceCreated {
        service_id: ServiceId,
        price: Amount,
    },
    ServiceStarted {
        service_id: ServiceId,
    },
    ServiceStopped {
        service_id: ServiceId,
    },
    AccessGiven {
        service_id: ServiceId,
        client: AccountId,
        expires_at: DateTime<Utc>,
    },
    AccessRetrieved {
        service_id: ServiceId,
        client: AccountId,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ServiceCreated { .. } => "service_created",
            Notification::ServiceStarted { .. } => "service_started",
            Notification::ServiceStopped { .. } => "service_stopped",
            Notification::AccessGiven { .. } => "access_given",
            Notification::AccessRetrieved { .. } => "access_retrieved",
        }
    }

    pub fn service_id(&self) -> ServiceId {
        match self {
            Notification::ServiceCreated { service_id, .. }
            | Notification::ServiceStarted { service_id }
            | Notification::ServiceStopped { service_id }
            | Notification::AccessGiven { service_id, .. }
            | Notification::AccessRetrieved { service_id, .. } => *service_id,
        }
    }
}

/// A notification as persisted: the log assigns the sequence number and
/// the recording time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: i64,
    pub recorded_at: DateTime<Utc>,
    pub notification: Notification,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_notification_kind() {
        let client = Uuid::new_v4();
        let expires_at = Utc::now();
        assert_eq!(
            Notification::ServiceCreated {
                service_id: 0,
                price: 10
            }
            .kind(),
            "service_created"
        );
        assert_eq!(
            Notification::AccessGiven {
                service_id: 2,
                client,
                expires_at
            }
            .kind(),
            "access_given"
        );
        assert_eq!(
            Notification::AccessRetrieved {
                service_id: 2,
                client
            }
            .service_id(),
            2
        );
    }
}
