use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::domain::{AccessGrant, EventRecord, Notification, Payment, Service, Withdrawal};
use crate::storage::Repository;

/// Database snapshot for full export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub services: Vec<Service>,
    pub grants: Vec<AccessGrant>,
    pub payments: Vec<Payment>,
    pub withdrawals: Vec<Withdrawal>,
    pub events: Vec<EventRecord>,
}

/// Exporter for converting ledger data to various formats
pub struct Exporter<'a> {
    repo: &'a Repository,
}

impl<'a> Exporter<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Export the payment ledger to CSV format
    pub async fn export_payments_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let payments = self.repo.list_payments().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "service_id",
            "payer",
            "client",
            "amount",
            "paid_at",
        ])?;

        let mut count = 0;
        for payment in &payments {
            csv_writer.write_record(&[
                payment.id.to_string(),
                payment.service_id.to_string(),
                payment.payer.to_string(),
                payment.client.to_string(),
                payment.amount.to_string(),
                payment.paid_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the event log to CSV format
    pub async fn export_events_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let events = self.repo.list_events(None).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "sequence",
            "recorded_at",
            "kind",
            "service_id",
            "client",
            "price",
            "expires_at",
        ])?;

        let mut count = 0;
        for event in &events {
            let (client, price, expires_at) = match &event.notification {
                Notification::ServiceCreated { price, .. } => {
                    (String::new(), price.to_string(), String::new())
                }
                Notification::ServiceStarted { .. } | Notification::ServiceStopped { .. } => {
                    (String::new(), String::new(), String::new())
                }
                Notification::AccessGiven {
                    client, expires_at, ..
                } => (client.to_string(), String::new(), expires_at.to_rfc3339()),
                Notification::AccessRetrieved { client, .. } => {
                    (client.to_string(), String::new(), String::new())
                }
            };

            csv_writer.write_record(&[
                event.sequence.to_string(),
                event.recorded_at.to_rfc3339(),
                event.notification.kind().to_string(),
                event.notification.service_id().to_string(),
                client,
                price,
                expires_at,
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the full database as a JSON snapshot
    pub async fn export_snapshot_json<W: Write>(&self, writer: W) -> Result<()> {
        let snapshot = DatabaseSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            services: self.repo.list_services().await?,
            grants: self.repo.list_grants().await?,
            payments: self.repo.list_payments().await?,
            withdrawals: self.repo.list_withdrawals().await?,
            events: self.repo.list_events(None).await?,
        };

        serde_json::to_writer_pretty(writer, &snapshot)?;
        Ok(())
    }
}
