use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    AccessGrant, AccountId, Amount, BillingFrequency, EventRecord, Notification, Payment, Service,
    ServiceId, Withdrawal,
};

use super::MIGRATION_001_INITIAL;

/// Immutable-after-bootstrap identities plus the two mutable manager
/// references. The owners never change; the contract references are
/// repointed via `set_payment_contract` / `set_access_contract`.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub registry_owner: AccountId,
    pub access_owner: AccountId,
    /// Identity the payment orchestrator presents when calling the access
    /// ledger.
    pub orchestrator_id: AccountId,
    /// Identity of the access ledger itself.
    pub access_ledger_id: AccountId,
    /// Caller the access ledger accepts as the payment-side manager.
    pub payment_contract: AccountId,
    /// Access ledger the orchestrator is pointed at.
    pub access_contract: AccountId,
}

/// Repository for persisting and querying the service catalog, access
/// grants, value ledger and event log.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given path.
    /// Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Configuration
    // ========================

    /// Record the bootstrap configuration. Fails if the ledger was already
    /// bootstrapped; owners are immutable after this point.
    pub async fn bootstrap(&self, config: &LedgerConfig) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let entries = [
            ("registry_owner", config.registry_owner),
            ("access_owner", config.access_owner),
            ("orchestrator_id", config.orchestrator_id),
            ("access_ledger_id", config.access_ledger_id),
            ("payment_contract", config.payment_contract),
            ("access_contract", config.access_contract),
        ];
        for (key, value) in entries {
            sqlx::query("INSERT INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to write ledger configuration (already initialized?)")?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Load the full ledger configuration.
    pub async fn get_config(&self) -> Result<LedgerConfig> {
        Ok(LedgerConfig {
            registry_owner: self.get_config_account("registry_owner").await?,
            access_owner: self.get_config_account("access_owner").await?,
            orchestrator_id: self.get_config_account("orchestrator_id").await?,
            access_ledger_id: self.get_config_account("access_ledger_id").await?,
            payment_contract: self.get_config_account("payment_contract").await?,
            access_contract: self.get_config_account("access_contract").await?,
        })
    }

    async fn get_config_account(&self, key: &str) -> Result<AccountId> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch configuration")?
            .with_context(|| format!("Missing configuration key '{}' (run `init` first)", key))?;
        let value: String = row.get("value");
        Uuid::parse_str(&value).with_context(|| format!("Invalid account id for '{}'", key))
    }

    async fn set_config_account(&self, key: &str, value: AccountId) -> Result<()> {
        sqlx::query("UPDATE config SET value = ? WHERE key = ?")
            .bind(value.to_string())
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to update configuration")?;
        Ok(())
    }

    /// Repoint the caller the access ledger accepts as payment-side manager.
    pub async fn set_payment_contract(&self, account: AccountId) -> Result<()> {
        self.set_config_account("payment_contract", account).await
    }

    /// Repoint the access ledger reference held by the orchestrator.
    pub async fn set_access_contract(&self, account: AccountId) -> Result<()> {
        self.set_config_account("access_contract", account).await
    }

    // ========================
    // Service catalog
    // ========================

    /// Save a new service, assigning the next sequential id, and record
    /// the creation notification in the same transaction.
    pub async fn save_service(&self, service: &mut Service) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT COUNT(*) AS count FROM services")
            .fetch_one(&mut *tx)
            .await
            .context("Failed to count services")?;
        service.id = row.get::<i64, _>("count");

        sqlx::query(
            r#"
            INSERT INTO services (id, is_active, price, frequency, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(service.id)
        .bind(service.is_active)
        .bind(service.price)
        .bind(service.frequency.as_str())
        .bind(service.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to save service")?;

        Self::insert_event(
            &mut tx,
            &Notification::ServiceCreated {
                service_id: service.id,
                price: service.price,
            },
            service.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Get a service by id.
    pub async fn get_service(&self, id: ServiceId) -> Result<Option<Service>> {
        let row = sqlx::query(
            "SELECT id, is_active, price, frequency, created_at FROM services WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch service")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_service(&row)?)),
            None => Ok(None),
        }
    }

    /// List the whole catalog in id order.
    pub async fn list_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query(
            "SELECT id, is_active, price, frequency, created_at FROM services ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list services")?;

        rows.iter().map(Self::row_to_service).collect()
    }

    /// Number of services ever created.
    pub async fn count_services(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM services")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count services")?;
        Ok(row.get("count"))
    }

    /// Update a service in place, recording the state-transition
    /// notification (if any) atomically with the change. Events carry the
    /// operation's timestamp, not the wall clock.
    pub async fn update_service(
        &self,
        service: &Service,
        notification: Option<&Notification>,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE services SET is_active = ?, price = ?, frequency = ? WHERE id = ?")
            .bind(service.is_active)
            .bind(service.price)
            .bind(service.frequency.as_str())
            .bind(service.id)
            .execute(&mut *tx)
            .await
            .context("Failed to update service")?;

        if let Some(notification) = notification {
            Self::insert_event(&mut tx, notification, recorded_at).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ========================
    // Access grants
    // ========================

    /// Get the grant record for a (service, client) pair.
    pub async fn get_grant(
        &self,
        service_id: ServiceId,
        client: AccountId,
    ) -> Result<Option<AccessGrant>> {
        let row = sqlx::query(
            r#"
            SELECT service_id, client, has_access, expires_at
            FROM access_grants
            WHERE service_id = ? AND client = ?
            "#,
        )
        .bind(service_id)
        .bind(client.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch access grant")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_grant(&row)?)),
            None => Ok(None),
        }
    }

    /// List all grant records ever created.
    pub async fn list_grants(&self) -> Result<Vec<AccessGrant>> {
        let rows = sqlx::query(
            "SELECT service_id, client, has_access, expires_at FROM access_grants ORDER BY service_id, client",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list access grants")?;

        rows.iter().map(Self::row_to_grant).collect()
    }

    /// Write a grant record (created lazily on first grant, overwritten in
    /// place afterwards) and the matching notification in one transaction.
    pub async fn save_grant(
        &self,
        grant: &AccessGrant,
        notification: &Notification,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_grant(&mut tx, grant).await?;
        Self::insert_event(&mut tx, notification, recorded_at).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Write a grant, its notification and the settling payment in one
    /// transaction: a storage fault cannot leave a grant without its
    /// receipt, or a receipt without its grant.
    pub async fn save_grant_and_payment(
        &self,
        grant: &AccessGrant,
        notification: &Notification,
        payment: &Payment,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_grant(&mut tx, grant).await?;
        Self::insert_event(&mut tx, notification, payment.paid_at).await?;
        Self::insert_payment(&mut tx, payment).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_grant(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        grant: &AccessGrant,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_grants (service_id, client, has_access, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (service_id, client)
            DO UPDATE SET has_access = excluded.has_access, expires_at = excluded.expires_at
            "#,
        )
        .bind(grant.service_id)
        .bind(grant.client.to_string())
        .bind(grant.has_access)
        .bind(grant.expires_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut **tx)
        .await
        .context("Failed to save access grant")?;
        Ok(())
    }

    // ========================
    // Value ledger
    // ========================

    async fn insert_payment(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        payment: &Payment,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, service_id, payer, client, amount, paid_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(payment.id.to_string())
        .bind(payment.service_id)
        .bind(payment.payer.to_string())
        .bind(payment.client.to_string())
        .bind(payment.amount)
        .bind(payment.paid_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to save payment")?;
        Ok(())
    }

    /// Record a withdrawal of the accumulated balance.
    pub async fn save_withdrawal(&self, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals (id, recipient, amount, withdrawn_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(withdrawal.id.to_string())
        .bind(withdrawal.recipient.to_string())
        .bind(withdrawal.amount)
        .bind(withdrawal.withdrawn_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save withdrawal")?;
        Ok(())
    }

    /// List all payments, oldest first.
    pub async fn list_payments(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT id, service_id, payer, client, amount, paid_at FROM payments ORDER BY paid_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payments")?;

        rows.iter().map(Self::row_to_payment).collect()
    }

    /// List all withdrawals, oldest first.
    pub async fn list_withdrawals(&self) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query(
            "SELECT id, recipient, amount, withdrawn_at FROM withdrawals ORDER BY withdrawn_at",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list withdrawals")?;

        rows.iter().map(Self::row_to_withdrawal).collect()
    }

    /// Current orchestrator balance: collected minus withdrawn.
    pub async fn compute_balance(&self) -> Result<Amount> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(amount), 0) FROM payments)
              - (SELECT COALESCE(SUM(amount), 0) FROM withdrawals) AS balance
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute balance")?;
        Ok(row.get("balance"))
    }

    // ========================
    // Event log
    // ========================

    /// List recorded notifications, oldest first.
    pub async fn list_events(&self, limit: Option<usize>) -> Result<Vec<EventRecord>> {
        let query = match limit {
            Some(limit) => format!(
                "SELECT sequence, kind, service_id, client, amount, expires_at, recorded_at \
                 FROM events ORDER BY sequence DESC LIMIT {}",
                limit
            ),
            None => "SELECT sequence, kind, service_id, client, amount, expires_at, recorded_at \
                     FROM events ORDER BY sequence DESC"
                .to_string(),
        };

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list events")?;

        let mut events: Vec<EventRecord> = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<Result<_>>()?;
        events.reverse();
        Ok(events)
    }

    async fn insert_event(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        notification: &Notification,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        let (client, amount, expires_at) = match notification {
            Notification::ServiceCreated { price, .. } => (None, Some(*price), None),
            Notification::ServiceStarted { .. } | Notification::ServiceStopped { .. } => {
                (None, None, None)
            }
            Notification::AccessGiven {
                client, expires_at, ..
            } => (Some(*client), None, Some(*expires_at)),
            Notification::AccessRetrieved { client, .. } => (Some(*client), None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO events (kind, service_id, client, amount, expires_at, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.kind())
        .bind(notification.service_id())
        .bind(client.map(|c| c.to_string()))
        .bind(amount)
        .bind(expires_at.map(|dt| dt.to_rfc3339()))
        .bind(recorded_at.to_rfc3339())
        .execute(&mut **tx)
        .await
        .context("Failed to record notification")?;
        Ok(())
    }

    // ========================
    // Row conversion
    // ========================

    fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> Result<Service> {
        let frequency_str: String = row.get("frequency");
        let created_at_str: String = row.get("created_at");

        Ok(Service {
            id: row.get("id"),
            is_active: row.get::<i32, _>("is_active") != 0,
            price: row.get("price"),
            frequency: BillingFrequency::from_str(&frequency_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid billing frequency: {}", frequency_str))?,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    fn row_to_grant(row: &sqlx::sqlite::SqliteRow) -> Result<AccessGrant> {
        let client_str: String = row.get("client");
        let expires_at_str: Option<String> = row.get("expires_at");

        Ok(AccessGrant {
            service_id: row.get("service_id"),
            client: Uuid::parse_str(&client_str).context("Invalid client ID")?,
            has_access: row.get::<i32, _>("has_access") != 0,
            expires_at: expires_at_str
                .map(|s| DateTime::parse_from_rfc3339(&s))
                .transpose()
                .context("Invalid expires_at timestamp")?
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }

    fn row_to_payment(row: &sqlx::sqlite::SqliteRow) -> Result<Payment> {
        let id_str: String = row.get("id");
        let payer_str: String = row.get("payer");
        let client_str: String = row.get("client");
        let paid_at_str: String = row.get("paid_at");

        Ok(Payment {
            id: Uuid::parse_str(&id_str).context("Invalid payment ID")?,
            service_id: row.get("service_id"),
            payer: Uuid::parse_str(&payer_str).context("Invalid payer ID")?,
            client: Uuid::parse_str(&client_str).context("Invalid client ID")?,
            amount: row.get("amount"),
            paid_at: DateTime::parse_from_rfc3339(&paid_at_str)
                .context("Invalid paid_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    fn row_to_withdrawal(row: &sqlx::sqlite::SqliteRow) -> Result<Withdrawal> {
        let id_str: String = row.get("id");
        let recipient_str: String = row.get("recipient");
        let withdrawn_at_str: String = row.get("withdrawn_at");

        Ok(Withdrawal {
            id: Uuid::parse_str(&id_str).context("Invalid withdrawal ID")?,
            recipient: Uuid::parse_str(&recipient_str).context("Invalid recipient ID")?,
            amount: row.get("amount"),
            withdrawn_at: DateTime::parse_from_rfc3339(&withdrawn_at_str)
                .context("Invalid withdrawn_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<EventRecord> {
        let kind: String = row.get("kind");
        let service_id: ServiceId = row.get("service_id");
        let client_str: Option<String> = row.get("client");
        let amount: Option<Amount> = row.get("amount");
        let expires_at_str: Option<String> = row.get("expires_at");
        let recorded_at_str: String = row.get("recorded_at");

        let client = client_str
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .context("Invalid client ID in event")?;
        let expires_at = expires_at_str
            .map(|s| DateTime::parse_from_rfc3339(&s))
            .transpose()
            .context("Invalid expires_at timestamp in event")?
            .map(|dt| dt.with_timezone(&Utc));

        let notification = match kind.as_str() {
            "service_created" => Notification::ServiceCreated {
                service_id,
                price: amount.context("service_created event missing price")?,
            },
            "service_started" => Notification::ServiceStarted { service_id },
            "service_stopped" => Notification::ServiceStopped { service_id },
            "access_given" => Notification::AccessGiven {
                service_id,
                client: client.context("access_given event missing client")?,
                expires_at: expires_at.context("access_given event missing expiration")?,
            },
            "access_retrieved" => Notification::AccessRetrieved {
                service_id,
                client: client.context("access_retrieved event missing client")?,
            },
            other => anyhow::bail!("Unknown event kind: {}", other),
        };

        Ok(EventRecord {
            sequence: row.get("sequence"),
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at_str)
                .context("Invalid recorded_at timestamp")?
                .with_timezone(&Utc),
            notification,
        })
    }
}
