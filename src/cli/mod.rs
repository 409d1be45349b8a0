use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{
    bootstrap_ledger, integrity_report, revenue_report, AccessController, AccessService,
    CallContext, PaymentService, RegistryService,
};
use crate::domain::{parse_amount, AccountId, BillingFrequency, Notification, ServiceId};
use crate::io::Exporter;
use crate::storage::Repository;

/// Tollgate - Service Access & Payment Ledger
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(about = "A local-first service-access and metered-payment ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "tollgate.db")]
    pub database: String,

    /// Caller identity (UUID) presented to authorization checks
    #[arg(short, long, global = true)]
    pub caller: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new ledger database
    Init {
        /// Registry owner identity (UUID, generated if omitted)
        #[arg(long)]
        owner: Option<String>,

        /// Access ledger owner identity (defaults to the registry owner)
        #[arg(long)]
        access_owner: Option<String>,
    },

    /// Service catalog commands
    #[command(subcommand)]
    Service(ServiceCommands),

    /// Access ledger commands
    #[command(subcommand)]
    Access(AccessCommands),

    /// Pay for a service (exact price required)
    Pay {
        /// Service id
        service: ServiceId,

        /// Value to attach (must equal the service price exactly)
        amount: String,

        /// Pay on behalf of this client instead of the caller
        #[arg(long = "for")]
        client: Option<String>,
    },

    /// Withdraw the entire collected balance to the owner
    Withdraw,

    /// Show the collected balance
    Balance,

    /// List recorded payments
    Payments,

    /// List recorded notifications
    Events {
        /// Maximum number of events to show (most recent)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Per-service revenue report
    Report,

    /// Verify ledger integrity
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: payments, events, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Create a new service (starts active)
    Create {
        /// Price in native value units
        price: String,

        /// Billing frequency: one_time, monthly, yearly
        #[arg(short, long)]
        frequency: String,
    },

    /// Reactivate a stopped service
    Start {
        /// Service id
        id: ServiceId,
    },

    /// Stop accepting payments for a service
    Stop {
        /// Service id
        id: ServiceId,
    },

    /// Change the price (future payments only)
    SetPrice {
        /// Service id
        id: ServiceId,

        /// New price in native value units
        price: String,
    },

    /// Change the billing frequency (future payments only)
    SetFrequency {
        /// Service id
        id: ServiceId,

        /// New frequency: one_time, monthly, yearly
        frequency: String,
    },

    /// List the whole catalog
    List,

    /// Show a single service
    Show {
        /// Service id
        id: ServiceId,
    },
}

#[derive(Subcommand)]
pub enum AccessCommands {
    /// Grant access to a client directly (managers only)
    Grant {
        /// Service id
        service: ServiceId,

        /// Client identity (UUID)
        client: String,

        /// Expiration (RFC 3339 or YYYY-MM-DD)
        #[arg(short, long)]
        expires: String,
    },

    /// Revoke a live grant
    Revoke {
        /// Service id
        service: ServiceId,

        /// Client identity (UUID)
        client: String,
    },

    /// Check a grant against the clock, lazily revoking it if expired
    Verify {
        /// Service id
        service: ServiceId,

        /// Client identity (UUID)
        client: String,
    },

    /// Show the stored grant record for a pair
    Show {
        /// Service id
        service: ServiceId,

        /// Client identity (UUID)
        client: String,
    },

    /// Hand grant/revoke authority to a new payment-side caller
    LinkPayment {
        /// New payment contract identity (UUID)
        address: String,
    },
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Init {
                owner,
                access_owner,
            } => {
                let registry_owner = match owner {
                    Some(s) => parse_account(s)?,
                    None => Uuid::new_v4(),
                };
                let access_owner = match access_owner {
                    Some(s) => parse_account(s)?,
                    None => registry_owner,
                };

                let db_url = format!("sqlite:{}?mode=rwc", self.database);
                let repo = Repository::init(&db_url).await?;
                let config = bootstrap_ledger(&repo, registry_owner, access_owner).await?;

                println!("Initialized ledger: {}", self.database);
                println!("  Registry owner:   {}", config.registry_owner);
                println!("  Access owner:     {}", config.access_owner);
                println!("  Payment contract: {}", config.payment_contract);
                println!("  Access contract:  {}", config.access_contract);
            }

            Commands::Service(cmd) => {
                let repo = self.connect().await?;
                let registry = RegistryService::new(repo);
                self.run_service_command(&registry, cmd).await?;
            }

            Commands::Access(cmd) => {
                let repo = self.connect().await?;
                let access = AccessService::new(repo);
                self.run_access_command(&access, cmd).await?;
            }

            Commands::Pay {
                service,
                amount,
                client,
            } => {
                let repo = self.connect().await?;
                let payments = PaymentService::new(repo.clone(), AccessService::new(repo));
                let ctx = self.call_context()?;
                let value = parse_amount(amount).context("Invalid amount")?;

                let receipt = match client {
                    Some(client) => {
                        let client = parse_account(client)?;
                        payments
                            .pay_service_from(&ctx, *service, client, value)
                            .await?
                    }
                    None => payments.pay_service(&ctx, *service, value).await?,
                };

                println!(
                    "Paid {} for service {} (client {})",
                    receipt.payment.amount, receipt.payment.service_id, receipt.payment.client
                );
                println!(
                    "Access granted until {}",
                    receipt
                        .grant
                        .expires_at
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_default()
                );
            }

            Commands::Withdraw => {
                let repo = self.connect().await?;
                let payments = PaymentService::new(repo.clone(), AccessService::new(repo));
                let ctx = self.call_context()?;

                let withdrawal = payments.withdraw_funds(&ctx).await?;
                println!(
                    "Withdrew {} to {}",
                    withdrawal.amount, withdrawal.recipient
                );
            }

            Commands::Balance => {
                let repo = self.connect().await?;
                let payments = PaymentService::new(repo.clone(), AccessService::new(repo));
                println!("Balance: {}", payments.collected_balance().await?);
            }

            Commands::Payments => {
                let repo = self.connect().await?;
                let payments = repo.list_payments().await?;
                if payments.is_empty() {
                    println!("No payments recorded.");
                } else {
                    println!("{:<10} {:<38} {:<12} {}", "SERVICE", "CLIENT", "AMOUNT", "PAID AT");
                    println!("{}", "-".repeat(90));
                    for payment in payments {
                        println!(
                            "{:<10} {:<38} {:<12} {}",
                            payment.service_id,
                            payment.client,
                            payment.amount,
                            payment.paid_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }

            Commands::Events { limit } => {
                let repo = self.connect().await?;
                let events = repo.list_events(*limit).await?;
                if events.is_empty() {
                    println!("No events recorded.");
                } else {
                    for event in events {
                        println!(
                            "#{:<5} {} {}",
                            event.sequence,
                            event.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                            describe_notification(&event.notification)
                        );
                    }
                }
            }

            Commands::Report => {
                let repo = self.connect().await?;
                let report = revenue_report(&repo).await?;

                println!(
                    "{:<10} {:<8} {:<10} {:<10} {:<10} {}",
                    "SERVICE", "ACTIVE", "PRICE", "FREQ", "PAYMENTS", "COLLECTED"
                );
                println!("{}", "-".repeat(64));
                for entry in &report.services {
                    println!(
                        "{:<10} {:<8} {:<10} {:<10} {:<10} {}",
                        entry.service_id,
                        if entry.is_active { "yes" } else { "no" },
                        entry.price,
                        entry.frequency,
                        entry.payment_count,
                        entry.collected
                    );
                }
                println!();
                println!("Total collected: {}", report.total_collected);
                println!("Total withdrawn: {}", report.total_withdrawn);
                println!("Balance:         {}", report.balance);
            }

            Commands::Check => {
                let repo = self.connect().await?;
                let report = integrity_report(&repo, Utc::now()).await?;

                println!("Services:        {}", report.service_count);
                println!(
                    "Grants:          {} ({} live, {} stale)",
                    report.grant_count, report.live_grant_count, report.stale_grant_count
                );
                println!("Payments:        {}", report.payment_count);
                println!("Withdrawals:     {}", report.withdrawal_count);
                println!("Balance:         {}", report.balance);
                if report.stale_grant_count > 0 {
                    println!(
                        "Note: stale grants stay held until inspected (`access verify`)."
                    );
                }
                if report.is_consistent {
                    println!("Integrity: OK");
                } else {
                    println!(
                        "Integrity: FAILED ({} orphan grants, {} grants missing expiration)",
                        report.orphan_grant_count, report.grants_missing_expiration
                    );
                }
            }

            Commands::Export {
                export_type,
                output,
            } => {
                let repo = self.connect().await?;
                let exporter = Exporter::new(&repo);

                let mut writer: Box<dyn std::io::Write> = match output {
                    Some(path) => Box::new(
                        std::fs::File::create(path).context("Failed to create output file")?,
                    ),
                    None => Box::new(std::io::stdout()),
                };

                match export_type.as_str() {
                    "payments" => {
                        let count = exporter.export_payments_csv(&mut writer).await?;
                        eprintln!("Exported {} payments", count);
                    }
                    "events" => {
                        let count = exporter.export_events_csv(&mut writer).await?;
                        eprintln!("Exported {} events", count);
                    }
                    "full" => {
                        exporter.export_snapshot_json(&mut writer).await?;
                        eprintln!("Exported full snapshot");
                    }
                    other => {
                        anyhow::bail!(
                            "Unknown export type '{}'. Valid types: payments, events, full",
                            other
                        );
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect(&self) -> Result<Repository> {
        Repository::connect(&format!("sqlite:{}", self.database)).await
    }

    fn call_context(&self) -> Result<CallContext> {
        let caller = self
            .caller
            .as_deref()
            .context("This command requires --caller")?;
        Ok(CallContext::current(parse_account(caller)?))
    }

    async fn run_service_command(
        &self,
        registry: &RegistryService,
        cmd: &ServiceCommands,
    ) -> Result<()> {
        match cmd {
            ServiceCommands::Create { price, frequency } => {
                let ctx = self.call_context()?;
                let price = parse_amount(price).context("Invalid price")?;
                let frequency = parse_frequency(frequency)?;

                let service = registry.create_service(&ctx, price, frequency).await?;
                println!(
                    "Created service {} (price {}, {})",
                    service.id, service.price, service.frequency
                );
            }

            ServiceCommands::Start { id } => {
                let ctx = self.call_context()?;
                registry.start_service(&ctx, *id).await?;
                println!("Started service {}", id);
            }

            ServiceCommands::Stop { id } => {
                let ctx = self.call_context()?;
                registry.stop_service(&ctx, *id).await?;
                println!("Stopped service {}", id);
            }

            ServiceCommands::SetPrice { id, price } => {
                let ctx = self.call_context()?;
                let price = parse_amount(price).context("Invalid price")?;
                let service = registry.change_service_price(&ctx, *id, price).await?;
                println!("Service {} price set to {}", service.id, service.price);
            }

            ServiceCommands::SetFrequency { id, frequency } => {
                let ctx = self.call_context()?;
                let frequency = parse_frequency(frequency)?;
                let service = registry
                    .change_service_frequency(&ctx, *id, frequency)
                    .await?;
                println!(
                    "Service {} frequency set to {}",
                    service.id, service.frequency
                );
            }

            ServiceCommands::List => {
                let services = registry.list_services().await?;
                if services.is_empty() {
                    println!("No services in the catalog.");
                } else {
                    println!("{:<10} {:<8} {:<10} {}", "ID", "ACTIVE", "PRICE", "FREQUENCY");
                    println!("{}", "-".repeat(40));
                    for service in services {
                        println!(
                            "{:<10} {:<8} {:<10} {}",
                            service.id,
                            if service.is_active { "yes" } else { "no" },
                            service.price,
                            service.frequency
                        );
                    }
                }
            }

            ServiceCommands::Show { id } => {
                let service = registry.get_service(*id).await?;
                println!("Service {}", service.id);
                println!("  Active:    {}", if service.is_active { "yes" } else { "no" });
                println!("  Price:     {}", service.price);
                println!("  Frequency: {}", service.frequency);
                println!(
                    "  Created:   {}",
                    service.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Ok(())
    }

    async fn run_access_command(&self, access: &AccessService, cmd: &AccessCommands) -> Result<()> {
        match cmd {
            AccessCommands::Grant {
                service,
                client,
                expires,
            } => {
                let ctx = self.call_context()?;
                let client = parse_account(client)?;
                let expires_at = parse_expiry(expires)?;

                let grant = access.give_access(&ctx, *service, client, expires_at).await?;
                println!(
                    "Granted access to {} for service {} until {}",
                    grant.client,
                    grant.service_id,
                    grant.expires_at.map(|dt| dt.to_rfc3339()).unwrap_or_default()
                );
            }

            AccessCommands::Revoke { service, client } => {
                let ctx = self.call_context()?;
                let client = parse_account(client)?;
                access.retrieve_access(&ctx, *service, client).await?;
                println!("Revoked access to {} for service {}", client, service);
            }

            AccessCommands::Verify { service, client } => {
                let ctx = self.call_context()?;
                let client = parse_account(client)?;
                let valid = access.verify_access(&ctx, *service, client).await?;
                if valid {
                    println!("Access valid");
                } else {
                    println!("Access expired and has been revoked");
                }
            }

            AccessCommands::Show { service, client } => {
                let client = parse_account(client)?;
                let has_access = access.get_access(*service, client).await?;
                let expires_at = access.get_expiration_date(*service, client).await?;
                println!("Service:   {}", service);
                println!("Client:    {}", client);
                println!("Access:    {}", if has_access { "yes" } else { "no" });
                println!(
                    "Expires:   {}",
                    expires_at.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "-".to_string())
                );
            }

            AccessCommands::LinkPayment { address } => {
                let ctx = self.call_context()?;
                let address = parse_account(address)?;
                access.set_payment_contract(&ctx, address).await?;
                println!("Payment contract set to {}", address);
            }
        }

        Ok(())
    }
}

fn parse_account(input: &str) -> Result<AccountId> {
    Uuid::parse_str(input).context("Invalid account identity (expected UUID)")
}

fn parse_frequency(input: &str) -> Result<BillingFrequency> {
    BillingFrequency::from_str(input).with_context(|| {
        format!(
            "Invalid billing frequency '{}'. Valid values: one_time, monthly, yearly",
            input
        )
    })
}

/// Accepts RFC 3339 timestamps or plain dates (midnight UTC).
fn parse_expiry(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .context("Invalid expiration (expected RFC 3339 or YYYY-MM-DD)")?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

fn describe_notification(notification: &Notification) -> String {
    match notification {
        Notification::ServiceCreated { service_id, price } => {
            format!("ServiceCreated(service={}, price={})", service_id, price)
        }
        Notification::ServiceStarted { service_id } => {
            format!("ServiceStarted(service={})", service_id)
        }
        Notification::ServiceStopped { service_id } => {
            format!("ServiceStopped(service={})", service_id)
        }
        Notification::AccessGiven {
            service_id,
            client,
            expires_at,
        } => format!(
            "AccessGiven(service={}, client={}, expires={})",
            service_id,
            client,
            expires_at.to_rfc3339()
        ),
        Notification::AccessRetrieved { service_id, client } => {
            format!("AccessRetrieved(service={}, client={})", service_id, client)
        }
    }
}
