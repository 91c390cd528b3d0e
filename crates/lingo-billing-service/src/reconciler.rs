//! Subscription reconciler.
//!
//! Applies normalized [`BillingEvent`]s to billing accounts. Each event is
//! committed exactly once: the account update, payment record, notifications
//! and idempotency receipt land in one store write, guarded by the account
//! version. Emails go out after the commit and never affect the outcome.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;

use lingo_billing_core::{
    format_amount, BillingAccount, BillingEvent, BillingEventKind, EventDisposition, Notification,
    NotificationKind, PaymentApplied, PaymentHistoryRecord, PaymentId, PaymentProvider,
    PaymentStatus, Plan, ProcessedEvent, SubscriptionStatus, UserId, EXPIRY_REMINDER_DAYS,
    PLAN_CURRENCY, SUBSCRIPTION_SETTINGS_URL,
};
use lingo_billing_store::{EventCommit, Store, StoreError};

use crate::mailer::{EmailMessage, Mailer};

/// Attempts before a version conflict is reported as an error.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// State changed.
    Applied,
    /// The event was already processed.
    Duplicate,
    /// The event names no user; nothing was written.
    Unattributed,
    /// The event predates the last applied change; only its receipt was written.
    Stale,
    /// The transition is not allowed from the current status.
    Rejected,
    /// Nothing billing acts on.
    Ignored,
}

impl ReconcileOutcome {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Unattributed => "unattributed",
            Self::Stale => "stale",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }
}

impl From<EventDisposition> for ReconcileOutcome {
    fn from(disposition: EventDisposition) -> Self {
        match disposition {
            EventDisposition::Applied => Self::Applied,
            EventDisposition::Stale => Self::Stale,
            EventDisposition::Rejected => Self::Rejected,
            EventDisposition::Ignored => Self::Ignored,
        }
    }
}

/// Result of an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    /// Subscriptions moved to `expired`.
    pub expired: usize,
    /// Reminder emails delivered.
    pub reminded: usize,
}

/// The effects of one event, ready to commit.
struct Decision {
    commit: EventCommit,
    emails: Vec<EmailMessage>,
}

/// Applies billing events to accounts.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    store: Arc<dyn Store>,
    mailer: Option<Arc<dyn Mailer>>,
    app_url: String,
}

impl SubscriptionReconciler {
    /// Create a reconciler. Without a mailer, emails are skipped.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, mailer: Option<Arc<dyn Mailer>>, app_url: String) -> Self {
        Self {
            store,
            mailer,
            app_url: app_url.trim_end_matches('/').to_string(),
        }
    }

    /// Process an event at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the account keeps changing
    /// under concurrent writers.
    pub async fn process(&self, event: &BillingEvent) -> Result<ReconcileOutcome, StoreError> {
        self.process_at(event, Utc::now()).await
    }

    /// Process an event at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the account keeps changing
    /// under concurrent writers.
    pub async fn process_at(
        &self,
        event: &BillingEvent,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, StoreError> {
        let Some(user_id) = event.user_id.as_ref() else {
            tracing::warn!(
                provider = %event.provider,
                event_id = %event.event_id,
                kind = event.kind.name(),
                "Billing event has no user id, skipping"
            );
            return Ok(ReconcileOutcome::Unattributed);
        };

        let key = event.dedupe_key();
        if self.store.get_processed_event(&key)?.is_some() {
            tracing::debug!(event = %key, "Duplicate billing event");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            let account = self
                .store
                .get_account(user_id)?
                .unwrap_or_else(|| BillingAccount::new(user_id.clone(), now));
            let decision = self.decide(event, user_id, &key, account, now);
            let outcome = ReconcileOutcome::from(decision.commit.receipt.disposition);

            match self.store.commit_event(&decision.commit) {
                Ok(()) => {
                    tracing::info!(
                        event = %key,
                        user_id = %user_id,
                        kind = event.kind.name(),
                        outcome = outcome.as_str(),
                        "Billing event processed"
                    );
                    self.send_all(decision.emails).await;
                    return Ok(outcome);
                }
                Err(StoreError::DuplicateEvent { .. }) => {
                    tracing::debug!(event = %key, "Billing event committed concurrently");
                    return Ok(ReconcileOutcome::Duplicate);
                }
                Err(StoreError::VersionConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::debug!(event = %key, attempt, "Account changed, retrying event");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Expire lapsed subscriptions and remind users whose subscription ends
    /// within [`EXPIRY_REMINDER_DAYS`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn expire_lapsed(&self, now: DateTime<Utc>) -> Result<ExpirySummary, StoreError> {
        let mut summary = ExpirySummary::default();
        let mut reminders = Vec::new();

        for account in self.store.list_accounts()? {
            let Some(sub) = account.subscription.as_ref() else {
                continue;
            };

            match sub.status {
                // A trial's end is owned by the provider
                SubscriptionStatus::Trialing | SubscriptionStatus::Expired => {}
                _ if sub.end_date < now => {
                    let event = BillingEvent {
                        event_id: format!("expire:{}:{}", account.user_id, sub.end_date.timestamp()),
                        provider: PaymentProvider::Manual,
                        occurred_at: now,
                        user_id: Some(account.user_id.clone()),
                        kind: BillingEventKind::SubscriptionExpired {
                            period_end: sub.end_date,
                        },
                    };
                    if self.process_at(&event, now).await? == ReconcileOutcome::Applied {
                        summary.expired += 1;
                    }
                }
                SubscriptionStatus::Active
                    if sub.end_date - now <= Duration::days(EXPIRY_REMINDER_DAYS) =>
                {
                    let Some(email) = account.email.as_deref() else {
                        continue;
                    };
                    // One reminder per paid period
                    let key = format!("remind:{}:{}", account.user_id, sub.end_date.timestamp());
                    if self.store.get_processed_event(&key)?.is_some() {
                        continue;
                    }
                    let days_left = ((sub.end_date - now).num_hours() + 23) / 24;
                    reminders.push((
                        EmailMessage::subscription_expiring(
                            email,
                            account.name.as_deref(),
                            sub.plan,
                            days_left,
                            &self.settings_url(),
                        ),
                        ProcessedEvent {
                            key,
                            provider: PaymentProvider::Manual,
                            user_id: account.user_id.clone(),
                            kind: "expiry_reminder".to_string(),
                            disposition: EventDisposition::Applied,
                            processed_at: now,
                        },
                    ));
                }
                _ => {}
            }
        }

        summary.reminded = self.send_reminders(reminders).await?;
        tracing::info!(
            expired = summary.expired,
            reminded = summary.reminded,
            "Expiry sweep complete"
        );
        Ok(summary)
    }

    fn settings_url(&self) -> String {
        format!("{}{SUBSCRIPTION_SETTINGS_URL}", self.app_url)
    }

    /// Decide the effects of `event` on `account`. Pure apart from id and
    /// timestamp generation.
    #[allow(clippy::too_many_lines)]
    fn decide(
        &self,
        event: &BillingEvent,
        user_id: &UserId,
        key: &str,
        mut account: BillingAccount,
        now: DateTime<Utc>,
    ) -> Decision {
        let mut notifications = Vec::new();
        let mut emails = Vec::new();
        let mut payment = None;

        let stale = !matches!(event.kind, BillingEventKind::SubscriptionCreated { .. })
            && account.is_stale(event.occurred_at);
        if stale {
            tracing::info!(
                event = %key,
                occurred_at = %event.occurred_at,
                last_event_at = ?account.last_event_at,
                "Stale billing event"
            );
        }

        let disposition = match &event.kind {
            BillingEventKind::PaymentCompleted {
                customer_id,
                transaction_id,
                plan,
                amount_cents,
                currency,
                discount_percentage,
                receipt_url,
            } => {
                let paid = PaymentApplied {
                    plan: *plan,
                    amount_cents: *amount_cents,
                    currency: currency.clone(),
                    discount_percentage: *discount_percentage,
                };
                // Captured money is always recorded; a late charge only
                // extends the paid period
                let applied = if stale {
                    account.apply_late_payment(paid, now).map(|_| ())
                } else {
                    account.apply_payment(paid, now).map(|_| ())
                };
                match applied {
                    Ok(()) => {
                        account.provider_refs.provider = Some(event.provider);
                        if customer_id.is_some() {
                            account.provider_refs.customer_id.clone_from(customer_id);
                        }
                        account.provider_refs.last_transaction_id = Some(transaction_id.clone());

                        payment = Some(PaymentHistoryRecord {
                            id: PaymentId::generate(),
                            user_id: user_id.clone(),
                            provider: event.provider,
                            transaction_id: Some(transaction_id.clone()),
                            amount_cents: *amount_cents,
                            currency: currency.clone(),
                            status: PaymentStatus::Succeeded,
                            description: format!("{} subscription", plan.display_name()),
                            receipt_url: receipt_url.clone(),
                            created_at: now,
                        });
                        let body = if account.has_active_subscription() {
                            format!("Your {} subscription is now active!", plan.display_name())
                        } else {
                            format!(
                                "We received your {} payment of {}.",
                                plan.display_name(),
                                format_amount(*amount_cents, currency)
                            )
                        };
                        notifications.push(
                            Notification::new(
                                user_id.clone(),
                                NotificationKind::Subscription,
                                "Payment Successful",
                                body,
                                now,
                            )
                            .with_data(json!({
                                "plan": plan,
                                "amountCents": amount_cents,
                                "currency": currency,
                            })),
                        );
                        if let Some(email) = account.email.as_deref() {
                            emails.push(EmailMessage::payment_success(
                                email,
                                account.name.as_deref(),
                                *plan,
                                &format_amount(*amount_cents, currency),
                                &self.app_url,
                            ));
                        }
                        EventDisposition::Applied
                    }
                    Err(e) => {
                        tracing::warn!(event = %key, error = %e, "Payment not applied");
                        EventDisposition::Rejected
                    }
                }
            }

            _ if stale => EventDisposition::Stale,

            BillingEventKind::PaymentFailed {
                transaction_id,
                amount_cents,
                currency,
            } => {
                let plan = account.current_plan();
                // The user hears about the failure whatever the status
                if let Some(amount) = amount_cents {
                    payment = Some(PaymentHistoryRecord {
                        id: PaymentId::generate(),
                        user_id: user_id.clone(),
                        provider: event.provider,
                        transaction_id: transaction_id.clone(),
                        amount_cents: *amount,
                        currency: currency
                            .clone()
                            .unwrap_or_else(|| PLAN_CURRENCY.to_string()),
                        status: PaymentStatus::Failed,
                        description: plan.map_or_else(
                            || "Subscription payment".to_string(),
                            |p| format!("{} subscription", p.display_name()),
                        ),
                        receipt_url: None,
                        created_at: now,
                    });
                }
                notifications.push(
                    Notification::new(
                        user_id.clone(),
                        NotificationKind::Subscription,
                        "Payment Failed",
                        "Your payment failed. Please update your payment method.",
                        now,
                    )
                    .with_action_url(SUBSCRIPTION_SETTINGS_URL),
                );
                if let Some(email) = account.email.as_deref() {
                    emails.push(EmailMessage::payment_failed(
                        email,
                        account.name.as_deref(),
                        &self.settings_url(),
                    ));
                }

                match account.apply_payment_failure(now) {
                    Ok(_) => EventDisposition::Applied,
                    Err(e) => {
                        tracing::warn!(event = %key, error = %e, "Payment failure not applied");
                        EventDisposition::Rejected
                    }
                }
            }

            BillingEventKind::SubscriptionCreated {
                customer_id,
                subscription_id,
            } => {
                account.provider_refs.provider = Some(event.provider);
                if customer_id.is_some() {
                    account.provider_refs.customer_id.clone_from(customer_id);
                }
                account.provider_refs.subscription_id = Some(subscription_id.clone());
                account.updated_at = now;
                EventDisposition::Applied
            }

            BillingEventKind::SubscriptionUpdated { status, plan } => {
                match SubscriptionStatus::from_provider(status) {
                    None => {
                        tracing::warn!(event = %key, status = %status, "Unknown provider status");
                        EventDisposition::Ignored
                    }
                    Some(reported) => {
                        let target_plan = (*plan)
                            .or_else(|| account.current_plan())
                            .unwrap_or(Plan::Basic);
                        match account.apply_reported_status(reported, target_plan, now) {
                            Ok(_) => {
                                if let (Some(plan), Some(sub)) =
                                    (plan, account.subscription.as_mut())
                                {
                                    sub.plan = *plan;
                                }
                                EventDisposition::Applied
                            }
                            Err(e) => {
                                tracing::warn!(event = %key, error = %e, "Status report not applied");
                                EventDisposition::Rejected
                            }
                        }
                    }
                }
            }

            BillingEventKind::SubscriptionCanceled => match account.apply_cancellation(now) {
                Ok(_) => {
                    let until = account
                        .subscription
                        .as_ref()
                        .map(|s| s.end_date.format("%Y-%m-%d").to_string());
                    let body = until.map_or_else(
                        || "Your subscription has been canceled.".to_string(),
                        |date| {
                            format!(
                                "Your subscription has been canceled. You keep access until {date}."
                            )
                        },
                    );
                    notifications.push(
                        Notification::new(
                            user_id.clone(),
                            NotificationKind::Subscription,
                            "Subscription Canceled",
                            body,
                            now,
                        )
                        .with_action_url(SUBSCRIPTION_SETTINGS_URL),
                    );
                    EventDisposition::Applied
                }
                Err(e) => {
                    tracing::warn!(event = %key, error = %e, "Cancellation not applied");
                    EventDisposition::Rejected
                }
            },

            BillingEventKind::SubscriptionExpired { period_end } => {
                let renewed = account
                    .subscription
                    .as_ref()
                    .is_some_and(|s| s.end_date > *period_end);
                if renewed {
                    EventDisposition::Ignored
                } else {
                    match account.apply_expiry(now) {
                        Ok(_) => {
                            let plan = account.current_plan().unwrap_or(Plan::Basic);
                            notifications.push(
                                Notification::new(
                                    user_id.clone(),
                                    NotificationKind::Subscription,
                                    "Subscription Expired",
                                    format!(
                                        "Your {} subscription has expired. Renew to regain access.",
                                        plan.display_name()
                                    ),
                                    now,
                                )
                                .with_action_url(SUBSCRIPTION_SETTINGS_URL),
                            );
                            if let Some(email) = account.email.as_deref() {
                                emails.push(EmailMessage::subscription_expired(
                                    email,
                                    account.name.as_deref(),
                                    plan,
                                    &self.settings_url(),
                                ));
                            }
                            EventDisposition::Applied
                        }
                        Err(e) => {
                            tracing::warn!(event = %key, error = %e, "Expiry not applied");
                            EventDisposition::Rejected
                        }
                    }
                }
            }
        };

        let account = if disposition == EventDisposition::Applied {
            if !matches!(event.kind, BillingEventKind::SubscriptionCreated { .. }) {
                account.last_event_at = Some(
                    account
                        .last_event_at
                        .map_or(event.occurred_at, |last| last.max(event.occurred_at)),
                );
            }
            Some(account)
        } else {
            None
        };

        Decision {
            commit: EventCommit {
                receipt: ProcessedEvent {
                    key: key.to_string(),
                    provider: event.provider,
                    user_id: user_id.clone(),
                    kind: event.kind.name().to_string(),
                    disposition,
                    processed_at: now,
                },
                account,
                payment,
                notifications,
            },
            emails,
        }
    }

    /// Send emails concurrently. Returns the number delivered.
    async fn send_all(&self, emails: Vec<EmailMessage>) -> usize {
        self.deliver(&emails).await.into_iter().filter(|ok| *ok).count()
    }

    /// Send reminders and record a receipt for each one delivered, so the
    /// next sweep skips it. Undelivered reminders are retried next sweep.
    async fn send_reminders(
        &self,
        reminders: Vec<(EmailMessage, ProcessedEvent)>,
    ) -> Result<usize, StoreError> {
        let (emails, receipts): (Vec<_>, Vec<_>) = reminders.into_iter().unzip();
        let delivered = self.deliver(&emails).await;

        let mut reminded = 0;
        for (receipt, ok) in receipts.into_iter().zip(delivered) {
            if !ok {
                continue;
            }
            let commit = EventCommit {
                receipt,
                account: None,
                payment: None,
                notifications: Vec::new(),
            };
            match self.store.commit_event(&commit) {
                Ok(()) | Err(StoreError::DuplicateEvent { .. }) => reminded += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(reminded)
    }

    /// Send each email concurrently; `true` where delivery succeeded.
    async fn deliver(&self, emails: &[EmailMessage]) -> Vec<bool> {
        if emails.is_empty() {
            return Vec::new();
        }
        let Some(mailer) = self.mailer.as_ref() else {
            tracing::debug!(count = emails.len(), "Email disabled, skipping");
            return vec![false; emails.len()];
        };

        let results = join_all(emails.iter().map(|message| mailer.send(message))).await;
        emails
            .iter()
            .zip(results)
            .map(|(message, result)| match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(kind = ?message.kind, error = %e, "Failed to send billing email");
                    false
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{EmailKind, MailerError};
    use async_trait::async_trait;
    use lingo_billing_store::RocksStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<EmailMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
            if self.fail {
                return Err(MailerError::Rejected {
                    status: 500,
                    body: "down".into(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Fixture {
        reconciler: SubscriptionReconciler,
        store: Arc<dyn Store>,
        mailer: Arc<RecordingMailer>,
        _dir: TempDir,
    }

    fn fixture_with(mailer: RecordingMailer) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mailer = Arc::new(mailer);
        let dyn_mailer: Arc<dyn Mailer> = mailer.clone();
        let reconciler = SubscriptionReconciler::new(
            Arc::clone(&store),
            Some(dyn_mailer),
            "https://app.example.com/".into(),
        );
        Fixture {
            reconciler,
            store,
            mailer,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingMailer::default())
    }

    fn event(id: &str, user: &UserId, at: DateTime<Utc>, kind: BillingEventKind) -> BillingEvent {
        BillingEvent {
            event_id: id.into(),
            provider: PaymentProvider::Paddle,
            occurred_at: at,
            user_id: Some(user.clone()),
            kind,
        }
    }

    fn completed(plan: Plan, amount_cents: i64) -> BillingEventKind {
        BillingEventKind::PaymentCompleted {
            customer_id: Some("ctm_1".into()),
            transaction_id: "txn_1".into(),
            plan,
            amount_cents,
            currency: "USD".into(),
            discount_percentage: 0,
            receipt_url: None,
        }
    }

    fn seed_email(store: &Arc<dyn Store>, user: &UserId, now: DateTime<Utc>) {
        store
            .record_contact(user, Some("student@example.com"), Some("Student"), now)
            .unwrap();
    }

    #[tokio::test]
    async fn payment_activates_and_records_history() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        seed_email(&f.store, &user, now);

        let outcome = f
            .reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Premium, 4900)), now)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let account = f.store.get_account(&user).unwrap().unwrap();
        let sub = account.subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.plan, Plan::Premium);
        assert_eq!(sub.end_date, lingo_billing_core::one_month_after(now));
        assert_eq!(account.provider_refs.customer_id.as_deref(), Some("ctm_1"));

        let payments = f.store.list_payments_by_user(&user, 10, 0).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].description, "Premium subscription");

        let notifications = f.store.list_notifications(&user, false, 10).unwrap();
        assert_eq!(notifications[0].title, "Payment Successful");
        assert_eq!(notifications[0].body, "Your Premium subscription is now active!");

        let sent = f.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EmailKind::PaymentSuccess);
        assert_eq!(sent[0].params["amount"], "49.00 USD");
    }

    #[tokio::test]
    async fn duplicate_event_has_no_further_effect() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        let evt = event("evt_1", &user, now, completed(Plan::Basic, 2900));

        assert_eq!(
            f.reconciler.process_at(&evt, now).await.unwrap(),
            ReconcileOutcome::Applied
        );
        let before = f.store.get_account(&user).unwrap().unwrap();

        assert_eq!(
            f.reconciler.process_at(&evt, now).await.unwrap(),
            ReconcileOutcome::Duplicate
        );
        assert_eq!(f.store.get_account(&user).unwrap().unwrap(), before);
        assert_eq!(f.store.list_payments_by_user(&user, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_user_writes_nothing() {
        let f = fixture();
        let now = Utc::now();
        let mut evt = event("evt_x", &UserId::generate(), now, completed(Plan::Basic, 2900));
        evt.user_id = None;

        assert_eq!(
            f.reconciler.process_at(&evt, now).await.unwrap(),
            ReconcileOutcome::Unattributed
        );
        assert!(f.store.list_accounts().unwrap().is_empty());
        assert!(f.store.get_processed_event(&evt.dedupe_key()).unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_moves_to_past_due_and_keeps_end_date() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        seed_email(&f.store, &user, now);
        f.reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Basic, 2900)), now)
            .await
            .unwrap();
        let end = f
            .store
            .get_account(&user)
            .unwrap()
            .unwrap()
            .subscription
            .unwrap()
            .end_date;

        let later = now + Duration::days(30);
        let failed = BillingEventKind::PaymentFailed {
            transaction_id: Some("txn_2".into()),
            amount_cents: Some(2900),
            currency: Some("USD".into()),
        };
        let outcome = f
            .reconciler
            .process_at(&event("evt_2", &user, later, failed), later)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let sub = f.store.get_account(&user).unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.end_date, end);

        let notifications = f.store.list_notifications(&user, false, 10).unwrap();
        assert_eq!(notifications[0].title, "Payment Failed");
        assert_eq!(
            notifications[0].action_url.as_deref(),
            Some(SUBSCRIPTION_SETTINGS_URL)
        );
        let payments = f.store.list_payments_by_user(&user, 10, 0).unwrap();
        assert_eq!(payments[0].status, PaymentStatus::Failed);

        let sent = f.mailer.sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().kind, EmailKind::PaymentFailed);
    }

    #[tokio::test]
    async fn failure_without_subscription_notifies_but_is_rejected() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        let failed = BillingEventKind::PaymentFailed {
            transaction_id: None,
            amount_cents: None,
            currency: None,
        };

        let outcome = f
            .reconciler
            .process_at(&event("evt_f", &user, now, failed), now)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Rejected);
        assert!(f.store.get_account(&user).unwrap().is_none());
        assert_eq!(f.store.list_notifications(&user, false, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_event_only_writes_receipt() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        f.reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Basic, 2900)), now)
            .await
            .unwrap();

        let earlier = now - Duration::minutes(5);
        let outcome = f
            .reconciler
            .process_at(
                &event("evt_0", &user, earlier, BillingEventKind::SubscriptionCanceled),
                now,
            )
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Stale);

        let sub = f.store.get_account(&user).unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(
            f.store
                .get_processed_event("paddle:evt_0")
                .unwrap()
                .unwrap()
                .disposition,
            EventDisposition::Stale
        );
    }

    #[tokio::test]
    async fn unknown_status_is_ignored() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        let kind = BillingEventKind::SubscriptionUpdated {
            status: "paused".into(),
            plan: None,
        };

        let outcome = f
            .reconciler
            .process_at(&event("evt_p", &user, now, kind), now)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ignored);
        assert!(f.store.get_account(&user).unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_keeps_access_until_end_date() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        f.reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Basic, 2900)), now)
            .await
            .unwrap();
        f.reconciler
            .process_at(
                &event("evt_2", &user, now, BillingEventKind::SubscriptionCanceled),
                now,
            )
            .await
            .unwrap();

        let sub = f.store.get_account(&user).unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.cancel_at_period_end);
        assert!(sub.grants_access(now + Duration::days(1)));
    }

    #[tokio::test]
    async fn expiry_sweep_expires_and_reminds() {
        let f = fixture();
        let now = Utc::now();

        let lapsed = UserId::generate();
        f.reconciler
            .process_at(
                &event("evt_l", &lapsed, now - Duration::days(40), completed(Plan::Basic, 2900)),
                now - Duration::days(40),
            )
            .await
            .unwrap();

        let ending = UserId::generate();
        seed_email(&f.store, &ending, now - Duration::days(25));
        f.reconciler
            .process_at(
                &event(
                    "evt_e",
                    &ending,
                    now - Duration::days(25),
                    completed(Plan::Premium, 4900),
                ),
                now - Duration::days(25),
            )
            .await
            .unwrap();
        f.mailer.sent.lock().unwrap().clear();

        let summary = f.reconciler.expire_lapsed(now).await.unwrap();
        assert_eq!(summary, ExpirySummary { expired: 1, reminded: 1 });

        let lapsed_sub = f.store.get_account(&lapsed).unwrap().unwrap().subscription.unwrap();
        assert_eq!(lapsed_sub.status, SubscriptionStatus::Expired);
        let sent = f.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, EmailKind::SubscriptionExpiring);
        drop(sent);

        // Running the sweep again neither expires nor reminds twice
        let again = f.reconciler.expire_lapsed(now + Duration::hours(1)).await.unwrap();
        assert_eq!(again, ExpirySummary::default());
        assert_eq!(f.mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undelivered_reminder_is_retried() {
        let f = fixture_with(RecordingMailer {
            fail: true,
            ..RecordingMailer::default()
        });
        let now = Utc::now();
        let user = UserId::generate();
        let paid_at = now - Duration::days(25);
        seed_email(&f.store, &user, paid_at);
        f.reconciler
            .process_at(&event("evt_1", &user, paid_at, completed(Plan::Basic, 2900)), paid_at)
            .await
            .unwrap();

        let summary = f.reconciler.expire_lapsed(now).await.unwrap();
        assert_eq!(summary.reminded, 0);

        let end = f.store.get_account(&user).unwrap().unwrap().subscription.unwrap().end_date;
        let key = format!("remind:{user}:{}", end.timestamp());
        assert!(f.store.get_processed_event(&key).unwrap().is_none());
    }

    #[tokio::test]
    async fn late_renewal_is_recorded_and_extends_period() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        f.reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Premium, 4900)), now)
            .await
            .unwrap();

        let updated = BillingEventKind::SubscriptionUpdated {
            status: "active".into(),
            plan: None,
        };
        let ahead = now + Duration::seconds(1);
        f.reconciler
            .process_at(&event("evt_2", &user, ahead, updated), ahead)
            .await
            .unwrap();

        // The renewal charge carries an earlier timestamp than the update
        let renewal_at = now + Duration::days(30);
        let renewal = BillingEventKind::PaymentCompleted {
            customer_id: Some("ctm_1".into()),
            transaction_id: "txn_2".into(),
            plan: Plan::Premium,
            amount_cents: 4900,
            currency: "USD".into(),
            discount_percentage: 0,
            receipt_url: None,
        };
        let outcome = f
            .reconciler
            .process_at(&event("evt_3", &user, now, renewal), renewal_at)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let account = f.store.get_account(&user).unwrap().unwrap();
        let sub = account.subscription.as_ref().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.end_date, lingo_billing_core::one_month_after(renewal_at));
        assert_eq!(account.last_event_at, Some(ahead));
        assert_eq!(
            account.provider_refs.last_transaction_id.as_deref(),
            Some("txn_2")
        );
        assert_eq!(f.store.list_payments_by_user(&user, 10, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn late_payment_does_not_undo_cancellation() {
        let f = fixture();
        let user = UserId::generate();
        let now = Utc::now();
        f.reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Basic, 2900)), now)
            .await
            .unwrap();
        let ahead = now + Duration::minutes(1);
        f.reconciler
            .process_at(
                &event("evt_2", &user, ahead, BillingEventKind::SubscriptionCanceled),
                ahead,
            )
            .await
            .unwrap();

        let outcome = f
            .reconciler
            .process_at(&event("evt_3", &user, now, completed(Plan::Basic, 2900)), ahead)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let sub = f.store.get_account(&user).unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert!(sub.cancel_at_period_end);
        assert_eq!(f.store.list_payments_by_user(&user, 10, 0).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn email_failure_does_not_fail_processing() {
        let f = fixture_with(RecordingMailer {
            fail: true,
            ..RecordingMailer::default()
        });
        let user = UserId::generate();
        let now = Utc::now();
        seed_email(&f.store, &user, now);

        let outcome = f
            .reconciler
            .process_at(&event("evt_1", &user, now, completed(Plan::Basic, 2900)), now)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);
        assert!(f.store.get_account(&user).unwrap().unwrap().has_active_subscription());
    }
}
