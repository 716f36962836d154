//! Postgres implementation of the ledger ports.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, BankAccount, ComplianceReport, EntryDirection, EscrowAccount, EscrowEntry,
    Investment, Transaction, TransactionMetadata, UnknownVariant, WebhookEvent,
};
use crate::ports::{
    LedgerStore, LedgerTx, RepositoryError, RepositoryResult, SortField, SortOrder, StatsFilter,
    TransactionFilter, TransactionPage, TransactionTotals,
};

const TRANSACTION_COLUMNS: &str = "id, idempotency_key, transaction_type, payment_method, status, \
    amount, fee_amount, net_amount, description, internal_memo, from_user_id, to_user_id, \
    from_bank_account_id, to_bank_account_id, offering_id, provider_reference, requires_approval, \
    approved_by, approved_at, compliance_check_passed, compliance_check_data, failure_reason, \
    failure_code, retry_count, next_retry_at, processed_at, completed_at, failed_at, cancelled_at, \
    metadata, ip_address, user_agent, created_by, created_at, updated_at";

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn LedgerTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresLedgerTx { tx }))
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> RepositoryResult<TransactionPage> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions WHERE 1 = 1");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM transactions WHERE 1 = 1",
            TRANSACTION_COLUMNS
        ));
        push_filter(&mut select, filter);

        let column = match filter.sort_by.unwrap_or_default() {
            SortField::CreatedAt => "created_at",
            SortField::Amount => "amount",
            SortField::Status => "status",
        };
        let direction = match filter.sort_order.unwrap_or_default() {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        select.push(format!(" ORDER BY {} {}, id {}", column, direction, direction));
        select.push(" LIMIT ").push_bind(filter.limit());
        select.push(" OFFSET ").push_bind(filter.offset());

        let rows: Vec<TransactionRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let transactions = rows
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;

        Ok(TransactionPage { transactions, total })
    }

    async fn transaction_totals(&self, filter: &StatsFilter) -> RepositoryResult<TransactionTotals> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(fee_amount), 0), COUNT(*) \
             FROM transactions WHERE status = 'COMPLETED'",
        );
        if let Some(start) = filter.start_date {
            query.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            query.push(" AND created_at <= ").push_bind(end);
        }
        if let Some(offering_id) = filter.offering_id {
            query.push(" AND offering_id = ").push_bind(offering_id);
        }

        let (total_volume, total_fees, transaction_count): (BigDecimal, BigDecimal, i64) =
            query.build_query_as().fetch_one(&self.pool).await?;

        Ok(TransactionTotals {
            total_volume,
            total_fees,
            transaction_count,
        })
    }

    async fn due_retries(&self, now: DateTime<Utc>, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE status = 'PENDING_RETRY' AND next_retry_at <= $1 \
             ORDER BY next_retry_at ASC LIMIT $2",
            TRANSACTION_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn get_webhook_event(&self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, WebhookEventRow>("SELECT * FROM webhook_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(WebhookEventRow::into_domain).transpose()
    }

    async fn redeliverable_events(&self, max_attempts: i32, limit: i64) -> RepositoryResult<Vec<WebhookEvent>> {
        let rows = sqlx::query_as::<_, WebhookEventRow>(
            "SELECT * FROM webhook_events \
             WHERE status <> 'PROCESSED' AND retry_count < $1 \
             ORDER BY received_at ASC LIMIT $2",
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WebhookEventRow::into_domain).collect()
    }

    async fn get_escrow_account_by_offering(&self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        let row = sqlx::query_as::<_, EscrowAccountRow>("SELECT * FROM escrow_accounts WHERE offering_id = $1")
            .bind(offering_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(EscrowAccountRow::into_domain))
    }

    async fn audit_trail(&self, entity_id: Uuid) -> RepositoryResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, entity_id, entity_type, action, old_val, new_val, actor, timestamp \
             FROM audit_logs WHERE entity_id = $1 ORDER BY timestamp ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuditRow::into_domain).collect())
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(transaction_type) = filter.transaction_type {
        query
            .push(" AND transaction_type = ")
            .push_bind(transaction_type.as_str());
    }
    if let Some(method) = filter.payment_method {
        query.push(" AND payment_method = ").push_bind(method.as_str());
    }
    if let Some(offering_id) = filter.offering_id {
        query.push(" AND offering_id = ").push_bind(offering_id);
    }
    if let Some(user_id) = filter.user_id {
        query
            .push(" AND (from_user_id = ")
            .push_bind(user_id)
            .push(" OR to_user_id = ")
            .push_bind(user_id)
            .push(" OR created_by = ")
            .push_bind(user_id)
            .push(")");
    }
    if let Some(start) = filter.start_date {
        query.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        query.push(" AND created_at <= ").push_bind(end);
    }
}

/// One open Postgres transaction. Dropping it without `commit` rolls back.
struct PostgresLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PostgresLedgerTx {
    async fn find_transaction_by_idempotency_key(&mut self, key: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35)",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(&tx.idempotency_key)
        .bind(tx.transaction_type.as_str())
        .bind(tx.payment_method.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.amount)
        .bind(&tx.fee_amount)
        .bind(&tx.net_amount)
        .bind(&tx.description)
        .bind(&tx.internal_memo)
        .bind(tx.from_user_id)
        .bind(tx.to_user_id)
        .bind(tx.from_bank_account_id)
        .bind(tx.to_bank_account_id)
        .bind(tx.offering_id)
        .bind(&tx.provider_reference)
        .bind(tx.requires_approval)
        .bind(tx.approved_by)
        .bind(tx.approved_at)
        .bind(tx.compliance_check_passed)
        .bind(Json(&tx.compliance_check_data))
        .bind(&tx.failure_reason)
        .bind(&tx.failure_code)
        .bind(tx.retry_count)
        .bind(tx.next_retry_at)
        .bind(tx.processed_at)
        .bind(tx.completed_at)
        .bind(tx.failed_at)
        .bind(tx.cancelled_at)
        .bind(Json(&tx.metadata))
        .bind(&tx.ip_address)
        .bind(&tx.user_agent)
        .bind(tx.created_by)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn lock_transaction_by_provider_reference(&mut self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE provider_reference = $1 \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn save_transaction(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = $2, description = $3, internal_memo = $4, provider_reference = $5,
                requires_approval = $6, approved_by = $7, approved_at = $8,
                failure_reason = $9, failure_code = $10, retry_count = $11, next_retry_at = $12,
                processed_at = $13, completed_at = $14, failed_at = $15, cancelled_at = $16,
                metadata = $17, updated_at = $18
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(&tx.description)
        .bind(&tx.internal_memo)
        .bind(&tx.provider_reference)
        .bind(tx.requires_approval)
        .bind(tx.approved_by)
        .bind(tx.approved_at)
        .bind(&tx.failure_reason)
        .bind(&tx.failure_code)
        .bind(tx.retry_count)
        .bind(tx.next_retry_at)
        .bind(tx.processed_at)
        .bind(tx.completed_at)
        .bind(tx.failed_at)
        .bind(tx.cancelled_at)
        .bind(Json(&tx.metadata))
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    async fn completed_transactions_for_user(&mut self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE status = 'COMPLETED' AND created_at >= $2 \
             AND (from_user_id = $1 OR to_user_id = $1)",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(since)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn lock_in_flight_transactions_for_bank_accounts(&mut self, bank_account_ids: &[Uuid]) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions \
             WHERE status IN ('PROCESSING', 'PENDING_RETRY') \
             AND (from_bank_account_id = ANY($1) OR to_bank_account_id = ANY($1)) \
             FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(bank_account_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn lock_escrow_account(&mut self, id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        let row = sqlx::query_as::<_, EscrowAccountRow>("SELECT * FROM escrow_accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row.map(EscrowAccountRow::into_domain))
    }

    async fn lock_escrow_account_by_offering(&mut self, offering_id: Uuid) -> RepositoryResult<Option<EscrowAccount>> {
        let row = sqlx::query_as::<_, EscrowAccountRow>(
            "SELECT * FROM escrow_accounts WHERE offering_id = $1 FOR UPDATE",
        )
        .bind(offering_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(EscrowAccountRow::into_domain))
    }

    async fn insert_escrow_account_if_absent(&mut self, account: &EscrowAccount) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO escrow_accounts (id, offering_id, balance, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (offering_id) DO NOTHING",
        )
        .bind(account.id)
        .bind(account.offering_id)
        .bind(account.balance())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_escrow_balance(&mut self, account: &EscrowAccount) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE escrow_accounts SET balance = $2, updated_at = $3 WHERE id = $1")
            .bind(account.id)
            .bind(account.balance())
            .bind(account.updated_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("escrow account {}", account.id)));
        }
        Ok(())
    }

    async fn escrow_entry_exists(&mut self, escrow_account_id: Uuid, transaction_id: Uuid, direction: EntryDirection) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM escrow_entries \
             WHERE escrow_account_id = $1 AND transaction_id = $2 AND direction = $3)",
        )
        .bind(escrow_account_id)
        .bind(transaction_id)
        .bind(direction.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn insert_escrow_entry(&mut self, entry: &EscrowEntry) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO escrow_entries (id, escrow_account_id, transaction_id, direction, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.escrow_account_id)
        .bind(entry.transaction_id)
        .bind(entry.direction.as_str())
        .bind(&entry.amount)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn escrow_entries(&mut self, escrow_account_id: Uuid) -> RepositoryResult<Vec<EscrowEntry>> {
        let rows = sqlx::query_as::<_, EscrowEntryRow>(
            "SELECT * FROM escrow_entries WHERE escrow_account_id = $1 ORDER BY created_at ASC",
        )
        .bind(escrow_account_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(EscrowEntryRow::into_domain).collect()
    }

    async fn insert_investment(&mut self, investment: &Investment) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO investments \
             (id, user_id, offering_id, amount, status, transaction_id, confirmed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(investment.id)
        .bind(investment.user_id)
        .bind(investment.offering_id)
        .bind(&investment.amount)
        .bind(investment.status.as_str())
        .bind(investment.transaction_id)
        .bind(investment.confirmed_at)
        .bind(investment.created_at)
        .bind(investment.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_pending_investment(&mut self, user_id: Uuid, offering_id: Uuid) -> RepositoryResult<Option<Investment>> {
        let row = sqlx::query_as::<_, InvestmentRow>(
            "SELECT * FROM investments \
             WHERE user_id = $1 AND offering_id = $2 AND status = 'PENDING' \
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE",
        )
        .bind(user_id)
        .bind(offering_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(InvestmentRow::into_domain).transpose()
    }

    async fn save_investment(&mut self, investment: &Investment) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE investments SET status = $2, transaction_id = $3, confirmed_at = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(investment.id)
        .bind(investment.status.as_str())
        .bind(investment.transaction_id)
        .bind(investment.confirmed_at)
        .bind(investment.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("investment {}", investment.id)));
        }
        Ok(())
    }

    async fn insert_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO bank_accounts (id, user_id, external_item_id, verification_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.external_item_id)
        .bind(account.verification_status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_bank_accounts_by_item(&mut self, item_id: &str) -> RepositoryResult<Vec<BankAccount>> {
        let rows = sqlx::query_as::<_, BankAccountRow>(
            "SELECT * FROM bank_accounts WHERE external_item_id = $1 FOR UPDATE",
        )
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(BankAccountRow::into_domain).collect()
    }

    async fn save_bank_account(&mut self, account: &BankAccount) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE bank_accounts SET verification_status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(account.id)
        .bind(account.verification_status.as_str())
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("bank account {}", account.id)));
        }
        Ok(())
    }

    async fn insert_webhook_event_if_absent(&mut self, event: &WebhookEvent) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events \
             (id, event_id, event_type, payload, status, retry_count, error_message, received_at, processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(event.id)
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(&event.error_message)
        .bind(event.received_at)
        .bind(event.processed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn lock_webhook_event(&mut self, event_id: &str) -> RepositoryResult<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, WebhookEventRow>(
            "SELECT * FROM webhook_events WHERE event_id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(WebhookEventRow::into_domain).transpose()
    }

    async fn save_webhook_event(&mut self, event: &WebhookEvent) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE webhook_events SET status = $2, retry_count = $3, error_message = $4, processed_at = $5 \
             WHERE event_id = $1",
        )
        .bind(&event.event_id)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(&event.error_message)
        .bind(event.processed_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("webhook event {}", event.event_id)));
        }
        Ok(())
    }

    async fn insert_audit_entry(&mut self, entry: &AuditEntry) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, entity_id, entity_type, action, old_val, new_val, actor, timestamp) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.entity_id)
        .bind(&entry.entity_type)
        .bind(&entry.action)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.actor)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn parse_column<T>(value: &str) -> RepositoryResult<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .parse()
        .map_err(|err: UnknownVariant| RepositoryError::Database(err.to_string()))
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    idempotency_key: String,
    transaction_type: String,
    payment_method: String,
    status: String,
    amount: BigDecimal,
    fee_amount: BigDecimal,
    net_amount: BigDecimal,
    description: String,
    internal_memo: Option<String>,
    from_user_id: Option<Uuid>,
    to_user_id: Option<Uuid>,
    from_bank_account_id: Option<Uuid>,
    to_bank_account_id: Option<Uuid>,
    offering_id: Option<Uuid>,
    provider_reference: Option<String>,
    requires_approval: bool,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    compliance_check_passed: bool,
    compliance_check_data: Json<ComplianceReport>,
    failure_reason: Option<String>,
    failure_code: Option<String>,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    metadata: Json<TransactionMetadata>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            idempotency_key: self.idempotency_key,
            transaction_type: parse_column(&self.transaction_type)?,
            payment_method: parse_column(&self.payment_method)?,
            status: parse_column(&self.status)?,
            amount: self.amount,
            fee_amount: self.fee_amount,
            net_amount: self.net_amount,
            description: self.description,
            internal_memo: self.internal_memo,
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            from_bank_account_id: self.from_bank_account_id,
            to_bank_account_id: self.to_bank_account_id,
            offering_id: self.offering_id,
            provider_reference: self.provider_reference,
            requires_approval: self.requires_approval,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            compliance_check_passed: self.compliance_check_passed,
            compliance_check_data: self.compliance_check_data.0,
            failure_reason: self.failure_reason,
            failure_code: self.failure_code,
            retry_count: self.retry_count,
            next_retry_at: self.next_retry_at,
            processed_at: self.processed_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            cancelled_at: self.cancelled_at,
            metadata: self.metadata.0,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EscrowAccountRow {
    id: Uuid,
    offering_id: Uuid,
    balance: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EscrowAccountRow {
    fn into_domain(self) -> EscrowAccount {
        EscrowAccount::from_parts(
            self.id,
            self.offering_id,
            self.balance,
            self.created_at,
            self.updated_at,
        )
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EscrowEntryRow {
    id: Uuid,
    escrow_account_id: Uuid,
    transaction_id: Uuid,
    direction: String,
    amount: BigDecimal,
    created_at: DateTime<Utc>,
}

impl EscrowEntryRow {
    fn into_domain(self) -> RepositoryResult<EscrowEntry> {
        Ok(EscrowEntry {
            id: self.id,
            escrow_account_id: self.escrow_account_id,
            transaction_id: self.transaction_id,
            direction: parse_column(&self.direction)?,
            amount: self.amount,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InvestmentRow {
    id: Uuid,
    user_id: Uuid,
    offering_id: Uuid,
    amount: BigDecimal,
    status: String,
    transaction_id: Option<Uuid>,
    confirmed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InvestmentRow {
    fn into_domain(self) -> RepositoryResult<Investment> {
        Ok(Investment {
            id: self.id,
            user_id: self.user_id,
            offering_id: self.offering_id,
            amount: self.amount,
            status: parse_column(&self.status)?,
            transaction_id: self.transaction_id,
            confirmed_at: self.confirmed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BankAccountRow {
    id: Uuid,
    user_id: Uuid,
    external_item_id: String,
    verification_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BankAccountRow {
    fn into_domain(self) -> RepositoryResult<BankAccount> {
        Ok(BankAccount {
            id: self.id,
            user_id: self.user_id,
            external_item_id: self.external_item_id,
            verification_status: parse_column(&self.verification_status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    event_id: String,
    event_type: String,
    payload: Value,
    status: String,
    retry_count: i32,
    error_message: Option<String>,
    received_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl WebhookEventRow {
    fn into_domain(self) -> RepositoryResult<WebhookEvent> {
        Ok(WebhookEvent {
            id: self.id,
            event_id: self.event_id,
            event_type: self.event_type,
            payload: self.payload,
            status: parse_column(&self.status)?,
            retry_count: self.retry_count,
            error_message: self.error_message,
            received_at: self.received_at,
            processed_at: self.processed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    entity_id: Uuid,
    entity_type: String,
    action: String,
    old_val: Option<Value>,
    new_val: Option<Value>,
    actor: String,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> AuditEntry {
        AuditEntry {
            id: self.id,
            entity_id: self.entity_id,
            entity_type: self.entity_type,
            action: self.action,
            old_value: self.old_val,
            new_value: self.new_val,
            actor: self.actor,
            created_at: self.timestamp,
        }
    }
}
