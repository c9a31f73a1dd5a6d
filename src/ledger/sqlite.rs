use std::{str::FromStr, time::Duration};

use alloy_primitives::{Address, B256, U256};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};

use super::{
    AccountRecord, Ledger, OrderRecord, OrderState, SyncCursor, TradeRecord, is_advancing,
    page_by_price,
};
use crate::{
    error::LedgerError,
    num::Price,
    types::{BlockNumber, Nonce, Order, OrderHash, SignedOrder, parse_u256},
};

/// Schema migrations, applied in order. Index + 1 is the schema version.
const MIGRATIONS: &[&[&str]] = &[
    &[
        r#"
        CREATE TABLE orders (
            hash TEXT PRIMARY KEY NOT NULL,
            token_get TEXT NOT NULL,
            amount_get TEXT NOT NULL,
            token_give TEXT NOT NULL,
            amount_give TEXT NOT NULL,
            expires INTEGER NOT NULL,
            nonce INTEGER NOT NULL,
            maker TEXT NOT NULL,
            r TEXT NOT NULL,
            s TEXT NOT NULL,
            v TEXT NOT NULL,
            state INTEGER NOT NULL,
            filled_amount TEXT NOT NULL DEFAULT '0'
        )
        "#,
        "CREATE INDEX orders_pair ON orders (token_get, token_give)",
        r#"
        CREATE TABLE trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_hash TEXT NOT NULL,
            deal_amount TEXT NOT NULL,
            block_number INTEGER NOT NULL,
            tx_hash TEXT NOT NULL,
            taker TEXT NOT NULL
        )
        "#,
        "CREATE INDEX trades_order ON trades (order_hash, id)",
        r#"
        CREATE TABLE accounts (
            address TEXT PRIMARY KEY NOT NULL,
            token TEXT,
            amount TEXT,
            nonce INTEGER
        )
        "#,
        r#"
        CREATE TABLE sync_cursor (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            begin_block INTEGER NOT NULL,
            end_block INTEGER NOT NULL
        )
        "#,
    ],
    &[
        "ALTER TABLE orders ADD COLUMN price_key TEXT NOT NULL DEFAULT ''",
        "CREATE INDEX orders_pair_price ON orders (token_get, token_give, price_key)",
    ],
];

const ORDER_COLUMNS: &str = "hash, token_get, amount_get, token_give, amount_give, expires, \
                             nonce, maker, r, s, v, state, filled_amount";

/// [`Ledger`] backed by SQLite.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Opens (creating if missing) the database at `url` and brings its
    /// schema up to date.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, gone when the ledger is dropped.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        // every connection opens its own in-memory database, keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, LedgerError> {
        let ledger = Self { pool };
        ledger.migrate().await?;
        ledger.fill_price_keys().await?;
        Ok(ledger)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current schema version, 0 for an empty database.
    pub async fn schema_version(&self) -> Result<usize, LedgerError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.unwrap_or_default() as usize)
    }

    async fn migrate(&self) -> Result<(), LedgerError> {
        let current = self.schema_version().await?;
        for (index, statements) in MIGRATIONS.iter().enumerate().skip(current) {
            let version = index + 1;
            tracing::info!(version, "applying ledger migration");

            let mut tx = self.pool.begin().await?;
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version as i64)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

impl SqliteLedger {
    /// Computes the price key of orders stored before the column existed.
    async fn fill_price_keys(&self) -> Result<(), LedgerError> {
        let rows =
            sqlx::query("SELECT hash, amount_get, amount_give FROM orders WHERE price_key = ''")
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() {
            return Ok(());
        }
        tracing::info!(count = rows.len(), "filling order price keys");

        let mut tx = self.pool.begin().await?;
        for row in &rows {
            let hash: String = row.try_get("hash")?;
            let price = Price::new(
                amount_column(row, "amount_get")?,
                amount_column(row, "amount_give")?,
            );
            sqlx::query("UPDATE orders SET price_key = ? WHERE hash = ?")
                .bind(price.sort_key())
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn corrupted(column: &str, value: &str) -> LedgerError {
    LedgerError::Corrupted(format!("{column}: {value}"))
}

fn column<T: FromStr>(row: &SqliteRow, name: &str) -> Result<T, LedgerError> {
    let value: String = row.try_get(name)?;
    value.parse().map_err(|_| corrupted(name, &value))
}

fn amount_column(row: &SqliteRow, name: &str) -> Result<U256, LedgerError> {
    let value: String = row.try_get(name)?;
    parse_u256(&value).ok_or_else(|| corrupted(name, &value))
}

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord, LedgerError> {
    let signed = SignedOrder {
        order: Order {
            token_get: column(row, "token_get")?,
            amount_get: amount_column(row, "amount_get")?,
            token_give: column(row, "token_give")?,
            amount_give: amount_column(row, "amount_give")?,
            expires: row.try_get::<i64, _>("expires")? as u64,
            nonce: row.try_get::<i64, _>("nonce")? as u64,
            maker: column(row, "maker")?,
        },
        v: amount_column(row, "v")?,
        s: amount_column(row, "s")?,
        r: amount_column(row, "r")?,
    };
    let hash: B256 = column(row, "hash")?;
    if hash != signed.hash() {
        return Err(corrupted("hash", &hash.to_string()));
    }
    Ok(OrderRecord {
        hash,
        signed,
        state: OrderState::try_from(row.try_get::<i64, _>("state")?)?,
        filled_amount: amount_column(row, "filled_amount")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<TradeRecord, LedgerError> {
    Ok(TradeRecord {
        order_hash: column(row, "order_hash")?,
        deal_amount: amount_column(row, "deal_amount")?,
        block_number: row.try_get::<i64, _>("block_number")? as BlockNumber,
        tx_hash: column(row, "tx_hash")?,
        taker: column(row, "taker")?,
    })
}

fn account_from_row(row: &SqliteRow) -> Result<AccountRecord, LedgerError> {
    let token = row
        .try_get::<Option<String>, _>("token")?
        .map(|value| value.parse().map_err(|_| corrupted("token", &value)))
        .transpose()?;
    let amount = row
        .try_get::<Option<String>, _>("amount")?
        .map(|value| parse_u256(&value).ok_or_else(|| corrupted("amount", &value)))
        .transpose()?;
    Ok(AccountRecord {
        address: column(row, "address")?,
        token,
        amount,
        nonce: row.try_get::<Option<i64>, _>("nonce")?.map(|n| n as Nonce),
    })
}

fn cursor_from_row(row: &SqliteRow) -> Result<SyncCursor, LedgerError> {
    Ok(SyncCursor {
        begin_block: row.try_get::<i64, _>("begin_block")? as BlockNumber,
        end_block: row.try_get::<i64, _>("end_block")? as BlockNumber,
    })
}

impl Ledger for SqliteLedger {
    async fn create_order(
        &self,
        signed: &SignedOrder,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        let order = &signed.order;
        let result = sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}, price_key) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '0', ?) \
             ON CONFLICT (hash) DO NOTHING"
        ))
        .bind(signed.hash().to_string())
        .bind(order.token_get.to_string())
        .bind(order.amount_get.to_string())
        .bind(order.token_give.to_string())
        .bind(order.amount_give.to_string())
        .bind(order.expires as i64)
        .bind(order.nonce as i64)
        .bind(order.maker.to_string())
        .bind(signed.r.to_string())
        .bind(signed.s.to_string())
        .bind(signed.v.to_string())
        .bind(state as i64)
        .bind(order.price().sort_key())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn read_order(&self, hash: OrderHash) -> Result<Option<OrderRecord>, LedgerError> {
        sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE hash = ?"))
            .bind(hash.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(order_from_row)
            .transpose()
    }

    async fn update_order_state(
        &self,
        hash: OrderHash,
        state: OrderState,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query("UPDATE orders SET state = ? WHERE hash = ?")
            .bind(state as i64)
            .bind(hash.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_filled_amount(&self, hash: OrderHash, filled: U256) -> Result<bool, LedgerError> {
        let result = sqlx::query("UPDATE orders SET filled_amount = ? WHERE hash = ?")
            .bind(filled.to_string())
            .bind(hash.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_order(&self, hash: OrderHash) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM orders WHERE hash = ?")
            .bind(hash.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_trade(&self, trade: &TradeRecord) -> Result<bool, LedgerError> {
        // take the write lock up front, a deferred read cannot upgrade under contention
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let last = sqlx::query(
            "SELECT order_hash, deal_amount, block_number, tx_hash, taker FROM trades \
             WHERE order_hash = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(trade.order_hash.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(trade_from_row)
        .transpose()?;

        if !is_advancing(last.as_ref(), trade) {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO trades (order_hash, deal_amount, block_number, tx_hash, taker) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(trade.order_hash.to_string())
        .bind(trade.deal_amount.to_string())
        .bind(trade.block_number as i64)
        .bind(trade.tx_hash.to_string())
        .bind(trade.taker.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn read_trades(&self, hash: OrderHash) -> Result<Vec<TradeRecord>, LedgerError> {
        sqlx::query(
            "SELECT order_hash, deal_amount, block_number, tx_hash, taker FROM trades \
             WHERE order_hash = ? ORDER BY id",
        )
        .bind(hash.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(trade_from_row)
        .collect()
    }

    async fn query_orders_by_pair(
        &self,
        token_get: Address,
        token_give: Address,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SignedOrder>, LedgerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // price_key follows the exact price but may tie, so the page is cut
        // exactly in memory from every order keyed at or below its last row
        let last_row = i64::try_from(offset.saturating_add(limit - 1)).unwrap_or(i64::MAX);
        let boundary: Option<String> = sqlx::query_scalar(
            "SELECT price_key FROM orders WHERE token_get = ? AND token_give = ? \
             ORDER BY price_key LIMIT 1 OFFSET ?",
        )
        .bind(token_get.to_string())
        .bind(token_give.to_string())
        .bind(last_row)
        .fetch_optional(&self.pool)
        .await?;

        let mut sql =
            format!("SELECT {ORDER_COLUMNS} FROM orders WHERE token_get = ? AND token_give = ?");
        if boundary.is_some() {
            sql.push_str(" AND price_key <= ?");
        }
        let mut query = sqlx::query(&sql)
            .bind(token_get.to_string())
            .bind(token_give.to_string());
        if let Some(key) = boundary {
            query = query.bind(key);
        }
        let records = query
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(order_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(page_by_price(records, offset, limit))
    }

    async fn create_account(&self, address: Address) -> Result<bool, LedgerError> {
        let result =
            sqlx::query("INSERT INTO accounts (address) VALUES (?) ON CONFLICT (address) DO NOTHING")
                .bind(address.to_string())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn read_account(&self, address: Address) -> Result<Option<AccountRecord>, LedgerError> {
        sqlx::query("SELECT address, token, amount, nonce FROM accounts WHERE address = ?")
            .bind(address.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn update_account_balance(
        &self,
        address: Address,
        token: Address,
        amount: U256,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE accounts SET token = ?, amount = ? WHERE address = ?")
            .bind(token.to_string())
            .bind(amount.to_string())
            .bind(address.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::AccountNotFound(address));
        }
        Ok(())
    }

    async fn delete_account(&self, address: Address) -> Result<bool, LedgerError> {
        let result = sqlx::query("DELETE FROM accounts WHERE address = ?")
            .bind(address.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_account_nonce(&self, address: Address, nonce: Nonce) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO accounts (address, nonce) VALUES (?, ?) \
             ON CONFLICT (address) DO UPDATE SET nonce = excluded.nonce",
        )
        .bind(address.to_string())
        .bind(nonce as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_account_nonce(&self, address: Address) -> Result<Option<Nonce>, LedgerError> {
        let nonce: Option<Option<i64>> =
            sqlx::query_scalar("SELECT nonce FROM accounts WHERE address = ?")
                .bind(address.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(nonce.flatten().map(|n| n as Nonce))
    }

    async fn init_sync_cursor(&self, genesis: BlockNumber) -> Result<SyncCursor, LedgerError> {
        sqlx::query(
            "INSERT INTO sync_cursor (id, begin_block, end_block) VALUES (1, ?, ?) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(genesis as i64)
        .bind(genesis as i64)
        .execute(&self.pool)
        .await?;
        self.read_sync_cursor()
            .await?
            .ok_or(LedgerError::CursorMissing)
    }

    async fn read_sync_cursor(&self) -> Result<Option<SyncCursor>, LedgerError> {
        sqlx::query("SELECT begin_block, end_block FROM sync_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(cursor_from_row)
            .transpose()
    }

    async fn update_sync_cursor(&self, cursor: SyncCursor) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE sync_cursor SET begin_block = ?, end_block = ? WHERE id = 1")
            .bind(cursor.begin_block as i64)
            .bind(cursor.end_block as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::CursorMissing);
        }
        Ok(())
    }
}
