// Account balances and the open/close position state machine
pub mod pnl;

use crate::error::EngineError;
use crate::market::PriceStore;
use crate::models::{AssetCatalog, Balance, ClosedPosition, Position, Side};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Ledger tuning knobs.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Balance seeded into an account on first reference, USD cents.
    pub starting_balance: i128,
    pub min_leverage: u32,
    pub max_leverage: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000_000, // $10,000
            min_leverage: 1,
            max_leverage: 100,
        }
    }
}

/// Everything the ledger tracks for one account, guarded by one mutex so the
/// check-then-lock sequence in `open_trade` is linearized per account.
#[derive(Debug)]
struct AccountState {
    total: i128,
    locked: i128,
    open: HashMap<Uuid, Position>,
    closed: Vec<ClosedPosition>,
}

impl AccountState {
    fn seeded(starting_balance: i128) -> Self {
        Self {
            total: starting_balance,
            locked: 0,
            open: HashMap::new(),
            closed: Vec::new(),
        }
    }
}

/// Owns all account balances and positions; the only component allowed to
/// mutate money.
///
/// Locking is per account: trades on unrelated accounts never serialize
/// behind each other. An order-id index maps back to the owning account for
/// `close_trade`. Lock order is always account mutex first, then the index,
/// never the reverse.
pub struct PositionLedger {
    accounts: RwLock<HashMap<String, Arc<Mutex<AccountState>>>>,
    order_index: RwLock<HashMap<Uuid, String>>,
    prices: PriceStore,
    catalog: AssetCatalog,
    config: LedgerConfig,
}

impl PositionLedger {
    pub fn new(catalog: AssetCatalog, prices: PriceStore, config: LedgerConfig) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            order_index: RwLock::new(HashMap::new()),
            prices,
            catalog,
            config,
        }
    }

    /// Fetch or lazily create (seeded) the account for an email.
    fn account(&self, email: &str) -> Arc<Mutex<AccountState>> {
        {
            let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
            if let Some(acct) = accounts.get(email) {
                return acct.clone();
            }
        }
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts
            .entry(email.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(AccountState::seeded(self.config.starting_balance)))
            })
            .clone()
    }

    fn existing_account(&self, email: &str) -> Option<Arc<Mutex<AccountState>>> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(email).cloned()
    }

    /// Open a leveraged position at the current quote.
    ///
    /// Validate-then-commit: every rejection happens before any mutation, so
    /// a failed open leaves balances untouched.
    pub fn open_trade(
        &self,
        email: &str,
        symbol: &str,
        side: Side,
        margin: i128,
        leverage: u32,
    ) -> Result<Uuid, EngineError> {
        if margin <= 0 {
            return Err(EngineError::InvalidMargin);
        }
        if leverage < self.config.min_leverage || leverage > self.config.max_leverage {
            return Err(EngineError::InvalidLeverage(leverage));
        }
        let asset = self
            .catalog
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownAsset(symbol.to_string()))?;
        let quote = self
            .prices
            .get_price(symbol)
            .ok_or_else(|| EngineError::PriceUnavailable(symbol.to_string()))?;

        let acct = self.account(email);
        let mut acct = acct.lock().unwrap_or_else(|e| e.into_inner());

        let free = acct.total - acct.locked;
        if free < margin {
            return Err(EngineError::InsufficientBalance {
                free,
                needed: margin,
            });
        }

        let order_id = Uuid::new_v4();
        acct.locked += margin;
        acct.open.insert(
            order_id,
            Position {
                order_id,
                email: email.to_string(),
                symbol: symbol.to_string(),
                side,
                margin,
                leverage,
                entry_price: quote.price,
                asset_decimals: asset.decimals,
                opened_at: Utc::now(),
            },
        );

        let mut index = self.order_index.write().unwrap_or_else(|e| e.into_inner());
        index.insert(order_id, email.to_string());

        tracing::info!(
            %order_id,
            email,
            symbol,
            margin,
            leverage,
            entry_price = quote.price,
            "opened position"
        );
        Ok(order_id)
    }

    /// Close an open position at the current quote and realize its pnl.
    ///
    /// Releases the locked margin and applies `margin + pnl` to the total
    /// balance. A large adverse move can push the total negative; there is
    /// no liquidation threshold.
    pub fn close_trade(&self, order_id: Uuid) -> Result<i128, EngineError> {
        let email = {
            let index = self.order_index.read().unwrap_or_else(|e| e.into_inner());
            index
                .get(&order_id)
                .cloned()
                .ok_or(EngineError::OrderNotFound(order_id))?
        };
        let acct = self
            .existing_account(&email)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let mut acct = acct.lock().unwrap_or_else(|e| e.into_inner());

        let symbol = acct
            .open
            .get(&order_id)
            .map(|p| p.symbol.clone())
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let quote = self
            .prices
            .get_price(&symbol)
            .ok_or(EngineError::PriceUnavailable(symbol))?;

        // All checks passed; commit.
        let position = acct
            .open
            .remove(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let pnl = pnl::realized_pnl(
            position.side,
            position.entry_price,
            quote.price,
            position.margin,
            position.leverage,
        );

        acct.locked -= position.margin;
        acct.total += position.margin + pnl;
        acct.closed.push(ClosedPosition {
            order_id: position.order_id,
            email: position.email.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            margin: position.margin,
            leverage: position.leverage,
            entry_price: position.entry_price,
            exit_price: quote.price,
            pnl,
            asset_decimals: position.asset_decimals,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
        });
        drop(acct);

        let mut index = self.order_index.write().unwrap_or_else(|e| e.into_inner());
        index.remove(&order_id);

        tracing::info!(%order_id, email = %email, pnl, exit_price = quote.price, "closed position");
        Ok(pnl)
    }

    /// Balance view; creates the account (seeded) on first reference.
    pub fn get_balance(&self, email: &str) -> Balance {
        let acct = self.account(email);
        let acct = acct.lock().unwrap_or_else(|e| e.into_inner());
        Balance {
            total: acct.total,
            locked: acct.locked,
            free: acct.total - acct.locked,
        }
    }

    pub fn list_open_positions(&self, email: &str) -> Vec<Position> {
        let Some(acct) = self.existing_account(email) else {
            return Vec::new();
        };
        let acct = acct.lock().unwrap_or_else(|e| e.into_inner());
        let mut positions: Vec<Position> = acct.open.values().cloned().collect();
        positions.sort_by_key(|p| p.opened_at);
        positions
    }

    pub fn list_closed_positions(&self, email: &str) -> Vec<ClosedPosition> {
        let Some(acct) = self.existing_account(email) else {
            return Vec::new();
        };
        let acct = acct.lock().unwrap_or_else(|e| e.into_inner());
        acct.closed.clone()
    }

    // ---- snapshot support ----

    /// `(email, total, locked)` per account.
    pub fn dump_balances(&self) -> Vec<(String, i128, i128)> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .iter()
            .map(|(email, acct)| {
                let acct = acct.lock().unwrap_or_else(|e| e.into_inner());
                (email.clone(), acct.total, acct.locked)
            })
            .collect()
    }

    pub fn dump_open_positions(&self) -> Vec<Position> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .values()
            .flat_map(|acct| {
                let acct = acct.lock().unwrap_or_else(|e| e.into_inner());
                acct.open.values().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    /// Overwrite one account's balances during restore.
    pub fn restore_balance(&self, email: &str, total: i128, locked: i128) {
        let acct = self.account(email);
        let mut acct = acct.lock().unwrap_or_else(|e| e.into_inner());
        acct.total = total;
        acct.locked = locked;
    }

    /// Re-attach a persisted open position during restore. Balances are
    /// restored separately; this does not touch them.
    pub fn restore_position(&self, position: Position) {
        let order_id = position.order_id;
        let email = position.email.clone();
        let acct = self.account(&email);
        {
            let mut acct = acct.lock().unwrap_or_else(|e| e.into_inner());
            acct.open.insert(order_id, position);
        }
        let mut index = self.order_index.write().unwrap_or_else(|e| e.into_inner());
        index.insert(order_id, email);
    }
}
