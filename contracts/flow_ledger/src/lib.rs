#![no_std]

mod accrual;

use soroban_sdk::{
    contract, contractclient, contractimpl, contracttype, log, symbol_short, token, Address, Bytes,
    Env, Map, Symbol, Vec,
};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Public view of a constant flow between two accounts.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowInfo {
    pub rate: i128,
    pub updated_at: u64,
}

/// Per-account streaming balance, settled lazily on every flow change.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    pub static_balance: i128,
    pub net_flow_rate: i128,
    pub settled_at: u64,
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AppStatus {
    Registered = 0,
    Jailed = 1,
}

/// Payload delivered to an app when one of its flows changes.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowEvent {
    pub asset: Address,
    pub sender: Address,
    pub receiver: Address,
    pub rate: i128,
    pub previous_rate: i128,
}

/// An outbound flow mutation requested by an app, with the app as sender.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlowOp {
    Create(Address, i128),
    Update(Address, i128),
    Delete(Address),
}

/// Continuation returned by an app callback.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallbackResult {
    pub ctx: Bytes,
    pub ops: Vec<FlowOp>,
}

#[soroban_sdk::contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    FlowExists = 1,
    FlowNotFound = 2,
    InvalidRate = 3,
    SelfFlow = 4,
    NotFlowParty = 5,
    InsufficientBalance = 6,
    InvalidAmount = 7,
    AppAlreadyRegistered = 8,
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Flow(Address, Address, Address), // (asset, sender, receiver) -> FlowInfo
    Account(Address, Address),       // (asset, account) -> Account
    App(Address),                    // app -> AppStatus
}

/// Callback surface every registered app exposes to the ledger.
#[contractclient(name = "SuperAppClient")]
pub trait SuperAppInterface {
    fn on_flow_created(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult;
    fn on_flow_updated(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult;
    fn on_flow_terminated(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult;
}

#[derive(Clone, Copy)]
enum Callback {
    Created,
    Updated,
    Terminated,
}

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

const TTL_THRESHOLD: u32 = 17280;
const TTL_EXTEND_TO: u32 = 120960;

fn load_flow(env: &Env, asset: &Address, sender: &Address, receiver: &Address) -> Option<FlowInfo> {
    env.storage().persistent().get(&DataKey::Flow(
        asset.clone(),
        sender.clone(),
        receiver.clone(),
    ))
}

fn store_flow(env: &Env, asset: &Address, sender: &Address, receiver: &Address, rate: i128) {
    let key = DataKey::Flow(asset.clone(), sender.clone(), receiver.clone());
    if rate == 0 {
        env.storage().persistent().remove(&key);
        return;
    }

    let flow = FlowInfo {
        rate,
        updated_at: env.ledger().timestamp(),
    };
    env.storage().persistent().set(&key, &flow);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn load_account(env: &Env, asset: &Address, account: &Address) -> Account {
    env.storage()
        .persistent()
        .get(&DataKey::Account(asset.clone(), account.clone()))
        .unwrap_or(Account {
            static_balance: 0,
            net_flow_rate: 0,
            settled_at: env.ledger().timestamp(),
        })
}

fn save_account(env: &Env, asset: &Address, account: &Address, state: &Account) {
    let key = DataKey::Account(asset.clone(), account.clone());
    env.storage().persistent().set(&key, state);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

/// Load an account with its balance brought forward to the current timestamp.
fn settle_account(env: &Env, asset: &Address, account: &Address) -> Account {
    let now = env.ledger().timestamp();
    let mut state = load_account(env, asset, account);
    state.static_balance =
        accrual::settled_balance(state.static_balance, state.net_flow_rate, state.settled_at, now);
    state.settled_at = now;
    state
}

fn app_status(env: &Env, app: &Address) -> Option<AppStatus> {
    env.storage()
        .persistent()
        .get(&DataKey::App(app.clone()))
}

fn is_registered(env: &Env, account: &Address) -> bool {
    app_status(env, account).is_some()
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl FlowLedger {
    /// Move `sender -> receiver` to `rate`, settling both balances first.
    /// Returns the previous rate (0 if the flow did not exist).
    fn write_flow(
        env: &Env,
        asset: &Address,
        sender: &Address,
        receiver: &Address,
        rate: i128,
    ) -> i128 {
        let previous = load_flow(env, asset, sender, receiver)
            .map(|flow| flow.rate)
            .unwrap_or(0);
        let delta = rate - previous;

        let mut from = settle_account(env, asset, sender);
        from.net_flow_rate -= delta;
        save_account(env, asset, sender, &from);

        let mut to = settle_account(env, asset, receiver);
        to.net_flow_rate += delta;
        save_account(env, asset, receiver, &to);

        store_flow(env, asset, sender, receiver, rate);

        env.events().publish(
            (symbol_short!("flow"), sender.clone(), receiver.clone()),
            (previous, rate),
        );
        previous
    }

    fn require_funded(env: &Env, asset: &Address, sender: &Address) -> Result<(), ContractError> {
        if is_registered(env, sender) {
            return Ok(());
        }
        let balance = settle_account(env, asset, sender).static_balance;
        if balance <= 0 {
            return Err(ContractError::InsufficientBalance);
        }
        Ok(())
    }

    fn jail(env: &Env, app: &Address, reason: Symbol) {
        env.storage()
            .persistent()
            .set(&DataKey::App(app.clone()), &AppStatus::Jailed);
        log!(env, "app jailed", app.clone(), reason.clone());
        env.events()
            .publish((symbol_short!("jailed"), app.clone()), reason);
    }

    /// Deliver a callback to `app` if it is a live registered app, then apply
    /// the operations it returns with `app` as sender.
    fn notify(env: &Env, app: &Address, callback: Callback, event: &FlowEvent, ctx: &Bytes) {
        if app_status(env, app) != Some(AppStatus::Registered) {
            return;
        }

        let client = SuperAppClient::new(env, app);
        let result = match callback {
            Callback::Created => client.on_flow_created(event, ctx),
            Callback::Updated => client.on_flow_updated(event, ctx),
            Callback::Terminated => match client.try_on_flow_terminated(event, ctx) {
                Ok(Ok(result)) => result,
                _ => {
                    Self::jail(env, app, symbol_short!("callback"));
                    return;
                }
            },
        };

        if result.ctx != *ctx {
            Self::jail(env, app, symbol_short!("ctx"));
            return;
        }
        if !Self::validate_ops(env, &event.asset, app, &result.ops) {
            Self::jail(env, app, symbol_short!("bad_op"));
            return;
        }

        for op in result.ops.iter() {
            match op {
                FlowOp::Create(receiver, rate) | FlowOp::Update(receiver, rate) => {
                    Self::write_flow(env, &event.asset, app, &receiver, rate);
                }
                FlowOp::Delete(receiver) => {
                    Self::write_flow(env, &event.asset, app, &receiver, 0);
                }
            }
        }

        if load_account(env, &event.asset, app).net_flow_rate < 0 {
            Self::jail(env, app, symbol_short!("insolvent"));
        }
    }

    /// Every op must match the existence of the flow it targets, carry a
    /// positive rate where one is given, and never target the app itself.
    fn validate_ops(env: &Env, asset: &Address, app: &Address, ops: &Vec<FlowOp>) -> bool {
        let mut open: Map<Address, bool> = Map::new(env);
        for op in ops.iter() {
            let receiver = match &op {
                FlowOp::Create(receiver, _) | FlowOp::Update(receiver, _) => receiver.clone(),
                FlowOp::Delete(receiver) => receiver.clone(),
            };
            if receiver == *app {
                return false;
            }

            let exists = match open.get(receiver.clone()) {
                Some(exists) => exists,
                None => load_flow(env, asset, app, &receiver).is_some(),
            };
            let valid = match op {
                FlowOp::Create(_, rate) => !exists && rate > 0,
                FlowOp::Update(_, rate) => exists && rate > 0,
                FlowOp::Delete(_) => exists,
            };
            if !valid {
                return false;
            }
            open.set(receiver, !matches!(op, FlowOp::Delete(_)));
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct FlowLedger;

#[contractimpl]
impl FlowLedger {
    /// Register the caller as an app that receives flow callbacks.
    ///
    /// # Authorization
    /// - Requires authorization from `app`
    ///
    /// # Errors
    /// - `AppAlreadyRegistered` if `app` is registered or jailed
    pub fn register_app(env: Env, app: Address) -> Result<(), ContractError> {
        app.require_auth();
        if is_registered(&env, &app) {
            return Err(ContractError::AppAlreadyRegistered);
        }

        let key = DataKey::App(app.clone());
        env.storage().persistent().set(&key, &AppStatus::Registered);
        env.storage()
            .persistent()
            .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);

        env.events().publish((symbol_short!("app"), app), ());
        Ok(())
    }

    pub fn is_app(env: Env, app: Address) -> bool {
        is_registered(&env, &app)
    }

    pub fn is_app_jailed(env: Env, app: Address) -> bool {
        app_status(&env, &app) == Some(AppStatus::Jailed)
    }

    /// Move `amount` of the underlying token into the ledger, crediting `from`.
    pub fn deposit(
        env: Env,
        asset: Address,
        from: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        from.require_auth();
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        // Pull tokens first; a failed transfer leaves no credit behind.
        token::Client::new(&env, &asset).transfer(&from, &env.current_contract_address(), &amount);

        let mut account = settle_account(&env, &asset, &from);
        account.static_balance += amount;
        save_account(&env, &asset, &from, &account);

        env.events()
            .publish((symbol_short!("deposit"), from), amount);
        Ok(())
    }

    /// Pay out `amount` of `to`'s real-time balance in the underlying token.
    ///
    /// # Errors
    /// - `InvalidAmount` if `amount <= 0`
    /// - `InsufficientBalance` if the settled balance is below `amount`
    pub fn withdraw(
        env: Env,
        asset: Address,
        to: Address,
        amount: i128,
    ) -> Result<(), ContractError> {
        to.require_auth();
        if amount <= 0 {
            return Err(ContractError::InvalidAmount);
        }

        let mut account = settle_account(&env, &asset, &to);
        if account.static_balance < amount {
            return Err(ContractError::InsufficientBalance);
        }

        // CEI: debit before the external token transfer.
        account.static_balance -= amount;
        save_account(&env, &asset, &to, &account);

        token::Client::new(&env, &asset).transfer(&env.current_contract_address(), &to, &amount);

        env.events()
            .publish((symbol_short!("withdrew"), to), amount);
        Ok(())
    }

    /// Open a constant flow from `sender` to `receiver`.
    ///
    /// If `receiver` is a registered app, its `on_flow_created` callback runs in the
    /// same transaction and the operations it returns are applied with the app as
    /// sender. A failing creation callback fails the whole call.
    ///
    /// # Authorization
    /// - Requires authorization from `sender`
    ///
    /// # Errors
    /// - `InvalidRate` if `rate <= 0`
    /// - `SelfFlow` if `sender == receiver`
    /// - `FlowExists` if the flow is already open
    /// - `InsufficientBalance` if a non-app sender has no positive balance
    pub fn create_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        rate: i128,
        ctx: Bytes,
    ) -> Result<(), ContractError> {
        sender.require_auth();

        if rate <= 0 {
            return Err(ContractError::InvalidRate);
        }
        if sender == receiver {
            return Err(ContractError::SelfFlow);
        }
        if load_flow(&env, &asset, &sender, &receiver).is_some() {
            return Err(ContractError::FlowExists);
        }
        Self::require_funded(&env, &asset, &sender)?;

        Self::write_flow(&env, &asset, &sender, &receiver, rate);

        let event = FlowEvent {
            asset,
            sender,
            receiver,
            rate,
            previous_rate: 0,
        };
        Self::notify(&env, &event.receiver, Callback::Created, &event, &ctx);
        Ok(())
    }

    /// Change the rate of an open flow. Callback rules match `create_flow`.
    pub fn update_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        rate: i128,
        ctx: Bytes,
    ) -> Result<(), ContractError> {
        sender.require_auth();

        if rate <= 0 {
            return Err(ContractError::InvalidRate);
        }
        let current =
            load_flow(&env, &asset, &sender, &receiver).ok_or(ContractError::FlowNotFound)?;
        if rate > current.rate {
            Self::require_funded(&env, &asset, &sender)?;
        }

        let previous_rate = Self::write_flow(&env, &asset, &sender, &receiver, rate);

        let event = FlowEvent {
            asset,
            sender,
            receiver,
            rate,
            previous_rate,
        };
        Self::notify(&env, &event.receiver, Callback::Updated, &event, &ctx);
        Ok(())
    }

    /// Close an open flow. Either party may close it.
    ///
    /// The party that did not initiate the deletion is notified if it is an app.
    /// Termination callbacks cannot block the deletion: a failing callback jails
    /// the app instead.
    ///
    /// # Authorization
    /// - Requires authorization from `by`, which must be `sender` or `receiver`
    pub fn delete_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        by: Address,
        ctx: Bytes,
    ) -> Result<(), ContractError> {
        by.require_auth();

        if by != sender && by != receiver {
            return Err(ContractError::NotFlowParty);
        }
        load_flow(&env, &asset, &sender, &receiver).ok_or(ContractError::FlowNotFound)?;

        let previous_rate = Self::write_flow(&env, &asset, &sender, &receiver, 0);

        let counterparty = if by == sender {
            receiver.clone()
        } else {
            sender.clone()
        };
        let event = FlowEvent {
            asset,
            sender,
            receiver,
            rate: 0,
            previous_rate,
        };
        Self::notify(&env, &counterparty, Callback::Terminated, &event, &ctx);
        Ok(())
    }

    /// Current flow between two accounts; a missing flow reads as rate 0.
    pub fn get_flow(env: Env, asset: Address, sender: Address, receiver: Address) -> FlowInfo {
        load_flow(&env, &asset, &sender, &receiver).unwrap_or(FlowInfo {
            rate: 0,
            updated_at: 0,
        })
    }

    /// Real-time balance: settled balance plus everything streamed since.
    pub fn balance_of(env: Env, asset: Address, account: Address) -> i128 {
        settle_account(&env, &asset, &account).static_balance
    }

    pub fn net_flow_rate(env: Env, asset: Address, account: Address) -> i128 {
        load_account(&env, &asset, &account).net_flow_rate
    }
}
