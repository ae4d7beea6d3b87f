#![no_std]

pub mod dispatch;
pub mod engine;
pub mod guard;
pub mod host;
mod registry;

use soroban_sdk::{
    contract, contractimpl, contracttype, panic_with_error, symbol_short, Address, Bytes, Env,
    String, Vec,
};

use dispatch::Notification;
use engine::{Entitlement, RedirectionState};
use host::{CallbackResult, FlowEvent, HostClient};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Global configuration, written once by `init`.
#[contracttype]
#[derive(Clone, Debug)]
pub struct Config {
    pub owner: Address,
    pub host: Address,
    pub flow_ledger: Address,
    pub asset: Address,
    pub name: String,
    pub symbol: String,
}

#[soroban_sdk::contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    InvalidOwner = 1,
    AllocationExceeded = 2,
    InvalidRate = 3,
    InvalidDuration = 4,
    TokenNotFound = 5,
    NotTokenOwner = 6,
    NotApproved = 7,
    InvalidRecipient = 8,
    ProtocolViolation = 9,
    EntitlementLimitReached = 10,
}

/// Namespace for all contract storage keys.
#[contracttype]
pub enum DataKey {
    Config,                 // Instance storage for owner, host, ledger and asset.
    NextTokenId,            // Instance storage for the auto-incrementing token id.
    State,                  // Persistent redirection state owned by the engine.
    TokenOwner(u64),        // Persistent holder of each entitlement token.
    TokenBalance(Address),  // Persistent count of tokens per holder.
    TokenApproval(u64),     // Persistent single-token approval, removed on transfer.
}

pub(crate) const TTL_THRESHOLD: u32 = 17280;
pub(crate) const TTL_EXTEND_TO: u32 = 120960;

// ---------------------------------------------------------------------------
// Storage helpers
// ---------------------------------------------------------------------------

fn get_config(env: &Env) -> Config {
    env.storage()
        .instance()
        .get(&DataKey::Config)
        .expect("contract not initialised: missing config")
}

pub(crate) fn load_state(env: &Env) -> RedirectionState {
    env.storage()
        .persistent()
        .get(&DataKey::State)
        .unwrap_or_else(|| RedirectionState::new(env))
}

pub(crate) fn save_state(env: &Env, state: &RedirectionState) {
    let key = DataKey::State;
    env.storage().persistent().set(&key, state);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

impl TradeableCashflow {
    /// Host callbacks must never fail softly: a rejected event is a protocol
    /// violation and aborts the invocation, which the host answers by jailing.
    fn handle_callback(env: &Env, notification: Notification, ctx: Bytes) -> CallbackResult {
        let config = get_config(env);
        config.host.require_auth();

        match dispatch::dispatch(env, &config, notification) {
            Ok(outcome) => CallbackResult {
                ctx,
                ops: outcome.ops,
            },
            Err(_) => panic_with_error!(env, ContractError::ProtocolViolation),
        }
    }

    fn move_entitlement(
        env: &Env,
        from: Address,
        to: Address,
        token_id: u64,
    ) -> Result<(), ContractError> {
        let holder = registry::owner_of(env, token_id)?;
        if holder != from {
            return Err(ContractError::NotTokenOwner);
        }
        if to == env.current_contract_address() {
            return Err(ContractError::InvalidRecipient);
        }
        if from == to {
            return Ok(());
        }

        let config = get_config(env);
        // Redirect before the registry records the new holder.
        let outcome = dispatch::dispatch(
            env,
            &config,
            Notification::OwnershipTransferred {
                token_id,
                to: to.clone(),
            },
        )?;
        registry::move_token(env, &from, &to, token_id);
        host::issue(env, &config, &outcome.ops);

        env.events()
            .publish((symbol_short!("redirect"), token_id), (from, to));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contract Implementation
// ---------------------------------------------------------------------------

#[contract]
pub struct TradeableCashflow;

#[contractimpl]
impl TradeableCashflow {
    /// Initialise the contract and register it as an app with the host.
    ///
    /// # Parameters
    /// - `owner`: default beneficiary; receives every unallocated unit of the inbound flow
    /// - `host`: host runtime that delivers flow callbacks
    /// - `flow_ledger`: ledger the contract opens and updates its outbound flows on
    /// - `asset`: the streamed asset; flows in any other asset are ignored
    /// - `name`, `symbol`: display metadata of the entitlement tokens
    ///
    /// # Errors
    /// - `InvalidOwner` if `owner` is the placeholder account or this contract.
    ///   Nothing is stored and the host is not contacted.
    ///
    /// # Panics
    /// - If called more than once
    pub fn init(
        env: Env,
        owner: Address,
        host: Address,
        flow_ledger: Address,
        asset: Address,
        name: String,
        symbol: String,
    ) -> Result<(), ContractError> {
        if env.storage().instance().has(&DataKey::Config) {
            panic!("already initialised");
        }
        guard::validate_owner(&env, &owner)?;

        let config = Config {
            owner,
            host,
            flow_ledger,
            asset,
            name,
            symbol,
        };
        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::NextTokenId, &0u64);
        save_state(&env, &RedirectionState::new(&env));

        env.storage()
            .instance()
            .extend_ttl(TTL_THRESHOLD, TTL_EXTEND_TO);

        HostClient::new(&env, &config.host).register_app(&env.current_contract_address());
        Ok(())
    }

    /// Carve `rate` out of the owner's default share into a new entitlement token.
    ///
    /// The token is minted to the owner, so the owner's outbound flow is unchanged
    /// until the token is transferred. With `duration` set, the entitlement lapses
    /// `duration` seconds from now; the freed rate returns to the owner on the next
    /// event that touches the contract.
    ///
    /// # Authorization
    /// - Requires authorization from the owner
    ///
    /// # Errors
    /// - `InvalidRate` if `rate <= 0`
    /// - `InvalidDuration` if `duration` is `Some(0)`
    /// - `AllocationExceeded` if `rate` exceeds the unallocated inbound rate
    /// - `EntitlementLimitReached` once `engine::MAX_ENTITLEMENTS` tokens exist
    ///
    /// # Events
    /// - `mint(token_id)` from the registry and `minted(token_id) -> (rate, expires_at)`
    pub fn create_entitlement(
        env: Env,
        rate: i128,
        duration: Option<u64>,
    ) -> Result<u64, ContractError> {
        let config = get_config(&env);
        config.owner.require_auth();

        if duration == Some(0) {
            return Err(ContractError::InvalidDuration);
        }
        let now = env.ledger().timestamp();
        let expires_at = duration.map(|seconds| now.saturating_add(seconds));

        let token_id = registry::next_token_id(&env);
        let outcome = dispatch::dispatch(
            &env,
            &config,
            Notification::EntitlementMinted {
                token_id,
                holder: config.owner.clone(),
                rate,
                expires_at,
            },
        )?;
        registry::mint(&env, &config.owner);
        host::issue(&env, &config, &outcome.ops);

        env.events()
            .publish((symbol_short!("minted"), token_id), (rate, expires_at));
        Ok(token_id)
    }

    /// Transfer an entitlement token, redirecting its flow to `to` in the same call.
    ///
    /// # Authorization
    /// - Requires authorization from `from`
    ///
    /// # Errors
    /// - `TokenNotFound`, `NotTokenOwner` if `from` does not hold the token
    /// - `InvalidRecipient` if `to` is this contract
    pub fn transfer(
        env: Env,
        from: Address,
        to: Address,
        token_id: u64,
    ) -> Result<(), ContractError> {
        from.require_auth();
        Self::move_entitlement(&env, from, to, token_id)
    }

    /// Transfer on behalf of the holder. `spender` is the holder or its approved address.
    pub fn transfer_from(
        env: Env,
        spender: Address,
        from: Address,
        to: Address,
        token_id: u64,
    ) -> Result<(), ContractError> {
        spender.require_auth();

        if spender != from && registry::approved(&env, token_id) != Some(spender) {
            registry::owner_of(&env, token_id)?;
            return Err(ContractError::NotApproved);
        }
        Self::move_entitlement(&env, from, to, token_id)
    }

    /// Approve `approved` to move `token_id`, or clear the approval with `None`.
    pub fn approve(
        env: Env,
        holder: Address,
        approved: Option<Address>,
        token_id: u64,
    ) -> Result<(), ContractError> {
        holder.require_auth();
        if registry::owner_of(&env, token_id)? != holder {
            return Err(ContractError::NotTokenOwner);
        }
        registry::set_approved(&env, token_id, approved.clone());

        env.events()
            .publish((symbol_short!("approve"), token_id), approved);
        Ok(())
    }

    /// Apply pending expiries and reopen or forget outflows the ledger closed
    /// without a callback. Anyone may call this. Returns the expired token ids.
    pub fn sync_outflows(env: Env) -> Vec<u64> {
        let config = get_config(&env);
        let closed = host::closed_outflows(&env, &config, &load_state(&env).outflows);

        match dispatch::dispatch(&env, &config, Notification::Sync { closed }) {
            Ok(outcome) => {
                host::issue(&env, &config, &outcome.ops);
                outcome.expired
            }
            Err(_) => panic_with_error!(&env, ContractError::ProtocolViolation),
        }
    }

    // -----------------------------------------------------------------------
    // Host callbacks
    // -----------------------------------------------------------------------

    /// Called by the host after a flow to or from this contract is opened.
    pub fn on_flow_created(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult {
        Self::handle_callback(&env, Notification::FlowCreated(event), ctx)
    }

    /// Called by the host after a flow to or from this contract changes rate.
    pub fn on_flow_updated(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult {
        Self::handle_callback(&env, Notification::FlowUpdated(event), ctx)
    }

    /// Called by the host after a flow to or from this contract is closed by
    /// the other party. Closing the inbound flow stops every outflow.
    pub fn on_flow_terminated(env: Env, event: FlowEvent, ctx: Bytes) -> CallbackResult {
        Self::handle_callback(&env, Notification::FlowTerminated(event), ctx)
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn get_config(env: Env) -> Config {
        get_config(&env)
    }

    pub fn owner(env: Env) -> Address {
        get_config(&env).owner
    }

    pub fn name(env: Env) -> String {
        get_config(&env).name
    }

    pub fn symbol(env: Env) -> String {
        get_config(&env).symbol
    }

    pub fn owner_of(env: Env, token_id: u64) -> Result<Address, ContractError> {
        registry::owner_of(&env, token_id)
    }

    pub fn balance_of(env: Env, holder: Address) -> u64 {
        registry::balance_of(&env, &holder)
    }

    pub fn get_approved(env: Env, token_id: u64) -> Result<Option<Address>, ContractError> {
        registry::owner_of(&env, token_id)?;
        Ok(registry::approved(&env, token_id))
    }

    pub fn total_supply(env: Env) -> u64 {
        registry::next_token_id(&env)
    }

    /// Entitlement behind a token, as of the last event that touched the contract.
    pub fn get_entitlement(env: Env, token_id: u64) -> Result<Entitlement, ContractError> {
        load_state(&env)
            .entitlements
            .get(token_id)
            .ok_or(ContractError::TokenNotFound)
    }

    pub fn inbound_rate(env: Env) -> i128 {
        load_state(&env).inbound_rate()
    }

    /// Rate still available for new entitlements. Lapsed entitlements are only
    /// counted as free once an event (or `sync_outflows`) has touched them.
    pub fn unallocated_rate(env: Env) -> i128 {
        load_state(&env).unallocated_rate()
    }

    pub fn outflow_rate(env: Env, receiver: Address) -> i128 {
        load_state(&env).outflows.get(receiver).unwrap_or(0)
    }

    pub fn get_state(env: Env) -> RedirectionState {
        load_state(&env)
    }
}
