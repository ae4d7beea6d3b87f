//! Ownership registry for entitlement tokens.
//!
//! Token ids are sequential starting from 0. Every token has exactly one
//! holder; a transfer clears any single-token approval.

use soroban_sdk::{symbol_short, Address, Env};

use crate::{ContractError, DataKey, TTL_EXTEND_TO, TTL_THRESHOLD};

pub fn next_token_id(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::NextTokenId)
        .unwrap_or(0u64)
}

pub fn owner_of(env: &Env, token_id: u64) -> Result<Address, ContractError> {
    env.storage()
        .persistent()
        .get(&DataKey::TokenOwner(token_id))
        .ok_or(ContractError::TokenNotFound)
}

pub fn balance_of(env: &Env, holder: &Address) -> u64 {
    env.storage()
        .persistent()
        .get(&DataKey::TokenBalance(holder.clone()))
        .unwrap_or(0u64)
}

pub fn approved(env: &Env, token_id: u64) -> Option<Address> {
    env.storage()
        .persistent()
        .get(&DataKey::TokenApproval(token_id))
}

pub fn set_approved(env: &Env, token_id: u64, spender: Option<Address>) {
    let key = DataKey::TokenApproval(token_id);
    match spender {
        Some(spender) => env.storage().persistent().set(&key, &spender),
        None => env.storage().persistent().remove(&key),
    }
}

fn set_owner(env: &Env, token_id: u64, holder: &Address) {
    let key = DataKey::TokenOwner(token_id);
    env.storage().persistent().set(&key, holder);
    env.storage()
        .persistent()
        .extend_ttl(&key, TTL_THRESHOLD, TTL_EXTEND_TO);
}

fn set_balance(env: &Env, holder: &Address, balance: u64) {
    let key = DataKey::TokenBalance(holder.clone());
    if balance == 0 {
        env.storage().persistent().remove(&key);
    } else {
        env.storage().persistent().set(&key, &balance);
    }
}

/// Mint the next token to `to`, returning its id.
pub fn mint(env: &Env, to: &Address) -> u64 {
    let token_id = next_token_id(env);
    env.storage()
        .instance()
        .set(&DataKey::NextTokenId, &(token_id + 1));

    set_owner(env, token_id, to);
    set_balance(env, to, balance_of(env, to) + 1);

    env.events()
        .publish((symbol_short!("mint"), token_id), to.clone());
    token_id
}

/// Move a token between holders. Callers check authorization and ownership.
pub fn move_token(env: &Env, from: &Address, to: &Address, token_id: u64) {
    set_approved(env, token_id, None);
    set_balance(env, from, balance_of(env, from).saturating_sub(1));
    set_balance(env, to, balance_of(env, to) + 1);
    set_owner(env, token_id, to);

    env.events()
        .publish((symbol_short!("transfer"), token_id), (from.clone(), to.clone()));
}
