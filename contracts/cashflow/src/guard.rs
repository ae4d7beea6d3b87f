use soroban_sdk::{Address, Env, String};

use crate::{engine::RedirectionState, ContractError};

/// Account strkey of the all-zero ed25519 key, the "no one" identity.
pub const PLACEHOLDER_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";
/// Contract strkey of the all-zero contract id.
pub const PLACEHOLDER_CONTRACT: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAABSC4";

pub fn placeholder(env: &Env) -> Address {
    Address::from_string(&String::from_str(env, PLACEHOLDER_ACCOUNT))
}

pub fn placeholder_contract(env: &Env) -> Address {
    Address::from_string(&String::from_str(env, PLACEHOLDER_CONTRACT))
}

/// The default beneficiary must be a real, external identity.
pub fn validate_owner(env: &Env, owner: &Address) -> Result<(), ContractError> {
    if *owner == placeholder(env)
        || *owner == placeholder_contract(env)
        || *owner == env.current_contract_address()
    {
        return Err(ContractError::InvalidOwner);
    }
    Ok(())
}

/// Outflows must be positive and may never exceed the inbound rate in total.
pub fn check_rate_invariant(state: &RedirectionState) -> Result<(), ContractError> {
    if state.outflows.values().iter().any(|rate| rate <= 0) {
        return Err(ContractError::ProtocolViolation);
    }
    if state.outbound_rate() > state.inbound_rate() {
        return Err(ContractError::ProtocolViolation);
    }
    Ok(())
}
