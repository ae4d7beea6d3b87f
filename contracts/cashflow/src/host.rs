//! Interface to the host streaming runtime and its flow ledger.
//!
//! Types here mirror the host's contract types field for field, so values
//! cross the contract boundary without conversion.

use soroban_sdk::{contractclient, contracttype, Address, Bytes, Env, Map, Vec};

use crate::Config;

/// Payload the host delivers when a flow involving this contract changes.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowEvent {
    pub asset: Address,
    pub sender: Address,
    pub receiver: Address,
    pub rate: i128,
    pub previous_rate: i128,
}

/// Outbound flow mutation, always with this contract as sender.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlowOp {
    Create(Address, i128),
    Update(Address, i128),
    Delete(Address),
}

/// Continuation handed back to the host at the end of every callback.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallbackResult {
    pub ctx: Bytes,
    pub ops: Vec<FlowOp>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlowInfo {
    pub rate: i128,
    pub updated_at: u64,
}

#[contractclient(name = "HostClient")]
pub trait HostInterface {
    fn register_app(env: Env, app: Address);
}

#[contractclient(name = "FlowLedgerClient")]
pub trait FlowLedgerInterface {
    fn create_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        rate: i128,
        ctx: Bytes,
    );
    fn update_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        rate: i128,
        ctx: Bytes,
    );
    fn delete_flow(
        env: Env,
        asset: Address,
        sender: Address,
        receiver: Address,
        by: Address,
        ctx: Bytes,
    );
    fn get_flow(env: Env, asset: Address, sender: Address, receiver: Address) -> FlowInfo;
}

/// Issue outbound operations directly against the flow ledger.
///
/// Used outside of callbacks only; inside a callback the same operations are
/// returned to the host in the continuation instead.
pub fn issue(env: &Env, config: &Config, ops: &Vec<FlowOp>) {
    if ops.is_empty() {
        return;
    }

    let ledger = FlowLedgerClient::new(env, &config.flow_ledger);
    let app = env.current_contract_address();
    let ctx = Bytes::new(env);

    for op in ops.iter() {
        match op {
            FlowOp::Create(receiver, rate) => {
                ledger.create_flow(&config.asset, &app, &receiver, &rate, &ctx)
            }
            FlowOp::Update(receiver, rate) => {
                ledger.update_flow(&config.asset, &app, &receiver, &rate, &ctx)
            }
            FlowOp::Delete(receiver) => {
                ledger.delete_flow(&config.asset, &app, &receiver, &app, &ctx)
            }
        }
    }
}

/// Receivers this contract believes it streams to but whose ledger flow is gone,
/// e.g. closed while callbacks were not being delivered.
pub fn closed_outflows(env: &Env, config: &Config, outflows: &Map<Address, i128>) -> Vec<Address> {
    let ledger = FlowLedgerClient::new(env, &config.flow_ledger);
    let app = env.current_contract_address();

    let mut closed = Vec::new(env);
    for receiver in outflows.keys().iter() {
        if ledger.get_flow(&config.asset, &app, &receiver).rate == 0 {
            closed.push_back(receiver);
        }
    }
    closed
}
