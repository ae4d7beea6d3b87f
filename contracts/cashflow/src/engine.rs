//! Redirection engine: a pure transition function from the current
//! redirection state and one lifecycle event to the next state plus the
//! outbound flow operations that bring the ledger in line with it.
//!
//! The engine never touches storage or the ledger. Callers persist
//! `Transition::state` and deliver `Transition::ops`.

use soroban_sdk::{contracttype, Address, Env, Map, Vec};

use crate::{guard, host::FlowOp, ContractError};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Most entitlements one contract will ever mint. Closing the inbound flow
/// rewrites every holder's flow in a single invocation, which has to stay
/// within the host's per-transaction budget.
pub const MAX_ENTITLEMENTS: u32 = 100;

/// The single inbound flow being redistributed.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Inbound {
    pub sender: Address,
    pub rate: i128,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InboundFlow {
    Closed,
    Open(Inbound),
}

/// Portion of the inbound rate carved out for one ownership token.
///
/// `rate` is the committed rate; `effective_rate` is what actually flows after
/// any degraded-funding reduction. Expired entitlements keep their entry with
/// both rates at zero.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entitlement {
    pub token_id: u64,
    pub holder: Address,
    pub rate: i128,
    pub effective_rate: i128,
    pub expires_at: Option<u64>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RedirectionState {
    pub inbound: InboundFlow,
    pub entitlements: Map<u64, Entitlement>, // ordered by token id
    pub outflows: Map<Address, i128>,        // open outbound flows, per receiver
}

impl RedirectionState {
    pub fn new(env: &Env) -> Self {
        RedirectionState {
            inbound: InboundFlow::Closed,
            entitlements: Map::new(env),
            outflows: Map::new(env),
        }
    }

    pub fn inbound_rate(&self) -> i128 {
        match &self.inbound {
            InboundFlow::Open(inbound) => inbound.rate,
            InboundFlow::Closed => 0,
        }
    }

    pub fn has_inbound(&self) -> bool {
        matches!(self.inbound, InboundFlow::Open(_))
    }

    /// Sum of committed entitlement rates.
    pub fn committed_rate(&self) -> i128 {
        self.entitlements
            .values()
            .iter()
            .fold(0i128, |sum, entitlement| sum.saturating_add(entitlement.rate))
    }

    /// Inbound rate not committed to any entitlement: the owner's default share.
    pub fn unallocated_rate(&self) -> i128 {
        self.inbound_rate()
            .saturating_sub(self.committed_rate())
            .max(0)
    }

    pub fn outbound_rate(&self) -> i128 {
        self.outflows
            .values()
            .iter()
            .fold(0i128, |sum, rate| sum.saturating_add(rate))
    }

    pub fn accepts_sender(&self, sender: &Address) -> bool {
        match &self.inbound {
            InboundFlow::Open(inbound) => inbound.sender == *sender,
            InboundFlow::Closed => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Event {
    /// Inbound flow opened or changed rate.
    InboundChanged { sender: Address, rate: i128 },
    /// Inbound flow closed; nothing funds the outflows any more.
    InboundTerminated,
    Minted {
        token_id: u64,
        holder: Address,
        rate: i128,
        expires_at: Option<u64>,
    },
    Transferred { token_id: u64, to: Address },
    /// An outbound flow was closed by someone else.
    OutboundTerminated { receiver: Address },
    /// Expiry check, forgetting outflows the ledger no longer has.
    Reconcile { closed: Vec<Address> },
}

#[derive(Clone, Debug)]
pub struct Transition {
    pub state: RedirectionState,
    pub ops: Vec<FlowOp>,
    /// Committed rate the inbound flow cannot cover (0 when fully funded).
    pub shortfall: i128,
    pub expired: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Transition function
// ---------------------------------------------------------------------------

/// Compute the next redirection state for `event` observed at `now`.
///
/// Every transition first expires entitlements whose deadline has passed
/// (expiry is checked on touch, never by timers), then applies the event,
/// reallocates the inbound rate and diffs the desired outflows against the
/// open ones.
///
/// # Errors
/// - `InvalidRate` / `AllocationExceeded` when a mint cannot be funded
/// - `EntitlementLimitReached` once `MAX_ENTITLEMENTS` tokens exist
/// - `TokenNotFound` when a transfer names an unknown token
/// - `ProtocolViolation` for malformed host input or a broken rate invariant
pub fn apply(
    env: &Env,
    state: &RedirectionState,
    event: Event,
    owner: &Address,
    now: u64,
) -> Result<Transition, ContractError> {
    let mut next = state.clone();
    let expired = expire(env, &mut next, now);

    match event {
        Event::InboundChanged { sender, rate } => {
            if rate < 0 {
                return Err(ContractError::ProtocolViolation);
            }
            next.inbound = InboundFlow::Open(Inbound { sender, rate });
        }
        Event::InboundTerminated => {
            next.inbound = InboundFlow::Closed;
        }
        Event::Minted {
            token_id,
            holder,
            rate,
            expires_at,
        } => {
            if rate <= 0 {
                return Err(ContractError::InvalidRate);
            }
            if rate > next.unallocated_rate() {
                return Err(ContractError::AllocationExceeded);
            }
            if next.entitlements.contains_key(token_id) {
                return Err(ContractError::ProtocolViolation);
            }
            // Expired entries still count: they are never removed.
            if next.entitlements.len() >= MAX_ENTITLEMENTS {
                return Err(ContractError::EntitlementLimitReached);
            }
            next.entitlements.set(
                token_id,
                Entitlement {
                    token_id,
                    holder,
                    rate,
                    effective_rate: rate,
                    expires_at,
                },
            );
        }
        Event::Transferred { token_id, to } => {
            let mut entitlement = next
                .entitlements
                .get(token_id)
                .ok_or(ContractError::TokenNotFound)?;
            entitlement.holder = to;
            next.entitlements.set(token_id, entitlement);
        }
        Event::OutboundTerminated { receiver } => {
            next.outflows.remove(receiver);
        }
        Event::Reconcile { closed } => {
            for receiver in closed.iter() {
                next.outflows.remove(receiver);
            }
        }
    }

    let shortfall = allocate(&mut next);
    let desired = desired_outflows(env, &next, owner);
    let ops = diff(env, &next.outflows, &desired);
    next.outflows = desired;

    guard::check_rate_invariant(&next)?;

    Ok(Transition {
        state: next,
        ops,
        shortfall,
        expired,
    })
}

fn expire(env: &Env, state: &mut RedirectionState, now: u64) -> Vec<u64> {
    let mut expired = Vec::new(env);
    let entitlements = state.entitlements.clone();
    for (token_id, mut entitlement) in entitlements.iter() {
        let due = entitlement.expires_at.map_or(false, |at| at <= now);
        if due && entitlement.rate > 0 {
            entitlement.rate = 0;
            entitlement.effective_rate = 0;
            state.entitlements.set(token_id, entitlement);
            expired.push_back(token_id);
        }
    }
    expired
}

/// Recompute effective rates from committed ones. When the inbound rate cannot
/// cover every commitment, the shortfall is taken from entitlements in
/// ascending token id order. Returns the shortfall.
fn allocate(state: &mut RedirectionState) -> i128 {
    let shortfall = state
        .committed_rate()
        .saturating_sub(state.inbound_rate())
        .max(0);

    let mut remaining = shortfall;
    let entitlements = state.entitlements.clone();
    for (token_id, mut entitlement) in entitlements.iter() {
        let cut = remaining.min(entitlement.rate);
        remaining -= cut;
        let effective_rate = entitlement.rate - cut;
        if entitlement.effective_rate != effective_rate {
            entitlement.effective_rate = effective_rate;
            state.entitlements.set(token_id, entitlement);
        }
    }
    shortfall
}

fn desired_outflows(env: &Env, state: &RedirectionState, owner: &Address) -> Map<Address, i128> {
    let mut desired = Map::new(env);
    credit(&mut desired, owner, state.unallocated_rate());
    for entitlement in state.entitlements.values().iter() {
        credit(&mut desired, &entitlement.holder, entitlement.effective_rate);
    }
    desired
}

fn credit(outflows: &mut Map<Address, i128>, receiver: &Address, rate: i128) {
    if rate <= 0 {
        return;
    }
    let current = outflows.get(receiver.clone()).unwrap_or(0);
    outflows.set(receiver.clone(), current.saturating_add(rate));
}

/// Operations moving `current` to `desired`. Reductions come first so the
/// contract never streams out more than it takes in between two operations.
fn diff(env: &Env, current: &Map<Address, i128>, desired: &Map<Address, i128>) -> Vec<FlowOp> {
    let mut shrinking = Vec::new(env);
    let mut growing = Vec::new(env);

    for (receiver, rate) in current.iter() {
        match desired.get(receiver.clone()) {
            None => shrinking.push_back(FlowOp::Delete(receiver)),
            Some(target) if target < rate => shrinking.push_back(FlowOp::Update(receiver, target)),
            Some(target) if target > rate => growing.push_back(FlowOp::Update(receiver, target)),
            Some(_) => {}
        }
    }
    for (receiver, target) in desired.iter() {
        if !current.contains_key(receiver.clone()) {
            growing.push_back(FlowOp::Create(receiver, target));
        }
    }

    shrinking.append(&growing);
    shrinking
}
