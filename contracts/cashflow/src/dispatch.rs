//! Callback dispatcher: routes every lifecycle notification through the
//! redirection engine and persists the result.

use soroban_sdk::{log, symbol_short, Address, Env, Vec};

use crate::{
    engine::{self, Event, RedirectionState},
    host::{FlowEvent, FlowOp},
    load_state, save_state, Config, ContractError,
};

/// Every lifecycle event class the contract reacts to.
#[derive(Clone, Debug)]
pub enum Notification {
    FlowCreated(FlowEvent),
    FlowUpdated(FlowEvent),
    FlowTerminated(FlowEvent),
    EntitlementMinted {
        token_id: u64,
        holder: Address,
        rate: i128,
        expires_at: Option<u64>,
    },
    OwnershipTransferred {
        token_id: u64,
        to: Address,
    },
    Sync {
        closed: Vec<Address>,
    },
}

#[derive(Clone, Debug)]
pub struct Outcome {
    pub ops: Vec<FlowOp>,
    pub expired: Vec<u64>,
}

impl Outcome {
    fn untouched(env: &Env) -> Self {
        Outcome {
            ops: Vec::new(env),
            expired: Vec::new(env),
        }
    }
}

/// Map a notification onto an engine event. `None` means the notification
/// does not concern the tracked asset and inbound sender.
fn route(
    env: &Env,
    config: &Config,
    state: &RedirectionState,
    notification: Notification,
) -> Option<Event> {
    let app = env.current_contract_address();

    match notification {
        Notification::FlowCreated(event) | Notification::FlowUpdated(event) => {
            if event.asset != config.asset || event.receiver != app {
                return None;
            }
            if !state.accepts_sender(&event.sender) {
                return None;
            }
            Some(Event::InboundChanged {
                sender: event.sender,
                rate: event.rate,
            })
        }
        Notification::FlowTerminated(event) => {
            if event.asset != config.asset {
                return None;
            }
            if event.receiver == app {
                if !state.has_inbound() || !state.accepts_sender(&event.sender) {
                    return None;
                }
                return Some(Event::InboundTerminated);
            }
            if event.sender == app {
                return Some(Event::OutboundTerminated {
                    receiver: event.receiver,
                });
            }
            None
        }
        Notification::EntitlementMinted {
            token_id,
            holder,
            rate,
            expires_at,
        } => Some(Event::Minted {
            token_id,
            holder,
            rate,
            expires_at,
        }),
        Notification::OwnershipTransferred { token_id, to } => {
            Some(Event::Transferred { token_id, to })
        }
        Notification::Sync { closed } => Some(Event::Reconcile { closed }),
    }
}

/// Run one notification to completion: route, transition, persist, report.
///
/// Nothing is written when the engine rejects the event, so an `Err` leaves
/// the redirection state exactly as it was.
pub fn dispatch(
    env: &Env,
    config: &Config,
    notification: Notification,
) -> Result<Outcome, ContractError> {
    let state = load_state(env);
    let event = match route(env, config, &state, notification) {
        Some(event) => event,
        None => return Ok(Outcome::untouched(env)),
    };

    let transition = engine::apply(env, &state, event, &config.owner, env.ledger().timestamp())?;
    save_state(env, &transition.state);

    for token_id in transition.expired.iter() {
        env.events()
            .publish((symbol_short!("expired"), token_id), ());
    }
    if transition.shortfall > 0 {
        // Degraded funding: honored up to the inbound rate, never an error.
        log!(env, "degraded funding, shortfall per second", transition.shortfall);
        env.events().publish(
            (symbol_short!("degraded"),),
            (transition.state.inbound_rate(), transition.shortfall),
        );
    }

    Ok(Outcome {
        ops: transition.ops,
        expired: transition.expired,
    })
}
