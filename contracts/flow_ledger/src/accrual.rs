/// Balance of an account at `now`, given the balance settled at `settled_at`
/// and the net flow rate the account has carried since then.
///
/// Streaming is continuous: `static_balance + net_flow_rate × (now − settled_at)`.
/// A timestamp at or before `settled_at` returns the settled balance unchanged.
/// Overflow saturates toward the sign of the flow instead of wrapping.
pub fn settled_balance(
    static_balance: i128,
    net_flow_rate: i128,
    settled_at: u64,
    now: u64,
) -> i128 {
    if now <= settled_at {
        return static_balance;
    }

    let elapsed = (now - settled_at) as i128;
    let streamed = net_flow_rate.saturating_mul(elapsed);
    static_balance.saturating_add(streamed)
}
