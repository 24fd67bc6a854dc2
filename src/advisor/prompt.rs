// =============================================================================
// Advisory prompt — one system preamble plus one structured user message
// =============================================================================

use chrono::{TimeZone, Utc};

use crate::account::DayStatsSnapshot;
use crate::tick::PositionTick;
use crate::triggers::FiredTrigger;

/// Account-wide context rendered into the user message.
pub struct AccountBlock {
    pub equity: f64,
    pub open_position_count: usize,
    pub entries_cap: u32,
    pub stats: DayStatsSnapshot,
}

/// Role statement sent as the system message on every advisor call.
pub fn system_preamble() -> &'static str {
    "You are the position risk manager for a perpetual-futures trading \
     account. You are consulted only when something significant happens to \
     an open position. You may only reduce risk: tighten stops, take \
     partial profit, adjust take-profit, or close. You may never widen a \
     stop, add size, or open positions. Reply with a single JSON object and \
     nothing else."
}

/// Render the structured user message for one advisor invocation.
pub fn build_user_message(
    tick: &PositionTick,
    trajectory: &[&PositionTick],
    fired: &[FiredTrigger],
    thesis: Option<&str>,
    account: &AccountBlock,
    rate_remaining: u32,
) -> String {
    let mut msg = String::with_capacity(2048);

    // --- Fired triggers ----------------------------------------------------
    msg.push_str("## Why you are being consulted\n");
    for trigger in fired {
        msg.push_str(&format!("- {}: {}\n", trigger.name, trigger.detail));
    }

    // --- Current position --------------------------------------------------
    msg.push_str(&format!(
        "\n## Position\nsymbol: {}\nside: {}\nnotional: {:.2}\nentry: {}\nmark: {}\n\
         unrealized_pnl: {:.2} ({:+.2}% of equity)\n",
        tick.symbol,
        tick.side,
        tick.position_size,
        tick.entry_price,
        tick.mark_price,
        tick.unrealized_pnl,
        tick.pnl_pct_of_equity,
    ));
    match tick.stop_loss_price {
        Some(stop) => msg.push_str(&format!(
            "stop: {} ({:+.2}% from mark)\n",
            stop,
            signed_distance_pct(tick.mark_price, stop)
        )),
        None => msg.push_str("stop: NONE\n"),
    }
    match tick.take_profit_price {
        Some(tp) => msg.push_str(&format!(
            "take_profit: {} ({:+.2}% from mark)\n",
            tp,
            signed_distance_pct(tick.mark_price, tp)
        )),
        None => msg.push_str("take_profit: NONE\n"),
    }
    msg.push_str(&format!(
        "liquidation: {} ({:.2}% away)\nfunding_rate: {:.6}\n",
        tick.liquidation_price, tick.dist_to_liquidation_pct, tick.funding_rate,
    ));

    // --- Recent trajectory -------------------------------------------------
    msg.push_str("\n## Recent trajectory (time, mark, pnl % of equity)\n");
    for t in trajectory {
        msg.push_str(&format!(
            "{} | {} | {:+.2}%\n",
            format_time(t.timestamp),
            t.mark_price,
            t.pnl_pct_of_equity,
        ));
    }

    // --- Account -----------------------------------------------------------
    msg.push_str(&format!(
        "\n## Account\nequity: {:.2}\nopen_positions: {}\nentries_today: {} / {}\nstreak: {}\n",
        account.equity,
        account.open_position_count,
        account.stats.entries_today,
        account.entries_cap,
        describe_streak(account.stats.streak),
    ));

    // --- Thesis ------------------------------------------------------------
    msg.push_str(&format!(
        "\n## Entry thesis\n{}\n",
        thesis.unwrap_or("Not recorded")
    ));

    // --- Risk rules --------------------------------------------------------
    msg.push_str(
        "\n## Risk rules\n\
         - Stops may only tighten: up for longs, down for shorts, never past mark.\n\
         - Take-profit must stay on the profit side of mark.\n\
         - Partial closes must leave the position above the exchange minimum.\n\
         - When in doubt, hold. Closing is always allowed.\n",
    );
    msg.push_str(&format!(
        "- Advisor budget remaining this hour: {rate_remaining}\n"
    ));

    // --- Action menu -------------------------------------------------------
    msg.push_str(
        "\n## Your reply\n\
         One JSON object, no prose:\n\
         {\"action\": \"hold\", \"reason\": \"...\"}\n\
         {\"action\": \"tighten_stop\", \"params\": {\"newStopPrice\": <number>}, \"reason\": \"...\"}\n\
         {\"action\": \"adjust_take_profit\", \"params\": {\"newTpPrice\": <number>}, \"reason\": \"...\"}\n\
         {\"action\": \"partial_close\", \"params\": {\"fractionOfPosition\": <0..1>}, \"reason\": \"...\"}\n\
         {\"action\": \"close\", \"reason\": \"...\"}\n",
    );

    msg
}

/// Signed % distance of `level` from `mark` (negative = below mark).
fn signed_distance_pct(mark: f64, level: f64) -> f64 {
    if !mark.is_finite() || mark == 0.0 {
        return 0.0;
    }
    (level - mark) / mark.abs() * 100.0
}

fn format_time(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

fn describe_streak(streak: i32) -> String {
    match streak.cmp(&0) {
        std::cmp::Ordering::Greater => format!("{streak} wins"),
        std::cmp::Ordering::Less => format!("{} losses", -streak),
        std::cmp::Ordering::Equal => "flat".to_string(),
    }
}
