// =============================================================================
// Advisor actions — constrained parse of the LLM reply plus safety validation
// =============================================================================
//
// The reply contract is a single JSON object; any prose around it is
// ignored. Parsing returns a closed sum — everything outside the five known
// actions is a parse error, and validation enforces the risk-reduction-only
// envelope before anything reaches the order gateway.
// =============================================================================

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::tick::PositionTick;
use crate::types::PositionSide;

/// The closed set of actions the advisor may propose.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvisorAction {
    Hold,
    TightenStop { new_stop_price: f64 },
    AdjustTakeProfit { new_tp_price: f64 },
    PartialClose { fraction_of_position: f64 },
    Close,
}

impl AdvisorAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::TightenStop { .. } => "tighten_stop",
            Self::AdjustTakeProfit { .. } => "adjust_take_profit",
            Self::PartialClose { .. } => "partial_close",
            Self::Close => "close",
        }
    }
}

/// A parsed reply: the action, its raw params (for the journal), and the
/// model's stated reason.
#[derive(Debug, Clone)]
pub struct ParsedAdvice {
    pub action: AdvisorAction,
    pub params: Option<Value>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse the first balanced JSON object out of `reply` into a
/// [`ParsedAdvice`]. Unknown actions and missing params are parse errors.
pub fn parse_reply(reply: &str) -> Result<ParsedAdvice> {
    let json = first_json_object(reply).ok_or_else(|| anyhow!("no JSON object in reply"))?;
    let value: Value = serde_json::from_str(json)?;

    let action_name = value
        .get("action")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("reply missing \"action\""))?;
    let params = value.get("params").filter(|p| !p.is_null()).cloned();
    let reason = value
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let action = match action_name {
        "hold" => AdvisorAction::Hold,
        "close" => AdvisorAction::Close,
        "tighten_stop" => AdvisorAction::TightenStop {
            new_stop_price: param_f64(params.as_ref(), "newStopPrice")?,
        },
        "adjust_take_profit" => AdvisorAction::AdjustTakeProfit {
            new_tp_price: param_f64(params.as_ref(), "newTpPrice")?,
        },
        "partial_close" => AdvisorAction::PartialClose {
            fraction_of_position: param_f64(params.as_ref(), "fractionOfPosition")?,
        },
        other => return Err(anyhow!("unknown action \"{other}\"")),
    };

    Ok(ParsedAdvice {
        action,
        params,
        reason,
    })
}

fn param_f64(params: Option<&Value>, key: &str) -> Result<f64> {
    params
        .and_then(|p| p.get(key))
        .and_then(|v| v.as_f64())
        .ok_or_else(|| anyhow!("missing numeric param \"{key}\""))
}

/// Locate the first balanced `{ ... }` in `text`, string-escape aware.
fn first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a parsed action against the tick at the time of the advisor call.
/// Returns the rejection reason when the action falls outside the safety
/// envelope. A rejected action dispatches nothing.
pub fn validate(
    action: &AdvisorAction,
    tick: &PositionTick,
    min_position_notional: f64,
) -> Result<(), String> {
    match action {
        AdvisorAction::Hold | AdvisorAction::Close => Ok(()),

        AdvisorAction::TightenStop { new_stop_price } => {
            let new = *new_stop_price;
            if !new.is_finite() || new <= 0.0 {
                return Err(format!("newStopPrice {new} is not a usable price"));
            }
            match tick.side {
                PositionSide::Long => {
                    if let Some(current) = tick.stop_loss_price {
                        if new <= current {
                            return Err(format!(
                                "long stop must move up: {new} <= current {current}"
                            ));
                        }
                    }
                    if new >= tick.mark_price {
                        return Err(format!(
                            "long stop must stay below mark: {new} >= {}",
                            tick.mark_price
                        ));
                    }
                }
                PositionSide::Short => {
                    if let Some(current) = tick.stop_loss_price {
                        if new >= current {
                            return Err(format!(
                                "short stop must move down: {new} >= current {current}"
                            ));
                        }
                    }
                    if new <= tick.mark_price {
                        return Err(format!(
                            "short stop must stay above mark: {new} <= {}",
                            tick.mark_price
                        ));
                    }
                }
            }
            Ok(())
        }

        AdvisorAction::AdjustTakeProfit { new_tp_price } => {
            let new = *new_tp_price;
            if !new.is_finite() || new <= 0.0 {
                return Err(format!("newTpPrice {new} is not a usable price"));
            }
            match tick.side {
                PositionSide::Long if new <= tick.mark_price => Err(format!(
                    "long take-profit must sit above mark: {new} <= {}",
                    tick.mark_price
                )),
                PositionSide::Short if new >= tick.mark_price => Err(format!(
                    "short take-profit must sit below mark: {new} >= {}",
                    tick.mark_price
                )),
                _ => Ok(()),
            }
        }

        AdvisorAction::PartialClose {
            fraction_of_position,
        } => {
            let fraction = *fraction_of_position;
            if !fraction.is_finite() || fraction <= 0.0 || fraction >= 1.0 {
                return Err(format!("fractionOfPosition {fraction} outside (0, 1)"));
            }
            let remaining = tick.position_size * (1.0 - fraction);
            if remaining < min_position_notional {
                return Err(format!(
                    "residual {remaining:.2} below exchange minimum {min_position_notional:.2}"
                ));
            }
            Ok(())
        }
    }
}
