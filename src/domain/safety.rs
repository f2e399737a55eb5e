//! Safety Policy
//!
//! Pure validation of a trade instruction against the configured limits.
//! Predicates run in a fixed order (profit, level, token) and the first
//! violation is reported.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::instruction::TradeInstruction;

/// Default maximum profit per instruction in USDC
pub const DEFAULT_MAX_PROFIT: Decimal = dec!(2000.0);

/// Default maximum buy level
pub const DEFAULT_MAX_LEVEL: i64 = 5;

/// Lowest level the policy accepts
pub const MIN_LEVEL: i64 = 0;

/// Process-wide safety limits, built once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum profit amount in USDC
    pub max_profit: Decimal,
    /// Maximum buy level
    pub max_level: i64,
    /// Allowed token ids (empty = unrestricted)
    pub allowed_token_ids: BTreeSet<String>,
    /// Whether checks run at all
    pub enabled: bool,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_profit: DEFAULT_MAX_PROFIT,
            max_level: DEFAULT_MAX_LEVEL,
            allowed_token_ids: BTreeSet::new(),
            enabled: true,
        }
    }
}

impl SafetyLimits {
    pub fn with_max_profit(mut self, max_profit: Decimal) -> Self {
        self.max_profit = max_profit;
        self
    }

    pub fn with_max_level(mut self, max_level: i64) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn with_allowed_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_token_ids = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the token allow-list restricts anything
    pub fn restricts_tokens(&self) -> bool {
        !self.allowed_token_ids.is_empty()
    }
}

/// Which predicate produced a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyRule {
    ProfitLimit,
    LevelLimit,
    TokenAllowList,
}

impl SafetyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyRule::ProfitLimit => "profit_limit",
            SafetyRule::LevelLimit => "level_limit",
            SafetyRule::TokenAllowList => "token_allow_list",
        }
    }
}

/// Result of a safety evaluation. `reason` is present iff the check failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyVerdict {
    pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<SafetyRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl SafetyVerdict {
    pub fn pass() -> Self {
        Self {
            pass: true,
            rule: None,
            reason: None,
        }
    }

    pub fn reject(rule: SafetyRule, reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            rule: Some(rule),
            reason: Some(reason.into()),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.pass
    }

    pub fn rule(&self) -> Option<SafetyRule> {
        self.rule
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Evaluate an instruction against the limits
pub fn check(instruction: &TradeInstruction, limits: &SafetyLimits) -> SafetyVerdict {
    if !limits.enabled {
        return SafetyVerdict::pass();
    }

    check_profit(instruction, limits)
        .or_else(|| check_level(instruction, limits))
        .or_else(|| check_token(instruction, limits))
        .unwrap_or_else(SafetyVerdict::pass)
}

fn check_profit(instruction: &TradeInstruction, limits: &SafetyLimits) -> Option<SafetyVerdict> {
    match instruction.profit_amount() {
        None => Some(SafetyVerdict::reject(
            SafetyRule::ProfitLimit,
            format!("Profit {} is not a valid amount", instruction.profit()),
        )),
        Some(amount) if amount > limits.max_profit => Some(SafetyVerdict::reject(
            SafetyRule::ProfitLimit,
            format!(
                "Profit {} USDC exceeds safety limit {} USDC",
                instruction.profit(),
                limits.max_profit
            ),
        )),
        Some(_) => None,
    }
}

fn check_level(instruction: &TradeInstruction, limits: &SafetyLimits) -> Option<SafetyVerdict> {
    let level = instruction.level();

    if level < MIN_LEVEL {
        return Some(SafetyVerdict::reject(
            SafetyRule::LevelLimit,
            format!("Buy level {} is below the minimum level {}", level, MIN_LEVEL),
        ));
    }

    if level > limits.max_level {
        return Some(SafetyVerdict::reject(
            SafetyRule::LevelLimit,
            format!("Buy level {} exceeds safety limit {}", level, limits.max_level),
        ));
    }

    None
}

fn check_token(instruction: &TradeInstruction, limits: &SafetyLimits) -> Option<SafetyVerdict> {
    if limits.restricts_tokens() && !limits.allowed_token_ids.contains(instruction.token_id()) {
        return Some(SafetyVerdict::reject(
            SafetyRule::TokenAllowList,
            format!("Token ID {} is not in the allowed list", instruction.token_id()),
        ));
    }
    None
}
