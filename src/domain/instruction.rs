//! Trade Instruction
//!
//! Boundary parsing of inbound webhook payloads. A payload either becomes a
//! well-formed [`TradeInstruction`] or is rejected with an [`InstructionError`];
//! nothing downstream re-checks field presence.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Accepted spellings of the token identifier field
pub const TOKEN_ID_KEYS: &[&str] = &["tokenId", "tokenid", "token_id"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstructionError {
    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Required field {0} is empty")]
    EmptyField(&'static str),

    #[error("Field {field} has an invalid value: {value}")]
    InvalidField { field: &'static str, value: String },
}

impl InstructionError {
    /// Name of the offending field, if the error is about a single field
    pub fn field(&self) -> Option<&'static str> {
        match self {
            InstructionError::NotAnObject => None,
            InstructionError::MissingField(field)
            | InstructionError::EmptyField(field)
            | InstructionError::InvalidField { field, .. } => Some(*field),
        }
    }
}

/// A validated buy instruction received from the webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInstruction {
    /// Target profit in USDC, kept as received so workers see the exact text
    profit: String,
    /// Stage of the buy ladder (0 = initial buy)
    level: i64,
    /// Outcome token identifier
    token_id: String,
}

impl TradeInstruction {
    /// Build an instruction from already-typed parts
    pub fn new(
        profit: impl Into<String>,
        level: i64,
        token_id: impl Into<String>,
    ) -> Result<Self, InstructionError> {
        let profit = profit.into().trim().to_string();
        let token_id = token_id.into().trim().to_string();

        if profit.is_empty() {
            return Err(InstructionError::EmptyField("profit"));
        }
        if token_id.is_empty() {
            return Err(InstructionError::EmptyField("tokenId"));
        }

        Ok(Self {
            profit,
            level,
            token_id,
        })
    }

    /// Parse an untyped webhook payload
    pub fn from_payload(payload: &Value) -> Result<Self, InstructionError> {
        let object = payload.as_object().ok_or(InstructionError::NotAnObject)?;

        let profit = profit_text(object.get("profit"))?;
        let level = level_value(object.get("level"))?;
        let token_id = token_text(
            TOKEN_ID_KEYS
                .iter()
                .find_map(|key| object.get(*key).filter(|v| !v.is_null())),
        )?;

        Self::new(profit, level, token_id)
    }

    pub fn profit(&self) -> &str {
        &self.profit
    }

    /// Profit as a decimal amount; `None` if the text is not a number
    pub fn profit_amount(&self) -> Option<Decimal> {
        Decimal::from_str(&self.profit)
            .or_else(|_| Decimal::from_scientific(&self.profit))
            .ok()
    }

    pub fn level(&self) -> i64 {
        self.level
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }
}

fn profit_text(value: Option<&Value>) -> Result<String, InstructionError> {
    match value {
        None | Some(Value::Null) => Err(InstructionError::MissingField("profit")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(InstructionError::EmptyField("profit"))
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(InstructionError::InvalidField {
            field: "profit",
            value: other.to_string(),
        }),
    }
}

fn level_value(value: Option<&Value>) -> Result<i64, InstructionError> {
    let invalid = |value: String| InstructionError::InvalidField {
        field: "level",
        value,
    };

    match value {
        None | Some(Value::Null) => Err(InstructionError::MissingField("level")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(InstructionError::EmptyField("level"))
        }
        Some(Value::String(s)) => s.trim().parse::<i64>().map_err(|_| invalid(s.clone())),
        Some(Value::Number(n)) => {
            if let Some(level) = n.as_i64() {
                return Ok(level);
            }
            // Accept 2.0 but not 2.5
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(invalid(n.to_string())),
            }
        }
        Some(other) => Err(invalid(other.to_string())),
    }
}

fn token_text(value: Option<&Value>) -> Result<String, InstructionError> {
    match value {
        None | Some(Value::Null) => Err(InstructionError::MissingField("tokenId")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(InstructionError::EmptyField("tokenId"))
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(InstructionError::InvalidField {
            field: "tokenId",
            value: other.to_string(),
        }),
    }
}
