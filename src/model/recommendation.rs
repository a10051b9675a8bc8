use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Interval;
use crate::error::AppError;
use crate::model::candle::Candle;
use crate::model::signal::Signal;

/// Rendered in place of any optional field the engine left out.
pub const UNAVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationRequest {
    pub instrument_key: String,
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub horizon: String,
    pub interval: Interval,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub epoch: u64,
    /// Per-session submit sequence; only the latest one may apply.
    pub request_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyLevel {
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationResponse {
    pub signal: Signal,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub risk_reward: Option<f64>,
    pub expected_move_pct: Option<f64>,
    pub explanation_points: Vec<String>,
    pub metrics: Vec<Metric>,
    pub caveats: Vec<String>,
    pub key_levels: Vec<KeyLevel>,
}

impl RecommendationResponse {
    /// Map an engine reply. Only `signal` and `confidence` are mandatory; every
    /// other field degrades to unavailable instead of failing the response.
    pub fn from_value(value: &Value) -> Result<Self, AppError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AppError::Analysis("response is not a JSON object".to_string()))?;

        if let Some(err) = obj.get("error").and_then(Value::as_str) {
            return Err(AppError::Analysis(err.to_string()));
        }

        let signal = field(obj, &["signal", "direction"])
            .and_then(Value::as_str)
            .and_then(Signal::parse)
            .ok_or_else(|| AppError::Analysis("missing or unknown signal".to_string()))?;
        let confidence = field(obj, &["confidence"])
            .and_then(number)
            .ok_or_else(|| AppError::Analysis("missing or non-numeric confidence".to_string()))?
            .clamp(0.0, 1.0);

        let mut explanation_points = strings(field(obj, &["explanationPoints", "explanation_points"]));
        if explanation_points.is_empty() {
            if let Some(rationale) = obj.get("rationale").and_then(Value::as_str) {
                if !rationale.trim().is_empty() {
                    explanation_points.push(rationale.trim().to_string());
                }
            }
        }

        Ok(Self {
            signal,
            confidence,
            entry_price: field(obj, &["entryPrice", "entry_price"]).and_then(number),
            stop_loss: field(obj, &["stopLoss", "stop_loss"]).and_then(number),
            take_profit: field(obj, &["takeProfit", "take_profit"]).and_then(number),
            risk_reward: field(obj, &["riskReward", "risk_reward"]).and_then(number),
            expected_move_pct: field(obj, &["expectedMovePct", "expected_move_pct"])
                .and_then(number),
            explanation_points,
            metrics: metrics(field(obj, &["metrics"])),
            caveats: strings(field(obj, &["caveats"])),
            key_levels: key_levels(field(obj, &["keyLevels", "key_levels"])),
        })
    }

    /// Human readable summary; absent values show as [`UNAVAILABLE`].
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("signal: {}", self.signal),
            format!("confidence: {:.0}%", self.confidence * 100.0),
            format!("entry: {}", fmt_price(self.entry_price)),
            format!("stop loss: {}", fmt_price(self.stop_loss)),
            format!("take profit: {}", fmt_price(self.take_profit)),
            format!("risk/reward: {}", fmt_price(self.risk_reward)),
            format!("expected move: {}", fmt_pct(self.expected_move_pct)),
        ];
        for m in &self.metrics {
            let unit = m.unit.as_deref().unwrap_or("");
            lines.push(format!("metric {}: {}{}", m.name, fmt_price(m.value), unit));
        }
        for level in &self.key_levels {
            lines.push(format!("level {}: {:.2}", level.name, level.price));
        }
        lines.extend(self.explanation_points.iter().map(|p| format!("- {}", p)));
        lines.extend(self.caveats.iter().map(|c| format!("caveat: {}", c)));
        lines
    }
}

pub fn fmt_price(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

pub fn fmt_pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:+.2}%", v))
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn metrics(value: Option<&Value>) -> Vec<Metric> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let name = obj.get("name")?.as_str()?.to_string();
            Some(Metric {
                name,
                value: obj.get("value").and_then(number),
                unit: obj.get("unit").and_then(Value::as_str).map(str::to_string),
                note: obj.get("note").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

fn key_levels(value: Option<&Value>) -> Vec<KeyLevel> {
    let mut out = Vec::new();
    match value {
        Some(Value::Object(map)) => {
            for (name, v) in map {
                match v {
                    Value::Array(prices) => {
                        out.extend(prices.iter().filter_map(number).map(|price| KeyLevel {
                            name: name.clone(),
                            price,
                        }))
                    }
                    other => {
                        if let Some(price) = number(other) {
                            out.push(KeyLevel {
                                name: name.clone(),
                                price,
                            });
                        }
                    }
                }
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                let name = obj
                    .get("name")
                    .or_else(|| obj.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("level");
                if let Some(price) = obj.get("price").or_else(|| obj.get("value")).and_then(number) {
                    out.push(KeyLevel {
                        name: name.to_string(),
                        price,
                    });
                }
            }
        }
        _ => {}
    }
    out
}
