//! Constrained prompts for the reasoning provider and strict response parsing
//!
//! The provider returns dynamic JSON; everything here validates it against
//! the closed discriminators before it becomes an `IntentRecord`. Unknown
//! transaction types reject the item; unknown category labels are coerced
//! to `Compras`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

use crate::error::NumaError;
use crate::models::{Entities, Intent, IntentRecord, SubIntent};
use crate::providers::gemini::strip_code_fence;
use crate::taxonomy::Category;
use crate::Result;

/// Prompt asking the reasoning provider to decompose one financial clause
/// into structured movements. The response must be a JSON array.
pub fn build_extraction_prompt(text: &str) -> String {
    format!(
        r#"Eres un asistente financiero. Extrae los movimientos del siguiente texto.

Texto: "{}"

Devuelve SOLO un arreglo JSON. Cada elemento tiene estas claves:
- type: "EXPENSE", "INCOME" o "DEBT"
- amount: number (obligatorio, mayor a cero)
- concept: string (obligatorio, descripción corta)
- merchant: string o null
- date: string YYYY-MM-DD o null
- category: una de [{}] o null

Si el texto no contiene monto y concepto claros, devuelve [].
Sin explicaciones, sin formato markdown."#,
        text,
        Category::ALL
            .iter()
            .map(|c| c.label())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Prompt asking for a single category label with a confidence score.
pub fn build_category_prompt(concept: &str, merchant: Option<&str>) -> String {
    format!(
        r#"Clasifica este movimiento financiero en exactamente una categoría.

Concepto: "{}"
Comercio: "{}"

Categorías permitidas: {}

Devuelve SOLO un objeto JSON: {{"category": "<etiqueta>", "confidence": <0.0-1.0>}}
Sin explicaciones, sin formato markdown."#,
        concept,
        merchant.unwrap_or("desconocido"),
        Category::ALL
            .iter()
            .map(|c| c.label())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Parse the extraction response into validated WRITE_LOG records. Items
/// missing a positive amount or a non-empty concept are dropped; an item
/// with an unknown type discriminator is dropped as well.
pub fn parse_extraction_response(response: &str) -> Result<Vec<IntentRecord>> {
    let cleaned = strip_code_fence(response);

    let json: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        NumaError::ProviderError(format!(
            "Malformed extraction response: {} | raw={}",
            e, response
        ))
    })?;

    let items = json
        .as_array()
        .ok_or_else(|| NumaError::ProviderError("Extraction response is not an array".to_string()))?;

    let mut records = Vec::with_capacity(items.len());

    for item in items {
        let sub_intent = match item.get("type").and_then(|v| v.as_str()) {
            Some("EXPENSE") => SubIntent::Expense,
            Some("INCOME") => SubIntent::Income,
            Some("DEBT") => SubIntent::Debt,
            other => {
                warn!(?other, "Dropping extracted item with unknown type");
                continue;
            }
        };

        let Some(amount) = parse_amount_value(item.get("amount")) else {
            continue;
        };
        if amount <= Decimal::ZERO {
            continue;
        }

        let Some(concept) = item
            .get("concept")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        else {
            continue;
        };

        let merchant = item
            .get("merchant")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            // The model sometimes echoes the concept as the merchant
            .filter(|m| !m.eq_ignore_ascii_case(&concept));

        let category = item
            .get("category")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(Category::coerce);

        let date = item
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

        let mut record = IntentRecord::new(Intent::WriteLog, 0.8);
        record.sub_intent = Some(sub_intent);
        record.entities = Entities {
            amount: Some(amount),
            concept: Some(concept),
            category,
            merchant,
            period: None,
            date,
            reason: None,
        };
        records.push(record);
    }

    Ok(records)
}

/// Parse the category classification response. The label is coerced into
/// the closed taxonomy; confidence is clamped to [0, 1].
pub fn parse_category_response(response: &str) -> Result<(Category, f32)> {
    let cleaned = strip_code_fence(response);

    let json: serde_json::Value = serde_json::from_str(cleaned).map_err(|e| {
        NumaError::ProviderError(format!(
            "Malformed category response: {} | raw={}",
            e, response
        ))
    })?;

    let label = json
        .get("category")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NumaError::ProviderError("Category response missing label".to_string()))?;

    let confidence = json
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0) as f32;

    Ok((Category::coerce(label), confidence))
}

fn parse_amount_value(value: Option<&serde_json::Value>) -> Option<Decimal> {
    let value = value?;
    if let Some(s) = value.as_str() {
        return Decimal::from_str(s.trim()).ok();
    }
    // Route through the display form so binary float noise is not carried
    // into the stored amount.
    value
        .as_f64()
        .and_then(|f| Decimal::from_str(&format!("{}", f)).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_extraction_response() {
        let raw = r#"[
            {"type": "EXPENSE", "amount": 100, "concept": "luz", "merchant": null, "date": null, "category": "Servicios"},
            {"type": "EXPENSE", "amount": 200.5, "concept": "agua", "merchant": null, "date": null, "category": "Servicios"}
        ]"#;
        let records = parse_extraction_response(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entities.amount, Some(dec!(100)));
        assert_eq!(records[0].entities.category, Some(Category::Servicios));
        assert_eq!(records[1].entities.amount, Some(dec!(200.5)));
    }

    #[test]
    fn test_parse_extraction_drops_unknown_type() {
        let raw = r#"[{"type": "TRANSFER", "amount": 100, "concept": "algo"}]"#;
        let records = parse_extraction_response(raw).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_extraction_drops_invalid_items() {
        let raw = r#"[
            {"type": "EXPENSE", "amount": 0, "concept": "nada"},
            {"type": "EXPENSE", "amount": 50, "concept": "  "},
            {"type": "EXPENSE", "concept": "sin monto"}
        ]"#;
        let records = parse_extraction_response(raw).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_parse_extraction_coerces_unknown_category() {
        let raw = r#"[{"type": "EXPENSE", "amount": 80, "concept": "cosas", "category": "Gadgets"}]"#;
        let records = parse_extraction_response(raw).unwrap();
        assert_eq!(records[0].entities.category, Some(Category::Compras));
    }

    #[test]
    fn test_parse_extraction_merchant_equal_to_concept_dropped() {
        let raw = r#"[{"type": "EXPENSE", "amount": 80, "concept": "Oxxo", "merchant": "oxxo"}]"#;
        let records = parse_extraction_response(raw).unwrap();
        assert!(records[0].entities.merchant.is_none());
    }

    #[test]
    fn test_parse_extraction_with_code_fence() {
        let raw = "```json\n[{\"type\": \"INCOME\", \"amount\": 8000, \"concept\": \"sueldo\"}]\n```";
        let records = parse_extraction_response(raw).unwrap();
        assert_eq!(records[0].sub_intent, Some(crate::models::SubIntent::Income));
    }

    #[test]
    fn test_parse_category_response() {
        let raw = r#"{"category": "Café/Snacks", "confidence": 0.92}"#;
        let (category, confidence) = parse_category_response(raw).unwrap();
        assert_eq!(category, Category::CafeSnacks);
        assert!((confidence - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_parse_category_response_coerces_and_clamps() {
        let raw = r#"{"category": "Electrodomésticos", "confidence": 3.5}"#;
        let (category, confidence) = parse_category_response(raw).unwrap();
        assert_eq!(category, Category::Compras);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_malformed_response_is_provider_error() {
        assert!(matches!(
            parse_extraction_response("no soy json"),
            Err(NumaError::ProviderError(_))
        ));
    }
}
