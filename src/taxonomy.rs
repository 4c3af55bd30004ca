//! Closed category taxonomy and keyword-based category hints
//!
//! Every category label in the system is drawn from this fixed set.
//! Labels arriving from the reasoning provider that fall outside the set
//! are coerced to `Compras`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    // Essentials
    Vivienda,
    Servicios,
    Despensa,
    Transporte,
    Salud,
    #[serde(rename = "Educación")]
    Educacion,
    // Discretionary
    Restaurantes,
    #[serde(rename = "Café/Snacks")]
    CafeSnacks,
    Ocio,
    Compras,
    Regalos,
    // Financial movements
    Deuda,
    #[serde(rename = "Inversión")]
    Inversion,
    Ingreso,
    Transferencia,
}

impl Category {
    pub const ALL: &'static [Category] = &[
        Category::Vivienda,
        Category::Servicios,
        Category::Despensa,
        Category::Transporte,
        Category::Salud,
        Category::Educacion,
        Category::Restaurantes,
        Category::CafeSnacks,
        Category::Ocio,
        Category::Compras,
        Category::Regalos,
        Category::Deuda,
        Category::Inversion,
        Category::Ingreso,
        Category::Transferencia,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Vivienda => "Vivienda",
            Category::Servicios => "Servicios",
            Category::Despensa => "Despensa",
            Category::Transporte => "Transporte",
            Category::Salud => "Salud",
            Category::Educacion => "Educación",
            Category::Restaurantes => "Restaurantes",
            Category::CafeSnacks => "Café/Snacks",
            Category::Ocio => "Ocio",
            Category::Compras => "Compras",
            Category::Regalos => "Regalos",
            Category::Deuda => "Deuda",
            Category::Inversion => "Inversión",
            Category::Ingreso => "Ingreso",
            Category::Transferencia => "Transferencia",
        }
    }

    /// Parse a label exactly (case-insensitive, accent-tolerant).
    pub fn parse(label: &str) -> Option<Category> {
        let normalized = label.trim().to_lowercase();
        Category::ALL.iter().copied().find(|c| {
            let l = c.label().to_lowercase();
            l == normalized || strip_accents(&l) == strip_accents(&normalized)
        })
    }

    /// Parse a label, coercing anything outside the closed set to `Compras`.
    pub fn coerce(label: &str) -> Category {
        Category::parse(label).unwrap_or(Category::Compras)
    }

    /// The lowest-risk bucket assigned when categorization cannot decide.
    pub fn fallback() -> Category {
        Category::Compras
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' => 'u',
            'ñ' => 'n',
            _ => c,
        })
        .collect()
}

//
// ================= Keyword Hints =================
//

/// Concept keywords mapped to categories. Mirrors the merchant knowledge a
/// reasoning model would apply, without a provider round-trip.
const CONCEPT_HINTS: &[(&str, Category)] = &[
    // Vivienda
    ("renta", Category::Vivienda),
    ("alquiler", Category::Vivienda),
    ("hipoteca", Category::Vivienda),
    // Servicios
    ("luz", Category::Servicios),
    ("agua", Category::Servicios),
    ("gas", Category::Servicios),
    ("internet", Category::Servicios),
    ("teléfono", Category::Servicios),
    ("telefono", Category::Servicios),
    ("cfe", Category::Servicios),
    ("telmex", Category::Servicios),
    ("telcel", Category::Servicios),
    // Despensa
    ("súper", Category::Despensa),
    ("super", Category::Despensa),
    ("despensa", Category::Despensa),
    ("mercado", Category::Despensa),
    ("víveres", Category::Despensa),
    ("walmart", Category::Despensa),
    ("soriana", Category::Despensa),
    ("chedraui", Category::Despensa),
    // Transporte
    ("gasolina", Category::Transporte),
    ("uber", Category::Transporte),
    ("taxi", Category::Transporte),
    ("metro", Category::Transporte),
    ("camión", Category::Transporte),
    ("vuelo", Category::Transporte),
    // Salud
    ("farmacia", Category::Salud),
    ("doctor", Category::Salud),
    ("medicina", Category::Salud),
    ("dentista", Category::Salud),
    ("hospital", Category::Salud),
    // Educación
    ("colegiatura", Category::Educacion),
    ("escuela", Category::Educacion),
    ("universidad", Category::Educacion),
    ("curso", Category::Educacion),
    ("libro", Category::Educacion),
    // Restaurantes
    ("cena", Category::Restaurantes),
    ("restaurante", Category::Restaurantes),
    ("tacos", Category::Restaurantes),
    ("comida", Category::Restaurantes),
    ("pizza", Category::Restaurantes),
    ("sushi", Category::Restaurantes),
    // Café/Snacks
    ("café", Category::CafeSnacks),
    ("cafe", Category::CafeSnacks),
    ("starbucks", Category::CafeSnacks),
    ("snack", Category::CafeSnacks),
    ("botana", Category::CafeSnacks),
    // Ocio
    ("cine", Category::Ocio),
    ("concierto", Category::Ocio),
    ("netflix", Category::Ocio),
    ("spotify", Category::Ocio),
    ("juego", Category::Ocio),
    // Compras
    ("ropa", Category::Compras),
    ("zapatos", Category::Compras),
    ("amazon", Category::Compras),
    ("electrónicos", Category::Compras),
    // Regalos
    ("regalo", Category::Regalos),
    // Financial movements
    ("deuda", Category::Deuda),
    ("préstamo", Category::Deuda),
    ("prestamo", Category::Deuda),
    ("inversión", Category::Inversion),
    ("inversion", Category::Inversion),
    ("cetes", Category::Inversion),
    ("sueldo", Category::Ingreso),
    ("nómina", Category::Ingreso),
    ("nomina", Category::Ingreso),
    ("transferencia", Category::Transferencia),
];

/// Merchants that mark a convenience / café context for the ant-expense rule.
const CAFE_MERCHANTS: &[&str] = &["café", "cafe", "starbucks", "punta del cielo", "cafetería"];
const CONVENIENCE_MERCHANTS: &[&str] = &["oxxo", "7-eleven", "seven", "kiosko", "circle k", "extra"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantContext {
    Cafe,
    Convenience,
    Other,
}

pub fn merchant_context(merchant: Option<&str>) -> MerchantContext {
    let Some(merchant) = merchant else {
        return MerchantContext::Other;
    };
    let lowered = merchant.to_lowercase();

    if CAFE_MERCHANTS.iter().any(|m| lowered.contains(m)) {
        MerchantContext::Cafe
    } else if CONVENIENCE_MERCHANTS.iter().any(|m| lowered.contains(m)) {
        MerchantContext::Convenience
    } else {
        MerchantContext::Other
    }
}

/// Whole-word keyword match; "gasté" must not hit "gas".
fn contains_word(text_lower: &str, keyword: &str) -> bool {
    text_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .any(|t| t == keyword)
}

/// Deterministic category hint from concept and merchant keywords. The
/// user's stated concept dominates; the merchant only decides when the
/// concept is silent.
pub fn hint(concept: &str, merchant: Option<&str>) -> Option<(Category, f32)> {
    let concept_lower = concept.to_lowercase();
    let merchant_lower = merchant.map(|m| m.to_lowercase()).unwrap_or_default();

    for (keyword, category) in CONCEPT_HINTS {
        if contains_word(&concept_lower, keyword) {
            return Some((*category, 0.85));
        }
    }
    for (keyword, category) in CONCEPT_HINTS {
        if contains_word(&merchant_lower, keyword) {
            return Some((*category, 0.9));
        }
    }
    None
}

/// Small discretionary spends at cafés, convenience stores and kiosks are
/// not groceries: below the threshold, `Despensa` gives way to
/// `Café/Snacks` (café context) or `Compras` (convenience context).
pub fn apply_ant_expense(
    category: Category,
    amount: Decimal,
    merchant: Option<&str>,
    threshold: Decimal,
) -> Category {
    if category != Category::Despensa || amount >= threshold {
        return category;
    }
    match merchant_context(merchant) {
        MerchantContext::Cafe => Category::CafeSnacks,
        MerchantContext::Convenience => Category::Compras,
        MerchantContext::Other => category,
    }
}
