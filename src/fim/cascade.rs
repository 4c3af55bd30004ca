//! Deterministic 3-level decision tree: Validity → Domain → Financial Resolution
//!
//! Every input lands in exactly one state; the cascade is a total function
//! over text. Keyword routing handles the common utterances without a
//! provider round-trip; only unresolvable write clauses escalate to the
//! reasoning provider.

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::{Entities, Intent, IntentRecord, Period, SubIntent, TransactionKind};
use crate::taxonomy;

/// Static keyword lists — zero allocation
const ONOMATOPOEIA: &[&str] = &[
    "mmm", "mm", "eh", "ehh", "aaa", "ah", "uh", "uhh", "hmm", "ajá", "aja", "este", "um",
];

const META_MARKERS: &[&str] = &[
    "cambia el idioma",
    "cambiar idioma",
    "borra mis datos",
    "elimina mi cuenta",
    "cierra sesión",
    "cierra sesion",
    "configuración",
    "configuracion",
    "ajustes",
];

const SOCIAL_MARKERS: &[&str] = &[
    "hola",
    "buenos días",
    "buenos dias",
    "buenas tardes",
    "buenas noches",
    "gracias",
    "adiós",
    "adios",
    "cómo estás",
    "como estas",
    "qué tal",
    "que tal",
];

const FINANCIAL_STEMS: &[&str] = &[
    "gast", "compr", "pagu", "pagué", "recib", "cobr", "deb", "deud", "ahorr", "ingres",
    "préstamo", "prestamo", "transfer", "saldo", "dinero", "presupuesto",
];

const READ_MARKERS: &[&str] = &[
    "cuánto",
    "cuanto",
    "cuántas",
    "cuantas",
    "resumen",
    "qué he gastado",
    "que he gastado",
    "muéstrame",
    "muestrame",
    "historial",
    "mis movimientos",
];

const PLAN_MARKERS: &[&str] = &[
    "quiero ahorrar",
    "plan de ahorro",
    "meta de ahorro",
    "hacer un plan",
    "presupuesto para",
];

const ADVICE_MARKERS: &[&str] = &[
    "consejo",
    "aconséjame",
    "aconsejame",
    "recomiéndame",
    "recomiendame",
    "cómo voy",
    "como voy",
    "qué opinas",
    "que opinas",
    "gastar menos",
];

const CONFIRM_MARKERS: &[&str] = &[
    "fue en",
    "era en",
    "el comercio es",
    "el comercio fue",
    "la categoría es",
    "la categoria es",
    "corrige",
];

const INCOME_STEMS: &[&str] = &[
    "me pagaron", "recibí", "recibi", "cobré", "cobre", "ingreso", "me depositaron", "gané",
    "gane",
];

const DEBT_STEMS: &[&str] = &["debo", "deuda", "me prestaron", "préstamo", "prestamo", "fiado"];

const EXPENSE_STEMS: &[&str] = &["gasté", "gaste", "compré", "compre", "pagué", "pague", "gasto"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Meta,
    Social,
    Financiero,
}

/// Outcome of deterministic resolution for one financial clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Record(IntentRecord),
    /// Heuristics found an amount but no usable concept; the reasoning
    /// provider gets one constrained attempt at extraction.
    NeedsReasoning,
}

//
// ================= Level 1 — Validity =================
//

/// Reject inputs that carry no significant token. Returns the CLARIFY
/// record to emit, or None when the text is worth classifying.
pub fn validity_check(text: &str) -> Option<IntentRecord> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(IntentRecord::clarify("unintelligible"));
    }

    let has_significant_token = trimmed.split_whitespace().any(|token| {
        let cleaned: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        if cleaned.chars().any(|c| c.is_ascii_digit()) {
            return true;
        }
        if cleaned.chars().count() < 3 {
            return false;
        }
        if ONOMATOPOEIA.contains(&cleaned.as_str()) {
            return false;
        }
        // Repeated single character ("aaaa", "mmmm") is noise
        let mut chars = cleaned.chars();
        let first = chars.next();
        !(first.is_some() && chars.all(|c| Some(c) == first))
    });

    if has_significant_token {
        None
    } else {
        Some(IntentRecord::clarify("unintelligible"))
    }
}

//
// ================= Level 2 — Domain =================
//

pub fn classify_domain(text: &str) -> Domain {
    let lowered = text.to_lowercase();

    let financial = has_amount(&lowered)
        || FINANCIAL_STEMS.iter().any(|s| lowered.contains(s))
        || READ_MARKERS.iter().any(|s| lowered.contains(s))
        || PLAN_MARKERS.iter().any(|s| lowered.contains(s))
        || ADVICE_MARKERS.iter().any(|s| lowered.contains(s))
        || CONFIRM_MARKERS.iter().any(|s| lowered.contains(s));
    if financial {
        return Domain::Financiero;
    }

    if META_MARKERS.iter().any(|s| lowered.contains(s)) {
        return Domain::Meta;
    }

    if SOCIAL_MARKERS.iter().any(|s| lowered.contains(s)) {
        return Domain::Social;
    }

    // Anything else off-domain is handled as chit-chat and steered back
    Domain::Social
}

//
// ================= Level 3 — Financial Resolution =================
//

/// Split a multi-clause financial utterance ("gasté 100 en luz y 200 en
/// agua") into independently resolvable clauses. Fragments without an
/// amount are folded back into the preceding clause so "pan y leche" stays
/// one concept.
pub fn split_clauses(text: &str) -> Vec<String> {
    let mut fragments: Vec<String> = Vec::new();
    for piece in split_on_marker(text, " y ") {
        for sub in split_on_marker(&piece, ", ") {
            fragments.push(sub);
        }
    }

    let mut clauses: Vec<String> = Vec::new();
    for fragment in fragments {
        let fragment = fragment.trim().to_string();
        if fragment.is_empty() {
            continue;
        }
        if has_amount(&fragment.to_lowercase()) || clauses.is_empty() {
            clauses.push(fragment);
        } else if let Some(last) = clauses.last_mut() {
            last.push_str(" y ");
            last.push_str(&fragment);
        }
    }

    if clauses.is_empty() {
        clauses.push(text.trim().to_string());
    }
    clauses
}

fn split_on_marker(text: &str, marker: &str) -> Vec<String> {
    text.split(marker).map(|s| s.to_string()).collect()
}

/// Resolve one financial clause to exactly one intent record, or escalate
/// to the reasoning provider.
pub fn resolve_clause(
    clause: &str,
    inherited_kind: Option<TransactionKind>,
    category_threshold: f32,
) -> Resolution {
    let lowered = clause.to_lowercase();

    // Read queries take priority: "¿cuánto gasté hoy?" mentions a spend
    // verb but asks about state, never writes.
    if READ_MARKERS.iter().any(|m| lowered.contains(m)) {
        let mut record = IntentRecord::new(Intent::ReadQuery, 0.95);
        record.entities.period = detect_period(&lowered);
        record.entities.category = detect_query_category(&lowered);
        return Resolution::Record(record);
    }

    if PLAN_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Resolution::Record(IntentRecord::new(Intent::Plan, 0.9));
    }

    if ADVICE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Resolution::Record(IntentRecord::new(Intent::Advice, 0.9));
    }

    if let Some(record) = resolve_confirm_update(clause, &lowered) {
        return Resolution::Record(record);
    }

    // Write resolution: both an explicit amount and an identifiable
    // concept are required before anything touches the ledger.
    let amount = extract_amount(clause);
    let explicit_kind = detect_kind(&lowered);
    let kind = explicit_kind
        .or(inherited_kind)
        .unwrap_or(TransactionKind::Expense);

    let Some(amount) = amount else {
        let reason = if explicit_kind.is_some() || mentions_movement(&lowered) {
            "missing_amount"
        } else {
            "missing_details"
        };
        let mut record = IntentRecord::clarify(reason);
        record.sub_intent = explicit_kind.map(kind_to_sub_intent);
        return Resolution::Record(record);
    };

    let Some(concept) = extract_concept(clause, &lowered) else {
        return Resolution::NeedsReasoning;
    };

    let mut record = IntentRecord::new(Intent::WriteLog, 0.9);
    record.sub_intent = Some(kind_to_sub_intent(kind));
    record.entities = Entities {
        amount: Some(amount),
        concept: Some(concept.clone()),
        category: taxonomy::hint(&concept, None)
            .filter(|(_, confidence)| *confidence >= category_threshold)
            .map(|(category, _)| category),
        merchant: None,
        period: None,
        date: detect_date_word(&lowered),
        reason: None,
    };
    Resolution::Record(record)
}

fn kind_to_sub_intent(kind: TransactionKind) -> SubIntent {
    match kind {
        TransactionKind::Expense => SubIntent::Expense,
        TransactionKind::Income => SubIntent::Income,
        TransactionKind::Debt => SubIntent::Debt,
    }
}

fn resolve_confirm_update(clause: &str, lowered: &str) -> Option<IntentRecord> {
    let marker = CONFIRM_MARKERS.iter().find(|m| lowered.contains(**m))?;

    let mut record = IntentRecord::new(Intent::ConfirmUpdate, 0.85);
    if let Some(idx) = lowered.find(marker) {
        let tail = clause[idx + marker.len()..].trim().trim_end_matches('.');
        if !tail.is_empty() {
            if marker.contains("categoría") || marker.contains("categoria") {
                record.entities.category = Some(taxonomy::Category::coerce(tail));
            } else {
                record.entities.merchant = Some(strip_article(tail).to_string());
            }
        }
    }
    Some(record)
}

//
// ================= Entity helpers =================
//

fn has_amount(lowered: &str) -> bool {
    extract_amount(lowered).is_some()
}

/// First numeric token of the clause, as a decimal. Accepts "$1,500.50",
/// "500" and "500.0"; word-form numbers escalate to the reasoning provider.
pub fn extract_amount(clause: &str) -> Option<Decimal> {
    for token in clause.split_whitespace() {
        let cleaned: String = token
            .trim_start_matches('$')
            .trim_end_matches(['.', ',', ';', '?', '!'])
            .chars()
            .filter(|c| *c != ',')
            .collect();
        if cleaned.is_empty() || !cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if let Ok(amount) = Decimal::from_str(&cleaned) {
            return Some(amount);
        }
    }
    None
}

/// The user's stated purpose: text after "en" (or "de" for income-like
/// phrasing), cleaned of amounts and currency words.
fn extract_concept(clause: &str, lowered: &str) -> Option<String> {
    let candidate = if let Some(idx) = lowered.find(" en ") {
        &clause[idx + 4..]
    } else if let Some(idx) = lowered.find(" de ") {
        &clause[idx + 4..]
    } else {
        clause
    };

    let mut words: Vec<&str> = Vec::new();
    for token in candidate.split_whitespace() {
        let token_lower = token.to_lowercase();
        if token_lower == "pesos" || token_lower == "mxn" || token_lower == "hoy"
            || token_lower == "ayer"
        {
            continue;
        }
        if extract_amount(token).is_some() {
            continue;
        }
        if EXPENSE_STEMS.contains(&token_lower.as_str()) {
            continue;
        }
        words.push(token);
    }

    let concept = words
        .join(" ")
        .trim()
        .trim_end_matches(['.', ',', '?', '!'])
        .to_string();
    if concept.is_empty() {
        None
    } else {
        Some(concept)
    }
}

fn strip_article(text: &str) -> &str {
    for article in ["el ", "la ", "los ", "las ", "un ", "una "] {
        if let Some(stripped) = text.strip_prefix(article) {
            return stripped;
        }
    }
    text
}

fn detect_kind(lowered: &str) -> Option<TransactionKind> {
    if INCOME_STEMS.iter().any(|s| lowered.contains(s)) {
        Some(TransactionKind::Income)
    } else if DEBT_STEMS.iter().any(|s| lowered.contains(s)) {
        Some(TransactionKind::Debt)
    } else if EXPENSE_STEMS.iter().any(|s| lowered.contains(s)) {
        Some(TransactionKind::Expense)
    } else {
        None
    }
}

fn mentions_movement(lowered: &str) -> bool {
    FINANCIAL_STEMS.iter().any(|s| lowered.contains(s))
}

fn has_word(lowered: &str, word: &str) -> bool {
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|t| t == word)
}

pub fn detect_period(lowered: &str) -> Option<Period> {
    if has_word(lowered, "hoy") {
        Some(Period::Today)
    } else if has_word(lowered, "ayer") {
        Some(Period::Yesterday)
    } else if has_word(lowered, "semana") {
        Some(Period::ThisWeek)
    } else if has_word(lowered, "mes") {
        Some(Period::ThisMonth)
    } else {
        None
    }
}

fn detect_date_word(lowered: &str) -> Option<chrono::NaiveDate> {
    if has_word(lowered, "ayer") {
        Some(chrono::Utc::now().date_naive() - chrono::Duration::days(1))
    } else {
        None
    }
}

fn detect_query_category(lowered: &str) -> Option<crate::taxonomy::Category> {
    taxonomy::hint(lowered, None)
        .filter(|(_, confidence)| *confidence >= 0.7)
        .map(|(category, _)| category)
}
