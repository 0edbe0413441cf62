//! Canonicalization of raw Open Pet Food Facts records.
//!
//! This is the single classification implementation shared by the bulk import
//! and the on-demand lookup path. Both paths must call `canonicalize` so the
//! keyword table cannot drift between them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw product record as it appears in the OPFF JSONL dump or the single-item
/// API envelope. No schema guarantees upstream: every field is optional and
/// unknown fields are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawProduct {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_name_fr: Option<String>,
    #[serde(default)]
    pub product_name_en: Option<String>,
    #[serde(default)]
    pub categories_tags: Vec<String>,
    // string ("400 g") or bare number depending on the contributor
    #[serde(default)]
    pub product_quantity: Option<Value>,
    #[serde(default)]
    pub nutriments: Nutriments,
    #[serde(default)]
    pub brands: Option<String>,
    #[serde(default)]
    pub image_front_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Nutriments {
    // number or numeric string in the wild
    #[serde(rename = "energy-kcal_100g", default)]
    pub energy_kcal_100g: Option<Value>,
}

/// Closed product-type enumeration. Classification never fails; anything that
/// matches no rule is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Kibble,
    WetFood,
    Pouch,
    Treat,
    Other,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Kibble => "kibble",
            ProductType::WetFood => "wet_food",
            ProductType::Pouch => "pouch",
            ProductType::Treat => "treat",
            ProductType::Other => "other",
        }
    }

    /// Parse a stored label. Unknown labels map to `Other` so a curated or
    /// legacy row never breaks a read path.
    pub fn from_label(label: &str) -> Self {
        match label {
            "kibble" => ProductType::Kibble,
            "wet_food" => ProductType::WetFood,
            "pouch" => ProductType::Pouch,
            "treat" => ProductType::Treat,
            _ => ProductType::Other,
        }
    }
}

/// Store-ready product representation, independent of the upstream format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalProduct {
    pub barcode: String,
    pub name: String,
    pub brand: Option<String>,
    pub product_type: ProductType,
    pub net_weight_g: Option<f64>,
    /// Reserved for manual curation downstream; ingestion never sets it.
    pub grams_per_unit: Option<f64>,
    pub kcal_per_100g: Option<f64>,
    pub photo_url: Option<String>,
    pub verified: bool,
    pub created_by: Option<String>,
}

// Keyword rules in fixed priority order; the first rule with any match wins.
// Dry-food keywords come first on purpose: "croquette" and "sec" are the most
// specific tags and must not lose to generic "snack" wording further down.
const TYPE_RULES: [(&[&str], ProductType); 4] = [
    (&["dry", "kibble", "croquette", "sec"], ProductType::Kibble),
    (&["pouch", "sachet"], ProductType::Pouch),
    (
        &["wet", "pate", "patee", "humide", "mousse"],
        ProductType::WetFood,
    ),
    (&["treat", "friandise", "snack"], ProductType::Treat),
];

/// First-match-wins keyword scan over the joined, lower-cased tag sequence.
pub fn infer_product_type(categories: &[String]) -> ProductType {
    let joined = categories.join(" ").to_lowercase();
    for (keywords, product_type) in TYPE_RULES {
        if keywords.iter().any(|kw| joined.contains(kw)) {
            return product_type;
        }
    }
    ProductType::Other
}

/// Map a raw record into a canonical product, or reject it.
///
/// Rejection (`None`) is a normal outcome, not an error: records without a
/// usable barcode or name are skipped by every caller. Deterministic and
/// side-effect free; the same input always yields the same output.
pub fn canonicalize(raw: &RawProduct) -> Option<CanonicalProduct> {
    let barcode = raw.code.as_deref().unwrap_or("").trim();
    if barcode.is_empty() {
        return None;
    }

    // Fallback chain mirrors the upstream field priority: default locale name,
    // then French, then English. An all-whitespace primary name does not fall
    // through; it trims to empty and rejects.
    let name = [
        raw.product_name.as_deref(),
        raw.product_name_fr.as_deref(),
        raw.product_name_en.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find(|s| !s.is_empty())
    .unwrap_or("")
    .trim();
    if name.is_empty() {
        return None;
    }

    let brand = raw
        .brands
        .as_deref()
        .and_then(|b| b.split(',').next())
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    Some(CanonicalProduct {
        barcode: barcode.to_string(),
        name: name.to_string(),
        brand,
        product_type: infer_product_type(&raw.categories_tags),
        net_weight_g: parse_net_weight(raw.product_quantity.as_ref()),
        grams_per_unit: None,
        kcal_per_100g: parse_kcal(raw.nutriments.energy_kcal_100g.as_ref()),
        photo_url: raw
            .image_front_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string),
        verified: true,
        created_by: None,
    })
}

/// Net weight from the free-text quantity field: first valid floating-point
/// prefix ("400 g" -> 400). Zero and negative weights are treated as absent.
fn parse_net_weight(quantity: Option<&Value>) -> Option<f64> {
    let parsed = match quantity? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => float_prefix(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v > 0.0)
}

/// kcal/100g as a plain number; numeric strings are accepted, anything else
/// (including negatives) is absent.
fn parse_kcal(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Longest leading float of `input`, ignoring leading whitespace.
/// Accepts an optional sign, decimal point and exponent ("1.5e3 kg" -> 1500).
fn float_prefix(input: &str) -> Option<f64> {
    let s = input.trim_start();
    let bytes = s.as_bytes();
    let mut i = 0;

    if matches!(bytes.first(), Some(&b'+') | Some(&b'-')) {
        i += 1;
    }
    let int_start = i;
    while bytes.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    let mut has_digits = i > int_start;
    if bytes.get(i) == Some(&b'.') {
        let frac_start = i + 1;
        i += 1;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        has_digits |= i > frac_start;
    }
    if !has_digits {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if matches!(bytes.get(i), Some(&b'e') | Some(&b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(&b'+') | Some(&b'-')) {
            j += 1;
        }
        let exp_start = j;
        while bytes.get(j).is_some_and(u8::is_ascii_digit) {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }

    s[..i].parse::<f64>().ok()
}
