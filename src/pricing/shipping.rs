use serde::{Deserialize, Serialize};

/// Carrier divisor for cm³ → kg.
pub const VOLUMETRIC_DIVISOR: f64 = 5000.0;

const LENGTH_UNIT_TO_CM: &[(&str, f64)] = &[
    ("cm", 1.0),
    ("mm", 0.1),
    ("m", 100.0),
    ("in", 2.54),
];

const WEIGHT_UNIT_TO_KG: &[(&str, f64)] = &[
    ("kg", 1.0),
    ("g", 0.001),
    ("lb", 0.45359237),
    ("oz", 0.028349523),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_length_unit")]
    pub unit: String,
}

fn default_length_unit() -> String {
    "cm".into()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargeableWeight {
    pub actual_kg: f64,
    pub volumetric_kg: Option<f64>,
    pub chargeable_kg: f64,
    pub volumetric_applied: bool,
}

impl Dimensions {
    pub fn to_cm(&self) -> Option<(f64, f64, f64)> {
        let factor = unit_factor(LENGTH_UNIT_TO_CM, &self.unit)?;
        let sides = [self.length, self.width, self.height];
        if sides.iter().any(|side| !side.is_finite() || *side <= 0.0) {
            return None;
        }
        Some((sides[0] * factor, sides[1] * factor, sides[2] * factor))
    }
}

pub fn weight_to_kg(value: f64, unit: &str) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * unit_factor(WEIGHT_UNIT_TO_KG, unit)?)
}

pub fn volumetric_weight_kg(dimensions: &Dimensions) -> Option<f64> {
    let (l, w, h) = dimensions.to_cm()?;
    Some(l * w * h / VOLUMETRIC_DIVISOR)
}

/// Carriers bill the heavier of actual and volumetric weight.
pub fn chargeable_weight(actual_kg: f64, dimensions: Option<&Dimensions>) -> ChargeableWeight {
    let actual_kg = actual_kg.max(0.0);
    let volumetric_kg = dimensions.and_then(volumetric_weight_kg);
    let volumetric_applied = volumetric_kg.is_some_and(|v| v > actual_kg);
    ChargeableWeight {
        actual_kg,
        volumetric_kg,
        chargeable_kg: if volumetric_applied {
            volumetric_kg.unwrap_or(actual_kg)
        } else {
            actual_kg
        },
        volumetric_applied,
    }
}

fn unit_factor(table: &[(&str, f64)], unit: &str) -> Option<f64> {
    let unit = match unit.trim().to_lowercase().as_str() {
        "centimeter" | "centimeters" => "cm".to_string(),
        "millimeter" | "millimeters" => "mm".to_string(),
        "meter" | "meters" => "m".to_string(),
        "inch" | "inches" => "in".to_string(),
        "kilogram" | "kilograms" | "kgs" => "kg".to_string(),
        "gram" | "grams" => "g".to_string(),
        "pound" | "pounds" | "lbs" => "lb".to_string(),
        "ounce" | "ounces" => "oz".to_string(),
        other => other.to_string(),
    };
    table
        .iter()
        .find(|(key, _)| *key == unit)
        .map(|(_, factor)| *factor)
}
