use std::fmt;
use lazy_static::lazy_static;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Closed set of tracked products. Declaration order is significant: it is
/// the tie-break order of column classification and the column order of
/// every output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    PorkMeat,
    BeefMeat,
    ChickenThighUnits,
    ChickenBreastWeight,
    Tilapia,
}

impl ProductKind {
    pub const COUNT: usize = 5;

    pub const ALL: [ProductKind; ProductKind::COUNT] = [
        ProductKind::PorkMeat,
        ProductKind::BeefMeat,
        ProductKind::ChickenThighUnits,
        ProductKind::ChickenBreastWeight,
        ProductKind::Tilapia,
    ];

    pub fn index(self) -> usize {
        match self {
            ProductKind::PorkMeat => 0,
            ProductKind::BeefMeat => 1,
            ProductKind::ChickenThighUnits => 2,
            ProductKind::ChickenBreastWeight => 3,
            ProductKind::Tilapia => 4,
        }
    }

    /// Column name in the normalized dataset.
    pub fn column_name(self) -> &'static str {
        match self {
            ProductKind::PorkMeat => "PORK_KG",
            ProductKind::BeefMeat => "BEEF_KG",
            ProductKind::ChickenThighUnits => "CHICKEN_THIGH_UNITS",
            ProductKind::ChickenBreastWeight => "CHICKEN_BREAST_KG",
            ProductKind::Tilapia => "TILAPIA_KG",
        }
    }

    /// Label printed in the product header table of a delivery guide.
    pub fn guide_label(self) -> &'static str {
        match self {
            ProductKind::PorkMeat => "CARNE DE CERDO, MAGRA",
            ProductKind::BeefMeat => "CARNE DE RES, MAGRA",
            ProductKind::ChickenThighUnits => "MUSLO / CONTRAMUSLO DE POLLO",
            ProductKind::ChickenBreastWeight => "PECHUGA DE POLLO",
            ProductKind::Tilapia => "FILETE DE TILAPIA",
        }
    }

    pub fn unit(self) -> &'static str {
        if self.is_count() {
            "UND"
        } else {
            "KG"
        }
    }

    /// Count-like kinds are truncated to whole units by the assembler.
    pub fn is_count(self) -> bool {
        matches!(self, ProductKind::ChickenThighUnits)
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProductKind::PorkMeat => "pork_meat",
            ProductKind::BeefMeat => "beef_meat",
            ProductKind::ChickenThighUnits => "chicken_thigh_units",
            ProductKind::ChickenBreastWeight => "chicken_breast_weight",
            ProductKind::Tilapia => "tilapia",
        };
        write!(f, "{}", name)
    }
}

/// One quantity per product kind. Always holds all five kinds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProductQuantities([f64; ProductKind::COUNT]);

impl ProductQuantities {
    pub fn get(&self, kind: ProductKind) -> f64 {
        self.0[kind.index()]
    }

    pub fn set(&mut self, kind: ProductKind, value: f64) {
        self.0[kind.index()] = value;
    }

    pub fn add(&mut self, other: &ProductQuantities) {
        for kind in ProductKind::ALL {
            self.0[kind.index()] += other.get(kind);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductKind, f64)> + '_ {
        ProductKind::ALL.iter().map(move |k| (*k, self.get(*k)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }

    /// Sum of weight-based kinds only (units are not kilograms).
    pub fn total_weight_kg(&self) -> f64 {
        self.iter()
            .filter(|(kind, _)| !kind.is_count())
            .map(|(_, v)| v)
            .sum()
    }
}

impl FromIterator<(ProductKind, f64)> for ProductQuantities {
    fn from_iter<I: IntoIterator<Item = (ProductKind, f64)>>(iter: I) -> Self {
        let mut quantities = ProductQuantities::default();
        for (kind, value) in iter {
            quantities.set(kind, value);
        }
        quantities
    }
}

impl Serialize for ProductQuantities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ProductKind::COUNT))?;
        for (kind, value) in self.iter() {
            map.serialize_entry(&kind, &value)?;
        }
        map.end()
    }
}

/// How a product is recognised in a column header: keywords, the units
/// that may accompany them, and canonical phrases that add confidence.
#[derive(Debug, Clone)]
pub struct ProductPattern {
    pub kind: ProductKind,
    pub keywords: Vec<&'static str>,
    pub units: Vec<&'static str>,
    pub phrases: Vec<&'static str>,
}

/// Shared, immutable vocabulary injected into the column detector and the
/// segmenter.
#[derive(Debug, Clone)]
pub struct ProductVocabulary {
    patterns: Vec<ProductPattern>,
}

lazy_static! {
    static ref STANDARD_VOCABULARY: ProductVocabulary = ProductVocabulary::standard();
}

impl ProductVocabulary {
    pub fn new(patterns: Vec<ProductPattern>) -> Self {
        Self { patterns }
    }

    pub fn shared() -> &'static ProductVocabulary {
        &STANDARD_VOCABULARY
    }

    pub fn standard() -> Self {
        Self::new(vec![
            ProductPattern {
                kind: ProductKind::PorkMeat,
                keywords: vec!["CERDO"],
                units: vec!["B X 1000", "B X", "KG", "KILO"],
                phrases: vec!["CARNE DE CERDO MAGRA", "CARNE DE CERDO", "CERDO MAGRA", "CERDO"],
            },
            ProductPattern {
                kind: ProductKind::BeefMeat,
                keywords: vec!["RES"],
                units: vec!["KG", "KILO"],
                phrases: vec!["CARNE DE RES MAGRA", "CARNE DE RES", "RES MAGRA", "RES"],
            },
            ProductPattern {
                kind: ProductKind::ChickenThighUnits,
                keywords: vec!["MUSLO", "CONTRAMUSLO", "POLLO"],
                units: vec!["UND", "UNIDADES", "UNIDAD"],
                phrases: vec![
                    "MUSLO CONTRAMUSLO DE POLLO",
                    "MUSLO DE POLLO",
                    "CONTRAMUSLO DE POLLO",
                    "POLLO ENTERO",
                ],
            },
            ProductPattern {
                kind: ProductKind::ChickenBreastWeight,
                keywords: vec!["PECHUGA", "POLLO"],
                units: vec!["KG", "KILO"],
                phrases: vec![
                    "PECHUGA POLLO",
                    "PECHUGA DE POLLO",
                    "PECHUGA POLLO DESHUESADA",
                    "POLLO PECHUGA",
                ],
            },
            ProductPattern {
                kind: ProductKind::Tilapia,
                keywords: vec!["TILAPIA"],
                units: vec!["KG", "KILO"],
                phrases: vec!["FILETE DE TILAPIA", "TILAPIA ROJA", "TILAPIA"],
            },
        ])
    }

    pub fn patterns(&self) -> &[ProductPattern] {
        &self.patterns
    }

    /// Union of every product's unit tokens.
    pub fn all_units(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.patterns.iter().flat_map(|p| p.units.iter().copied())
    }

    /// Whether upper-cased header text carries any known unit token.
    pub fn mentions_unit(&self, upper_text: &str) -> bool {
        self.all_units().any(|unit| upper_text.contains(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_indices_follow_declaration_order() {
        for (i, kind) in ProductKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_quantities_default_to_zero_for_every_kind() {
        let q = ProductQuantities::default();
        assert_eq!(q.iter().count(), ProductKind::COUNT);
        assert!(q.is_zero());
    }

    #[test]
    fn test_total_weight_skips_units() {
        let q: ProductQuantities = vec![
            (ProductKind::PorkMeat, 2.5),
            (ProductKind::ChickenThighUnits, 40.0),
            (ProductKind::ChickenBreastWeight, 1.5),
        ]
        .into_iter()
        .collect();
        assert_eq!(q.total_weight_kg(), 4.0);
    }

    #[test]
    fn test_unit_union_detection() {
        let vocab = ProductVocabulary::shared();
        assert!(vocab.mentions_unit("CARNE DE CERDO / B X 1000"));
        assert!(vocab.mentions_unit("MUSLO UND"));
        assert!(!vocab.mentions_unit("COMEDOR / ESCUELA"));
    }
}
