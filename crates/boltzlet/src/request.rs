//! Prediction request types.
//!
//! The request arrives as JSON and is validated structurally by serde. Every
//! optional field is an `Option` so the serializer can tell "not specified"
//! apart from an empty value and omit the key entirely.

use serde::{Deserialize, Serialize};

/// Kind of molecule an entity describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Protein,
    Dna,
    Rna,
    Ligand,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Protein => "protein",
            Self::Dna => "dna",
            Self::Rna => "rna",
            Self::Ligand => "ligand",
        }
    }
}

/// One chain identifier or several (for homo-multimers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainIds {
    One(String),
    Many(Vec<String>),
}

impl ChainIds {
    /// The first identifier, or `""` for an empty list.
    pub fn first(&self) -> &str {
        match self {
            Self::One(id) => id,
            Self::Many(ids) => ids.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// True for `""` and `[]`.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(id) => id.is_empty(),
            Self::Many(ids) => ids.is_empty(),
        }
    }
}

/// Element of an atom or token reference such as `["A", 12, "CA"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResidueRef {
    Index(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub position: i64,
    pub ccd: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    pub id: ChainIds,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub smiles: Option<String>,
    #[serde(default)]
    pub ccd: Option<String>,
    #[serde(default)]
    pub msa: Option<String>,
    #[serde(default)]
    pub modifications: Option<Vec<Modification>>,
    #[serde(default)]
    pub cyclic: Option<bool>,
}

impl Entity {
    /// Whether the entity references a pre-computed alignment.
    ///
    /// Blank values and the literal `empty` (the predictor's "single sequence
    /// mode" marker) do not count.
    pub fn has_msa(&self) -> bool {
        self.msa
            .as_deref()
            .is_some_and(|msa| !msa.trim().is_empty() && msa != "empty")
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondConstraint {
    pub atom1: Vec<ResidueRef>,
    pub atom2: Vec<ResidueRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PocketConstraint {
    pub binder: String,
    pub contacts: Vec<Vec<ResidueRef>>,
    #[serde(default)]
    pub max_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactConstraint {
    pub token1: Vec<ResidueRef>,
    pub token2: Vec<ResidueRef>,
    #[serde(default)]
    pub max_distance: Option<f64>,
}

/// Constraint item as submitted: any subset of the three kinds may be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    #[serde(default)]
    pub bond: Option<BondConstraint>,
    #[serde(default)]
    pub pocket: Option<PocketConstraint>,
    #[serde(default)]
    pub contact: Option<ContactConstraint>,
}

/// A constraint reduced to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint<'a> {
    Bond(&'a BondConstraint),
    Pocket(&'a PocketConstraint),
    Contact(&'a ContactConstraint),
}

impl ConstraintSpec {
    /// Pick the populated kind. Precedence is bond, pocket, contact; an item
    /// with nothing populated resolves to `None` and is dropped.
    pub fn resolve(&self) -> Option<Constraint<'_>> {
        if let Some(bond) = &self.bond {
            Some(Constraint::Bond(bond))
        } else if let Some(pocket) = &self.pocket {
            Some(Constraint::Pocket(pocket))
        } else {
            self.contact.as_ref().map(Constraint::Contact)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub cif: String,
    #[serde(default)]
    pub chain_id: Option<ChainIds>,
    #[serde(default)]
    pub template_id: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffinityProperty {
    pub binder: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(default)]
    pub affinity: Option<AffinityProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub sequences: Vec<Entity>,
    #[serde(default)]
    pub constraints: Option<Vec<ConstraintSpec>>,
    #[serde(default)]
    pub templates: Option<Vec<Template>>,
    #[serde(default)]
    pub properties: Option<Vec<Property>>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("at least one sequence entity is required")]
    NoSequences,
}

impl PredictionRequest {
    /// Checks that serde cannot express.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.sequences.is_empty() {
            return Err(RequestError::NoSequences);
        }
        Ok(())
    }

    /// True when any entity carries its own alignment. The predictor is then
    /// run without its remote alignment service.
    pub fn has_msa(&self) -> bool {
        self.sequences.iter().any(Entity::has_msa)
    }

    pub fn has_affinity(&self) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|props| props.iter().any(|p| p.affinity.is_some()))
    }
}
