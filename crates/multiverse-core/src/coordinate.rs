//! Derivation of a realm's placement in the multiverse.
//!
//! A [`RealmCoordinate`] is computed once at registration from the realm id
//! and the optional placement hints supplied by the game. Missing hints
//! fall back to fixed defaults, so the same inputs always yield the same
//! coordinate and key.

use multiverse_types::{RealmCoordinate, RealmId};

/// Realm type used when none is given.
pub const DEFAULT_REALM_TYPE: &str = "material";

/// Resonance used when none is given.
pub const DEFAULT_RESONANCE: f64 = 0.5;

/// Density used when none is given.
pub const DEFAULT_DENSITY: f64 = 0.5;

/// Errors raised while deriving a coordinate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    /// The realm type was blank.
    #[error("realm type must not be blank")]
    BlankRealmType,

    /// A realm listed itself (or a blank id) as a neighbour.
    #[error("invalid adjacency entry {entry:?} for realm {realm_id}")]
    InvalidAdjacency {
        /// Realm being placed.
        realm_id: RealmId,
        /// Offending neighbour.
        entry: String,
    },

    /// Resonance or density was non-finite or outside `[0, 1]`.
    #[error("{field} must be a finite value in [0, 1], got {value}")]
    OutOfRange {
        /// `resonance` or `density`.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Optional placement hints supplied at registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementHints<'a> {
    /// Realm classification.
    pub realm_type: Option<&'a str>,
    /// Neighbouring realms, in any order and possibly repeated.
    pub adjacency: &'a [RealmId],
    /// Resonance in `[0, 1]`.
    pub resonance: Option<f64>,
    /// Density in `[0, 1]`.
    pub density: Option<f64>,
}

/// Derive the coordinate of `realm_id`.
///
/// The realm type is trimmed and lowercased, adjacency is sorted and
/// deduplicated, and the key has the form
/// `<type>/<realm>@r<resonance>:d<density>:a<neighbours>`.
///
/// # Errors
///
/// Returns a [`CoordinateError`] when a hint is out of range.
pub fn derive_coordinate(
    realm_id: &RealmId,
    hints: &PlacementHints<'_>,
) -> Result<RealmCoordinate, CoordinateError> {
    let realm_type = match hints.realm_type {
        Some(raw) => {
            let normalized = raw.trim().to_lowercase();
            if normalized.is_empty() {
                return Err(CoordinateError::BlankRealmType);
            }
            normalized
        }
        None => DEFAULT_REALM_TYPE.to_owned(),
    };

    let resonance = unit_interval("resonance", hints.resonance.unwrap_or(DEFAULT_RESONANCE))?;
    let density = unit_interval("density", hints.density.unwrap_or(DEFAULT_DENSITY))?;

    let mut adjacency = hints.adjacency.to_vec();
    if let Some(entry) = adjacency
        .iter()
        .find(|neighbour| neighbour.is_blank() || *neighbour == realm_id)
    {
        return Err(CoordinateError::InvalidAdjacency {
            realm_id: realm_id.clone(),
            entry: entry.to_string(),
        });
    }
    adjacency.sort();
    adjacency.dedup();

    let key = format!(
        "{realm_type}/{realm_id}@r{resonance:.3}:d{density:.3}:a{}",
        adjacency.len()
    );

    Ok(RealmCoordinate {
        realm_type,
        adjacency,
        resonance,
        density,
        key,
    })
}

fn unit_interval(field: &'static str, value: f64) -> Result<f64, CoordinateError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CoordinateError::OutOfRange { field, value })
    }
}
