//! In-memory index of the artifact directory.
//!
//! The index is built from an already-classified listing and the parsed
//! `.spec` documents, so it stays free of I/O. Records live in an arena
//! addressed by [`RecordId`]; new results are appended with [`ArtifactIndex::register`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::naming::{NameFields, PAYLOAD_EXT, SPEC_EXT};
use crate::core::records::{ResultSpec, StoredSpec};
use crate::core::types::{RecordId, Slice};
use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Result,
    IntermediateSlice,
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRecord {
    pub id: RecordId,
    pub kind: RecordKind,
    /// Stem for results and slices; the full filename for limbo entries.
    pub stem: String,
    pub name: Option<NameFields>,
    #[serde(skip)]
    pub full_specs: Option<ResultSpec>,
    #[serde(skip)]
    pub attributes: Map<String, Value>,
}

/// Classified listing with result halves paired up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    /// Result stems with the fields of their `.dat` half.
    pub results: Vec<NameFields>,
    /// Intermediate slice files.
    pub slices: Vec<NameFields>,
    /// Filenames no pattern recognized.
    pub limbo: Vec<String>,
}

/// Pair `.dat`/`.spec` halves and split a classified listing by kind.
///
/// Entries may arrive in any order; the output is sorted by stem or filename.
pub fn pair_listing(classified: Vec<(String, Option<NameFields>)>) -> Result<Listing> {
    let mut listing = Listing::default();
    let mut halves: BTreeMap<String, (Option<NameFields>, bool)> = BTreeMap::new();

    for (filename, fields) in classified {
        match fields {
            None => listing.limbo.push(filename),
            Some(fields) if !fields.pattern.is_result() => listing.slices.push(fields),
            Some(fields) => {
                let entry = halves.entry(fields.stem.clone()).or_insert((None, false));
                if fields.ext == PAYLOAD_EXT {
                    entry.0 = Some(fields);
                } else {
                    entry.1 = true;
                }
            }
        }
    }

    for (stem, (payload, has_spec)) in halves {
        match (payload, has_spec) {
            (Some(fields), true) => listing.results.push(fields),
            (Some(_), false) => {
                return Err(PlanError::MissingTwin {
                    stem,
                    present: PAYLOAD_EXT.to_string(),
                    missing: SPEC_EXT.to_string(),
                });
            }
            (None, _) => {
                return Err(PlanError::MissingTwin {
                    stem,
                    present: SPEC_EXT.to_string(),
                    missing: PAYLOAD_EXT.to_string(),
                });
            }
        }
    }

    listing.limbo.sort();
    listing.slices.sort_by(|a, b| a.stem.cmp(&b.stem).then(a.ext.cmp(&b.ext)));
    Ok(listing)
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactIndex {
    records: Vec<ArtifactRecord>,
    results_by_stem: BTreeMap<String, RecordId>,
}

impl ArtifactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from a paired listing and the spec of each result,
    /// given in the same order as `listing.results`.
    pub fn assemble(listing: Listing, specs: Vec<StoredSpec>) -> Result<Self> {
        if listing.results.len() != specs.len() {
            return Err(PlanError::invalid(
                "artifact index",
                format!(
                    "{} result pairs but {} spec documents",
                    listing.results.len(),
                    specs.len()
                ),
            ));
        }

        let mut index = Self::new();
        for filename in listing.limbo {
            index.push(RecordKind::Unrecognized, filename, None, None, Map::new());
        }
        for fields in listing.slices {
            index.push(
                RecordKind::IntermediateSlice,
                fields.stem.clone(),
                Some(fields),
                None,
                Map::new(),
            );
        }
        for (fields, stored) in listing.results.into_iter().zip(specs) {
            index.register(fields, stored)?;
        }

        debug!(
            results = index.results().count(),
            slices = index.slices().count(),
            limbo = index.limbo().count(),
            "artifact index assembled"
        );
        Ok(index)
    }

    /// Append a result record. Stems are never reused.
    pub fn register(&mut self, fields: NameFields, stored: StoredSpec) -> Result<RecordId> {
        if self.results_by_stem.contains_key(&fields.stem) {
            return Err(PlanError::invalid(
                &fields.stem,
                "a result with this name is already indexed",
            ));
        }
        let stem = fields.stem.clone();
        let id = self.push(
            RecordKind::Result,
            stem.clone(),
            Some(fields),
            Some(stored.spec),
            stored.attributes,
        );
        self.results_by_stem.insert(stem, id);
        Ok(id)
    }

    fn push(
        &mut self,
        kind: RecordKind,
        stem: String,
        name: Option<NameFields>,
        full_specs: Option<ResultSpec>,
        attributes: Map<String, Value>,
    ) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(ArtifactRecord {
            id,
            kind,
            stem,
            name,
            full_specs,
            attributes,
        });
        id
    }

    pub fn get(&self, id: RecordId) -> &ArtifactRecord {
        &self.records[id.0]
    }

    pub fn results(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.of_kind(RecordKind::Result)
    }

    pub fn slices(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.of_kind(RecordKind::IntermediateSlice)
    }

    /// Filenames no pattern recognized.
    pub fn limbo(&self) -> impl Iterator<Item = &str> {
        self.of_kind(RecordKind::Unrecognized)
            .map(|record| record.stem.as_str())
    }

    fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &ArtifactRecord> {
        self.records.iter().filter(move |record| record.kind == kind)
    }

    /// The single result satisfying `target`, if any.
    ///
    /// When several records satisfy the target, a single one whose
    /// parameters equal the target's exactly wins; otherwise the match is
    /// ambiguous.
    pub fn find(&self, target: &ResultSpec) -> Result<Option<&ArtifactRecord>> {
        let matches: Vec<&ArtifactRecord> = self
            .results()
            .filter(|record| {
                record
                    .full_specs
                    .as_ref()
                    .is_some_and(|spec| spec.satisfies(target))
            })
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => {
                let exact: Vec<&ArtifactRecord> = many
                    .iter()
                    .copied()
                    .filter(|record| {
                        record
                            .full_specs
                            .as_ref()
                            .is_some_and(|spec| spec.same_params(target))
                    })
                    .collect();
                if let [only] = exact.as_slice() {
                    return Ok(Some(*only));
                }
                Err(PlanError::AmbiguousArtifact {
                target: target.describe(),
                    stems: many.iter().map(|record| record.stem.clone()).collect(),
                })
            }
        }
    }

    /// An intermediate slice file for `slice`, if one was scanned.
    pub fn find_slice(&self, slice: &Slice) -> Option<&ArtifactRecord> {
        self.slices().find(|record| {
            record.name.as_ref().is_some_and(|fields| {
                fields.short_name == slice.short_name
                    && fields.start == slice.start
                    && fields.end == slice.end
                    && fields.skip == slice.skip
                    && fields.group == slice.group
                    && fields.pbc == slice.pbc
            })
        })
    }

    /// Versions taken by results with exactly this prefix.
    pub fn used_versions(&self, prefix: &str) -> BTreeSet<u32> {
        self.results()
            .filter_map(|record| record.name.as_ref())
            .filter(|fields| fields.prefix() == Some(prefix))
            .filter_map(|fields| fields.version)
            .collect()
    }

    /// Smallest version not yet used by a result with exactly this prefix.
    pub fn next_version(&self, prefix: &str) -> u32 {
        let used = self.used_versions(prefix);
        (0..).find(|version| !used.contains(version)).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::naming::ArtifactNaming;
    use crate::core::records::read_spec_file;
    use crate::core::types::SliceKind;
    use serde_json::json;

    fn classify(names: &[&str]) -> Vec<(String, Option<NameFields>)> {
        let naming = ArtifactNaming::new().expect("naming");
        names
            .iter()
            .map(|name| (name.to_string(), naming.classify(name)))
            .collect()
    }

    fn stored(cutoff: f64) -> StoredSpec {
        read_spec_file(
            json!({
                "calc_name": "density",
                "specs": {"cutoff": cutoff},
                "sn": "v1", "group": "all", "pbc": "mol",
                "start": 0, "end": 100, "skip": 10
            }),
            "test",
        )
        .expect("spec")
    }

    fn slice() -> Slice {
        Slice {
            member: "v1".to_string(),
            short_name: "v1".to_string(),
            slice_name: "current".to_string(),
            group: Some("all".to_string()),
            start: Some(0),
            end: Some(100),
            skip: Some(10),
            pbc: Some("mol".to_string()),
            kind: SliceKind::Standard,
        }
    }

    #[test]
    fn listing_pairs_halves_and_keeps_limbo() {
        let listing = pair_listing(classify(&[
            "v1.0-100-10.all.pbcmol.density.n0.spec",
            "README.md",
            "v1.0-100-10.all.pbcmol.xtc",
            "v1.0-100-10.all.pbcmol.density.n0.dat",
        ]))
        .expect("listing");
        assert_eq!(listing.results.len(), 1);
        assert_eq!(listing.results[0].stem, "v1.0-100-10.all.pbcmol.density.n0");
        assert_eq!(listing.slices.len(), 1);
        assert_eq!(listing.limbo, vec!["README.md"]);
    }

    #[test]
    fn missing_twin_names_the_stem() {
        let err = pair_listing(classify(&["v1.density.n0.dat"])).expect_err("twin");
        assert_eq!(
            err,
            PlanError::MissingTwin {
                stem: "v1.density.n0".to_string(),
                present: "dat".to_string(),
                missing: "spec".to_string(),
            }
        );
        let err = pair_listing(classify(&["v1.density.n0.spec"])).expect_err("twin");
        assert!(matches!(err, PlanError::MissingTwin { ref present, .. } if present == "spec"));
    }

    #[test]
    fn find_matches_superset_and_rejects_duplicates() {
        let listing = pair_listing(classify(&[
            "v1.0-100-10.all.pbcmol.density.n0.dat",
            "v1.0-100-10.all.pbcmol.density.n0.spec",
        ]))
        .expect("listing");
        let mut index = ArtifactIndex::assemble(listing, vec![stored(1.2)]).expect("index");

        let mut target = stored(1.2).spec;
        target.calc.specs = json!({"cutoff": 1.2}).as_object().cloned().expect("map");
        let found = index.find(&target).expect("find").expect("present");
        assert_eq!(found.stem, "v1.0-100-10.all.pbcmol.density.n0");

        target.calc.specs.insert("cutoff".to_string(), json!(2.0));
        assert!(index.find(&target).expect("find").is_none());

        // A duplicate record for the same target is a corrupted store.
        let naming = ArtifactNaming::new().expect("naming");
        let dup = naming
            .classify("v1.0-100-10.all.pbcmol.density.n1.dat")
            .expect("classified");
        index.register(dup, stored(1.2)).expect("register");
        let err = index.find(&stored(1.2).spec).expect_err("ambiguous");
        assert_eq!(err.kind(), "AmbiguousArtifact");
    }

    #[test]
    fn exact_parameters_break_a_superset_tie() {
        let naming = ArtifactNaming::new().expect("naming");
        let mut index = ArtifactIndex::new();
        let mut plain = stored(1.2);
        plain.spec.calc.specs = Map::new();
        let mut tuned = stored(1.2);
        tuned.spec.calc.specs = json!({"alpha": 1}).as_object().cloned().expect("map");
        for (name, spec) in [
            ("v1.0-100-10.all.pbcmol.density.n0.dat", plain.clone()),
            ("v1.0-100-10.all.pbcmol.density.n1.dat", tuned.clone()),
        ] {
            let fields = naming.classify(name).expect("classified");
            index.register(fields, spec).expect("register");
        }

        let found = index.find(&plain.spec).expect("find").expect("present");
        assert_eq!(found.stem, "v1.0-100-10.all.pbcmol.density.n0");
        let found = index.find(&tuned.spec).expect("find").expect("present");
        assert_eq!(found.stem, "v1.0-100-10.all.pbcmol.density.n1");
    }

    #[test]
    fn next_version_fills_the_lowest_gap_per_prefix() {
        let listing = pair_listing(classify(&[
            "v1.density.n0.dat",
            "v1.density.n0.spec",
            "v1.density.n2.dat",
            "v1.density.n2.spec",
            "v2.density.n1.dat",
            "v2.density.n1.spec",
        ]))
        .expect("listing");
        let index =
            ArtifactIndex::assemble(listing, vec![stored(1.0), stored(1.1), stored(1.2)])
                .expect("index");
        assert_eq!(index.next_version("v1.density"), 1);
        assert_eq!(index.next_version("v2.density"), 0);
        assert_eq!(index.next_version("v3.density"), 0);
    }

    #[test]
    fn intermediate_slices_are_found_by_fields() {
        let listing =
            pair_listing(classify(&["v1.0-100-10.all.pbcmol.gro", "v1.0-100-10.all.pbcmol.xtc"]))
                .expect("listing");
        let index = ArtifactIndex::assemble(listing, Vec::new()).expect("index");
        assert!(index.find_slice(&slice()).is_some());

        let mut other = slice();
        other.pbc = Some("nojump".to_string());
        assert!(index.find_slice(&other).is_none());
    }

    #[test]
    fn registering_an_existing_stem_fails() {
        let naming = ArtifactNaming::new().expect("naming");
        let fields = naming.classify("v1.density.n0.dat").expect("classified");
        let mut index = ArtifactIndex::new();
        index.register(fields.clone(), stored(1.0)).expect("first");
        assert_eq!(index.register(fields, stored(1.0)).expect_err("dup").kind(), "InvalidMetadata");
    }
}
