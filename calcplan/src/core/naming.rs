//! Artifact names and member short names.
//!
//! Artifact names are dot-separated fields, so no field may contain `.`.
//! [`ArtifactNaming`] holds the ordered filename patterns used to classify a
//! directory listing; the `*_stem` functions render the same shapes, and the
//! two must stay in lockstep.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{Slice, SliceKind};
use crate::error::{PlanError, Result};

/// Extension of a result payload.
pub const PAYLOAD_EXT: &str = "dat";
/// Extension of a result's metadata file.
pub const SPEC_EXT: &str = "spec";

/// Filename shapes, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NamePattern {
    /// `<short>.<start>-<end>-<skip>.<group>.pbc<pbc>.{gro,xtc,ndx}`
    #[serde(rename = "standard+gmx")]
    StandardGmx,
    /// `<short>.<start>-<end>-<skip>.<group>.pbc<pbc>.<calc>.n<version>.{dat,spec}`
    #[serde(rename = "standard+datspec")]
    StandardDatspec,
    /// `<short>.<start>-<end>-<skip>.<calc>.n<version>.{dat,spec}`
    #[serde(rename = "standard_obvious+datspec")]
    StandardObviousDatspec,
    /// `<short>.<calc>.n<version>.{dat,spec}`
    #[serde(rename = "raw+datspec")]
    RawDatspec,
}

impl NamePattern {
    pub const ALL: [NamePattern; 4] = [
        NamePattern::StandardGmx,
        NamePattern::StandardDatspec,
        NamePattern::StandardObviousDatspec,
        NamePattern::RawDatspec,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NamePattern::StandardGmx => "standard+gmx",
            NamePattern::StandardDatspec => "standard+datspec",
            NamePattern::StandardObviousDatspec => "standard_obvious+datspec",
            NamePattern::RawDatspec => "raw+datspec",
        }
    }

    /// True for the `.dat`/`.spec` result shapes.
    pub fn is_result(self) -> bool {
        !matches!(self, NamePattern::StandardGmx)
    }

    fn regex(self) -> &'static str {
        match self {
            NamePattern::StandardGmx => {
                r"^(?P<short>[^.]+)\.(?P<start>\d+)-(?P<end>\d+)-(?P<skip>\d+)\.(?P<group>[^.]+)\.pbc(?P<pbc>[^.]+)\.(?P<ext>gro|xtc|ndx)$"
            }
            NamePattern::StandardDatspec => {
                r"^(?P<short>[^.]+)\.(?P<start>\d+)-(?P<end>\d+)-(?P<skip>\d+)\.(?P<group>[^.]+)\.pbc(?P<pbc>[^.]+)\.(?P<calc>[^.]+)\.n(?P<version>\d+)\.(?P<ext>dat|spec)$"
            }
            NamePattern::StandardObviousDatspec => {
                r"^(?P<short>[^.]+)\.(?P<start>\d+)-(?P<end>\d+)-(?P<skip>\d+)\.(?P<calc>[^.]+)\.n(?P<version>\d+)\.(?P<ext>dat|spec)$"
            }
            NamePattern::RawDatspec => {
                r"^(?P<short>[^.]+)\.(?P<calc>[^.]+)\.n(?P<version>\d+)\.(?P<ext>dat|spec)$"
            }
        }
    }
}

/// Structured fields parsed out of one filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameFields {
    pub pattern: NamePattern,
    /// Filename without its extension.
    pub stem: String,
    pub short_name: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub skip: Option<i64>,
    pub group: Option<String>,
    pub pbc: Option<String>,
    pub calc: Option<String>,
    pub version: Option<u32>,
    pub ext: String,
}

impl NameFields {
    /// Result stem without its `.n<version>` suffix.
    pub fn prefix(&self) -> Option<&str> {
        let version = self.version?;
        self.stem.strip_suffix(&format!(".n{version}"))
    }
}

/// Compiled filename patterns.
#[derive(Debug, Clone)]
pub struct ArtifactNaming {
    patterns: Vec<(NamePattern, Regex)>,
}

impl ArtifactNaming {
    pub fn new() -> Result<Self> {
        let patterns = NamePattern::ALL
            .iter()
            .map(|pattern| {
                Regex::new(pattern.regex())
                    .map(|regex| (*pattern, regex))
                    .map_err(|err| PlanError::invalid(pattern.as_str(), err.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Classify a filename. `None` means limbo.
    pub fn classify(&self, filename: &str) -> Option<NameFields> {
        self.patterns
            .iter()
            .find_map(|(pattern, regex)| capture(*pattern, regex, filename))
    }
}

fn capture(pattern: NamePattern, regex: &Regex, filename: &str) -> Option<NameFields> {
    let caps = regex.captures(filename)?;
    let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    let number = |name: &str| -> Option<Option<i64>> {
        match caps.name(name) {
            Some(m) => m.as_str().parse::<i64>().ok().map(Some),
            None => Some(None),
        }
    };

    let ext = text("ext")?;
    let version = match caps.name("version") {
        Some(m) => Some(m.as_str().parse::<u32>().ok()?),
        None => None,
    };
    Some(NameFields {
        pattern,
        stem: filename.strip_suffix(&format!(".{ext}"))?.to_string(),
        short_name: text("short")?,
        start: number("start")?,
        end: number("end")?,
        skip: number("skip")?,
        group: text("group"),
        pbc: text("pbc"),
        calc: text("calc"),
        version,
        ext,
    })
}

/// Name prefix shared by every version of one result.
pub fn result_prefix(slice: &Slice, calc_name: &str) -> Result<String> {
    match slice.kind {
        SliceKind::Raw => Ok(format!("{}.{calc_name}", slice.short_name)),
        SliceKind::Standard => {
            let bounds = bounds(slice)?;
            match &slice.group {
                Some(group) => Ok(format!(
                    "{}.{bounds}.{group}.pbc{}.{calc_name}",
                    slice.short_name,
                    pbc(slice)?
                )),
                None => Ok(format!("{}.{bounds}.{calc_name}", slice.short_name)),
            }
        }
    }
}

pub fn result_stem(prefix: &str, version: u32) -> String {
    format!("{prefix}.n{version}")
}

/// Stem of the intermediate slice files, for group-qualified standard slices.
pub fn slice_stem(slice: &Slice) -> Result<Option<String>> {
    match (slice.kind, &slice.group) {
        (SliceKind::Standard, Some(group)) => Ok(Some(format!(
            "{}.{}.{group}.pbc{}",
            slice.short_name,
            bounds(slice)?,
            pbc(slice)?
        ))),
        _ => Ok(None),
    }
}

fn bounds(slice: &Slice) -> Result<String> {
    match (slice.start, slice.end, slice.skip) {
        (Some(start), Some(end), Some(skip)) => Ok(format!("{start}-{end}-{skip}")),
        _ => Err(PlanError::invalid(
            slice_location(slice),
            "standard slice needs start, end and skip",
        )),
    }
}

fn pbc(slice: &Slice) -> Result<&str> {
    slice.pbc.as_deref().ok_or_else(|| {
        PlanError::invalid(
            slice_location(slice),
            "group-qualified standard slice needs pbc",
        )
    })
}

fn slice_location(slice: &Slice) -> String {
    format!("slices/{}/slices/{}", slice.member, slice.slice_name)
}

/// Member short-naming strategy, as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum NamingStrategy {
    /// Short name equals the member id.
    #[default]
    Identity,
    /// Short name is one capture group of a regex applied to the member id.
    RegexCapture {
        pattern: String,
        #[serde(default = "default_capture_group")]
        group: usize,
    },
    /// Short name is the member id with a fixed prefix removed (if present).
    StripPrefix { prefix: String },
}

fn default_capture_group() -> usize {
    1
}

/// Compiled [`NamingStrategy`].
#[derive(Debug, Clone)]
pub enum ShortNamer {
    Identity,
    RegexCapture { regex: Regex, group: usize },
    StripPrefix { prefix: String },
}

impl ShortNamer {
    pub fn from_strategy(strategy: &NamingStrategy) -> Result<Self> {
        Ok(match strategy {
            NamingStrategy::Identity => ShortNamer::Identity,
            NamingStrategy::RegexCapture { pattern, group } => ShortNamer::RegexCapture {
                regex: Regex::new(pattern)
                    .map_err(|err| PlanError::invalid("naming.pattern", err.to_string()))?,
                group: *group,
            },
            NamingStrategy::StripPrefix { prefix } => ShortNamer::StripPrefix {
                prefix: prefix.clone(),
            },
        })
    }

    pub fn short_name(&self, member: &str) -> Result<String> {
        let unresolved = |reason: String| PlanError::ShortNameUnresolved {
            member: member.to_string(),
            reason,
        };

        let short = match self {
            ShortNamer::Identity => member.to_string(),
            ShortNamer::RegexCapture { regex, group } => {
                let caps = regex
                    .captures(member)
                    .ok_or_else(|| unresolved(format!("does not match /{}/", regex.as_str())))?;
                caps.get(*group)
                    .ok_or_else(|| unresolved(format!("capture group {group} did not participate")))?
                    .as_str()
                    .to_string()
            }
            ShortNamer::StripPrefix { prefix } => member
                .strip_prefix(prefix.as_str())
                .unwrap_or(member)
                .to_string(),
        };

        if short.is_empty() || short.contains('.') || short.contains('/') {
            return Err(unresolved(format!(
                "short name '{short}' must be non-empty and contain no '.' or '/'"
            )));
        }
        Ok(short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(kind: SliceKind, group: Option<&str>) -> Slice {
        Slice {
            member: "membrane-v1".to_string(),
            short_name: "v1".to_string(),
            slice_name: "current".to_string(),
            group: group.map(str::to_string),
            start: Some(0),
            end: Some(100),
            skip: Some(10),
            pbc: Some("mol".to_string()),
            kind,
        }
    }

    #[test]
    fn rendered_names_are_bit_exact() {
        let standard = slice(SliceKind::Standard, Some("all"));
        let prefix = result_prefix(&standard, "density").expect("prefix");
        assert_eq!(result_stem(&prefix, 0), "v1.0-100-10.all.pbcmol.density.n0");
        assert_eq!(
            slice_stem(&standard).expect("stem").as_deref(),
            Some("v1.0-100-10.all.pbcmol")
        );

        let obvious = slice(SliceKind::Standard, None);
        assert_eq!(
            result_prefix(&obvious, "density").expect("prefix"),
            "v1.0-100-10.density"
        );
        assert_eq!(slice_stem(&obvious).expect("stem"), None);

        let raw = slice(SliceKind::Raw, None);
        assert_eq!(result_prefix(&raw, "density").expect("prefix"), "v1.density");
    }

    #[test]
    fn classification_follows_pattern_priority() {
        let naming = ArtifactNaming::new().expect("naming");
        let cases = [
            ("v1.0-100-10.all.pbcmol.xtc", Some(NamePattern::StandardGmx)),
            (
                "v1.0-100-10.all.pbcmol.density.n3.dat",
                Some(NamePattern::StandardDatspec),
            ),
            (
                "v1.0-100-10.density.n0.spec",
                Some(NamePattern::StandardObviousDatspec),
            ),
            ("v1.density.n12.dat", Some(NamePattern::RawDatspec)),
            ("notes.txt", None),
            ("v1.density.dat", None),
            ("v1.0-100-10.all.pbcmol.density.n0.png", None),
        ];
        for (name, expected) in cases {
            let got = naming.classify(name).map(|fields| fields.pattern);
            assert_eq!(got, expected, "{name}");
        }
    }

    #[test]
    fn classified_fields_match_rendered_slice() {
        let naming = ArtifactNaming::new().expect("naming");
        let fields = naming
            .classify("v1.0-100-10.all.pbcmol.density.n3.spec")
            .expect("classified");
        assert_eq!(fields.stem, "v1.0-100-10.all.pbcmol.density.n3");
        assert_eq!(fields.prefix(), Some("v1.0-100-10.all.pbcmol.density"));
        assert_eq!(fields.short_name, "v1");
        assert_eq!((fields.start, fields.end, fields.skip), (Some(0), Some(100), Some(10)));
        assert_eq!(fields.group.as_deref(), Some("all"));
        assert_eq!(fields.pbc.as_deref(), Some("mol"));
        assert_eq!(fields.calc.as_deref(), Some("density"));
        assert_eq!(fields.version, Some(3));
        assert_eq!(fields.ext, "spec");
    }

    #[test]
    fn short_namer_strategies() {
        let identity = ShortNamer::from_strategy(&NamingStrategy::Identity).expect("identity");
        assert_eq!(identity.short_name("v1").expect("short"), "v1");

        let strip = ShortNamer::from_strategy(&NamingStrategy::StripPrefix {
            prefix: "membrane-".to_string(),
        })
        .expect("strip");
        assert_eq!(strip.short_name("membrane-v1").expect("short"), "v1");
        assert_eq!(strip.short_name("other").expect("short"), "other");

        let capture = ShortNamer::from_strategy(&NamingStrategy::RegexCapture {
            pattern: r"^sim-(\w+)-\d+$".to_string(),
            group: 1,
        })
        .expect("capture");
        assert_eq!(capture.short_name("sim-alpha-7").expect("short"), "alpha");
        let err = capture.short_name("nomatch").expect_err("unresolved");
        assert_eq!(err.kind(), "ShortNameUnresolved");
    }

    #[test]
    fn short_names_with_dots_are_rejected() {
        let identity = ShortNamer::Identity;
        let err = identity.short_name("v1.2").expect_err("dot");
        assert!(matches!(err, PlanError::ShortNameUnresolved { ref member, .. } if member == "v1.2"));
    }

    #[test]
    fn strategy_deserializes_from_tagged_table() {
        let strategy: NamingStrategy =
            toml::from_str("strategy = \"regex-capture\"\npattern = \"^(v\\\\d+)\"\n")
                .expect("parse");
        assert_eq!(
            strategy,
            NamingStrategy::RegexCapture {
                pattern: r"^(v\d+)".to_string(),
                group: 1,
            }
        );
        let identity: NamingStrategy = toml::from_str("strategy = \"identity\"").expect("parse");
        assert_eq!(identity, NamingStrategy::Identity);
    }
}
