//! Job preparation.
//!
//! [`JobMatcher`] pairs every calculation variant with the slice of every
//! member it applies to and asks the artifact index whether that pairing is
//! already computed. Preparation is a pure read of its inputs; the index is
//! passed per call so callers can register new results between passes.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::catalog::{Calculation, CalculationCatalog};
use crate::core::index::{ArtifactIndex, ArtifactRecord};
use crate::core::records::ResultSpec;
use crate::core::slices::SliceTable;
use crate::core::types::{ArtifactHandle, Job, Slice};
use crate::error::{PlanError, Result};

/// An upstream result feeding one job.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamInput<'a, 'i> {
    /// Edge key as declared by the downstream calculation.
    pub key: &'a str,
    pub calculation: &'a Calculation,
    pub record: &'i ArtifactRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct JobMatcher<'a> {
    catalog: &'a CalculationCatalog,
    slices: &'a SliceTable,
    collections: &'a BTreeMap<String, Vec<String>>,
}

impl<'a> JobMatcher<'a> {
    pub fn new(
        catalog: &'a CalculationCatalog,
        slices: &'a SliceTable,
        collections: &'a BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            catalog,
            slices,
            collections,
        }
    }

    /// Build the jobs for `names` (already in dependency order).
    ///
    /// `collection_filter`, when given, replaces each calculation's declared
    /// collections.
    pub fn prepare(
        &self,
        index: &ArtifactIndex,
        names: &[String],
        collection_filter: Option<&[String]>,
    ) -> Result<Vec<Job<'a>>> {
        let catalog: &'a CalculationCatalog = self.catalog;
        let mut jobs = Vec::new();
        for name in names {
            if !catalog.contains(name) {
                return Err(PlanError::UnknownCalculation {
                    name: name.clone(),
                    referenced_by: "job selection".to_string(),
                });
            }
            for calculation in catalog.variants(name) {
                for member in self.members_for(calculation, collection_filter)? {
                    let slice = self.slice_for(calculation, &member)?.clone();
                    let target = ResultSpec::new(calculation, &slice);
                    let result = index.find(&target)?.map(|record| ArtifactHandle {
                        record: record.id,
                        stem: record.stem.clone(),
                    });
                    jobs.push(Job {
                        calculation,
                        slice,
                        result,
                    });
                }
            }
        }
        Ok(jobs)
    }

    /// Members a calculation runs on, deduplicated and sorted.
    pub fn members_for(
        &self,
        calculation: &Calculation,
        collection_filter: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let (names, referenced_by) = match collection_filter {
            Some(filter) => (filter.to_vec(), "collection filter".to_string()),
            None => (
                calculation.collections()?,
                format!("calculation '{}'", calculation.name),
            ),
        };
        let mut members = BTreeSet::new();
        for collection in names {
            let listed = self.collections.get(&collection).ok_or_else(|| {
                PlanError::UnknownCollection {
                    collection: collection.clone(),
                    referenced_by: referenced_by.clone(),
                }
            })?;
            members.extend(listed.iter().cloned());
        }
        Ok(members.into_iter().collect())
    }

    /// The slice a calculation reads for one member.
    pub fn slice_for(&self, calculation: &Calculation, member: &str) -> Result<&'a Slice> {
        let slice_name = calculation.slice_name().ok_or_else(|| {
            PlanError::invalid(
                format!("calculations/{}/slice_name", calculation.name),
                "calculation declares no slice_name",
            )
        })?;
        self.slices.lookup(member, slice_name, calculation.group())
    }

    /// Results of the upstream variants of `job` on the same member.
    ///
    /// Fails with [`PlanError::UpstreamResultMissing`] when an upstream job
    /// has not produced its record yet.
    pub fn upstream_inputs<'i>(
        &self,
        index: &'i ArtifactIndex,
        job: &Job<'a>,
    ) -> Result<Vec<UpstreamInput<'a, 'i>>> {
        let catalog: &'a CalculationCatalog = self.catalog;
        let mut inputs = Vec::new();
        for (key, upstream) in catalog.upstream_of(job.calculation) {
            let slice = self.slice_for(upstream, &job.slice.member)?;
            let record = index
                .find(&ResultSpec::new(upstream, slice))?
                .ok_or_else(|| PlanError::UpstreamResultMissing {
                    calc: job.calculation.name.clone(),
                    member: job.slice.member.clone(),
                    upstream: upstream.label(),
                })?;
            inputs.push(UpstreamInput {
                key,
                calculation: upstream,
                record,
            });
        }
        Ok(inputs)
    }
}
