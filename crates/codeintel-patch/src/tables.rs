//! Moniker tables and cross-repository package tables of a patched bundle.

use std::collections::{BTreeSet, HashMap, HashSet};

use codeintel_types::{MonikerLocations, Package, PackageReference};

use crate::error::PatchError;

/// Replace the locations of `replaced` paths in a definitions or references
/// table with the patch locations of `copied` paths.
///
/// Rows are keyed by (scheme, identifier). Rows left without locations are
/// dropped; new rows are appended in patch order.
pub(crate) fn merge_moniker_tables(
    base: &mut Vec<MonikerLocations>,
    patch: Vec<MonikerLocations>,
    replaced: &HashSet<String>,
    copied: &BTreeSet<String>,
) {
    for row in base.iter_mut() {
        row.locations
            .retain(|location| !replaced.contains(&location.path));
    }

    let mut positions: HashMap<(String, String), usize> = base
        .iter()
        .enumerate()
        .map(|(i, row)| ((row.scheme.clone(), row.identifier.clone()), i))
        .collect();

    for row in patch {
        let locations: Vec<_> = row
            .locations
            .into_iter()
            .filter(|location| copied.contains(&location.path))
            .collect();
        if locations.is_empty() {
            continue;
        }

        let key = (row.scheme, row.identifier);
        match positions.get(&key) {
            Some(&i) => {
                for location in locations {
                    if !base[i].locations.contains(&location) {
                        base[i].locations.push(location);
                    }
                }
            }
            None => {
                positions.insert(key.clone(), base.len());
                base.push(MonikerLocations {
                    scheme: key.0,
                    identifier: key.1,
                    locations,
                });
            }
        }
    }

    base.retain(|row| !row.locations.is_empty());
}

/// Union of exported packages, base order first.
pub(crate) fn merge_packages(base: &mut Vec<Package>, patch: Vec<Package>) {
    let mut seen: HashSet<Package> = base.iter().cloned().collect();
    for package in patch {
        if seen.insert(package.clone()) {
            base.push(package);
        }
    }
}

/// Union of package references. References to the same package keep a single
/// row whose filter admits the identifiers of both sides.
pub(crate) fn merge_package_references(
    base: &mut Vec<PackageReference>,
    patch: Vec<PackageReference>,
) -> Result<(), PatchError> {
    for reference in patch {
        let package = reference.package();
        match base.iter_mut().find(|existing| existing.package() == package) {
            Some(existing) => {
                existing.filter = codeintel_bloom::merge(&existing.filter, &reference.filter)?;
            }
            None => base.push(reference),
        }
    }
    Ok(())
}
