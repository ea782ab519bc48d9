//! Translation of the configured namespace list into clone(2) flags.
//! Namespaces provide kernel level isolation of resources: Mount
//! (filesystem view), Pid, Ipc, Network, User (uid/gid mappings), Uts
//! (hostname) and Cgroup.

use anyhow::{bail, Result};
use nix::sched::CloneFlags;

use crate::config::Namespace;

/// Combines the namespace list into a single new-namespace flag set. A
/// duplicate entry is a configuration error, reported before anything else
/// happens.
pub fn clone_flags(namespaces: &[Namespace]) -> Result<CloneFlags> {
    let mut flags = CloneFlags::empty();

    for ns in namespaces {
        let flag = ns.typ.clone_flag();
        if flags.contains(flag) {
            bail!("duplicate {:?} namespace", ns.typ);
        }
        flags |= flag;
    }

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceType;

    const ALL: [NamespaceType; 7] = [
        NamespaceType::Ipc,
        NamespaceType::Uts,
        NamespaceType::Mount,
        NamespaceType::Pid,
        NamespaceType::Net,
        NamespaceType::User,
        NamespaceType::Cgroup,
    ];

    fn namespaces(types: &[NamespaceType]) -> Vec<Namespace> {
        types.iter().map(|&typ| Namespace { typ }).collect()
    }

    #[test]
    fn test_all_namespaces_combine() {
        let flags = clone_flags(&namespaces(&ALL)).unwrap();
        let expected = ALL
            .iter()
            .fold(CloneFlags::empty(), |acc, typ| acc | typ.clone_flag());
        assert_eq!(flags, expected);
    }

    #[test]
    fn test_duplicate_namespace_is_rejected() {
        let result = clone_flags(&namespaces(&[
            NamespaceType::Pid,
            NamespaceType::Mount,
            NamespaceType::Pid,
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_list_yields_no_flags() {
        assert_eq!(clone_flags(&[]).unwrap(), CloneFlags::empty());
    }

    quickcheck! {
        // Any duplicate-free subset maps to the OR of the canonical flags,
        // independent of the order the entries appear in.
        fn prop_flags_are_order_independent(indices: Vec<u8>) -> bool {
            let mut types: Vec<NamespaceType> = indices
                .iter()
                .map(|i| ALL[(*i % 7) as usize])
                .collect();
            types.sort_by_key(|typ| typ.clone_flag().bits());
            types.dedup();

            let expected = types
                .iter()
                .fold(CloneFlags::empty(), |acc, typ| acc | typ.clone_flag());

            let forward = clone_flags(&namespaces(&types)).unwrap();
            let mut reversed = types.clone();
            reversed.reverse();
            let backward = clone_flags(&namespaces(&reversed)).unwrap();

            forward == expected && backward == expected
        }

        // Any list with a repeated type is rejected.
        fn prop_duplicates_are_rejected(index: u8, padding: Vec<u8>) -> bool {
            let duplicated = ALL[(index % 7) as usize];
            let mut types = vec![duplicated];
            types.extend(padding.iter().map(|i| ALL[(*i % 7) as usize]));
            types.push(duplicated);

            clone_flags(&namespaces(&types)).is_err()
        }
    }
}
