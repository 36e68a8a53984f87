//! Candidate node strategy
//!
//! A driver decides three things for a lock kind: how candidate nodes are
//! named and created, how sibling names are ordered, and whether a candidate
//! at a given position may hold the lock. Drivers keep no state of their own;
//! the read driver only consults the owner registry of its sibling write lock.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tessera_client::{ClientError, CoordinationClient, CreateMode};
use tessera_common::{READ_LOCK_NAME, WRITE_LOCK_NAME, make_path};
use uuid::Uuid;

use crate::error::{LockError, Result};
use crate::owner::{LockOwner, OwnerRegistry};

/// Outcome of an acquirability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquirability {
    Acquirable,
    /// Blocked until the named sibling (name, not full path) goes away
    Blocked { path_to_watch: String },
}

impl Acquirability {
    pub fn blocked_by(name: impl Into<String>) -> Self {
        Acquirability::Blocked {
            path_to_watch: name.into(),
        }
    }

    pub fn is_acquirable(&self) -> bool {
        matches!(self, Acquirability::Acquirable)
    }

    pub fn path_to_watch(&self) -> Option<&str> {
        match self {
            Acquirability::Acquirable => None,
            Acquirability::Blocked { path_to_watch } => Some(path_to_watch),
        }
    }
}

/// Name of a candidate node before the server appends its sequence number.
///
/// The random token lets the creator find its node again when the create
/// response is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    token: String,
    path: String,
}

impl Candidate {
    pub fn new(base_path: &str, lock_name: &str) -> Self {
        let token = Uuid::new_v4().simple().to_string();
        let path = make_path(&[base_path, &format!("{}-{}", token, lock_name)]);
        Self { token, path }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Requested path, without the sequence suffix
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether a sibling name belongs to this candidate
    pub fn matches(&self, child_name: &str) -> bool {
        child_name.starts_with(&self.token)
    }
}

/// Lock kind strategy
#[derive(Clone)]
pub enum LockDriver {
    /// Index check, ordered by the lock's own name
    Standard,
    /// Index check, ordered across readers and writers
    Write,
    /// Reader fairness check, ordered across readers and writers
    Read { writer: Arc<OwnerRegistry> },
}

impl fmt::Debug for LockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockDriver::Standard => write!(f, "Standard"),
            LockDriver::Write => write!(f, "Write"),
            LockDriver::Read { .. } => write!(f, "Read"),
        }
    }
}

impl LockDriver {
    /// Create the ephemeral sequential node for `candidate`.
    pub async fn create_lock(
        &self,
        client: &dyn CoordinationClient,
        candidate: &Candidate,
    ) -> std::result::Result<String, ClientError> {
        client
            .create(candidate.path(), CreateMode::EphemeralSequential, true)
            .await
    }

    /// Decide whether `node_name` may hold the lock given its sorted siblings.
    pub fn is_acquirable(
        &self,
        children: &[String],
        node_name: &str,
        max_leases: usize,
        owner: &LockOwner,
    ) -> Result<Acquirability> {
        match self {
            LockDriver::Standard | LockDriver::Write => {
                standard_is_acquirable(children, node_name, max_leases)
            }
            LockDriver::Read { writer } => {
                if writer.is_owned_by(owner) {
                    return Ok(Acquirability::Acquirable);
                }
                read_is_acquirable(children, node_name)
            }
        }
    }

    pub fn sort_key<'a>(&self, name: &'a str, lock_name: &str) -> &'a str {
        match self {
            LockDriver::Standard => sort_key(name, lock_name),
            LockDriver::Write | LockDriver::Read { .. } => combined_sort_key(name),
        }
    }

    pub fn compare(&self, a: &str, b: &str, lock_name: &str) -> Ordering {
        self.sort_key(a, lock_name).cmp(self.sort_key(b, lock_name))
    }

    /// Whether a sibling counts as a participant of this lock kind
    pub fn is_participant(&self, name: &str, lock_name: &str) -> bool {
        match self {
            LockDriver::Standard => true,
            LockDriver::Write | LockDriver::Read { .. } => name.contains(lock_name),
        }
    }
}

/// Rank-based check shared by plain mutexes and writers.
///
/// The candidate may hold the lock if fewer than `max_leases` siblings precede
/// it; otherwise it waits on the sibling `max_leases` places ahead.
pub fn standard_is_acquirable(
    children: &[String],
    node_name: &str,
    max_leases: usize,
) -> Result<Acquirability> {
    let index = children
        .iter()
        .position(|child| child == node_name)
        .ok_or_else(|| LockError::NodeMissing(node_name.to_string()))?;

    if index < max_leases {
        return Ok(Acquirability::Acquirable);
    }

    Ok(Acquirability::blocked_by(children[index - max_leases].clone()))
}

/// Reader check: blocked only by a writer queued ahead of it.
pub fn read_is_acquirable(children: &[String], node_name: &str) -> Result<Acquirability> {
    let mut first_writer = None;

    for (index, child) in children.iter().enumerate() {
        if child.contains(WRITE_LOCK_NAME) {
            if first_writer.is_none() {
                first_writer = Some(index);
            }
        } else if child == node_name {
            return Ok(match first_writer {
                Some(writer) => Acquirability::blocked_by(children[writer].clone()),
                None => Acquirability::Acquirable,
            });
        }
    }

    Err(LockError::NodeMissing(node_name.to_string()))
}

/// Strip everything up to and including the last occurrence of `marker`.
///
/// Names without the marker are returned unchanged.
pub fn sort_key<'a>(name: &'a str, marker: &str) -> &'a str {
    match name.rfind(marker) {
        Some(index) => &name[index + marker.len()..],
        None => name,
    }
}

/// Sort key that interleaves readers and writers by creation order.
pub fn combined_sort_key(name: &str) -> &str {
    sort_key(sort_key(name, READ_LOCK_NAME), WRITE_LOCK_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_acquirable_returns_true_when_acquirable() {
        let children = names(&["000000", "000001"]);
        let result = standard_is_acquirable(&children, "000001", 10).unwrap();
        assert_eq!(result, Acquirability::Acquirable);
    }

    #[test]
    fn test_is_acquirable_returns_path_to_watch_when_not_acquirable() {
        let children = names(&["a0000000000", "a0000000001"]);

        let result = standard_is_acquirable(&children, "a0000000001", 1).unwrap();
        assert_eq!(result, Acquirability::blocked_by("a0000000000"));

        let result = standard_is_acquirable(&children, "a0000000001", 2).unwrap();
        assert_eq!(result, Acquirability::Acquirable);
    }

    #[test]
    fn test_is_acquirable_watches_max_leases_ahead() {
        let children = names(&["n0", "n1", "n2", "n3", "n4"]);
        let result = standard_is_acquirable(&children, "n4", 2).unwrap();
        assert_eq!(result, Acquirability::blocked_by("n2"));
    }

    #[test]
    fn test_is_acquirable_fails_when_node_not_found() {
        let children = names(&["000000", "000001"]);
        let err = standard_is_acquirable(&children, "000002", 1).unwrap_err();
        assert!(matches!(err, LockError::NodeMissing(ref n) if n == "000002"));
    }

    #[test]
    fn test_sort_key_strips_everything_up_to_and_including_name() {
        for path in [
            "/some/path/prefix/98798798-__WRIT__000001",
            "__WRIT__000001",
        ] {
            assert_eq!(sort_key(path, "__WRIT__"), "000001");
        }
        assert_eq!(sort_key("/x/y/__WRIT__000007", "__WRIT__"), "000007");
    }

    #[test]
    fn test_sort_key_returns_name_unchanged_without_marker() {
        assert_eq!(sort_key("nomarker", "__WRIT__"), "nomarker");
        assert_eq!(sort_key("/some/path", "__READ__"), "/some/path");
    }

    #[test]
    fn test_sort_key_marker_at_end() {
        assert_eq!(sort_key("abc-__READ__", "__READ__"), "");
    }

    #[test]
    fn test_combined_sort_key_interleaves_kinds() {
        let mut children = names(&[
            "ff-__WRIT__0000000003",
            "aa-__READ__0000000001",
            "cc-__WRIT__0000000000",
            "bb-__READ__0000000002",
        ]);
        let driver = LockDriver::Write;
        children.sort_by(|a, b| driver.compare(a, b, WRITE_LOCK_NAME));

        assert_eq!(
            children,
            names(&[
                "cc-__WRIT__0000000000",
                "aa-__READ__0000000001",
                "bb-__READ__0000000002",
                "ff-__WRIT__0000000003",
            ])
        );
    }

    #[test]
    fn test_read_is_acquirable_without_writers() {
        let children = names(&["a-__READ__0000000000", "b-__READ__0000000001"]);
        let result = read_is_acquirable(&children, "b-__READ__0000000001").unwrap();
        assert_eq!(result, Acquirability::Acquirable);
    }

    #[test]
    fn test_read_is_acquirable_blocked_by_earlier_writer() {
        let children = names(&[
            "a-__READ__0000000000",
            "w-__WRIT__0000000001",
            "x-__WRIT__0000000002",
            "b-__READ__0000000003",
        ]);
        let result = read_is_acquirable(&children, "b-__READ__0000000003").unwrap();
        assert_eq!(result, Acquirability::blocked_by("w-__WRIT__0000000001"));

        let result = read_is_acquirable(&children, "a-__READ__0000000000").unwrap();
        assert_eq!(result, Acquirability::Acquirable);
    }

    #[test]
    fn test_read_is_acquirable_missing_node() {
        let children = names(&["w-__WRIT__0000000000"]);
        let err = read_is_acquirable(&children, "r-__READ__0000000001").unwrap_err();
        assert!(matches!(err, LockError::NodeMissing(_)));
    }

    #[test]
    fn test_read_driver_passes_write_holder() {
        let writer = Arc::new(OwnerRegistry::new());
        let owner = LockOwner::named("holder");
        writer.insert(owner.clone(), "/rw/w-__WRIT__0000000000".to_string());

        let driver = LockDriver::Read {
            writer: writer.clone(),
        };
        let children = names(&["w-__WRIT__0000000000", "r-__READ__0000000001"]);

        let result = driver
            .is_acquirable(&children, "r-__READ__0000000001", usize::MAX, &owner)
            .unwrap();
        assert!(result.is_acquirable());

        let result = driver
            .is_acquirable(
                &children,
                "r-__READ__0000000001",
                usize::MAX,
                &LockOwner::named("someone-else"),
            )
            .unwrap();
        assert_eq!(result, Acquirability::blocked_by("w-__WRIT__0000000000"));
    }

    #[test]
    fn test_participants() {
        assert!(LockDriver::Standard.is_participant("anything", "lock-"));
        assert!(LockDriver::Write.is_participant("t-__WRIT__0000000000", WRITE_LOCK_NAME));
        assert!(!LockDriver::Write.is_participant("t-__READ__0000000000", WRITE_LOCK_NAME));
    }

    #[test]
    fn test_candidate_naming() {
        let candidate = Candidate::new("/locks/orders", "lock-");
        assert_eq!(candidate.token().len(), 32);
        assert_eq!(
            candidate.path(),
            format!("/locks/orders/{}-lock-", candidate.token())
        );
        assert!(candidate.matches(&format!("{}-lock-0000000004", candidate.token())));
        assert!(!candidate.matches("0123-lock-0000000004"));
        assert_ne!(candidate.token(), Candidate::new("/locks/orders", "lock-").token());
    }

    proptest! {
        #[test]
        fn prop_at_most_max_leases_acquirable(count in 1usize..20, max_leases in 1usize..5) {
            let children: Vec<String> = (0..count).map(|i| format!("lock-{:010}", i)).collect();
            let acquirable = children
                .iter()
                .filter(|name| standard_is_acquirable(&children, name, max_leases).unwrap().is_acquirable())
                .count();
            prop_assert_eq!(acquirable, count.min(max_leases));
        }

        #[test]
        fn prop_watch_target_precedes_candidate(count in 2usize..20, max_leases in 1usize..5) {
            let children: Vec<String> = (0..count).map(|i| format!("lock-{:010}", i)).collect();
            for (index, name) in children.iter().enumerate() {
                let result = standard_is_acquirable(&children, name, max_leases).unwrap();
                if let Some(watch) = result.path_to_watch() {
                    let watch_index = children.iter().position(|c| c == watch).unwrap();
                    prop_assert_eq!(watch_index + max_leases, index);
                }
            }
        }
    }
}
