//! Versioned buffer model: commit/branch/merge/diff over per-session content
//! buffers (C2).
//!
//! Uses a typestate-adjacent style of explicit transition methods that
//! reject invalid moves rather than a bare public status field, generalized
//! here to a (non-typestate, since a buffer has many more than two states)
//! but equally explicit transition API: every mutating method validates its
//! own preconditions and returns a typed `BufferError` rather than panicking.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;
use uaos_types::{
    BufferBranch, BufferDiff, BufferDiffEntry, BufferDiffStats, BufferError, BufferId,
    BufferVersion, MergeConflict, MergeResult, MergeStrategy, Value, VersionId, VersionedBuffer,
};

const MAIN_BRANCH: &str = "main";

/// Create a new buffer named `name` with one branch (`main`) and a root
/// version holding `initial_content` (or empty). `working_content` mirrors
/// the head and the buffer starts clean.
#[instrument(skip(initial_content))]
pub fn create_buffer(id: BufferId, name: &str, initial_content: Vec<Value>) -> VersionedBuffer {
    let now = Utc::now();
    let content = initial_content;
    let root_id = VersionId::derive(&content_repr(&content), None, "initial commit", now);
    let root = BufferVersion {
        id: root_id.clone(),
        content: content.clone(),
        message: "initial commit".to_string(),
        timestamp: now,
        parent_id: None,
        merge_parent_id: None,
        tags: BTreeSet::new(),
        metadata: BTreeMap::new(),
    };
    let mut versions = BTreeMap::new();
    versions.insert(root_id.clone(), root);
    let branch = BufferBranch {
        name: MAIN_BRANCH.to_string(),
        head_version_id: root_id,
        created_at: now,
        description: None,
        parent_branch: None,
    };
    let mut branches = std::collections::HashMap::new();
    branches.insert(MAIN_BRANCH.to_string(), branch);

    VersionedBuffer {
        id,
        name: name.to_string(),
        branches,
        versions: versions.into_iter().collect(),
        current_branch: MAIN_BRANCH.to_string(),
        working_content: content,
        is_dirty: false,
        created_at: now,
        updated_at: now,
        content_schema: None,
    }
}

/// Stable representation of a content snapshot, used as version-id input and
/// for equality comparisons where `Value` itself isn't `Ord`.
fn content_repr(content: &[Value]) -> String {
    serde_json::to_string(content).unwrap_or_default()
}

fn current_branch<'a>(buf: &'a VersionedBuffer) -> Result<&'a BufferBranch, BufferError> {
    buf.branches
        .get(&buf.current_branch)
        .ok_or_else(|| BufferError::NotFound(format!("{}: current branch missing", buf.name)))
}

fn head_version<'a>(buf: &'a VersionedBuffer) -> Result<&'a BufferVersion, BufferError> {
    let branch = current_branch(buf)?;
    buf.versions
        .get(&branch.head_version_id)
        .ok_or_else(|| BufferError::NotFound(format!("{}: head version missing", buf.name)))
}

fn recompute_dirty(buf: &mut VersionedBuffer) -> Result<(), BufferError> {
    let head = head_version(buf)?;
    buf.is_dirty = buf.working_content != head.content;
    Ok(())
}

/// Replace the working content wholesale. Sets `is_dirty` if it now differs
/// from the current branch head.
#[instrument(skip(buf, content))]
pub fn set_working_content(buf: &mut VersionedBuffer, content: Vec<Value>) -> Result<(), BufferError> {
    buf.working_content = content;
    buf.updated_at = Utc::now();
    recompute_dirty(buf)
}

/// Append items to the working content.
#[instrument(skip(buf, items))]
pub fn append_to_buffer(buf: &mut VersionedBuffer, items: Vec<Value>) -> Result<(), BufferError> {
    buf.working_content.extend(items);
    buf.updated_at = Utc::now();
    recompute_dirty(buf)
}

/// `commit(name, message) -> Version`. Fails `NothingToCommit` if the
/// working content doesn't differ from the current head.
#[instrument(skip(buf))]
pub fn commit(buf: &mut VersionedBuffer, message: &str) -> Result<BufferVersion, BufferError> {
    if !buf.is_dirty {
        return Err(BufferError::NothingToCommit(buf.name.clone()));
    }
    let parent_id = current_branch(buf)?.head_version_id.clone();
    let now = Utc::now();
    let version_id = VersionId::derive(
        &content_repr(&buf.working_content),
        Some(&parent_id),
        message,
        now,
    );
    let version = BufferVersion {
        id: version_id.clone(),
        content: buf.working_content.clone(),
        message: message.to_string(),
        timestamp: now,
        parent_id: Some(parent_id),
        merge_parent_id: None,
        tags: BTreeSet::new(),
        metadata: BTreeMap::new(),
    };
    buf.versions.insert(version_id.clone(), version.clone());
    let branch_name = buf.current_branch.clone();
    if let Some(branch) = buf.branches.get_mut(&branch_name) {
        branch.head_version_id = version_id;
    }
    buf.is_dirty = false;
    buf.updated_at = now;
    Ok(version)
}

/// Walk parent links `steps` times from the current head, set working
/// content to that version's content, mark clean, and move the current
/// branch head pointer back to that ancestor. Versions beyond the new head
/// are not deleted; they remain addressable by id through `get_history`.
#[instrument(skip(buf))]
pub fn rollback(buf: &mut VersionedBuffer, steps: usize) -> Result<BufferVersion, BufferError> {
    let mut cursor = current_branch(buf)?.head_version_id.clone();
    for _ in 0..steps {
        let version = buf
            .versions
            .get(&cursor)
            .ok_or_else(|| BufferError::NoSuchAncestor(buf.name.clone()))?;
        cursor = version
            .parent_id
            .clone()
            .ok_or_else(|| BufferError::NoSuchAncestor(buf.name.clone()))?;
    }
    let target = buf
        .versions
        .get(&cursor)
        .ok_or_else(|| BufferError::NoSuchAncestor(buf.name.clone()))?
        .clone();

    buf.working_content = target.content.clone();
    buf.is_dirty = false;
    let branch_name = buf.current_branch.clone();
    if let Some(branch) = buf.branches.get_mut(&branch_name) {
        branch.head_version_id = cursor;
    }
    buf.updated_at = Utc::now();
    Ok(target)
}

/// Create a new branch pointing at the current branch's head.
#[instrument(skip(buf))]
pub fn branch(buf: &mut VersionedBuffer, branch_name: &str) -> Result<BufferBranch, BufferError> {
    if buf.branches.contains_key(branch_name) {
        return Err(BufferError::BranchExists(branch_name.to_string()));
    }
    let head = current_branch(buf)?.head_version_id.clone();
    let new_branch = BufferBranch {
        name: branch_name.to_string(),
        head_version_id: head,
        created_at: Utc::now(),
        description: None,
        parent_branch: Some(buf.current_branch.clone()),
    };
    buf.branches.insert(branch_name.to_string(), new_branch.clone());
    buf.updated_at = Utc::now();
    Ok(new_branch)
}

/// Move `current_branch` to `branch_name` and reload working content from
/// its head. Fails `UncommittedChanges` if the working copy is dirty.
#[instrument(skip(buf))]
pub fn switch_branch(buf: &mut VersionedBuffer, branch_name: &str) -> Result<(), BufferError> {
    if buf.is_dirty {
        return Err(BufferError::UncommittedChanges(buf.name.clone()));
    }
    let target = buf
        .branches
        .get(branch_name)
        .ok_or_else(|| BufferError::NotFound(format!("branch {branch_name}")))?
        .clone();
    let head = buf
        .versions
        .get(&target.head_version_id)
        .ok_or_else(|| BufferError::NotFound(format!("version {}", target.head_version_id)))?
        .clone();
    buf.current_branch = branch_name.to_string();
    buf.working_content = head.content;
    buf.is_dirty = false;
    buf.updated_at = Utc::now();
    Ok(())
}

/// Merge `source_branch` into the current branch.
///
/// `auto`: three-way diff over ordered items with index-as-identity; items
/// present only on one side merge in, positions changed on both sides (vs.
/// the common ancestor) become conflicts. `ours`/`theirs` select one side
/// unconditionally and always succeed. `union` concatenates both sides,
/// deduping by deep equality.
#[instrument(skip(buf))]
pub fn merge(
    buf: &mut VersionedBuffer,
    source_branch: &str,
    strategy: MergeStrategy,
    message: Option<&str>,
) -> Result<MergeResult, BufferError> {
    let ours_branch = current_branch(buf)?.clone();
    let theirs_branch = buf
        .branches
        .get(source_branch)
        .ok_or_else(|| BufferError::NotFound(format!("branch {source_branch}")))?
        .clone();

    let ours_head = buf
        .versions
        .get(&ours_branch.head_version_id)
        .ok_or_else(|| BufferError::NotFound("ours head".to_string()))?
        .clone();
    let theirs_head = buf
        .versions
        .get(&theirs_branch.head_version_id)
        .ok_or_else(|| BufferError::NotFound("theirs head".to_string()))?
        .clone();

    let base = common_ancestor(buf, &ours_branch.head_version_id, &theirs_branch.head_version_id);
    let base_content: Vec<Value> = base
        .and_then(|id| buf.versions.get(&id))
        .map(|v| v.content.clone())
        .unwrap_or_default();

    let merged = match strategy {
        MergeStrategy::Ours => Some(ours_head.content.clone()),
        MergeStrategy::Theirs => Some(theirs_head.content.clone()),
        MergeStrategy::Union => {
            let mut out = ours_head.content.clone();
            for item in &theirs_head.content {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Some(out)
        }
        MergeStrategy::Auto => {
            match three_way_merge(&base_content, &ours_head.content, &theirs_head.content) {
                Ok(content) => Some(content),
                Err(conflicts) => {
                    return Ok(MergeResult {
                        success: false,
                        new_version_id: None,
                        conflicts,
                        merged_content: None,
                    });
                }
            }
        }
    };

    let merged_content = merged.expect("merge strategies above always produce content on success");
    let now = Utc::now();
    let msg = message.unwrap_or("merge").to_string();
    let new_id = VersionId::derive(&content_repr(&merged_content), Some(&ours_branch.head_version_id), &msg, now);
    let version = BufferVersion {
        id: new_id.clone(),
        content: merged_content.clone(),
        message: msg,
        timestamp: now,
        parent_id: Some(ours_branch.head_version_id.clone()),
        merge_parent_id: Some(theirs_branch.head_version_id.clone()),
        tags: BTreeSet::new(),
        metadata: BTreeMap::new(),
    };
    buf.versions.insert(new_id.clone(), version);
    let branch_name = buf.current_branch.clone();
    if let Some(b) = buf.branches.get_mut(&branch_name) {
        b.head_version_id = new_id.clone();
    }
    buf.working_content = merged_content;
    buf.is_dirty = false;
    buf.updated_at = now;

    Ok(MergeResult {
        success: true,
        new_version_id: Some(new_id),
        conflicts: Vec::new(),
        merged_content: None,
    })
}

/// Walk both histories' parent chains to find the nearest common ancestor
/// version id. `None` if the branches share no history (shouldn't happen
/// for branches created via [`branch`], which always fork from an existing
/// head, but handled defensively for externally constructed buffers).
fn common_ancestor(buf: &VersionedBuffer, a: &VersionId, b: &VersionId) -> Option<VersionId> {
    let mut ancestors_of_a = BTreeSet::new();
    let mut cursor = Some(a.clone());
    while let Some(id) = cursor {
        ancestors_of_a.insert(id.clone());
        cursor = buf.versions.get(&id).and_then(|v| v.parent_id.clone());
    }
    let mut cursor = Some(b.clone());
    while let Some(id) = cursor {
        if ancestors_of_a.contains(&id) {
            return Some(id);
        }
        cursor = buf.versions.get(&id).and_then(|v| v.parent_id.clone());
    }
    None
}

/// Index-aligned three-way merge. Returns merged content on success, or the
/// list of conflicts (one per index where both sides changed the base value
/// to different, non-equal values).
fn three_way_merge(base: &[Value], ours: &[Value], theirs: &[Value]) -> Result<Vec<Value>, Vec<MergeConflict>> {
    let len = base.len().max(ours.len()).max(theirs.len());
    let mut merged = Vec::with_capacity(len);
    let mut conflicts = Vec::new();

    for i in 0..len {
        let b = base.get(i);
        let o = ours.get(i);
        let t = theirs.get(i);

        match (o, t) {
            (None, None) => {}
            (Some(o), None) => {
                if b != Some(o) {
                    merged.push(o.clone());
                }
                // else: base == ours, theirs deleted it -> drop
            }
            (None, Some(t)) => {
                if b != Some(t) {
                    merged.push(t.clone());
                }
            }
            (Some(o), Some(t)) => {
                if o == t {
                    merged.push(o.clone());
                } else if b == Some(o) {
                    // only theirs changed
                    merged.push(t.clone());
                } else if b == Some(t) {
                    // only ours changed
                    merged.push(o.clone());
                } else {
                    conflicts.push(MergeConflict {
                        index: i,
                        ours: Some(o.clone()),
                        theirs: Some(t.clone()),
                        base: b.cloned(),
                    });
                }
            }
        }
    }

    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

/// Compute `added`/`removed`/`modified` between two versions' content,
/// index-aligned, plus summary stats and a one-line human-readable summary.
#[instrument(skip(buf))]
pub fn diff(buf: &VersionedBuffer, from: &VersionId, to: &VersionId) -> Result<BufferDiff, BufferError> {
    let from_content = &buf
        .versions
        .get(from)
        .ok_or_else(|| BufferError::NotFound(format!("version {from}")))?
        .content;
    let to_content = &buf
        .versions
        .get(to)
        .ok_or_else(|| BufferError::NotFound(format!("version {to}")))?
        .content;

    let mut added = Vec::new();
    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut unchanged = 0usize;

    let len = from_content.len().max(to_content.len());
    for i in 0..len {
        match (from_content.get(i), to_content.get(i)) {
            (None, Some(v)) => added.push(BufferDiffEntry { index: i, value: v.clone() }),
            (Some(v), None) => removed.push(BufferDiffEntry { index: i, value: v.clone() }),
            (Some(a), Some(b)) if a == b => unchanged += 1,
            (Some(a), Some(b)) => modified.push((
                BufferDiffEntry { index: i, value: a.clone() },
                BufferDiffEntry { index: i, value: b.clone() },
            )),
            (None, None) => {}
        }
    }

    let stats = BufferDiffStats {
        added: added.len(),
        removed: removed.len(),
        modified: modified.len(),
        unchanged,
    };
    let summary = format!(
        "{} added, {} removed, {} modified, {} unchanged",
        stats.added, stats.removed, stats.modified, stats.unchanged
    );

    Ok(BufferDiff { added, removed, modified, stats, summary })
}

/// Walk the parent chain from the current branch head, newest first,
/// optionally truncated to `limit` entries.
#[instrument(skip(buf))]
pub fn get_history(buf: &VersionedBuffer, limit: Option<usize>) -> Result<Vec<BufferVersion>, BufferError> {
    let mut out = Vec::new();
    let mut cursor = Some(current_branch(buf)?.head_version_id.clone());
    while let Some(id) = cursor {
        let version = buf
            .versions
            .get(&id)
            .ok_or_else(|| BufferError::NotFound(format!("version {id}")))?;
        out.push(version.clone());
        if let Some(limit) = limit {
            if out.len() >= limit {
                break;
            }
        }
        cursor = version.parent_id.clone();
    }
    Ok(out)
}

/// Returns the timestamp invariant check used by property tests: every
/// version's timestamp is >= its parent's.
pub fn history_is_monotonic(history: &[BufferVersion]) -> bool {
    history.windows(2).all(|w| {
        // history is newest-first; w[0] is the child, w[1] its parent
        w[0].timestamp >= w[1].timestamp
    })
}
