use crate::core::embedding::EmbeddedImage;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub path: PathBuf,
    /// Cosine similarity to the group anchor; 1.0 for the anchor itself.
    pub similarity: f32,
}

/// Images similar to a common anchor. The first member is the anchor.
///
/// Members are only known to be similar to the anchor, not to each other.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    members: Vec<Member>,
}

impl Group {
    pub fn new(anchor: PathBuf) -> Self {
        Self {
            members: vec![Member {
                path: anchor,
                similarity: 1.0,
            }],
        }
    }

    pub fn push(&mut self, path: PathBuf, similarity: f32) {
        self.members.push(Member { path, similarity });
    }

    pub fn anchor(&self) -> &Path {
        &self.members[0].path
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.members.iter().map(|m| m.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Groups always hold their anchor.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Greedy single pass over `images` in order. Each unassigned image opens a
/// group and pulls in every later unassigned image whose similarity to it is
/// strictly above `threshold`. Assignments are never revisited.
pub fn group_by_anchor(images: &[EmbeddedImage], threshold: f32) -> Vec<Group> {
    let mut assigned = vec![false; images.len()];
    let mut groups = Vec::new();

    for (i, anchor) in images.iter().enumerate() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut group = Group::new(anchor.path.clone());

        for j in (i + 1)..images.len() {
            if assigned[j] {
                continue;
            }
            let similarity = anchor.embedding.cosine(&images[j].embedding);
            if similarity > threshold {
                log::debug!(
                    "{} joins group of {} (similarity {:.3})",
                    images[j].path.display(),
                    anchor.path.display(),
                    similarity
                );
                group.push(images[j].path.clone(), similarity);
                assigned[j] = true;
            }
        }
        groups.push(group);
    }

    groups
}
