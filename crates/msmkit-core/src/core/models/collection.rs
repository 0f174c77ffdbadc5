use super::ids::MsmKey;
use super::msm::Msm;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("No MSM titled '{0}' in the collection")]
    UnknownTitle(String),
    #[error("Collection is empty")]
    Empty,
}

/// A collection of MSMs analysed against one shared clustering, so that
/// populations and kinetics are comparable across systems.
///
/// MSMs live in an arena; titles map to arena keys. Members never hold a
/// reference back to the collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MsmCollection {
    msms: SlotMap<MsmKey, Msm>,
    titles: BTreeMap<String, MsmKey>,
    /// Cluster centers shared by every member when clustering is run through
    /// the collection. Only the clustering step mutates this.
    pub cluster_centers: Option<DMatrix<f64>>,
}

impl MsmCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an MSM, replacing any member with the same title.
    pub fn add_msm(&mut self, msm: Msm) -> MsmKey {
        if let Some(&existing) = self.titles.get(&msm.title) {
            self.msms[existing] = msm;
            existing
        } else {
            let title = msm.title.clone();
            let key = self.msms.insert(msm);
            self.titles.insert(title, key);
            key
        }
    }

    pub fn remove_msm(&mut self, title: &str) -> Result<Msm, CollectionError> {
        let key = self
            .titles
            .remove(title)
            .ok_or_else(|| CollectionError::UnknownTitle(title.to_string()))?;
        self.msms
            .remove(key)
            .ok_or_else(|| CollectionError::UnknownTitle(title.to_string()))
    }

    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains_key(title)
    }

    pub fn get(&self, title: &str) -> Result<&Msm, CollectionError> {
        self.titles
            .get(title)
            .map(|&key| &self.msms[key])
            .ok_or_else(|| CollectionError::UnknownTitle(title.to_string()))
    }

    pub fn get_mut(&mut self, title: &str) -> Result<&mut Msm, CollectionError> {
        match self.titles.get(title) {
            Some(&key) => Ok(&mut self.msms[key]),
            None => Err(CollectionError::UnknownTitle(title.to_string())),
        }
    }

    /// All member titles, in deterministic (sorted) order.
    pub fn titles(&self) -> Vec<String> {
        self.titles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.msms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Msm> {
        self.titles.values().map(|&key| &self.msms[key])
    }

    /// Resolves an optional title selection: `None` means every member, in
    /// deterministic order. Unknown titles are an error, never defaulted.
    pub fn resolve_titles(&self, titles: Option<&[String]>) -> Result<Vec<String>, CollectionError> {
        match titles {
            None => {
                if self.is_empty() {
                    return Err(CollectionError::Empty);
                }
                Ok(self.titles())
            }
            Some(selection) => {
                for title in selection {
                    if !self.contains(title) {
                        return Err(CollectionError::UnknownTitle(title.clone()));
                    }
                }
                Ok(selection.to_vec())
            }
        }
    }

    /// Pooled copies of the feature matrices of the selected members, in
    /// selection order, suitable for clustering over the union of frames.
    pub fn pooled_data(&self, titles: &[String]) -> Result<Vec<DMatrix<f64>>, CollectionError> {
        let mut pooled = Vec::new();
        for title in titles {
            pooled.extend(self.get(title)?.features.iter().cloned());
        }
        Ok(pooled)
    }
}
