//! HAM10000 Metadata Loading
//!
//! Joins the metadata CSV with the images found under the data directory
//! and assigns dense class indices.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{lesion_label, IMAGE_EXTENSIONS};
use crate::utils::error::{LesionError, Result};

/// One labeled image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Unique image identifier (file stem)
    pub image_id: String,
    /// Resolved image path
    pub file_path: PathBuf,
    /// Diagnosis code, e.g. `"mel"`
    pub diagnosis_code: String,
    /// Human-readable lesion type
    pub human_label: String,
    /// Dense class index into `MetadataTable::class_names`
    pub class_index: usize,
}

/// Row of the metadata CSV. Columns other than `image_id` and `dx`
/// (`lesion_id`, `dx_type`, `age`, `sex`, `localization`) are ignored.
#[derive(Debug, Deserialize)]
struct MetadataRow {
    image_id: String,
    dx: String,
}

/// Ordered image records plus the class-name list they index into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataTable {
    pub records: Vec<ImageRecord>,
    pub class_names: Vec<String>,
}

impl MetadataTable {
    /// Load the metadata CSV and resolve each row against the image directory
    pub fn load(data_dir: &Path, metadata_file: &Path) -> Result<Self> {
        info!("Loading metadata from: {:?}", metadata_file);

        let index = index_images(data_dir)?;
        info!("Indexed {} images under {:?}", index.len(), data_dir);

        let mut reader = csv::Reader::from_path(metadata_file).map_err(|e| {
            LesionError::Config(format!(
                "Cannot open metadata file {}: {}",
                metadata_file.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        for row in reader.deserialize::<MetadataRow>() {
            let row = row?;
            let path = index.get(&row.image_id).cloned().ok_or_else(|| {
                LesionError::Config(format!(
                    "No image file found for image_id '{}'",
                    row.image_id
                ))
            })?;
            entries.push((row.image_id, row.dx, path));
        }

        let table = Self::from_entries(entries)?;
        info!(
            "Loaded {} records across {} classes",
            table.len(),
            table.num_classes()
        );
        Ok(table)
    }

    /// Build a table from `(image_id, diagnosis_code, path)` entries.
    ///
    /// Class indices follow the sorted order of the distinct human labels.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String, PathBuf)>,
    {
        let mut labelled = Vec::new();
        for (image_id, code, path) in entries {
            let label = lesion_label(&code).ok_or_else(|| {
                LesionError::Config(format!(
                    "Unknown diagnosis code '{}' for image '{}'",
                    code, image_id
                ))
            })?;
            labelled.push((image_id, code, label, path));
        }

        if labelled.is_empty() {
            return Err(LesionError::Config("Metadata table is empty".into()));
        }

        let class_names: Vec<String> = labelled
            .iter()
            .map(|(_, _, label, _)| label.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let records = labelled
            .into_iter()
            .map(|(image_id, diagnosis_code, label, file_path)| ImageRecord {
                class_index: class_names
                    .binary_search_by(|name| name.as_str().cmp(label))
                    .unwrap_or_default(),
                image_id,
                file_path,
                diagnosis_code,
                human_label: label.to_string(),
            })
            .collect();

        Ok(Self {
            records,
            class_names,
        })
    }

    /// New table with the same label set
    pub fn with_records(&self, records: Vec<ImageRecord>) -> Self {
        Self {
            records,
            class_names: self.class_names.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Number of records per class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes()];
        for record in &self.records {
            counts[record.class_index] += 1;
        }
        counts
    }

    /// Class index of a diagnosis code, if that code occurs in the label set
    pub fn class_index_of_code(&self, code: &str) -> Option<usize> {
        let label = lesion_label(code)?;
        self.class_names.iter().position(|name| name == label)
    }

    /// Image paths in table order
    pub fn image_paths(&self) -> Vec<PathBuf> {
        self.records.iter().map(|r| r.file_path.clone()).collect()
    }
}

/// Index every image under `data_dir` by file stem.
///
/// Walk order is sorted by file name so duplicate stems resolve the same way
/// on every run.
pub fn index_images(data_dir: &Path) -> Result<HashMap<String, PathBuf>> {
    if !data_dir.is_dir() {
        return Err(LesionError::Config(format!(
            "Data directory does not exist: {}",
            data_dir.display()
        )));
    }

    let mut index = HashMap::new();
    for entry in WalkDir::new(data_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let is_image = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        if !is_image {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if index.insert(stem.to_string(), path.to_path_buf()).is_some() {
                debug!("Duplicate image id '{}', keeping {:?}", stem, path);
            }
        }
    }

    if index.is_empty() {
        return Err(LesionError::Config(format!(
            "No images found under {}",
            data_dir.display()
        )));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(id: &str, code: &str) -> (String, String, PathBuf) {
        (
            id.to_string(),
            code.to_string(),
            PathBuf::from(format!("/data/{}.jpg", id)),
        )
    }

    #[test]
    fn test_class_index_follows_sorted_labels() {
        let table = MetadataTable::from_entries(vec![
            entry("a", "nv"),
            entry("b", "mel"),
            entry("c", "akiec"),
            entry("d", "nv"),
        ])
        .unwrap();

        assert_eq!(
            table.class_names,
            vec!["Actinic keratoses", "Melanocytic nevi", "Melanoma"]
        );
        let indices: Vec<_> = table.records.iter().map(|r| r.class_index).collect();
        assert_eq!(indices, vec![1, 2, 0, 1]);
        assert_eq!(table.class_counts(), vec![1, 2, 1]);
        assert_eq!(table.class_index_of_code("mel"), Some(2));
        assert_eq!(table.class_index_of_code("df"), None);
    }

    #[test]
    fn test_unknown_code_is_config_error() {
        let err = MetadataTable::from_entries(vec![entry("a", "zzz")]).unwrap_err();
        assert!(matches!(err, LesionError::Config(_)));
    }

    #[test]
    fn test_empty_table_is_config_error() {
        let err = MetadataTable::from_entries(Vec::new()).unwrap_err();
        assert!(matches!(err, LesionError::Config(_)));
    }

    #[test]
    fn test_load_resolves_nested_images() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("HAM10000_images_part_1");
        fs::create_dir_all(&part).unwrap();
        fs::write(part.join("ISIC_0001.jpg"), b"x").unwrap();
        fs::write(part.join("ISIC_0002.JPG"), b"x").unwrap();
        fs::write(part.join("notes.txt"), b"x").unwrap();

        let csv_path = dir.path().join("meta.csv");
        fs::write(
            &csv_path,
            "lesion_id,image_id,dx,dx_type,age,sex,localization\n\
             HAM_1,ISIC_0001,bkl,histo,80.0,male,scalp\n\
             HAM_2,ISIC_0002,df,histo,,female,back\n",
        )
        .unwrap();

        let table = MetadataTable::load(dir.path(), &csv_path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[1].human_label, "Dermatofibroma");
        assert!(table.records[0].file_path.ends_with("ISIC_0001.jpg"));
    }

    #[test]
    fn test_load_missing_image_names_id() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ISIC_0001.jpg"), b"x").unwrap();
        let csv_path = dir.path().join("meta.csv");
        fs::write(&csv_path, "image_id,dx\nISIC_0001,nv\nISIC_9999,nv\n").unwrap();

        let err = MetadataTable::load(dir.path(), &csv_path).unwrap_err();
        assert!(err.to_string().contains("ISIC_9999"));
    }

    #[test]
    fn test_index_empty_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            index_images(dir.path()),
            Err(LesionError::Config(_))
        ));
    }
}
