//! # Transfer Tasks
//!
//! Scores a pretrained representation on external datasets: every
//! subdirectory of the transfer root holding `train/` and `val/`
//! splits gets its own linear probe.

use crate::data::ImageFolder;
use crate::eval::ClassificationMetrics;
use crate::eval::probe::{ProbeConfig, train_probe};
use crate::models::resnet::ResNet;
use anyhow::Context;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of one transfer task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTaskResult {
    /// Dataset directory name.
    pub dataset: String,

    /// Linear-probe metrics on the dataset's validation split.
    pub metrics: ClassificationMetrics,
}

/// Epochs for the per-dataset transfer probes.
const TRANSFER_EPOCHS: usize = 30;

/// Locate transfer datasets: subdirectories with train/ and val/.
pub fn discover_tasks(transfer_dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut tasks = Vec::new();
    let entries = std::fs::read_dir(transfer_dir)
        .with_context(|| format!("reading transfer root {}", transfer_dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join("train").is_dir() && path.join("val").is_dir() {
            tasks.push((entry.file_name().to_string_lossy().into_owned(), path));
        } else {
            tracing::warn!(
                "transfer candidate {} lacks train/ and val/ splits, skipping",
                path.display()
            );
        }
    }

    tasks.sort();
    Ok(tasks)
}

/// Run every discovered transfer task.
pub fn transfer_eval<B: AutodiffBackend>(
    backbone: &ResNet<B>,
    transfer_dir: &Path,
    batch_size: usize,
    num_workers: usize,
    devices: Vec<B::Device>,
    log_dir: &Path,
) -> anyhow::Result<Vec<TransferTaskResult>> {
    let tasks = discover_tasks(transfer_dir)?;
    if tasks.is_empty() {
        tracing::warn!("no transfer datasets under {}", transfer_dir.display());
        return Ok(Vec::new());
    }

    let mut results = Vec::with_capacity(tasks.len());
    for (name, path) in tasks {
        tracing::info!("transfer task {name}");

        let train_dataset = ImageFolder::scan(path.join("train"))?;
        let val_dataset = ImageFolder::scan(path.join("val"))?;
        if train_dataset.classes() != val_dataset.classes() {
            tracing::warn!(
                "transfer task {name}: train/val class lists differ \
                 ({} vs {} classes)",
                train_dataset.num_classes(),
                val_dataset.num_classes(),
            );
        }

        let config = ProbeConfig::linear(train_dataset.num_classes())
            .with_epochs(TRANSFER_EPOCHS);
        let metrics = train_probe(
            backbone.clone(),
            train_dataset,
            val_dataset,
            &config,
            batch_size,
            num_workers,
            devices.clone(),
            &log_dir.join(&name),
        )?;

        tracing::info!(
            "transfer task {name}: top1 {:.4} top5 {:.4}",
            metrics.top1,
            metrics.top5
        );
        results.push(TransferTaskResult {
            dataset: name,
            metrics,
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_split(root: &Path, name: &str, with_splits: bool) {
        let dir = root.join(name);
        if with_splits {
            std::fs::create_dir_all(dir.join("train")).unwrap();
            std::fs::create_dir_all(dir.join("val")).unwrap();
        } else {
            std::fs::create_dir_all(&dir).unwrap();
        }
    }

    #[test]
    fn test_discover_tasks_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        make_split(tmp.path(), "flowers", true);
        make_split(tmp.path(), "aircraft", true);
        make_split(tmp.path(), "broken", false);
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let tasks = discover_tasks(tmp.path()).unwrap();
        let names: Vec<&str> = tasks.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["aircraft", "flowers"]);
    }

    #[test]
    fn test_discover_tasks_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(discover_tasks(&tmp.path().join("nope")).is_err());
    }
}
