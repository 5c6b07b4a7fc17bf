//! Catalog of pre-generated report artifacts.
//!
//! The offline training scripts drop charts and small summaries into a
//! reports directory. The dashboard never computes these; it only lists what
//! the active [`ReportProfile`] expects and whether each file exists yet.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// Default location of report artifacts.
pub const DEFAULT_REPORTS_DIR: &str = "reports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    Table,
    Text,
}

impl ArtifactKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Table => "text/csv; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
        }
    }
}

/// One expected artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSpec {
    pub title: &'static str,
    pub file_name: &'static str,
    pub kind: ArtifactKind,
    /// Offline step that produces the file, shown when it is missing.
    pub produced_by: &'static str,
    pub guide: Option<&'static str>,
}

const SHAP_GUIDE: &str = "Features are listed top to bottom by overall impact on yield. \
Red points are high sensor values, blue points low. Points right of centre push the \
prediction towards Fail (1), points left towards Pass (0). A feature with red on the \
right means higher readings make a failure more likely.";

/// Named set of artifacts shown on the report page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportProfile {
    /// The charts the first dashboard revision showed.
    Basic,
    /// Everything the current training scripts produce.
    Full,
}

impl std::str::FromStr for ReportProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown report profile '{other}' (expected basic or full)")),
        }
    }
}

impl ReportProfile {
    pub fn specs(&self) -> Vec<ReportSpec> {
        let basic = [
            ReportSpec {
                title: "Feature Importance",
                file_name: "Feature Importance.png",
                kind: ArtifactKind::Image,
                produced_by: "train_upgrade",
                guide: None,
            },
            ReportSpec {
                title: "Confusion Matrix",
                file_name: "Confusion Matrix.png",
                kind: ArtifactKind::Image,
                produced_by: "train_upgrade",
                guide: None,
            },
            ReportSpec {
                title: "ROC Curve",
                file_name: "AUC.png",
                kind: ArtifactKind::Image,
                produced_by: "train_upgrade",
                guide: None,
            },
        ];

        match self {
            Self::Basic => basic.to_vec(),
            Self::Full => {
                let mut specs = vec![ReportSpec {
                    title: "SHAP Summary",
                    file_name: "SHAP Summary.png",
                    kind: ArtifactKind::Image,
                    produced_by: "train_upgrade",
                    guide: Some(SHAP_GUIDE),
                }];
                specs.extend(basic);
                specs.extend([
                    ReportSpec {
                        title: "Learning Curve",
                        file_name: "learning_curve.png",
                        kind: ArtifactKind::Image,
                        produced_by: "step1",
                        guide: None,
                    },
                    ReportSpec {
                        title: "Model Comparison Chart",
                        file_name: "model_comparison_final.png",
                        kind: ArtifactKind::Image,
                        produced_by: "step1",
                        guide: None,
                    },
                    ReportSpec {
                        title: "Model Comparison",
                        file_name: "model_comparison.csv",
                        kind: ArtifactKind::Table,
                        produced_by: "02_automl_training",
                        guide: None,
                    },
                    ReportSpec {
                        title: "Overfitting Analysis",
                        file_name: "overfitting_analysis.txt",
                        kind: ArtifactKind::Text,
                        produced_by: "step1",
                        guide: None,
                    },
                ]);
                specs
            }
        }
    }
}

/// Catalog entry with its on-disk status.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub title: &'static str,
    pub file_name: &'static str,
    pub kind: ArtifactKind,
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guide: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportCatalog {
    #[serde(skip)]
    dir: PathBuf,
    pub profile: ReportProfile,
    pub entries: Vec<ReportEntry>,
}

impl ReportCatalog {
    /// Check which of the profile's artifacts exist under `dir`.
    pub fn scan(dir: &Path, profile: ReportProfile) -> Self {
        let entries: Vec<ReportEntry> = profile
            .specs()
            .into_iter()
            .map(|spec| {
                let meta = std::fs::metadata(dir.join(spec.file_name))
                    .ok()
                    .filter(|m| m.is_file());
                let present = meta.is_some();
                ReportEntry {
                    title: spec.title,
                    file_name: spec.file_name,
                    kind: spec.kind,
                    present,
                    size_bytes: meta.map(|m| m.len()),
                    notice: (!present).then(|| {
                        format!(
                            "{} has not been generated yet. Run the {} step of the training pipeline.",
                            spec.file_name, spec.produced_by
                        )
                    }),
                    guide: spec.guide,
                }
            })
            .collect();

        debug!(
            dir = %dir.display(),
            present = entries.iter().filter(|e| e.present).count(),
            expected = entries.len(),
            "scanned report artifacts"
        );

        Self {
            dir: dir.to_path_buf(),
            profile,
            entries,
        }
    }

    /// Resolve a requested file name to a path, only for catalog entries that
    /// exist. Anything else (including traversal attempts) yields `None`.
    pub fn resolve(&self, file_name: &str) -> Option<(PathBuf, ArtifactKind)> {
        self.entries
            .iter()
            .find(|e| e.present && e.file_name == file_name)
            .map(|e| (self.dir.join(e.file_name), e.kind))
    }

    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present).count()
    }
}
