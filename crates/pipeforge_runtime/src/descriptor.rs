//! Analysis descriptor: where an analysis' inputs live.

use crate::analysis::Analysis;
use crate::driver::{DriverConfig, DriverError};
use pipeforge_plan::{Pipeline, ScriptOptions, Table};
use pipeforge_toolbox::Toolbox;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// File name of the descriptor inside an output root
pub const DESCRIPTOR_FILE_NAME: &str = "analysis.json";

/// Paths that rebuild an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisDescriptor {
    /// Toolbox directory
    pub toolbox: PathBuf,
    /// Analysis name
    pub analysis: String,
    /// Pipeline document
    pub pipeline: PathBuf,
    /// Data table
    #[serde(rename = "tablePath")]
    pub table_path: PathBuf,
}

impl AnalysisDescriptor {
    /// Create a descriptor
    #[must_use]
    pub fn new(
        toolbox: impl Into<PathBuf>,
        analysis: impl Into<String>,
        pipeline: impl Into<PathBuf>,
        table_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            toolbox: toolbox.into(),
            analysis: analysis.into(),
            pipeline: pipeline.into(),
            table_path: table_path.into(),
        }
    }

    /// Write `analysis.json` into `dir`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, DriverError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| DriverError::io(dir, &e))?;
        let path = dir.join(DESCRIPTOR_FILE_NAME);
        let text = serde_json::to_string_pretty(self).map_err(|e| DriverError::Malformed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, text).map_err(|e| DriverError::io(&path, &e))?;
        Ok(path)
    }

    /// Read the descriptor from an output root, or from the file itself
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            path.join(DESCRIPTOR_FILE_NAME)
        } else {
            path.to_path_buf()
        };
        let text = std::fs::read_to_string(&file).map_err(|e| DriverError::io(&file, &e))?;
        serde_json::from_str(&text).map_err(|e| DriverError::Malformed {
            path: file.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load the toolbox, pipeline and table named by this descriptor
    ///
    /// # Errors
    ///
    /// Returns error if any of the three fails to load
    pub fn load_inputs(&self) -> Result<(Arc<Toolbox>, Pipeline, Table), DriverError> {
        let toolbox = Arc::new(Toolbox::load_dir(&self.toolbox)?);
        let pipeline = Pipeline::load(&self.pipeline, Arc::clone(&toolbox))?;
        let table = Table::load(&self.table_path)?;
        Ok((toolbox, pipeline, table))
    }

    /// Default output root: `<toolbox>/data/<analysis>`
    #[must_use]
    pub fn default_output_root(&self) -> PathBuf {
        self.toolbox.join("data").join(&self.analysis)
    }

    /// Compile the analysis into `output_root` and store this descriptor there
    ///
    /// # Errors
    ///
    /// Returns error if the inputs fail to load, the table lacks bound
    /// columns, or the script or descriptor cannot be written
    pub fn create_analysis(
        &self,
        output_root: impl AsRef<Path>,
        options: ScriptOptions,
        config: DriverConfig,
    ) -> Result<Analysis, DriverError> {
        let output_root = output_root.as_ref();
        let (_, pipeline, table) = self.load_inputs()?;
        let analysis =
            Analysis::create(&self.analysis, &pipeline, &table, output_root, options, config)?;
        let path = self.save(analysis.output_root())?;
        info!(analysis = %self.analysis, descriptor = %path.display(), "Analysis created");
        Ok(analysis)
    }
}
