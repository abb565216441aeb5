//! Lineage persistence.
//!
//! The core only fixes the in-memory shape of a sealed `LineageGraph`;
//! sinks decide where it goes. `JsonLineageSink` writes one pretty-printed
//! JSON document per run, named after the run id.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use polyplan_core::lineage::LineageGraph;

use crate::error::{ExecError, Result};

pub trait LineageSink: Send + Sync {
    /// Persist a sealed graph; returns where it went.
    fn persist(&self, graph: &LineageGraph) -> Result<PathBuf>;
}

#[derive(Debug, Clone)]
pub struct JsonLineageSink {
    dir: PathBuf,
}

impl JsonLineageSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, graph: &LineageGraph) -> PathBuf {
        self.dir.join(format!("lineage-{}.json", graph.run_id()))
    }
}

impl LineageSink for JsonLineageSink {
    fn persist(&self, graph: &LineageGraph) -> Result<PathBuf> {
        let path = self.path_for(graph);
        let io = |source| ExecError::Persist {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io)?;
        let json = serde_json::to_vec_pretty(graph)?;
        fs::write(&path, json).map_err(io)?;
        info!(path = %path.display(), nodes = graph.len(), "lineage persisted");
        Ok(path)
    }
}

/// Read back a graph written by `JsonLineageSink`.
pub fn load_lineage(path: impl AsRef<Path>) -> Result<LineageGraph> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| ExecError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyplan_core::id::TaskId;
    use polyplan_core::lineage::{ExecutionLineageNode, LineageBuilder, LineagePhase};
    use uuid::Uuid;

    #[test]
    fn persisted_graph_reads_back() {
        let mut b = LineageBuilder::new();
        let p = b.add(ExecutionLineageNode::new(TaskId::new(0), "src", LineagePhase::Prepare));
        let m = b.add(ExecutionLineageNode::new(TaskId::new(0), "src", LineagePhase::Main));
        b.add_predecessor(m, p);
        let graph = b.seal(Uuid::new_v4(), "abc".into(), 1, 2);

        let dir = std::env::temp_dir().join(format!("polyplan-lineage-{}", std::process::id()));
        let sink = JsonLineageSink::new(&dir);
        let path = sink.persist(&graph).unwrap();
        let back = load_lineage(&path).unwrap();
        assert_eq!(back.run_id(), graph.run_id());
        assert_eq!(back.shape(), graph.shape());
        let _ = fs::remove_dir_all(dir);
    }
}
