//! Dataflow roots: inline collections and line-oriented text files.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::time::{Duration, Instant};

use tracing::debug;

use polyplan_core::channel::{split_round_robin, ChannelDescriptor, ChannelInstance};
use polyplan_core::operator::{
    Evaluation, EvaluationError, ExecutionContext, ExecutionOperator, OperatorContext,
};
use polyplan_core::platform::Platform;
use polyplan_core::types::{Record, Scalar};

use crate::bound::{bound_identity, fill_output, Binding};

/// Partition source rows the way the bound platform expects them.
fn partition(binding: &Binding, records: Vec<Record>, ctx: &ExecutionContext) -> Vec<Vec<Record>> {
    match binding.platform {
        Platform::Local => vec![records],
        Platform::Distributed => split_round_robin(records, ctx.config.distributed_parallelism),
    }
}

#[derive(Debug, Clone)]
pub struct CollectionSource {
    pub binding: Binding,
    pub records: Vec<Record>,
}

impl CollectionSource {
    pub fn new(binding: Binding, records: Vec<Record>) -> Self {
        Self { binding, records }
    }
}

impl ExecutionOperator for CollectionSource {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "collection_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn supported_input_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        Vec::new()
    }

    fn supported_output_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.binding.output_channels()
    }

    fn evaluate(
        &self,
        _inputs: Vec<ChannelInstance>,
        outputs: Vec<ChannelInstance>,
        ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> Result<Evaluation, EvaluationError> {
        let started = Instant::now();
        let parts = partition(&self.binding, self.records.clone(), ctx);
        let prepared = started.elapsed();

        let main_started = Instant::now();
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(prepared, main_started.elapsed(), 0, &produced);
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads a local file or an http(s) resource; every line becomes a record
/// `{line: <text>}`.
#[derive(Debug, Clone)]
pub struct TextFileSource {
    pub binding: Binding,
    pub url: String,
}

impl TextFileSource {
    pub fn new(binding: Binding, url: impl Into<String>) -> Self {
        Self {
            binding,
            url: url.into(),
        }
    }

    /// Filesystem path behind a `file://` URL or a bare path.
    pub fn path(&self) -> &str {
        self.url.strip_prefix("file://").unwrap_or(&self.url)
    }

    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    fn access(&self, source: io::Error) -> EvaluationError {
        EvaluationError::DataAccess {
            location: self.url.clone(),
            source,
        }
    }

    fn read(&self) -> Result<Vec<Record>, EvaluationError> {
        let lines: Vec<String> = if self.is_remote() {
            self.fetch()?.lines().map(str::to_string).collect()
        } else {
            let file = File::open(self.path()).map_err(|e| self.access(e))?;
            BufReader::new(file)
                .lines()
                .collect::<io::Result<_>>()
                .map_err(|e| self.access(e))?
        };
        Ok(lines
            .into_iter()
            .map(|line| Record::new().with("line", Scalar::Str(line)))
            .collect())
    }

    fn fetch(&self) -> Result<String, EvaluationError> {
        let remote = |e: reqwest::Error| self.access(io::Error::new(io::ErrorKind::Other, e));
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(remote)?;
        let response = client.get(&self.url).send().map_err(remote)?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.access(io::Error::new(
                io::ErrorKind::NotFound,
                format!("server answered {status}"),
            )));
        }
        response.text().map_err(remote)
    }
}

impl ExecutionOperator for TextFileSource {
    bound_identity!();

    fn kind(&self) -> &'static str {
        "text_file_source"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn supported_input_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        Vec::new()
    }

    fn supported_output_channels(&self, _slot: usize) -> Vec<ChannelDescriptor> {
        self.binding.output_channels()
    }

    fn evaluate(
        &self,
        _inputs: Vec<ChannelInstance>,
        outputs: Vec<ChannelInstance>,
        ctx: &ExecutionContext,
        op_ctx: &OperatorContext,
    ) -> Result<Evaluation, EvaluationError> {
        let started = Instant::now();
        let records = self.read()?;
        debug!(url = %self.url, remote = self.is_remote(), lines = records.len(), "read text source");
        let prepared = started.elapsed();

        let main_started = Instant::now();
        let parts = partition(&self.binding, records, ctx);
        let produced = fill_output(outputs, parts, self.name())?;
        let (prepare, main) = op_ctx.lineage(prepared, main_started.elapsed(), 0, &produced);
        Ok(Evaluation {
            prepare,
            main,
            produced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{op_ctx, output};
    use polyplan_core::config::EngineConfig;
    use polyplan_core::id::Epoch;

    #[test]
    fn distributed_collection_is_split_into_partitions() {
        let records: Vec<Record> = (0..5).map(|i| Record::new().with("i", Scalar::I64(i))).collect();
        let src = CollectionSource::new(Binding::new("src", Platform::Distributed, Epoch::INITIAL), records);
        let mut cfg = EngineConfig::default();
        cfg.distributed_parallelism = 2;
        let ctx = ExecutionContext::new(cfg);
        let eval = src
            .evaluate(vec![], vec![output(ChannelDescriptor::Partitioned)], &ctx, &op_ctx(&src))
            .unwrap();
        let parts = eval.produced.into_iter().next().unwrap().into_partitions().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(eval.main.realized.unwrap().output_cardinality, 5);
    }

    #[test]
    fn missing_text_file_is_a_data_access_fault() {
        let src = TextFileSource::new(
            Binding::new("logs", Platform::Local, Epoch::INITIAL),
            "file:///definitely/not/here.txt",
        );
        let ctx = ExecutionContext::new(EngineConfig::default());
        let err = src
            .evaluate(vec![], vec![output(ChannelDescriptor::Stream)], &ctx, &op_ctx(&src))
            .unwrap_err();
        match err {
            EvaluationError::DataAccess { location, .. } => {
                assert_eq!(location, "file:///definitely/not/here.txt")
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn text_lines_become_records() {
        let path = std::env::temp_dir().join(format!("polyplan-src-{}.txt", std::process::id()));
        std::fs::write(&path, "alpha\nbeta\n").unwrap();
        let src = TextFileSource::new(
            Binding::new("logs", Platform::Local, Epoch::INITIAL),
            format!("file://{}", path.display()),
        );
        let ctx = ExecutionContext::new(EngineConfig::default());
        let eval = src
            .evaluate(vec![], vec![output(ChannelDescriptor::Collection)], &ctx, &op_ctx(&src))
            .unwrap();
        let rows = eval.produced.into_iter().next().unwrap().into_records().unwrap();
        assert_eq!(rows[1].get("line"), Some(&Scalar::Str("beta".into())));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unreachable_http_source_is_a_data_access_fault() {
        // Bind then release a loopback port so nothing is listening on it.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/lines.txt");
        let src = TextFileSource::new(Binding::new("remote", Platform::Local, Epoch::INITIAL), url.clone());
        assert!(src.is_remote());
        let ctx = ExecutionContext::new(EngineConfig::default());
        match src.evaluate(vec![], vec![output(ChannelDescriptor::Stream)], &ctx, &op_ctx(&src)) {
            Err(EvaluationError::DataAccess { location, .. }) => assert_eq!(location, url),
            other => panic!("expected a data-access fault, got {other:?}"),
        }
    }

    #[test]
    fn only_http_schemes_are_remote() {
        let binding = Binding::new("t", Platform::Local, Epoch::INITIAL);
        assert!(TextFileSource::new(binding.clone(), "https://example.org/a.txt").is_remote());
        let local = TextFileSource::new(binding, "file:///tmp/a.txt");
        assert!(!local.is_remote());
        assert_eq!(local.path(), "/tmp/a.txt");
    }
}
